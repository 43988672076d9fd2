//! Session configuration and endpoint naming.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(windows)]
mod defaults {
    pub const PIPE_BASE: &str = r"\\.\pipe\VstBridge";
    pub const SHM_BASE: &str = r"Local\VstSharedAudio";
    pub const EVENT_READY_BASE: &str = r"Local\VstClientReady";
    pub const EVENT_DONE_BASE: &str = r"Local\VstHostDone";

    pub fn pipe_base() -> String {
        PIPE_BASE.to_string()
    }
}

#[cfg(unix)]
mod defaults {
    pub const SHM_BASE: &str = "VstSharedAudio";
    pub const EVENT_READY_BASE: &str = "VstClientReady";
    pub const EVENT_DONE_BASE: &str = "VstHostDone";

    pub fn pipe_base() -> String {
        std::env::temp_dir()
            .join("VstBridge")
            .to_string_lossy()
            .into_owned()
    }
}

/// Identity and timing of one host session.
///
/// Every IPC endpoint is named `<base>_<session_id>` so several hosts can run
/// side by side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub session_id: u64,
    pub pipe_base: String,
    pub shm_base: String,
    pub event_ready_base: String,
    pub event_done_base: String,

    /// Main-loop refresh tick (parameter relay to the editor).
    pub tick_interval_ms: u64,

    /// Bounded wait on "client-ready" so the audio thread notices shutdown.
    pub audio_wait_timeout_ms: u64,

    /// Hard limit per worker join during shutdown.
    pub join_timeout_ms: u64,

    pub max_command_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session_id: u64::from(std::process::id()),
            pipe_base: defaults::pipe_base(),
            shm_base: defaults::SHM_BASE.to_string(),
            event_ready_base: defaults::EVENT_READY_BASE.to_string(),
            event_done_base: defaults::EVENT_DONE_BASE.to_string(),
            tick_interval_ms: 33,
            audio_wait_timeout_ms: 1000,
            join_timeout_ms: 2000,
            max_command_len: crate::protocol::MAX_COMMAND_LEN,
        }
    }
}

impl BridgeConfig {
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    fn endpoint(&self, base: &str) -> String {
        format!("{}_{}", base, self.session_id)
    }

    pub fn pipe_name(&self) -> String {
        self.endpoint(&self.pipe_base)
    }

    pub fn shm_name(&self) -> String {
        self.endpoint(&self.shm_base)
    }

    pub fn event_ready_name(&self) -> String {
        self.endpoint(&self.event_ready_base)
    }

    pub fn event_done_name(&self) -> String {
        self.endpoint(&self.event_done_base)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn audio_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.audio_wait_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}
