//! Shared pieces of the VST3 host bridge.
//!
//! A host process loads one plugin and serves it to a controller process over
//! two channels:
//!
//! - a line-based command pipe (`load_plugin`, `get_state`, `show_gui`, ...)
//! - a shared audio region with a ready/done signal pair for block processing
//!
//! This crate holds what both sides agree on. The host itself lives in
//! `vstbridge-host`.
//!
//! ## Usage
//!
//! ```ignore
//! use vstbridge_ipc::{AudioClient, BridgeConfig, CommandClient};
//!
//! let config = BridgeConfig::default().with_session_id(host_pid);
//! let mut commands = CommandClient::connect(&config).await?;
//! commands.send_line(r#"load_plugin "/plugins/Reverb.vst3" 48000 512"#).await?;
//!
//! let mut audio = AudioClient::open(&config)?;
//! audio.process_block(48000.0, [&in_l, &in_r], [&mut out_l, &mut out_r], timeout)?;
//! ```

pub mod error;
pub use error::{BridgeError, LoadStage, Result};

pub mod config;
pub use config::BridgeConfig;

pub mod protocol;
pub use protocol::{
    classify, AsyncCommand, CommandClass, LoadRequest, Response, SyncCommand, MAX_BLOCK_SIZE,
    MAX_COMMAND_LEN,
};

pub mod state;
pub use state::{Base64Codec, DualState, StateCodec, StateDecodeError, TextCodec};

#[doc(hidden)]
pub mod shared_memory;
pub use shared_memory::{AudioHeader, AudioSharedRegion, BlockBuffers, Slot};

pub mod signal;
pub use signal::{NamedSignal, ResetMode};

pub mod transport;
pub use transport::{LineTransport, TransportListener};

mod client;
pub use client::{AudioClient, CommandClient};
