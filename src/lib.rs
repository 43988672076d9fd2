//! # vstbridge - Out-of-process VST3 hosting
//!
//! A controller process spawns `vstbridge-host`, which loads one VST3 module
//! and serves it over two channels:
//!
//! - **command pipe** - newline-terminated text commands (`load_plugin`,
//!   `get_state`, `show_gui`, `exit`, ...) answered with `OK` / `FAIL` lines
//! - **shared audio** - a fixed shared-memory region plus a ready/done signal
//!   pair; each handshake runs one plugin process call
//!
//! ## Crates
//!
//! - **vstbridge-ipc** - protocol, state codec, shared region, signals, transport
//!   and the controller-side clients
//! - **vstbridge-host** - lifecycle, main loop, audio thread, listener and the
//!   `vstbridge-host` binary
//!
//! ## Quick Start
//!
//! ```ignore
//! use vstbridge::prelude::*;
//!
//! let config = BridgeConfig::default().with_session_id(host_pid);
//! let mut commands = CommandClient::connect(&config).await?;
//! commands.send_line(r#"load_plugin "/plugins/Delay.vst3" 48000 256"#).await?;
//! let saved = commands.get_state().await?;
//! commands.exit().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `default` - everything except real module loading
//! - `vst3` - load VST3 binaries and bundles in the host

/// Re-export of vstbridge-ipc for direct access
pub use vstbridge_ipc as ipc;

/// Re-export of vstbridge-host for direct access
pub use vstbridge_host as host;

mod error;
pub use error::{Error, Result};

pub use vstbridge_ipc::{
    AsyncCommand, AudioClient, BridgeConfig, BridgeError, CommandClient, DualState, LoadRequest,
    Response, StateCodec,
};
pub use vstbridge_host::{Session, ShutdownHandle};

/// Convenience prelude for common imports
pub mod prelude {
    pub use crate::{
        AsyncCommand, AudioClient, BridgeConfig, CommandClient, DualState, Error, LoadRequest,
        Response, Result, Session, ShutdownHandle, StateCodec,
    };
}
