//! Bridge integration test modules
//!
//! - commands: command pipe replies and ordering
//! - state: `get_state` and state restore over the pipe
//! - audio: ready/done handshake through shared memory
//! - shutdown: `exit` and external shutdown

pub mod audio;
pub mod commands;
pub mod shutdown;
pub mod state;
