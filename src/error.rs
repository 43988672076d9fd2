//! Centralized error type for the vstbridge umbrella crate.
//!
//! Wraps the bridge errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Bridge(#[from] vstbridge_ipc::BridgeError),

    #[error("state: {0}")]
    State(#[from] vstbridge_ipc::StateDecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
