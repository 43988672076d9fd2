//! Error types for the host bridge

use crate::state::StateDecodeError;
use std::path::PathBuf;
use thiserror::Error;

/// The step of a plugin load that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Opening,
    Discovery,
    Instantiation,
    Setup,
    Activation,
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadStage::Opening => write!(f, "opening module"),
            LoadStage::Discovery => write!(f, "discovering classes"),
            LoadStage::Instantiation => write!(f, "creating instance"),
            LoadStage::Setup => write!(f, "setting up processing"),
            LoadStage::Activation => write!(f, "activating"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to open plugin module: {path}\n  Reason: {reason}")]
    ModuleLoad { path: PathBuf, reason: String },

    #[error("No compatible class (audio, instrument or MIDI) in {path}")]
    NoCompatibleClass { path: PathBuf },

    #[error("Plugin does not expose a {capability} capability")]
    CapabilityMissing { capability: &'static str },

    #[error("Processing setup failed: code {code:#x}")]
    SetupFailed { code: i32 },

    #[error("Component activation failed: code {code:#x}")]
    ActivationFailed { code: i32 },

    #[error("Malformed command: {0}")]
    MalformedCommand(String),

    #[error("State restore skipped: {0}")]
    StateDecode(#[from] StateDecodeError),

    #[error("Plugin editor error: {0}")]
    EditorError(String),

    #[error("Shared memory error: {0}")]
    SharedMemoryError(String),

    #[error("Signal error: {0}")]
    SignalError(String),

    #[error("Bridge connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Timeout after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Load step this error aborted, if it is a load failure.
    pub fn load_stage(&self) -> Option<LoadStage> {
        match self {
            BridgeError::ModuleLoad { .. } => Some(LoadStage::Opening),
            BridgeError::NoCompatibleClass { .. } => Some(LoadStage::Discovery),
            BridgeError::CapabilityMissing { .. } => Some(LoadStage::Instantiation),
            BridgeError::SetupFailed { .. } => Some(LoadStage::Setup),
            BridgeError::ActivationFailed { .. } => Some(LoadStage::Activation),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_stage_display() {
        assert_eq!(LoadStage::Opening.to_string(), "opening module");
        assert_eq!(LoadStage::Discovery.to_string(), "discovering classes");
        assert_eq!(LoadStage::Instantiation.to_string(), "creating instance");
        assert_eq!(LoadStage::Setup.to_string(), "setting up processing");
        assert_eq!(LoadStage::Activation.to_string(), "activating");
    }

    #[test]
    fn test_bridge_error_display() {
        let err = BridgeError::ModuleLoad {
            path: PathBuf::from("/plugins/Reverb.vst3"),
            reason: "not found".to_string(),
        };
        assert!(err.to_string().contains("Reverb.vst3"));
        assert!(err.to_string().contains("not found"));

        let err = BridgeError::ActivationFailed { code: 1 };
        assert!(err.to_string().contains("0x1"));

        let err = BridgeError::Timeout {
            operation: "host-done".to_string(),
            duration_ms: 1000,
        };
        assert!(err.to_string().contains("1000ms"));
        assert!(err.to_string().contains("host-done"));
    }

    #[test]
    fn test_load_stage_mapping() {
        let err = BridgeError::CapabilityMissing {
            capability: "Processor",
        };
        assert_eq!(err.load_stage(), Some(LoadStage::Instantiation));
        assert!(err.to_string().contains("Processor"));

        let err = BridgeError::SetupFailed { code: -1 };
        assert_eq!(err.load_stage(), Some(LoadStage::Setup));

        let err = BridgeError::MalformedCommand("unterminated quote".into());
        assert_eq!(err.load_stage(), None);
    }
}
