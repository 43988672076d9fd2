//! Host process for vstbridge.
//!
//! Loads one VST3 module and serves it to a controller process. Three threads
//! cooperate:
//!
//! - the listener answers the command pipe,
//! - the audio thread runs one plugin process call per ready/done handshake,
//! - the main loop (the caller's thread) owns the plugin and its editor.
//!
//! This crate is used by the `vstbridge-host` binary. Controllers talk to it
//! through `vstbridge-ipc`.

pub mod audio;
pub mod dispatcher;
pub mod editor;
pub mod host_context;
pub mod lifecycle;
pub mod listener;
pub mod module;
pub mod params;
pub mod session;

#[cfg(feature = "vst3")]
pub mod vst3_module;

#[doc(hidden)]
pub mod testing;

// Re-exports
pub use dispatcher::{MainLoop, MainLoopEvent, MainLoopHandle, SyncSlot};
pub use editor::{EditorSession, EditorWindow, HeadlessWindows, WindowProvider};
pub use lifecycle::{LifecycleState, PluginLifecycle};
pub use module::{ModuleLoader, PluginModule};
pub use session::{Session, ShutdownHandle};

pub use vstbridge_ipc::{BridgeConfig, BridgeError, LoadStage, Result};

/// Loader used when the crate is built without a plugin backend.
#[derive(Debug, Default)]
pub struct UnavailableLoader;

impl ModuleLoader for UnavailableLoader {
    fn open(&self, path: &std::path::Path) -> Result<Box<dyn PluginModule>> {
        Err(BridgeError::ModuleLoad {
            path: path.to_path_buf(),
            reason: "built without the vst3 feature".to_string(),
        })
    }
}

/// The loader for this build's plugin backend.
pub fn default_loader() -> Box<dyn ModuleLoader> {
    #[cfg(feature = "vst3")]
    {
        Box::new(vst3_module::Vst3Loader)
    }
    #[cfg(not(feature = "vst3"))]
    {
        Box::new(UnavailableLoader)
    }
}
