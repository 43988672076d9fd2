//! Plugin editor hosting.
//!
//! Editor views have single-thread affinity: every method here is called from
//! the main loop and nowhere else. Other threads ask for the editor by posting
//! `ShowGui` / `HideGui` events.

use crate::module::{Controller, ParentWindow, PlugView, ViewSize};
use vstbridge_ipc::{BridgeError, Result};

pub const DEFAULT_EDITOR_SIZE: ViewSize = ViewSize {
    width: 800,
    height: 600,
};

/// A top-level window an editor view is attached to. Dropping it closes it.
pub trait EditorWindow {
    fn parent(&self) -> ParentWindow;
    fn resize(&mut self, size: ViewSize);
    fn show(&mut self);
}

/// Creates editor windows on the main-loop thread.
pub trait WindowProvider {
    fn open(&mut self, title: &str, size: ViewSize) -> Result<Box<dyn EditorWindow>>;
}

/// For sessions without a window system; every open fails.
#[derive(Debug, Default)]
pub struct HeadlessWindows;

impl WindowProvider for HeadlessWindows {
    fn open(&mut self, _title: &str, _size: ViewSize) -> Result<Box<dyn EditorWindow>> {
        Err(BridgeError::EditorError(
            "no window system available".to_string(),
        ))
    }
}

struct OpenEditor {
    view: Box<dyn PlugView>,
    window: Box<dyn EditorWindow>,
}

/// At most one open editor.
pub struct EditorSession {
    provider: Box<dyn WindowProvider>,
    open: Option<OpenEditor>,
}

impl EditorSession {
    pub fn new(provider: Box<dyn WindowProvider>) -> Self {
        Self {
            provider,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Re-shows an open editor, otherwise creates the view and a window for it.
    pub fn show(&mut self, controller: &mut dyn Controller, title: &str) -> Result<()> {
        if let Some(open) = self.open.as_mut() {
            open.window.show();
            return Ok(());
        }

        let mut view = controller
            .create_view()
            .ok_or_else(|| BridgeError::EditorError("plugin has no editor view".to_string()))?;
        let size = view.size().unwrap_or(DEFAULT_EDITOR_SIZE);

        let mut window = self.provider.open(title, size)?;
        // window is dropped (closed) on attach failure
        view.attach(window.parent()).map_err(|code| {
            BridgeError::EditorError(format!("attaching editor view failed: code {}", code))
        })?;

        if let Some(actual) = view.size() {
            window.resize(actual);
        }
        window.show();
        self.open = Some(OpenEditor { view, window });
        Ok(())
    }

    pub fn hide(&mut self) {
        if let Some(mut open) = self.open.take() {
            if let Err(code) = open.view.detach() {
                tracing::warn!("editor view detach returned {}", code);
            }
            drop(open.view);
            drop(open.window);
        }
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.hide();
    }
}
