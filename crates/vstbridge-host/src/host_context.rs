//! The host's component-handler implementation.

use crate::dispatcher::MainLoopEvent;
use crate::module::{ComponentHandler, ParamId, RestartFlags};
use crate::params::ParameterMailbox;
use crossbeam_channel::Sender;
use std::sync::Arc;

/// Receives edit and restart callbacks from the loaded plugin.
///
/// Edits go to the pending-change mailbox drained by the audio thread; editor
/// requests are posted to the main loop rather than acted on here.
pub struct HostContext {
    pending: Arc<ParameterMailbox>,
    events: Sender<MainLoopEvent>,
}

impl HostContext {
    pub fn new(pending: Arc<ParameterMailbox>, events: Sender<MainLoopEvent>) -> Self {
        Self { pending, events }
    }
}

impl ComponentHandler for HostContext {
    fn perform_edit(&self, id: ParamId, value: f64) {
        self.pending.post(id, value);
    }

    fn restart_component(&self, flags: RestartFlags) {
        tracing::debug!("restart requested (flags {:#x})", flags.0);
    }

    fn request_open_editor(&self) {
        let _ = self.events.send(MainLoopEvent::ShowGui);
    }
}
