//! Plugin lifecycle: load, activate, release.
//!
//! ```text
//! Unloaded -> Loading -> Active { processing } -> Released -> Unloaded
//! ```
//!
//! Only the main loop drives these transitions. A failed load drops whatever
//! was acquired so far, in reverse order, and ends back in `Unloaded`.

use crate::audio::{ActiveProcessor, BusLayout, ProcessorSlot};
use crate::editor::EditorSession;
use crate::module::{
    BusDirection, ClassCategory, ClassInfo, Component, ComponentHandler, Controller, ModuleLoader,
    ParamId, PluginModule, ProcessSetup, RestartFlags,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use vstbridge_ipc::{BridgeError, DualState, LoadRequest, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unloaded,
    Loading,
    Active { processing: bool },
    Released,
}

/// The loaded module and its negotiated capabilities.
///
/// Field order is drop order: controller, then component, then the module
/// that provides their code.
pub struct PluginInstance {
    controller: Box<dyn Controller>,
    component: Box<dyn Component>,
    _module: Box<dyn PluginModule>,
    class: ClassInfo,
    layout: BusLayout,
    has_processor: bool,
}

impl PluginInstance {
    pub fn class(&self) -> &ClassInfo {
        &self.class
    }

    pub fn layout(&self) -> &BusLayout {
        &self.layout
    }

    pub fn has_processor(&self) -> bool {
        self.has_processor
    }
}

pub struct PluginLifecycle {
    loader: Box<dyn ModuleLoader>,
    handler: Arc<dyn ComponentHandler>,
    processors: Arc<ProcessorSlot>,
    editor: EditorSession,
    instance: Option<PluginInstance>,
    state: LifecycleState,
}

impl PluginLifecycle {
    pub fn new(
        loader: Box<dyn ModuleLoader>,
        handler: Arc<dyn ComponentHandler>,
        processors: Arc<ProcessorSlot>,
        editor: EditorSession,
    ) -> Self {
        Self {
            loader,
            handler,
            processors,
            editor,
            instance: None,
            state: LifecycleState::Unloaded,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn instance(&self) -> Option<&PluginInstance> {
        self.instance.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.instance.is_some()
    }

    pub fn editor_open(&self) -> bool {
        self.editor.is_open()
    }

    fn transition(&mut self, next: LifecycleState) {
        tracing::debug!("plugin lifecycle {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    pub fn load(&mut self, request: &LoadRequest) -> Result<()> {
        self.release();
        self.transition(LifecycleState::Loading);

        match self.try_load(request) {
            Ok(processing) => {
                self.transition(LifecycleState::Active { processing });
                Ok(())
            }
            Err(e) => {
                self.transition(LifecycleState::Released);
                self.transition(LifecycleState::Unloaded);
                Err(e)
            }
        }
    }

    fn try_load(&mut self, request: &LoadRequest) -> Result<bool> {
        let path = &request.path;
        let module = self.loader.open(path)?;

        let classes = module.classes();
        let Some(class) = classes.iter().find(|c| c.kind().is_processing()).cloned() else {
            tracing::warn!(
                "no processing class among {:?}",
                classes.iter().map(|c| &c.category).collect::<Vec<_>>()
            );
            return Err(BridgeError::NoCompatibleClass { path: path.clone() });
        };
        let midi_only = class.kind() == ClassCategory::Midi;

        let capabilities = module.instantiate(&class);
        let mut component = capabilities
            .component
            .ok_or(BridgeError::CapabilityMissing {
                capability: "Component",
            })?;
        let mut controller = capabilities
            .controller
            .ok_or(BridgeError::CapabilityMissing {
                capability: "Controller",
            })?;

        if let Err(code) = controller.set_component_handler(Arc::clone(&self.handler)) {
            tracing::debug!("setComponentHandler returned {}", code);
        }

        let mut processor = if midi_only {
            None
        } else {
            Some(component.processor().ok_or(BridgeError::CapabilityMissing {
                capability: "Processor",
            })?)
        };

        if let Some(processor) = processor.as_mut() {
            let setup = ProcessSetup::realtime(request.sample_rate, request.block_size);
            processor
                .setup_processing(&setup)
                .map_err(|code| BridgeError::SetupFailed { code: code.0 })?;
        }

        let layout = if midi_only {
            BusLayout::default()
        } else {
            activate_audio_buses(component.as_mut())
        };

        component
            .set_active(true)
            .map_err(|code| BridgeError::ActivationFailed { code: code.0 })?;

        let mut processing = false;
        let has_processor = processor.is_some();
        if let Some(mut processor) = processor {
            match processor.set_processing(true) {
                Ok(()) => processing = true,
                Err(code) => tracing::warn!("setProcessing(true) refused: {}", code),
            }
            self.processors.install(ActiveProcessor {
                processor,
                layout: layout.clone(),
            });
        }

        tracing::info!(
            "loaded {} ({}) from {}",
            class.name,
            class.category,
            path.display()
        );
        self.instance = Some(PluginInstance {
            controller,
            component,
            _module: module,
            class,
            layout,
            has_processor,
        });
        Ok(processing)
    }

    /// Safe to call in any state; always ends `Unloaded`.
    pub fn release(&mut self) {
        self.editor.hide();
        let Some(instance) = self.instance.take() else {
            self.mark_unloaded();
            return;
        };
        let processor = self.processors.take();
        self.teardown(instance, processor);
    }

    /// Like [`release`](Self::release), but waits at most `timeout` for an
    /// in-flight process call. If the call has not returned by then the
    /// instance is leaked, so its module stays loaded under the audio thread,
    /// and `false` is returned.
    pub fn release_within(&mut self, timeout: Duration) -> bool {
        self.editor.hide();
        let Some(instance) = self.instance.take() else {
            self.mark_unloaded();
            return true;
        };
        match self.processors.try_take_for(timeout) {
            Some(processor) => {
                self.teardown(instance, processor);
                true
            }
            None => {
                tracing::warn!(
                    "{} still processing after {:?}; leaking it",
                    instance.class.name,
                    timeout
                );
                std::mem::forget(instance);
                self.transition(LifecycleState::Released);
                self.transition(LifecycleState::Unloaded);
                false
            }
        }
    }

    fn mark_unloaded(&mut self) {
        if self.state != LifecycleState::Unloaded {
            self.transition(LifecycleState::Unloaded);
        }
    }

    fn teardown(&mut self, mut instance: PluginInstance, processor: Option<ActiveProcessor>) {
        self.transition(LifecycleState::Released);

        if let Some(mut active) = processor {
            if let Err(code) = active.processor.set_processing(false) {
                tracing::debug!("setProcessing(false) returned {}", code);
            }
            if let Err(code) = instance.component.set_active(false) {
                tracing::debug!("setActive(false) returned {}", code);
            }
            drop(active);
        } else if let Err(code) = instance.component.set_active(false) {
            tracing::debug!("setActive(false) returned {}", code);
        }

        tracing::info!("released {}", instance.class.name);
        drop(instance);
        self.transition(LifecycleState::Unloaded);
    }

    /// Notify the plugin after an externally applied state change.
    pub fn restart(&self, flags: RestartFlags) {
        self.handler.restart_component(flags);
    }

    /// `None` when nothing is loaded. A section the plugin fails to save is
    /// reported empty.
    pub fn save_state(&self) -> Option<DualState> {
        let instance = self.instance.as_ref()?;
        let component = instance.component.get_state().unwrap_or_else(|code| {
            tracing::warn!("component getState failed: {}", code);
            Vec::new()
        });
        let controller = instance.controller.get_state().unwrap_or_else(|code| {
            tracing::warn!("controller getState failed: {}", code);
            Vec::new()
        });
        Some(DualState::new(component, controller))
    }

    /// Apply the non-empty sections, then restart. Returns `false` when
    /// nothing is loaded.
    pub fn restore_state(&mut self, state: &DualState) -> bool {
        let Some(instance) = self.instance.as_mut() else {
            return false;
        };
        if !state.component.is_empty() {
            if let Err(code) = instance.component.set_state(&state.component) {
                tracing::warn!("component setState failed: {}", code);
            }
        }
        if !state.controller.is_empty() {
            if let Err(code) = instance.controller.set_state(&state.controller) {
                tracing::warn!("controller setState failed: {}", code);
            }
        }
        self.restart(RestartFlags::PARAM_VALUES_CHANGED | RestartFlags::RELOAD_COMPONENT);
        true
    }

    pub fn show_editor(&mut self) -> Result<()> {
        let Some(instance) = self.instance.as_mut() else {
            return Err(BridgeError::EditorError("no plugin loaded".to_string()));
        };
        let title = instance.class.name.clone();
        self.editor.show(instance.controller.as_mut(), &title)
    }

    pub fn hide_editor(&mut self) {
        self.editor.hide();
    }

    /// Push processor-originated values to the controller while an editor is open.
    pub fn relay_parameter_updates(&mut self, updates: HashMap<ParamId, f64>) {
        let Some(instance) = self.instance.as_mut() else {
            return;
        };
        for (id, value) in updates {
            let _ = instance.controller.set_param_normalized(id, value);
        }
    }
}

impl Drop for PluginLifecycle {
    fn drop(&mut self) {
        self.release();
    }
}

fn activate_audio_buses(component: &mut dyn Component) -> BusLayout {
    let mut layout = BusLayout::default();
    for (direction, channels) in [
        (BusDirection::Input, &mut layout.inputs),
        (BusDirection::Output, &mut layout.outputs),
    ] {
        for index in 0..component.audio_bus_count(direction) {
            channels.push(component.audio_bus_channels(direction, index).unwrap_or(0));
            if let Err(code) = component.activate_audio_bus(direction, index, true) {
                tracing::debug!("activateBus({:?}, {}) returned {}", direction, index, code);
            }
        }
    }
    layout
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::HeadlessWindows;
    use crate::module::ResultCode;
    use crate::testing::{StubBehavior, StubLoader, StubProbe};
    use vstbridge_ipc::LoadStage;

    fn lifecycle(behavior: StubBehavior) -> (PluginLifecycle, StubProbe, Arc<ProcessorSlot>) {
        let loader = StubLoader::new(behavior);
        let probe = loader.probe();
        let slot = Arc::new(ProcessorSlot::new());
        let lifecycle = PluginLifecycle::new(
            Box::new(loader),
            probe.handler(),
            Arc::clone(&slot),
            EditorSession::new(Box::new(HeadlessWindows)),
        );
        (lifecycle, probe, slot)
    }

    fn request() -> LoadRequest {
        LoadRequest::new("/plugins/Stub.vst3")
    }

    #[test]
    fn test_load_activates_and_installs_processor() {
        let (mut lc, probe, slot) = lifecycle(StubBehavior::default());
        lc.load(&request().with_sample_rate(48000.0).with_block_size(512))
            .unwrap();

        assert_eq!(lc.state(), LifecycleState::Active { processing: true });
        assert!(slot.is_occupied());
        assert_eq!(probe.live_instances(), 1);
        assert_eq!(probe.last_setup().unwrap().max_block_size, 512);
        assert_eq!(probe.last_setup().unwrap().sample_rate, 48000.0);

        let calls = probe.calls();
        let activate = calls.iter().position(|c| c == "component.set_active(true)");
        let processing = calls.iter().position(|c| c == "processor.set_processing(true)");
        assert!(activate.unwrap() < processing.unwrap());
        assert!(calls.contains(&"component.activate_bus(Output, 0)".to_string()));
    }

    #[test]
    fn test_at_most_one_instance_across_loads() {
        let (mut lc, probe, _slot) = lifecycle(StubBehavior::default());
        for _ in 0..3 {
            lc.load(&request()).unwrap();
            assert_eq!(probe.live_instances(), 1);
        }
        lc.release();
        assert_eq!(probe.live_instances(), 0);
        assert_eq!(probe.open_modules(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut lc, probe, slot) = lifecycle(StubBehavior::default());
        lc.load(&request()).unwrap();

        lc.release();
        let after_first = probe.calls().len();
        assert_eq!(lc.state(), LifecycleState::Unloaded);
        assert!(lc.instance().is_none());
        assert!(!slot.is_occupied());

        lc.release();
        assert_eq!(lc.state(), LifecycleState::Unloaded);
        assert!(lc.instance().is_none());
        assert_eq!(probe.calls().len(), after_first);

        let calls = probe.calls();
        let stop = calls.iter().position(|c| c == "processor.set_processing(false)");
        let deactivate = calls.iter().position(|c| c == "component.set_active(false)");
        assert!(stop.unwrap() < deactivate.unwrap());
    }

    #[test]
    fn test_module_open_failure() {
        let (mut lc, _probe, _slot) = lifecycle(StubBehavior {
            fail_open: true,
            ..Default::default()
        });
        let err = lc.load(&request()).unwrap_err();
        assert_eq!(err.load_stage(), Some(LoadStage::Opening));
        assert_eq!(lc.state(), LifecycleState::Unloaded);
    }

    #[test]
    fn test_no_compatible_class_unloads_module() {
        let (mut lc, probe, _slot) = lifecycle(StubBehavior {
            classes: vec![ClassInfo::new([0; 16], "Ctrl", "Component Controller Class")],
            ..Default::default()
        });
        let err = lc.load(&request()).unwrap_err();
        assert!(matches!(err, BridgeError::NoCompatibleClass { .. }));
        assert_eq!(probe.open_modules(), 0);
    }

    #[test]
    fn test_first_processing_class_wins() {
        let (mut lc, _probe, _slot) = lifecycle(StubBehavior {
            classes: vec![
                ClassInfo::new([1; 16], "Ctrl", "Component Controller Class"),
                ClassInfo::new([2; 16], "Synth", "Instrument Module Class"),
                ClassInfo::new([3; 16], "Fx", "Audio Module Class"),
            ],
            ..Default::default()
        });
        lc.load(&request()).unwrap();
        assert_eq!(lc.instance().unwrap().class().name, "Synth");
    }

    #[test]
    fn test_missing_capabilities_release_everything() {
        for behavior in [
            StubBehavior {
                missing_component: true,
                ..Default::default()
            },
            StubBehavior {
                missing_controller: true,
                ..Default::default()
            },
            StubBehavior {
                missing_processor: true,
                ..Default::default()
            },
        ] {
            let (mut lc, probe, slot) = lifecycle(behavior);
            let err = lc.load(&request()).unwrap_err();
            assert!(matches!(err, BridgeError::CapabilityMissing { .. }), "{err}");
            assert_eq!(lc.state(), LifecycleState::Unloaded);
            assert_eq!(probe.live_instances(), 0);
            assert_eq!(probe.open_modules(), 0);
            assert!(!slot.is_occupied());
        }
    }

    #[test]
    fn test_setup_and_activation_failures() {
        let (mut lc, probe, slot) = lifecycle(StubBehavior {
            setup_result: Err(ResultCode(2)),
            ..Default::default()
        });
        let err = lc.load(&request()).unwrap_err();
        assert!(matches!(err, BridgeError::SetupFailed { code: 2 }));
        assert_eq!(probe.live_instances(), 0);
        assert!(!slot.is_occupied());

        let (mut lc, probe, slot) = lifecycle(StubBehavior {
            activate_result: Err(ResultCode::FALSE),
            ..Default::default()
        });
        let err = lc.load(&request()).unwrap_err();
        assert!(matches!(err, BridgeError::ActivationFailed { code: 1 }));
        assert_eq!(probe.live_instances(), 0);
        assert!(!slot.is_occupied());
    }

    #[test]
    fn test_refused_processing_is_not_fatal() {
        let (mut lc, _probe, slot) = lifecycle(StubBehavior {
            processing_result: Err(ResultCode::FALSE),
            ..Default::default()
        });
        lc.load(&request()).unwrap();
        assert_eq!(lc.state(), LifecycleState::Active { processing: false });
        assert!(slot.is_occupied());
    }

    #[test]
    fn test_midi_class_loads_without_processor() {
        let (mut lc, probe, slot) = lifecycle(StubBehavior {
            classes: vec![ClassInfo::new([4; 16], "Arp", "MIDI Module Class")],
            missing_processor: true,
            ..Default::default()
        });
        lc.load(&request()).unwrap();
        assert_eq!(lc.state(), LifecycleState::Active { processing: false });
        assert!(!lc.instance().unwrap().has_processor());
        assert!(!slot.is_occupied());
        assert!(!probe.calls().iter().any(|c| c.starts_with("component.activate_bus")));
    }

    #[test]
    fn test_state_save_and_restore() {
        let (mut lc, probe, _slot) = lifecycle(StubBehavior {
            component_state: b"comp".to_vec(),
            controller_state: Vec::new(),
            ..Default::default()
        });
        assert!(lc.save_state().is_none());

        lc.load(&request()).unwrap();
        let state = lc.save_state().unwrap();
        assert_eq!(state.component, b"comp");
        assert!(state.controller.is_empty());

        assert!(lc.restore_state(&DualState::new(b"new".to_vec(), Vec::new())));
        let calls = probe.calls();
        assert!(calls.contains(&"component.set_state(3)".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("controller.set_state")));
        assert_eq!(
            probe.restarts(),
            vec![RestartFlags::PARAM_VALUES_CHANGED | RestartFlags::RELOAD_COMPONENT]
        );
    }

    #[test]
    fn test_restore_without_plugin_is_ignored() {
        let (mut lc, probe, _slot) = lifecycle(StubBehavior::default());
        assert!(!lc.restore_state(&DualState::new(vec![1], vec![2])));
        assert!(probe.restarts().is_empty());
    }

    #[test]
    fn test_release_within_leaks_instance_held_by_a_cycle() {
        let (mut lc, probe, slot) = lifecycle(StubBehavior::default());
        lc.load(&request()).unwrap();

        let in_cycle = slot.lock();
        assert!(!lc.release_within(Duration::from_millis(20)));
        drop(in_cycle);

        assert_eq!(lc.state(), LifecycleState::Unloaded);
        assert!(!lc.is_loaded());
        // nothing was torn down under the running cycle
        assert_eq!(probe.live_instances(), 1);
        assert_eq!(probe.open_modules(), 1);
        assert!(!probe
            .calls()
            .contains(&"component.set_active(false)".to_string()));
        assert!(slot.is_occupied());

        // a later release leaves the slot alone
        lc.release();
        assert!(slot.is_occupied());
    }

    #[test]
    fn test_release_within_tears_down_when_idle() {
        let (mut lc, probe, slot) = lifecycle(StubBehavior::default());
        lc.load(&request()).unwrap();

        assert!(lc.release_within(Duration::from_millis(20)));
        assert_eq!(lc.state(), LifecycleState::Unloaded);
        assert_eq!(probe.live_instances(), 0);
        assert_eq!(probe.open_modules(), 0);
        assert!(!slot.is_occupied());
    }
}
