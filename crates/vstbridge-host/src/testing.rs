//! In-memory plugin module for tests.
//!
//! [`StubLoader`] hands out modules whose behavior is set by [`StubBehavior`];
//! every call they receive is recorded in a shared [`StubProbe`].

use crate::module::{
    BusDirection, Capabilities, ClassInfo, Component, ComponentHandler, Controller, ModuleLoader,
    ParamId, ParentWindow, PlugView, PluginModule, PluginResult, ProcessData, ProcessSetup,
    Processor, RestartFlags, ViewSize,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vstbridge_ipc::{BridgeError, Result};

#[derive(Debug, Clone)]
pub struct StubBehavior {
    pub classes: Vec<ClassInfo>,
    pub fail_open: bool,
    pub missing_component: bool,
    pub missing_controller: bool,
    pub missing_processor: bool,
    pub setup_result: PluginResult,
    pub activate_result: PluginResult,
    pub processing_result: PluginResult,
    pub component_state: Vec<u8>,
    pub controller_state: Vec<u8>,
    pub input_buses: Vec<usize>,
    pub output_buses: Vec<usize>,
    /// Output automation emitted on every process call.
    pub output_params: Vec<(ParamId, f64)>,
    pub gain: f32,
    pub has_editor: bool,
    /// Sleep inside every process call.
    pub process_delay: Duration,
}

impl Default for StubBehavior {
    fn default() -> Self {
        Self {
            classes: vec![ClassInfo::new([7; 16], "StubFx", "Audio Module Class")],
            fail_open: false,
            missing_component: false,
            missing_controller: false,
            missing_processor: false,
            setup_result: Ok(()),
            activate_result: Ok(()),
            processing_result: Ok(()),
            component_state: Vec::new(),
            controller_state: Vec::new(),
            input_buses: vec![2],
            output_buses: vec![2],
            output_params: Vec::new(),
            gain: 1.0,
            has_editor: false,
            process_delay: Duration::ZERO,
        }
    }
}

#[derive(Default)]
struct ProbeInner {
    calls: Mutex<Vec<String>>,
    open_modules: AtomicUsize,
    live_instances: AtomicUsize,
    process_calls: AtomicUsize,
    last_setup: Mutex<Option<ProcessSetup>>,
    restarts: Mutex<Vec<RestartFlags>>,
    edits: Mutex<Vec<(ParamId, f64)>>,
    controller_params: Mutex<Vec<(ParamId, f64)>>,
    process_params: Mutex<Vec<Vec<(ParamId, f64)>>>,
}

/// Shared observation point for everything a stub module did.
#[derive(Clone, Default)]
pub struct StubProbe {
    inner: Arc<ProbeInner>,
}

impl StubProbe {
    fn record(&self, call: impl Into<String>) {
        self.inner.calls.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.calls.lock().clone()
    }

    pub fn open_modules(&self) -> usize {
        self.inner.open_modules.load(Ordering::SeqCst)
    }

    /// Component instances currently alive.
    pub fn live_instances(&self) -> usize {
        self.inner.live_instances.load(Ordering::SeqCst)
    }

    pub fn process_calls(&self) -> usize {
        self.inner.process_calls.load(Ordering::SeqCst)
    }

    pub fn last_setup(&self) -> Option<ProcessSetup> {
        *self.inner.last_setup.lock()
    }

    pub fn restarts(&self) -> Vec<RestartFlags> {
        self.inner.restarts.lock().clone()
    }

    pub fn edits(&self) -> Vec<(ParamId, f64)> {
        self.inner.edits.lock().clone()
    }

    /// Values the host pushed into the controller.
    pub fn controller_params(&self) -> Vec<(ParamId, f64)> {
        self.inner.controller_params.lock().clone()
    }

    /// Input automation seen by each process call.
    pub fn process_params(&self) -> Vec<Vec<(ParamId, f64)>> {
        self.inner.process_params.lock().clone()
    }

    /// A component handler that records into this probe.
    pub fn handler(&self) -> Arc<dyn ComponentHandler> {
        Arc::new(ProbeHandler {
            probe: self.clone(),
        })
    }
}

struct ProbeHandler {
    probe: StubProbe,
}

impl ComponentHandler for ProbeHandler {
    fn perform_edit(&self, id: ParamId, value: f64) {
        self.probe.inner.edits.lock().push((id, value));
    }

    fn restart_component(&self, flags: RestartFlags) {
        self.probe.inner.restarts.lock().push(flags);
    }
}

pub struct StubLoader {
    behavior: StubBehavior,
    probe: StubProbe,
}

impl StubLoader {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            probe: StubProbe::default(),
        }
    }

    pub fn probe(&self) -> StubProbe {
        self.probe.clone()
    }
}

impl ModuleLoader for StubLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>> {
        self.probe.record(format!("open({})", path.display()));
        if self.behavior.fail_open {
            return Err(BridgeError::ModuleLoad {
                path: path.to_path_buf(),
                reason: "stub configured to fail".to_string(),
            });
        }
        self.probe.inner.open_modules.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubModule {
            behavior: self.behavior.clone(),
            probe: self.probe.clone(),
        }))
    }
}

struct StubModule {
    behavior: StubBehavior,
    probe: StubProbe,
}

impl PluginModule for StubModule {
    fn classes(&self) -> Vec<ClassInfo> {
        self.behavior.classes.clone()
    }

    fn instantiate(&self, class: &ClassInfo) -> Capabilities {
        self.probe.record(format!("instantiate({})", class.name));
        let component: Option<Box<dyn Component>> = if self.behavior.missing_component {
            None
        } else {
            self.probe.inner.live_instances.fetch_add(1, Ordering::SeqCst);
            Some(Box::new(StubComponent {
                behavior: self.behavior.clone(),
                probe: self.probe.clone(),
                state: self.behavior.component_state.clone(),
            }))
        };
        let controller: Option<Box<dyn Controller>> = if self.behavior.missing_controller {
            None
        } else {
            Some(Box::new(StubController {
                behavior: self.behavior.clone(),
                probe: self.probe.clone(),
                state: self.behavior.controller_state.clone(),
                handler: None,
            }))
        };
        Capabilities {
            component,
            controller,
        }
    }
}

impl Drop for StubModule {
    fn drop(&mut self) {
        self.probe.inner.open_modules.fetch_sub(1, Ordering::SeqCst);
    }
}

struct StubComponent {
    behavior: StubBehavior,
    probe: StubProbe,
    state: Vec<u8>,
}

impl StubComponent {
    fn buses(&self, direction: BusDirection) -> &[usize] {
        match direction {
            BusDirection::Input => &self.behavior.input_buses,
            BusDirection::Output => &self.behavior.output_buses,
        }
    }
}

impl Component for StubComponent {
    fn get_state(&self) -> PluginResult<Vec<u8>> {
        Ok(self.state.clone())
    }

    fn set_state(&mut self, data: &[u8]) -> PluginResult {
        self.probe.record(format!("component.set_state({})", data.len()));
        self.state = data.to_vec();
        Ok(())
    }

    fn audio_bus_count(&self, direction: BusDirection) -> usize {
        self.buses(direction).len()
    }

    fn audio_bus_channels(&self, direction: BusDirection, index: usize) -> Option<usize> {
        self.buses(direction).get(index).copied()
    }

    fn activate_audio_bus(
        &mut self,
        direction: BusDirection,
        index: usize,
        _active: bool,
    ) -> PluginResult {
        self.probe
            .record(format!("component.activate_bus({:?}, {})", direction, index));
        Ok(())
    }

    fn set_active(&mut self, active: bool) -> PluginResult {
        self.probe.record(format!("component.set_active({})", active));
        if active {
            self.behavior.activate_result
        } else {
            Ok(())
        }
    }

    fn processor(&mut self) -> Option<Box<dyn Processor>> {
        if self.behavior.missing_processor {
            return None;
        }
        Some(Box::new(StubProcessor {
            behavior: self.behavior.clone(),
            probe: self.probe.clone(),
        }))
    }
}

impl Drop for StubComponent {
    fn drop(&mut self) {
        self.probe.inner.live_instances.fetch_sub(1, Ordering::SeqCst);
    }
}

struct StubController {
    behavior: StubBehavior,
    probe: StubProbe,
    state: Vec<u8>,
    handler: Option<Arc<dyn ComponentHandler>>,
}

impl Controller for StubController {
    fn get_state(&self) -> PluginResult<Vec<u8>> {
        Ok(self.state.clone())
    }

    fn set_state(&mut self, data: &[u8]) -> PluginResult {
        self.probe
            .record(format!("controller.set_state({})", data.len()));
        self.state = data.to_vec();
        Ok(())
    }

    fn set_component_handler(&mut self, handler: Arc<dyn ComponentHandler>) -> PluginResult {
        self.probe.record("controller.set_component_handler");
        self.handler = Some(handler);
        Ok(())
    }

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> PluginResult {
        self.probe.inner.controller_params.lock().push((id, value));
        Ok(())
    }

    fn create_view(&mut self) -> Option<Box<dyn PlugView>> {
        if !self.behavior.has_editor {
            return None;
        }
        self.probe.record("controller.create_view");
        Some(Box::new(StubView {
            probe: self.probe.clone(),
        }))
    }
}

struct StubView {
    probe: StubProbe,
}

impl PlugView for StubView {
    fn size(&self) -> Option<ViewSize> {
        Some(ViewSize {
            width: 320,
            height: 200,
        })
    }

    fn attach(&mut self, _parent: ParentWindow) -> PluginResult {
        self.probe.record("view.attach");
        Ok(())
    }

    fn detach(&mut self) -> PluginResult {
        self.probe.record("view.detach");
        Ok(())
    }
}

struct StubProcessor {
    behavior: StubBehavior,
    probe: StubProbe,
}

impl Processor for StubProcessor {
    fn setup_processing(&mut self, setup: &ProcessSetup) -> PluginResult {
        self.probe.record("processor.setup_processing");
        *self.probe.inner.last_setup.lock() = Some(*setup);
        self.behavior.setup_result
    }

    fn set_processing(&mut self, processing: bool) -> PluginResult {
        self.probe
            .record(format!("processor.set_processing({})", processing));
        if processing {
            self.behavior.processing_result
        } else {
            Ok(())
        }
    }

    fn process(&mut self, data: &mut ProcessData<'_>) -> PluginResult {
        self.probe.inner.process_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.inner.process_params.lock().push(
            data.input_params
                .queues
                .iter()
                .filter_map(|q| q.last_value().map(|v| (q.param_id, v)))
                .collect(),
        );
        if !self.behavior.process_delay.is_zero() {
            std::thread::sleep(self.behavior.process_delay);
        }

        let gain = self.behavior.gain;
        let bound = data
            .outputs
            .first()
            .map_or(0, Vec::len)
            .min(data.inputs.first().map_or(0, Vec::len));
        for ch in 0..bound {
            let input = data.inputs[0][ch];
            for (out, sample) in data.outputs[0][ch].iter_mut().zip(input) {
                *out = sample * gain;
            }
        }

        for &(id, value) in &self.behavior.output_params {
            data.output_params.queue_mut(id).add_point(0, value);
        }
        Ok(())
    }
}
