//! Capability surface of a loadable plugin module.
//!
//! A [`ModuleLoader`] opens a module, the module lists its classes, and
//! instantiating a class yields a [`Capabilities`] set. The host never looks
//! past these traits, so the VST3 backend and the test stub are interchangeable.

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::sync::Arc;
use vstbridge_ipc::Result;

pub type ParamId = u32;

/// Status code returned by a plugin call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const FALSE: Self = Self(1);
    pub const NOT_IMPLEMENTED: Self = Self(3);
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

pub type PluginResult<T = ()> = std::result::Result<T, ResultCode>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassCategory {
    Audio,
    Instrument,
    Midi,
    Other,
}

impl ClassCategory {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "Audio Module Class" => ClassCategory::Audio,
            "Instrument Module Class" => ClassCategory::Instrument,
            "MIDI Module Class" => ClassCategory::Midi,
            _ => ClassCategory::Other,
        }
    }

    pub fn is_processing(self) -> bool {
        self != ClassCategory::Other
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    pub id: [u8; 16],
    pub name: String,
    pub category: String,
}

impl ClassInfo {
    pub fn new(id: [u8; 16], name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            category: category.into(),
        }
    }

    pub fn kind(&self) -> ClassCategory {
        ClassCategory::from_tag(&self.category)
    }
}

/// Opens plugin modules from disk.
pub trait ModuleLoader: Send {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>>;
}

/// An opened module. Dropping it unloads the module.
pub trait PluginModule {
    /// Exposed classes in enumeration order.
    fn classes(&self) -> Vec<ClassInfo>;

    /// One negotiation step; the result is fixed for the instance's lifetime.
    fn instantiate(&self, class: &ClassInfo) -> Capabilities;
}

pub struct Capabilities {
    pub component: Option<Box<dyn Component>>,
    pub controller: Option<Box<dyn Controller>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusDirection {
    Input,
    Output,
}

pub trait Component {
    fn get_state(&self) -> PluginResult<Vec<u8>>;
    fn set_state(&mut self, data: &[u8]) -> PluginResult;

    fn audio_bus_count(&self, direction: BusDirection) -> usize;
    fn audio_bus_channels(&self, direction: BusDirection, index: usize) -> Option<usize>;
    fn activate_audio_bus(
        &mut self,
        direction: BusDirection,
        index: usize,
        active: bool,
    ) -> PluginResult;

    fn set_active(&mut self, active: bool) -> PluginResult;

    /// Typed capability query; `None` when the class has no processor.
    fn processor(&mut self) -> Option<Box<dyn Processor>>;
}

pub trait Controller {
    fn get_state(&self) -> PluginResult<Vec<u8>>;
    fn set_state(&mut self, data: &[u8]) -> PluginResult;
    fn set_component_handler(&mut self, handler: Arc<dyn ComponentHandler>) -> PluginResult;
    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> PluginResult;
    fn create_view(&mut self) -> Option<Box<dyn PlugView>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessMode {
    Realtime,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleSize {
    Sample32,
    Sample64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSetup {
    pub mode: ProcessMode,
    pub sample_size: SampleSize,
    pub max_block_size: i32,
    pub sample_rate: f64,
}

impl ProcessSetup {
    pub fn realtime(sample_rate: f64, max_block_size: i32) -> Self {
        Self {
            mode: ProcessMode::Realtime,
            sample_size: SampleSize::Sample32,
            max_block_size,
            sample_rate,
        }
    }
}

/// Runs on the audio thread only.
pub trait Processor: Send {
    fn setup_processing(&mut self, setup: &ProcessSetup) -> PluginResult;
    fn set_processing(&mut self, processing: bool) -> PluginResult;
    fn process(&mut self, data: &mut ProcessData<'_>) -> PluginResult;
}

/// One block: per-bus channel slices plus automation in both directions.
pub struct ProcessData<'a> {
    pub num_samples: usize,
    pub sample_rate: f64,
    pub inputs: Vec<Vec<&'a [f32]>>,
    pub outputs: Vec<Vec<&'a mut [f32]>>,
    pub input_params: &'a ParameterChanges,
    pub output_params: &'a mut ParameterChanges,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterPoint {
    pub sample_offset: i32,
    pub value: f64,
}

/// Parameter automation queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterQueue {
    pub param_id: ParamId,
    pub points: Vec<ParameterPoint>,
}

impl ParameterQueue {
    pub fn new(param_id: ParamId) -> Self {
        Self {
            param_id,
            points: Vec::new(),
        }
    }

    pub fn add_point(&mut self, sample_offset: i32, value: f64) {
        self.points.push(ParameterPoint {
            sample_offset,
            value,
        });
    }

    pub fn last_value(&self) -> Option<f64> {
        self.points.last().map(|p| p.value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterChanges {
    pub queues: Vec<ParameterQueue>,
}

impl ParameterChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_queue(&mut self, queue: ParameterQueue) {
        self.queues.push(queue);
    }

    /// Queue for `param_id`, created on first use.
    pub fn queue_mut(&mut self, param_id: ParamId) -> &mut ParameterQueue {
        let index = match self.queues.iter().position(|q| q.param_id == param_id) {
            Some(index) => index,
            None => {
                self.queues.push(ParameterQueue::new(param_id));
                self.queues.len() - 1
            }
        };
        &mut self.queues[index]
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}

/// Flags passed to [`ComponentHandler::restart_component`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartFlags(pub i32);

impl RestartFlags {
    pub const RELOAD_COMPONENT: Self = Self(1 << 0);
    pub const IO_CHANGED: Self = Self(1 << 1);
    pub const PARAM_VALUES_CHANGED: Self = Self(1 << 2);
    pub const LATENCY_CHANGED: Self = Self(1 << 3);
    pub const PARAM_TITLES_CHANGED: Self = Self(1 << 4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RestartFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The host's side of the controller callback interface.
///
/// Plugins may call these from any thread.
pub trait ComponentHandler: Send + Sync {
    fn begin_edit(&self, _id: ParamId) {}
    fn perform_edit(&self, id: ParamId, value: f64);
    fn end_edit(&self, _id: ParamId) {}
    fn restart_component(&self, flags: RestartFlags);
    fn request_open_editor(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSize {
    pub width: i32,
    pub height: i32,
}

/// Native handle an editor view is embedded into.
#[derive(Debug, Clone, Copy)]
pub struct ParentWindow {
    pub handle: *mut std::ffi::c_void,
    pub platform: &'static str,
}

/// A plugin editor view. Must only be touched from the main loop.
pub trait PlugView {
    fn size(&self) -> Option<ViewSize>;
    fn attach(&mut self, parent: ParentWindow) -> PluginResult;
    fn detach(&mut self) -> PluginResult;
}
