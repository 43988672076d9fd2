//! VST3 backend for the module traits.
//!
//! Opens a module binary (or `.vst3` bundle) with `libloading`, walks its
//! factory and wraps the COM interfaces behind [`Component`], [`Controller`],
//! [`Processor`] and [`PlugView`]. Host-side COM objects (application,
//! component handler, memory streams, parameter change lists) are `vst3`
//! `Class` implementations.

use crate::module::{
    BusDirection, Capabilities, ClassInfo, Component, ComponentHandler, Controller, ModuleLoader,
    ParamId, ParameterChanges, ParentWindow, PlugView, PluginModule, PluginResult, ProcessData,
    ProcessMode, ProcessSetup, Processor, RestartFlags, ResultCode, SampleSize, ViewSize,
};
use libloading::Library;
use parking_lot::Mutex;
use std::ffi::{c_void, CString};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;
use vst3::Steinberg::Vst::{
    AudioBusBuffers, AudioBusBuffers__type0, BusDirections_, BusInfo, IAudioProcessor,
    IAudioProcessorTrait, IComponent, IComponentHandler, IComponentHandler2,
    IComponentHandler2Trait, IComponentHandlerTrait, IComponentTrait, IConnectionPoint,
    IConnectionPointTrait, IEditController, IEditControllerTrait, IHostApplication,
    IHostApplicationTrait, IParamValueQueue, IParamValueQueueTrait, IParameterChanges,
    IParameterChangesTrait, MediaTypes_, ParamValue, ProcessContext, ProcessModes_,
    SymbolicSampleSizes_, TChar,
};
use vst3::Steinberg::{
    self, int32, int64, tresult, FIDString, IBStream, IBStreamTrait, IPlugView, IPlugViewTrait,
    IPluginBaseTrait, IPluginFactory, IPluginFactoryTrait, PClassInfo, TBool, ViewRect, TUID,
};
use vst3::{Class, ComPtr, ComWrapper};
use vstbridge_ipc::{BridgeError, Result};

const K_AUDIO: i32 = MediaTypes_::kAudio as i32;
const K_INPUT: i32 = BusDirections_::kInput as i32;
const K_OUTPUT: i32 = BusDirections_::kOutput as i32;

// ProcessContext::StatesAndFlags::kPlaying
const TRANSPORT_PLAYING: u32 = 1 << 1;

// IBStream seek modes
const SEEK_SET: int32 = 0;
const SEEK_CUR: int32 = 1;
const SEEK_END: int32 = 2;

const HOST_NAME: &str = "vstbridge";

fn check(result: tresult) -> PluginResult {
    if result == Steinberg::kResultOk {
        Ok(())
    } else {
        Err(ResultCode(result))
    }
}

fn direction(direction: BusDirection) -> i32 {
    match direction {
        BusDirection::Input => K_INPUT,
        BusDirection::Output => K_OUTPUT,
    }
}

fn c_string(bytes: &[Steinberg::char8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    let raw: Vec<u8> = bytes[..end].iter().map(|&b| b as u8).collect();
    String::from_utf8_lossy(&raw).trim().to_string()
}

fn copy_wstring(src: &str, dst: &mut [TChar]) {
    let mut len = 0;
    for (unit, slot) in src.encode_utf16().zip(dst.iter_mut()) {
        *slot = unit as TChar;
        len += 1;
    }
    if let Some(terminator) = dst.get_mut(len.min(dst.len().saturating_sub(1))) {
        *terminator = 0;
    }
}

fn tuid_bytes(id: &TUID) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (dst, src) in out.iter_mut().zip(id.iter()) {
        *dst = *src as u8;
    }
    out
}

fn tuid_from_bytes(bytes: &[u8; 16]) -> TUID {
    let mut out: TUID = [0; 16];
    for (dst, src) in out.iter_mut().zip(bytes.iter()) {
        *dst = *src as Steinberg::char8;
    }
    out
}

// ---------------------------------------------------------------------------
// Binary resolution
// ---------------------------------------------------------------------------

fn bundle_arch(arch: &str, os: &str) -> String {
    match (arch, os) {
        ("aarch64", "windows") => "arm64-win".to_string(),
        ("x86", "windows") => "x86-win".to_string(),
        (arch, "windows") => format!("{}-win", arch),
        (arch, os) => format!("{}-{}", arch, os),
    }
}

/// Locate the loadable binary inside a `.vst3` bundle directory. Plain files
/// are returned unchanged.
pub fn bundle_binary_path(bundle: &Path, arch: &str, os: &str) -> PathBuf {
    let stem = bundle
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let contents = bundle.join("Contents");
    match os {
        "macos" => contents.join("MacOS").join(stem),
        "windows" => contents
            .join(bundle_arch(arch, os))
            .join(format!("{}.vst3", stem)),
        _ => contents
            .join(bundle_arch(arch, os))
            .join(format!("{}.so", stem)),
    }
}

fn resolve_binary(path: &Path) -> PathBuf {
    if path.is_dir() {
        bundle_binary_path(path, std::env::consts::ARCH, std::env::consts::OS)
    } else {
        path.to_path_buf()
    }
}

// ---------------------------------------------------------------------------
// Library and entry points
// ---------------------------------------------------------------------------

/// The loaded binary. Calls the platform exit entry point before unloading.
struct ModuleLibrary {
    library: Library,
}

impl ModuleLibrary {
    fn open(binary: &Path) -> Result<Self> {
        let load_error = |reason: String| BridgeError::ModuleLoad {
            path: binary.to_path_buf(),
            reason,
        };

        let library = unsafe { Library::new(binary) }.map_err(|e| load_error(e.to_string()))?;

        #[cfg(windows)]
        unsafe {
            type InitDll = unsafe extern "system" fn() -> bool;
            if let Ok(init) = library.get::<InitDll>(b"InitDll\0") {
                if !init() {
                    return Err(load_error("InitDll returned false".to_string()));
                }
            }
        }

        #[cfg(all(unix, not(target_os = "macos")))]
        let library = unsafe {
            type ModuleEntry = unsafe extern "system" fn(*mut c_void) -> bool;
            let raw = libloading::os::unix::Library::from(library).into_raw();
            let library: Library = libloading::os::unix::Library::from_raw(raw).into();
            if let Ok(entry) = library.get::<ModuleEntry>(b"ModuleEntry\0") {
                if !entry(raw) {
                    return Err(load_error("ModuleEntry returned false".to_string()));
                }
            }
            library
        };

        Ok(Self { library })
    }

    fn factory(&self, binary: &Path) -> Result<ComPtr<IPluginFactory>> {
        type GetPluginFactory = unsafe extern "system" fn() -> *mut IPluginFactory;
        unsafe {
            let get_factory = self
                .library
                .get::<GetPluginFactory>(b"GetPluginFactory\0")
                .map_err(|e| BridgeError::ModuleLoad {
                    path: binary.to_path_buf(),
                    reason: format!("GetPluginFactory not found: {}", e),
                })?;
            ComPtr::from_raw(get_factory()).ok_or_else(|| BridgeError::ModuleLoad {
                path: binary.to_path_buf(),
                reason: "GetPluginFactory returned null".to_string(),
            })
        }
    }
}

impl Drop for ModuleLibrary {
    fn drop(&mut self) {
        #[cfg(windows)]
        let exit_symbol: &[u8] = b"ExitDll\0";
        #[cfg(not(windows))]
        let exit_symbol: &[u8] = b"ModuleExit\0";

        unsafe {
            type ExitFn = unsafe extern "system" fn() -> bool;
            if let Ok(exit) = self.library.get::<ExitFn>(exit_symbol) {
                exit();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Host COM objects
// ---------------------------------------------------------------------------

struct HostApplication;

impl Class for HostApplication {
    type Interfaces = (IHostApplication,);
}

impl IHostApplicationTrait for HostApplication {
    unsafe fn getName(&self, name: *mut Steinberg::Vst::String128) -> tresult {
        if name.is_null() {
            return Steinberg::kInvalidArgument;
        }
        let name = &mut *name;
        copy_wstring(HOST_NAME, &mut name[..]);
        Steinberg::kResultOk
    }

    unsafe fn createInstance(
        &self,
        _cid: *mut TUID,
        _iid: *mut TUID,
        _obj: *mut *mut c_void,
    ) -> tresult {
        Steinberg::kNoInterface
    }
}

/// Forwards controller callbacks to the host's [`ComponentHandler`].
struct HandlerBridge {
    handler: Arc<dyn ComponentHandler>,
}

impl Class for HandlerBridge {
    type Interfaces = (IComponentHandler, IComponentHandler2);
}

impl IComponentHandlerTrait for HandlerBridge {
    unsafe fn beginEdit(&self, id: Steinberg::Vst::ParamID) -> tresult {
        self.handler.begin_edit(id);
        Steinberg::kResultOk
    }

    unsafe fn performEdit(&self, id: Steinberg::Vst::ParamID, value: ParamValue) -> tresult {
        self.handler.perform_edit(id, value);
        Steinberg::kResultOk
    }

    unsafe fn endEdit(&self, id: Steinberg::Vst::ParamID) -> tresult {
        self.handler.end_edit(id);
        Steinberg::kResultOk
    }

    unsafe fn restartComponent(&self, flags: int32) -> tresult {
        self.handler.restart_component(RestartFlags(flags));
        Steinberg::kResultOk
    }
}

impl IComponentHandler2Trait for HandlerBridge {
    unsafe fn setDirty(&self, _state: TBool) -> tresult {
        Steinberg::kResultOk
    }

    unsafe fn requestOpenEditor(&self, _name: FIDString) -> tresult {
        self.handler.request_open_editor();
        Steinberg::kResultOk
    }

    unsafe fn startGroupEdit(&self) -> tresult {
        Steinberg::kResultOk
    }

    unsafe fn finishGroupEdit(&self) -> tresult {
        Steinberg::kResultOk
    }
}

#[derive(Default)]
struct StreamBuffer {
    data: Vec<u8>,
    pos: usize,
}

/// Growable in-memory `IBStream`.
#[derive(Default)]
struct MemoryStream {
    buffer: Mutex<StreamBuffer>,
}

impl MemoryStream {
    fn with_data(data: &[u8]) -> Self {
        Self {
            buffer: Mutex::new(StreamBuffer {
                data: data.to_vec(),
                pos: 0,
            }),
        }
    }

    fn rewind(&self) {
        self.buffer.lock().pos = 0;
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut self.buffer.lock().data)
    }
}

impl Class for MemoryStream {
    type Interfaces = (IBStream,);
}

impl IBStreamTrait for MemoryStream {
    unsafe fn read(&self, buffer: *mut c_void, num_bytes: int32, num_read: *mut int32) -> tresult {
        if buffer.is_null() || num_bytes < 0 {
            return Steinberg::kInvalidArgument;
        }
        let mut stream = self.buffer.lock();
        let count = (num_bytes as usize).min(stream.data.len().saturating_sub(stream.pos));
        if count > 0 {
            ptr::copy_nonoverlapping(stream.data.as_ptr().add(stream.pos), buffer as *mut u8, count);
        }
        stream.pos += count;
        if !num_read.is_null() {
            *num_read = count as int32;
        }
        Steinberg::kResultOk
    }

    unsafe fn write(
        &self,
        buffer: *mut c_void,
        num_bytes: int32,
        num_written: *mut int32,
    ) -> tresult {
        if buffer.is_null() || num_bytes < 0 {
            return Steinberg::kInvalidArgument;
        }
        let count = num_bytes as usize;
        let bytes = std::slice::from_raw_parts(buffer as *const u8, count);
        let mut stream = self.buffer.lock();
        let end = stream.pos + count;
        if stream.data.len() < end {
            stream.data.resize(end, 0);
        }
        let pos = stream.pos;
        stream.data[pos..end].copy_from_slice(bytes);
        stream.pos = end;
        if !num_written.is_null() {
            *num_written = num_bytes;
        }
        Steinberg::kResultOk
    }

    unsafe fn seek(&self, pos: int64, mode: int32, result: *mut int64) -> tresult {
        let mut stream = self.buffer.lock();
        let base = match mode {
            SEEK_SET => 0,
            SEEK_CUR => stream.pos as int64,
            SEEK_END => stream.data.len() as int64,
            _ => return Steinberg::kInvalidArgument,
        };
        let target = base + pos;
        if target < 0 {
            return Steinberg::kInvalidArgument;
        }
        stream.pos = target as usize;
        if !result.is_null() {
            *result = target;
        }
        Steinberg::kResultOk
    }

    unsafe fn tell(&self, pos: *mut int64) -> tresult {
        if pos.is_null() {
            return Steinberg::kInvalidArgument;
        }
        *pos = self.buffer.lock().pos as int64;
        Steinberg::kResultOk
    }
}

struct ParamQueue {
    id: Steinberg::Vst::ParamID,
    points: Mutex<Vec<(int32, ParamValue)>>,
}

impl Class for ParamQueue {
    type Interfaces = (IParamValueQueue,);
}

impl IParamValueQueueTrait for ParamQueue {
    unsafe fn getParameterId(&self) -> Steinberg::Vst::ParamID {
        self.id
    }

    unsafe fn getPointCount(&self) -> int32 {
        self.points.lock().len() as int32
    }

    unsafe fn getPoint(
        &self,
        index: int32,
        sample_offset: *mut int32,
        value: *mut ParamValue,
    ) -> tresult {
        let points = self.points.lock();
        let Some(&(offset, point)) = usize::try_from(index).ok().and_then(|i| points.get(i))
        else {
            return Steinberg::kInvalidArgument;
        };
        if !sample_offset.is_null() {
            *sample_offset = offset;
        }
        if !value.is_null() {
            *value = point;
        }
        Steinberg::kResultOk
    }

    unsafe fn addPoint(&self, sample_offset: int32, value: ParamValue, index: *mut int32) -> tresult {
        let mut points = self.points.lock();
        points.push((sample_offset, value));
        if !index.is_null() {
            *index = (points.len() - 1) as int32;
        }
        Steinberg::kResultOk
    }
}

/// `IParameterChanges` for one process call, in either direction.
#[derive(Default)]
struct ParamChangeList {
    queues: Mutex<Vec<ComWrapper<ParamQueue>>>,
}

impl ParamChangeList {
    fn from_changes(changes: &ParameterChanges) -> Self {
        let queues = changes
            .queues
            .iter()
            .map(|queue| {
                ComWrapper::new(ParamQueue {
                    id: queue.param_id,
                    points: Mutex::new(
                        queue
                            .points
                            .iter()
                            .map(|p| (p.sample_offset, p.value))
                            .collect(),
                    ),
                })
            })
            .collect();
        Self {
            queues: Mutex::new(queues),
        }
    }

    fn drain_into(&self, changes: &mut ParameterChanges) {
        for queue in self.queues.lock().iter() {
            let target = changes.queue_mut(queue.id);
            for &(offset, value) in queue.points.lock().iter() {
                target.add_point(offset, value);
            }
        }
    }
}

impl Class for ParamChangeList {
    type Interfaces = (IParameterChanges,);
}

impl IParameterChangesTrait for ParamChangeList {
    unsafe fn getParameterCount(&self) -> int32 {
        self.queues.lock().len() as int32
    }

    unsafe fn getParameterData(&self, index: int32) -> *mut IParamValueQueue {
        let queues = self.queues.lock();
        usize::try_from(index)
            .ok()
            .and_then(|i| queues.get(i))
            .and_then(|q| q.as_com_ref::<IParamValueQueue>())
            .map_or(ptr::null_mut(), |q| q.as_ptr())
    }

    unsafe fn addParameterData(
        &self,
        id: *const Steinberg::Vst::ParamID,
        index: *mut int32,
    ) -> *mut IParamValueQueue {
        if id.is_null() {
            return ptr::null_mut();
        }
        let id = *id;
        let mut queues = self.queues.lock();
        let position = match queues.iter().position(|q| q.id == id) {
            Some(position) => position,
            None => {
                queues.push(ComWrapper::new(ParamQueue {
                    id,
                    points: Mutex::new(Vec::new()),
                }));
                queues.len() - 1
            }
        };
        if !index.is_null() {
            *index = position as int32;
        }
        queues[position]
            .as_com_ref::<IParamValueQueue>()
            .map_or(ptr::null_mut(), |q| q.as_ptr())
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// Opens VST3 module binaries and bundles.
#[derive(Debug, Default)]
pub struct Vst3Loader;

impl ModuleLoader for Vst3Loader {
    fn open(&self, path: &Path) -> Result<Box<dyn PluginModule>> {
        Ok(Box::new(Vst3Module::open(path)?))
    }
}

struct Vst3Module {
    factory: ComPtr<IPluginFactory>,
    host: ComPtr<IHostApplication>,
    _library: ModuleLibrary,
}

impl Vst3Module {
    fn open(path: &Path) -> Result<Self> {
        let binary = resolve_binary(path);
        tracing::debug!("opening module binary {}", binary.display());
        let library = ModuleLibrary::open(&binary)?;
        let factory = library.factory(&binary)?;
        let host = ComWrapper::new(HostApplication)
            .to_com_ptr::<IHostApplication>()
            .ok_or_else(|| BridgeError::ModuleLoad {
                path: binary.clone(),
                reason: "failed to create host application".to_string(),
            })?;
        Ok(Self {
            factory,
            host,
            _library: library,
        })
    }

    fn host_context(&self) -> *mut Steinberg::FUnknown {
        self.host.as_ptr() as *mut Steinberg::FUnknown
    }

    unsafe fn create<I: vst3::Interface>(&self, cid: &TUID, iid: &TUID) -> Option<ComPtr<I>> {
        let mut obj: *mut c_void = ptr::null_mut();
        let result = self.factory.createInstance(
            cid.as_ptr() as FIDString,
            iid.as_ptr() as FIDString,
            &mut obj,
        );
        if result != Steinberg::kResultOk || obj.is_null() {
            tracing::debug!("createInstance failed: {}", ResultCode(result));
            return None;
        }
        ComPtr::from_raw(obj as *mut I)
    }

    unsafe fn create_controller(
        &self,
        component: &ComPtr<IComponent>,
    ) -> Option<(ComPtr<IEditController>, bool)> {
        if let Some(controller) = component.cast::<IEditController>() {
            return Some((controller, false));
        }
        let mut cid: TUID = [0; 16];
        if component.getControllerClassId(&mut cid) != Steinberg::kResultOk {
            return None;
        }
        let controller =
            self.create::<IEditController>(&cid, &Steinberg::Vst::IEditController_iid)?;
        if let Err(code) = check(controller.initialize(self.host_context())) {
            tracing::warn!("controller initialize failed: {}", code);
            return None;
        }
        Some((controller, true))
    }
}

impl PluginModule for Vst3Module {
    fn classes(&self) -> Vec<ClassInfo> {
        let mut classes = Vec::new();
        unsafe {
            for index in 0..self.factory.countClasses().max(0) {
                let mut info: PClassInfo = std::mem::zeroed();
                if self.factory.getClassInfo(index, &mut info) != Steinberg::kResultOk {
                    continue;
                }
                classes.push(ClassInfo::new(
                    tuid_bytes(&info.cid),
                    c_string(&info.name),
                    c_string(&info.category),
                ));
            }
        }
        classes
    }

    fn instantiate(&self, class: &ClassInfo) -> Capabilities {
        let cid = tuid_from_bytes(&class.id);
        unsafe {
            let Some(component) = self.create::<IComponent>(&cid, &Steinberg::Vst::IComponent_iid)
            else {
                return Capabilities {
                    component: None,
                    controller: None,
                };
            };
            if let Err(code) = check(component.initialize(self.host_context())) {
                tracing::warn!("component initialize failed: {}", code);
                return Capabilities {
                    component: None,
                    controller: None,
                };
            }

            let controller = self.create_controller(&component);
            let connection = controller
                .as_ref()
                .filter(|(_, separate)| *separate)
                .and_then(|(controller, _)| connect(&component, controller));

            Capabilities {
                component: Some(Box::new(Vst3Component {
                    state_listener: controller
                        .as_ref()
                        .filter(|(_, separate)| *separate)
                        .map(|(c, _)| c.clone()),
                    component,
                })),
                controller: controller.map(|(controller, separate)| {
                    Box::new(Vst3Controller {
                        controller,
                        separate,
                        connection,
                        handler: None,
                    }) as Box<dyn Controller>
                }),
            }
        }
    }
}

struct Connection {
    component: ComPtr<IConnectionPoint>,
    controller: ComPtr<IConnectionPoint>,
}

unsafe fn connect(
    component: &ComPtr<IComponent>,
    controller: &ComPtr<IEditController>,
) -> Option<Connection> {
    let component_cp = component.cast::<IConnectionPoint>()?;
    let controller_cp = controller.cast::<IConnectionPoint>()?;
    component_cp.connect(controller_cp.as_ptr());
    controller_cp.connect(component_cp.as_ptr());
    Some(Connection {
        component: component_cp,
        controller: controller_cp,
    })
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

struct Vst3Component {
    component: ComPtr<IComponent>,
    /// Separate controller that mirrors component state on restore.
    state_listener: Option<ComPtr<IEditController>>,
}

impl Component for Vst3Component {
    fn get_state(&self) -> PluginResult<Vec<u8>> {
        let stream = ComWrapper::new(MemoryStream::default());
        let ptr = stream
            .as_com_ref::<IBStream>()
            .map_or(ptr::null_mut(), |s| s.as_ptr());
        check(unsafe { self.component.getState(ptr) })?;
        Ok(stream.take())
    }

    fn set_state(&mut self, data: &[u8]) -> PluginResult {
        let stream = ComWrapper::new(MemoryStream::with_data(data));
        let ptr = stream
            .as_com_ref::<IBStream>()
            .map_or(ptr::null_mut(), |s| s.as_ptr());
        check(unsafe { self.component.setState(ptr) })?;
        if let Some(controller) = &self.state_listener {
            stream.rewind();
            if let Err(code) = check(unsafe { controller.setComponentState(ptr) }) {
                tracing::debug!("setComponentState returned {}", code);
            }
        }
        Ok(())
    }

    fn audio_bus_count(&self, dir: BusDirection) -> usize {
        unsafe { self.component.getBusCount(K_AUDIO, direction(dir)).max(0) as usize }
    }

    fn audio_bus_channels(&self, dir: BusDirection, index: usize) -> Option<usize> {
        unsafe {
            let mut info: BusInfo = std::mem::zeroed();
            let result = self
                .component
                .getBusInfo(K_AUDIO, direction(dir), index as i32, &mut info);
            (result == Steinberg::kResultOk).then(|| info.channelCount.max(0) as usize)
        }
    }

    fn activate_audio_bus(&mut self, dir: BusDirection, index: usize, active: bool) -> PluginResult {
        check(unsafe {
            self.component
                .activateBus(K_AUDIO, direction(dir), index as i32, active as TBool)
        })
    }

    fn set_active(&mut self, active: bool) -> PluginResult {
        check(unsafe { self.component.setActive(active as TBool) })
    }

    fn processor(&mut self) -> Option<Box<dyn Processor>> {
        let processor = self.component.cast::<IAudioProcessor>()?;
        Some(Box::new(Vst3Processor { processor }))
    }
}

impl Drop for Vst3Component {
    fn drop(&mut self) {
        self.state_listener = None;
        unsafe {
            self.component.terminate();
        }
    }
}

struct Vst3Controller {
    controller: ComPtr<IEditController>,
    separate: bool,
    connection: Option<Connection>,
    handler: Option<ComPtr<IComponentHandler>>,
}

impl Controller for Vst3Controller {
    fn get_state(&self) -> PluginResult<Vec<u8>> {
        let stream = ComWrapper::new(MemoryStream::default());
        let ptr = stream
            .as_com_ref::<IBStream>()
            .map_or(ptr::null_mut(), |s| s.as_ptr());
        check(unsafe { self.controller.getState(ptr) })?;
        Ok(stream.take())
    }

    fn set_state(&mut self, data: &[u8]) -> PluginResult {
        let stream = ComWrapper::new(MemoryStream::with_data(data));
        let ptr = stream
            .as_com_ref::<IBStream>()
            .map_or(ptr::null_mut(), |s| s.as_ptr());
        check(unsafe { self.controller.setState(ptr) })
    }

    fn set_component_handler(&mut self, handler: Arc<dyn ComponentHandler>) -> PluginResult {
        let bridge = ComWrapper::new(HandlerBridge { handler })
            .to_com_ptr::<IComponentHandler>()
            .ok_or(ResultCode::NOT_IMPLEMENTED)?;
        let result = unsafe { self.controller.setComponentHandler(bridge.as_ptr()) };
        self.handler = Some(bridge);
        check(result)
    }

    fn set_param_normalized(&mut self, id: ParamId, value: f64) -> PluginResult {
        check(unsafe { self.controller.setParamNormalized(id, value) })
    }

    fn create_view(&mut self) -> Option<Box<dyn PlugView>> {
        unsafe {
            let raw = self.controller.createView(c"editor".as_ptr() as FIDString);
            let view = ComPtr::<IPlugView>::from_raw(raw)?;
            Some(Box::new(Vst3View { view }))
        }
    }
}

impl Drop for Vst3Controller {
    fn drop(&mut self) {
        unsafe {
            if let Some(connection) = self.connection.take() {
                connection.component.disconnect(connection.controller.as_ptr());
                connection.controller.disconnect(connection.component.as_ptr());
            }
            if self.handler.take().is_some() {
                self.controller.setComponentHandler(ptr::null_mut());
            }
            if self.separate {
                self.controller.terminate();
            }
        }
    }
}

struct Vst3Processor {
    processor: ComPtr<IAudioProcessor>,
}

// The processor is only ever driven from the audio thread after installation.
unsafe impl Send for Vst3Processor {}

fn bus_buffers(channels: &mut [*mut f32]) -> AudioBusBuffers {
    AudioBusBuffers {
        numChannels: channels.len() as int32,
        silenceFlags: 0,
        __field0: AudioBusBuffers__type0 {
            channelBuffers32: channels.as_mut_ptr(),
        },
    }
}

impl Processor for Vst3Processor {
    fn setup_processing(&mut self, setup: &ProcessSetup) -> PluginResult {
        let mut raw = Steinberg::Vst::ProcessSetup {
            processMode: match setup.mode {
                ProcessMode::Realtime => ProcessModes_::kRealtime as int32,
                ProcessMode::Offline => ProcessModes_::kOffline as int32,
            },
            symbolicSampleSize: match setup.sample_size {
                SampleSize::Sample32 => SymbolicSampleSizes_::kSample32 as int32,
                SampleSize::Sample64 => SymbolicSampleSizes_::kSample64 as int32,
            },
            maxSamplesPerBlock: setup.max_block_size,
            sampleRate: setup.sample_rate,
        };
        check(unsafe { self.processor.setupProcessing(&mut raw) })
    }

    fn set_processing(&mut self, processing: bool) -> PluginResult {
        check(unsafe { self.processor.setProcessing(processing as TBool) })
    }

    fn process(&mut self, data: &mut ProcessData<'_>) -> PluginResult {
        let mut input_ptrs: Vec<Vec<*mut f32>> = data
            .inputs
            .iter()
            .map(|bus| bus.iter().map(|ch| ch.as_ptr() as *mut f32).collect())
            .collect();
        let mut output_ptrs: Vec<Vec<*mut f32>> = data
            .outputs
            .iter_mut()
            .map(|bus| bus.iter_mut().map(|ch| ch.as_mut_ptr()).collect())
            .collect();
        let mut inputs: Vec<AudioBusBuffers> =
            input_ptrs.iter_mut().map(|bus| bus_buffers(bus)).collect();
        let mut outputs: Vec<AudioBusBuffers> =
            output_ptrs.iter_mut().map(|bus| bus_buffers(bus)).collect();

        let input_params = ComWrapper::new(ParamChangeList::from_changes(data.input_params));
        let output_params = ComWrapper::new(ParamChangeList::default());

        let mut context: ProcessContext = unsafe { std::mem::zeroed() };
        context.state = TRANSPORT_PLAYING;
        context.sampleRate = data.sample_rate;

        let mut raw = Steinberg::Vst::ProcessData {
            processMode: ProcessModes_::kRealtime as int32,
            symbolicSampleSize: SymbolicSampleSizes_::kSample32 as int32,
            numSamples: data.num_samples as int32,
            numInputs: inputs.len() as int32,
            numOutputs: outputs.len() as int32,
            inputs: if inputs.is_empty() {
                ptr::null_mut()
            } else {
                inputs.as_mut_ptr()
            },
            outputs: if outputs.is_empty() {
                ptr::null_mut()
            } else {
                outputs.as_mut_ptr()
            },
            inputParameterChanges: input_params
                .as_com_ref::<IParameterChanges>()
                .map_or(ptr::null_mut(), |p| p.as_ptr()),
            outputParameterChanges: output_params
                .as_com_ref::<IParameterChanges>()
                .map_or(ptr::null_mut(), |p| p.as_ptr()),
            inputEvents: ptr::null_mut(),
            outputEvents: ptr::null_mut(),
            processContext: &mut context,
        };

        let result = unsafe { self.processor.process(&mut raw) };
        output_params.drain_into(data.output_params);
        check(result)
    }
}

struct Vst3View {
    view: ComPtr<IPlugView>,
}

impl PlugView for Vst3View {
    fn size(&self) -> Option<ViewSize> {
        unsafe {
            let mut rect: ViewRect = std::mem::zeroed();
            if self.view.getSize(&mut rect) != Steinberg::kResultOk {
                return None;
            }
            let size = ViewSize {
                width: rect.right - rect.left,
                height: rect.bottom - rect.top,
            };
            (size.width > 0 && size.height > 0).then_some(size)
        }
    }

    fn attach(&mut self, parent: ParentWindow) -> PluginResult {
        let platform = CString::new(parent.platform).map_err(|_| ResultCode::FALSE)?;
        unsafe {
            check(self.view.isPlatformTypeSupported(platform.as_ptr() as FIDString))?;
            check(self.view.attached(parent.handle, platform.as_ptr() as FIDString))
        }
    }

    fn detach(&mut self) -> PluginResult {
        check(unsafe { self.view.removed() })
    }
}
