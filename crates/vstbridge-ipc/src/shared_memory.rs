//! Shared audio region: a packed header followed by four f32 channel slots.
//!
//! ```text
//! offset 0   f64 sample_rate
//! offset 8   i32 num_samples
//! offset 12  i32 num_channels
//! offset 16  [f32; MAX_BLOCK_SIZE] input L
//!            [f32; MAX_BLOCK_SIZE] input R
//!            [f32; MAX_BLOCK_SIZE] output L
//!            [f32; MAX_BLOCK_SIZE] output R
//! ```
//!
//! Fields use native byte order; both processes run on the same machine.

use crate::error::{BridgeError, Result};
use crate::protocol::MAX_BLOCK_SIZE;

pub const HEADER_SIZE: usize = 16;
pub const SLOT_COUNT: usize = 4;
const SLOT_BYTES: usize = MAX_BLOCK_SIZE * std::mem::size_of::<f32>();
pub const REGION_SIZE: usize = HEADER_SIZE + SLOT_COUNT * SLOT_BYTES;

/// Per-cycle parameters written by the controller before signaling ready.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioHeader {
    pub sample_rate: f64,
    pub num_samples: i32,
    pub num_channels: i32,
}

impl AudioHeader {
    /// Frame count clamped to `0..=MAX_BLOCK_SIZE`.
    pub fn frames(&self) -> usize {
        usize::try_from(self.num_samples)
            .unwrap_or(0)
            .min(MAX_BLOCK_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    InputLeft = 0,
    InputRight = 1,
    OutputLeft = 2,
    OutputRight = 3,
}

impl Slot {
    fn offset(self) -> usize {
        HEADER_SIZE + self as usize * SLOT_BYTES
    }
}

/// The shared slots viewed for one processing cycle.
pub struct BlockBuffers<'a> {
    pub inputs: [&'a [f32]; 2],
    pub outputs: [&'a mut [f32]; 2],
}

/// Owner-side or client-side mapping of the shared audio region.
///
/// The host creates it, the controller opens it. Mutable access goes through
/// `&mut self`; cross-process exclusion is provided by the ready/done handshake.
pub struct AudioSharedRegion {
    backing: backing::Backing,
    name: String,
    owns_memory: bool,
}

impl AudioSharedRegion {
    pub fn create(name: &str) -> Result<Self> {
        let backing = backing::Backing::create(name)?;
        tracing::debug!("created shared audio region {} ({} bytes)", name, REGION_SIZE);
        Ok(Self {
            backing,
            name: name.to_string(),
            owns_memory: true,
        })
    }

    pub fn open(name: &str) -> Result<Self> {
        let backing = backing::Backing::open(name)?;
        Ok(Self {
            backing,
            name: name.to_string(),
            owns_memory: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owns_memory(&self) -> bool {
        self.owns_memory
    }

    pub fn header(&self) -> AudioHeader {
        let base = self.backing.as_ptr();
        // SAFETY: the region is REGION_SIZE bytes; reads are unaligned-tolerant.
        unsafe {
            AudioHeader {
                sample_rate: std::ptr::read_unaligned(base as *const f64),
                num_samples: std::ptr::read_unaligned(base.add(8) as *const i32),
                num_channels: std::ptr::read_unaligned(base.add(12) as *const i32),
            }
        }
    }

    pub fn write_header(&mut self, header: &AudioHeader) {
        let base = self.backing.as_mut_ptr();
        // SAFETY: see `header`.
        unsafe {
            std::ptr::write_unaligned(base as *mut f64, header.sample_rate);
            std::ptr::write_unaligned(base.add(8) as *mut i32, header.num_samples);
            std::ptr::write_unaligned(base.add(12) as *mut i32, header.num_channels);
        }
    }

    /// Input slots read-only, output slots writable, each `frames` long
    /// (capped at `MAX_BLOCK_SIZE`).
    pub fn block_buffers(&mut self, frames: usize) -> BlockBuffers<'_> {
        let frames = frames.min(MAX_BLOCK_SIZE);
        let base = self.backing.as_mut_ptr();
        // SAFETY: slots are disjoint, 4-byte aligned (mapping is page aligned,
        // HEADER_SIZE is a multiple of 4) and `&mut self` is held for 'a.
        unsafe {
            let slot = |s: Slot| base.add(s.offset()) as *mut f32;
            BlockBuffers {
                inputs: [
                    std::slice::from_raw_parts(slot(Slot::InputLeft), frames),
                    std::slice::from_raw_parts(slot(Slot::InputRight), frames),
                ],
                outputs: [
                    std::slice::from_raw_parts_mut(slot(Slot::OutputLeft), frames),
                    std::slice::from_raw_parts_mut(slot(Slot::OutputRight), frames),
                ],
            }
        }
    }

    pub fn write_slot(&mut self, slot: Slot, data: &[f32]) -> Result<()> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(BridgeError::SharedMemoryError(
                "Data length exceeds slot capacity".to_string(),
            ));
        }
        let base = self.backing.as_mut_ptr();
        // SAFETY: bounds checked above; slot lies inside the region.
        let dest =
            unsafe { std::slice::from_raw_parts_mut(base.add(slot.offset()) as *mut f32, data.len()) };
        dest.copy_from_slice(data);
        Ok(())
    }

    /// Zero-copy into provided buffer. Returns the number of samples copied.
    pub fn read_slot_into(&self, slot: Slot, output: &mut [f32]) -> usize {
        let count = output.len().min(MAX_BLOCK_SIZE);
        let base = self.backing.as_ptr();
        // SAFETY: count <= MAX_BLOCK_SIZE; slot lies inside the region.
        let src =
            unsafe { std::slice::from_raw_parts(base.add(slot.offset()) as *const f32, count) };
        output[..count].copy_from_slice(src);
        count
    }
}

impl Drop for AudioSharedRegion {
    fn drop(&mut self) {
        if self.owns_memory {
            self.backing.unlink(&self.name);
        }
    }
}

/// Location of a named IPC object on Unix.
#[cfg(unix)]
pub(crate) fn unix_object_path(name: &str) -> std::path::PathBuf {
    #[cfg(target_os = "linux")]
    let base = std::path::PathBuf::from("/dev/shm");

    #[cfg(not(target_os = "linux"))]
    let base = std::env::temp_dir();

    let sanitized: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == ':' { '_' } else { c })
        .collect();
    base.join(format!("vstbridge_{}", sanitized))
}

#[cfg(unix)]
mod backing {
    use super::{unix_object_path, REGION_SIZE};
    use crate::error::{BridgeError, Result};
    use memmap2::MmapMut;
    use std::fs::OpenOptions;

    pub struct Backing {
        mmap: MmapMut,
    }

    impl Backing {
        pub fn create(name: &str) -> Result<Self> {
            use std::os::unix::fs::OpenOptionsExt;

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(unix_object_path(name))
                .map_err(|e| {
                    BridgeError::SharedMemoryError(format!(
                        "Failed to create shared memory file: {}",
                        e
                    ))
                })?;

            file.set_len(REGION_SIZE as u64).map_err(|e| {
                BridgeError::SharedMemoryError(format!("Failed to set file size: {}", e))
            })?;

            let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
                BridgeError::SharedMemoryError(format!("Failed to create memory map: {}", e))
            })?;

            Ok(Self { mmap })
        }

        pub fn open(name: &str) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(unix_object_path(name))
                .map_err(|e| {
                    BridgeError::SharedMemoryError(format!(
                        "Failed to open shared memory file: {}",
                        e
                    ))
                })?;

            let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| {
                BridgeError::SharedMemoryError(format!("Failed to open memory map: {}", e))
            })?;

            if mmap.len() < REGION_SIZE {
                return Err(BridgeError::SharedMemoryError(format!(
                    "Shared region is {} bytes, expected {}",
                    mmap.len(),
                    REGION_SIZE
                )));
            }

            Ok(Self { mmap })
        }

        pub fn as_ptr(&self) -> *const u8 {
            self.mmap.as_ptr()
        }

        pub fn as_mut_ptr(&mut self) -> *mut u8 {
            self.mmap.as_mut_ptr()
        }

        pub fn unlink(&self, name: &str) {
            let _ = std::fs::remove_file(unix_object_path(name));
        }
    }
}

#[cfg(windows)]
mod backing {
    use super::REGION_SIZE;
    use crate::error::{BridgeError, Result};
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE, INVALID_HANDLE_VALUE};
    use windows::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, OpenFileMappingW, UnmapViewOfFile,
        FILE_MAP_ALL_ACCESS, MEMORYMAPPEDVIEW_ADDRESS, PAGE_READWRITE,
    };

    pub struct Backing {
        handle: HANDLE,
        view: MEMORYMAPPEDVIEW_ADDRESS,
    }

    // SAFETY: the view is process-wide memory; access is serialized by the owner.
    unsafe impl Send for Backing {}

    impl Backing {
        pub fn create(name: &str) -> Result<Self> {
            let wide = HSTRING::from(name);
            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    None,
                    PAGE_READWRITE,
                    0,
                    REGION_SIZE as u32,
                    &wide,
                )
            }
            .map_err(|e| {
                BridgeError::SharedMemoryError(format!("CreateFileMapping failed: {}", e))
            })?;
            Self::map(handle)
        }

        pub fn open(name: &str) -> Result<Self> {
            let wide = HSTRING::from(name);
            let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS.0, FALSE, &wide) }
                .map_err(|e| {
                    BridgeError::SharedMemoryError(format!("OpenFileMapping failed: {}", e))
                })?;
            Self::map(handle)
        }

        fn map(handle: HANDLE) -> Result<Self> {
            let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, REGION_SIZE) };
            if view.Value.is_null() {
                let _ = unsafe { CloseHandle(handle) };
                return Err(BridgeError::SharedMemoryError(
                    "MapViewOfFile failed".to_string(),
                ));
            }
            Ok(Self { handle, view })
        }

        pub fn as_ptr(&self) -> *const u8 {
            self.view.Value as *const u8
        }

        pub fn as_mut_ptr(&mut self) -> *mut u8 {
            self.view.Value as *mut u8
        }

        /// Named mappings disappear with their last handle.
        pub fn unlink(&self, _name: &str) {}
    }

    impl Drop for Backing {
        fn drop(&mut self) {
            unsafe {
                let _ = UnmapViewOfFile(self.view);
                let _ = CloseHandle(self.handle);
            }
        }
    }
}
