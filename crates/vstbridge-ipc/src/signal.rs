//! Named cross-process signals for the audio handshake.
//!
//! Two are used per session: "client-ready" (manual reset, set by the
//! controller, reset by the host) and "host-done" (auto reset, set by the host,
//! consumed by the controller's wait).

use crate::error::{BridgeError, Result};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays set until explicitly reset.
    Manual,
    /// A successful wait consumes the signal.
    Auto,
}

pub struct NamedSignal {
    inner: imp::Signal,
    name: String,
    mode: ResetMode,
}

impl NamedSignal {
    /// Create the signal in the unset state. The creator owns it.
    pub fn create(name: &str, mode: ResetMode) -> Result<Self> {
        Ok(Self {
            inner: imp::Signal::create(name, mode)?,
            name: name.to_string(),
            mode,
        })
    }

    /// Open a signal created by another process.
    pub fn open(name: &str, mode: ResetMode) -> Result<Self> {
        Ok(Self {
            inner: imp::Signal::open(name, mode)?,
            name: name.to_string(),
            mode,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    pub fn set(&self) -> Result<()> {
        self.inner.set()
    }

    pub fn reset(&self) -> Result<()> {
        self.inner.reset()
    }

    /// Returns `true` if the signal was observed set before `timeout` elapsed.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        self.inner.wait(timeout)
    }
}

impl std::fmt::Debug for NamedSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedSignal")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

/// A 4-byte flag in a shared mapping, polled by waiters.
#[cfg(unix)]
mod imp {
    use super::ResetMode;
    use crate::error::{BridgeError, Result};
    use crate::shared_memory::unix_object_path;
    use memmap2::MmapMut;
    use std::fs::OpenOptions;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    const POLL_INTERVAL: Duration = Duration::from_micros(100);

    pub struct Signal {
        mmap: MmapMut,
        mode: ResetMode,
        path: Option<std::path::PathBuf>,
    }

    impl Signal {
        pub fn create(name: &str, mode: ResetMode) -> Result<Self> {
            use std::os::unix::fs::OpenOptionsExt;

            let path = unix_object_path(name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| {
                    BridgeError::SignalError(format!("Failed to create signal {}: {}", name, e))
                })?;
            file.set_len(std::mem::size_of::<AtomicU32>() as u64)?;
            let mmap = unsafe { MmapMut::map_mut(&file) }
                .map_err(|e| BridgeError::SignalError(format!("Failed to map signal: {}", e)))?;
            Ok(Self {
                mmap,
                mode,
                path: Some(path),
            })
        }

        pub fn open(name: &str, mode: ResetMode) -> Result<Self> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(unix_object_path(name))
                .map_err(|e| {
                    BridgeError::SignalError(format!("Failed to open signal {}: {}", name, e))
                })?;
            let mmap = unsafe { MmapMut::map_mut(&file) }
                .map_err(|e| BridgeError::SignalError(format!("Failed to map signal: {}", e)))?;
            if mmap.len() < std::mem::size_of::<AtomicU32>() {
                return Err(BridgeError::SignalError(format!(
                    "Signal {} is truncated",
                    name
                )));
            }
            Ok(Self {
                mmap,
                mode,
                path: None,
            })
        }

        fn flag(&self) -> &AtomicU32 {
            // SAFETY: the mapping is page aligned and at least 4 bytes long;
            // all access to it goes through atomics.
            unsafe { &*(self.mmap.as_ptr() as *const AtomicU32) }
        }

        pub fn set(&self) -> Result<()> {
            self.flag().store(1, Ordering::Release);
            Ok(())
        }

        pub fn reset(&self) -> Result<()> {
            self.flag().store(0, Ordering::Release);
            Ok(())
        }

        fn try_take(&self) -> bool {
            match self.mode {
                ResetMode::Manual => self.flag().load(Ordering::Acquire) == 1,
                ResetMode::Auto => self
                    .flag()
                    .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok(),
            }
        }

        pub fn wait(&self, timeout: Duration) -> Result<bool> {
            let deadline = Instant::now() + timeout;
            loop {
                if self.try_take() {
                    return Ok(true);
                }
                if Instant::now() >= deadline {
                    return Ok(false);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    impl Drop for Signal {
        fn drop(&mut self) {
            if let Some(path) = self.path.take() {
                let _ = std::fs::remove_file(path);
            }
        }
    }
}

#[cfg(windows)]
mod imp {
    use super::ResetMode;
    use crate::error::{BridgeError, Result};
    use std::time::Duration;
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{CloseHandle, FALSE, HANDLE, TRUE, WAIT_OBJECT_0};
    use windows::Win32::System::Threading::{
        CreateEventW, OpenEventW, ResetEvent, SetEvent, WaitForSingleObject, EVENT_MODIFY_STATE,
        SYNCHRONIZATION_SYNCHRONIZE,
    };

    pub struct Signal {
        handle: HANDLE,
    }

    impl Signal {
        pub fn create(name: &str, mode: ResetMode) -> Result<Self> {
            let manual = if mode == ResetMode::Manual { TRUE } else { FALSE };
            let handle = unsafe { CreateEventW(None, manual, FALSE, &HSTRING::from(name)) }
                .map_err(|e| BridgeError::SignalError(format!("CreateEvent {}: {}", name, e)))?;
            Ok(Self { handle })
        }

        pub fn open(name: &str, _mode: ResetMode) -> Result<Self> {
            let handle = unsafe {
                OpenEventW(
                    EVENT_MODIFY_STATE | SYNCHRONIZATION_SYNCHRONIZE,
                    FALSE,
                    &HSTRING::from(name),
                )
            }
            .map_err(|e| BridgeError::SignalError(format!("OpenEvent {}: {}", name, e)))?;
            Ok(Self { handle })
        }

        pub fn set(&self) -> Result<()> {
            unsafe { SetEvent(self.handle) }
                .map_err(|e| BridgeError::SignalError(format!("SetEvent: {}", e)))
        }

        pub fn reset(&self) -> Result<()> {
            unsafe { ResetEvent(self.handle) }
                .map_err(|e| BridgeError::SignalError(format!("ResetEvent: {}", e)))
        }

        pub fn wait(&self, timeout: Duration) -> Result<bool> {
            let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
            let status = unsafe { WaitForSingleObject(self.handle, millis) };
            Ok(status == WAIT_OBJECT_0)
        }
    }

    impl Drop for Signal {
        fn drop(&mut self) {
            let _ = unsafe { CloseHandle(self.handle) };
        }
    }
}

impl NamedSignal {
    /// Wait and map a timeout to [`BridgeError::Timeout`].
    pub fn wait_or_timeout(&self, timeout: Duration) -> Result<()> {
        if self.wait(timeout)? {
            Ok(())
        } else {
            Err(BridgeError::Timeout {
                operation: format!("waiting for {}", self.name),
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}
