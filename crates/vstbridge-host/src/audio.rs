//! Audio block processing over the shared region.
//!
//! The audio thread is the only caller of `Processor::process`. The main loop
//! hands it a processor through [`ProcessorSlot`] at load time and takes it
//! back at release; taking it waits for an in-flight cycle to finish.

use crate::module::{ParameterChanges, ProcessData, Processor};
use crate::params::ParameterMailbox;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vstbridge_ipc::{AudioSharedRegion, NamedSignal, Result};

/// Channel count of every audio bus, negotiated at load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusLayout {
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

pub struct ActiveProcessor {
    pub processor: Box<dyn Processor>,
    pub layout: BusLayout,
}

#[derive(Default)]
pub struct ProcessorSlot {
    inner: Mutex<Option<ActiveProcessor>>,
}

impl ProcessorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, active: ActiveProcessor) {
        *self.inner.lock() = Some(active);
    }

    pub fn take(&self) -> Option<ActiveProcessor> {
        self.inner.lock().take()
    }

    /// [`take`](Self::take) that gives up after `timeout`. The outer `None`
    /// means a cycle was still running.
    pub fn try_take_for(&self, timeout: Duration) -> Option<Option<ActiveProcessor>> {
        self.inner.try_lock_for(timeout).map(|mut slot| slot.take())
    }

    /// Held by the audio thread for the whole of a cycle.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<ActiveProcessor>> {
        self.inner.lock()
    }

    pub fn is_occupied(&self) -> bool {
        self.inner.lock().is_some()
    }
}

/// Backing store for channels that are not bound to the shared slots.
#[derive(Default)]
struct ScratchBuffers {
    layout: BusLayout,
    inputs: Vec<Vec<Vec<f32>>>,
    outputs: Vec<Vec<Vec<f32>>>,
}

impl ScratchBuffers {
    fn ensure(&mut self, layout: &BusLayout, frames: usize) {
        let sized = |buses: &[usize]| -> Vec<Vec<Vec<f32>>> {
            buses
                .iter()
                .map(|&channels| vec![vec![0.0; vstbridge_ipc::MAX_BLOCK_SIZE]; channels])
                .collect()
        };
        if self.layout != *layout {
            self.inputs = sized(&layout.inputs);
            self.outputs = sized(&layout.outputs);
            self.layout = layout.clone();
        }
        for channel in self.inputs.iter_mut().flatten() {
            channel[..frames].fill(0.0);
        }
    }
}

/// Bus 0 channels 0 and 1 map to the shared slots; everything else is scratch.
const BOUND_CHANNELS: usize = 2;

pub struct AudioBlockProcessor {
    region: AudioSharedRegion,
    ready: Arc<NamedSignal>,
    done: NamedSignal,
    slot: Arc<ProcessorSlot>,
    pending: Arc<ParameterMailbox>,
    updates: Arc<ParameterMailbox>,
    wait_timeout: Duration,
    scratch: ScratchBuffers,
    input_changes: ParameterChanges,
    output_changes: ParameterChanges,
}

impl AudioBlockProcessor {
    pub fn new(
        region: AudioSharedRegion,
        ready: Arc<NamedSignal>,
        done: NamedSignal,
        slot: Arc<ProcessorSlot>,
        pending: Arc<ParameterMailbox>,
        updates: Arc<ParameterMailbox>,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            region,
            ready,
            done,
            slot,
            pending,
            updates,
            wait_timeout,
            scratch: ScratchBuffers::default(),
            input_changes: ParameterChanges::new(),
            output_changes: ParameterChanges::new(),
        }
    }

    /// Serve cycles until `running` is cleared.
    pub fn run(mut self, running: Arc<AtomicBool>) {
        tracing::debug!("audio thread started");
        while running.load(Ordering::Acquire) {
            match self.ready.wait(self.wait_timeout) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::error!("waiting for client-ready failed: {}", e);
                    break;
                }
            }
            if !running.load(Ordering::Acquire) {
                break;
            }
            if let Err(e) = self.serve_cycle() {
                tracing::error!("audio cycle failed: {}", e);
                break;
            }
        }
        tracing::debug!("audio thread stopped");
    }

    /// Handle one observed ready signal: exactly one cycle, exactly one done.
    pub fn serve_cycle(&mut self) -> Result<()> {
        let header = self.region.header();
        self.ready.reset()?;

        if header.num_samples > 0 {
            self.process(header.frames(), header.sample_rate);
        }

        self.done.set()
    }

    fn process(&mut self, frames: usize, sample_rate: f64) {
        let mut guard = self.slot.lock();
        let Some(active) = guard.as_mut() else {
            return;
        };

        self.input_changes.clear();
        for (id, value) in self.pending.drain() {
            self.input_changes.queue_mut(id).add_point(0, value);
        }
        self.output_changes.clear();

        self.scratch.ensure(&active.layout, frames);
        let shared = self.region.block_buffers(frames);
        let [out_left, out_right] = shared.outputs;
        out_left.fill(0.0);
        out_right.fill(0.0);

        let mut shared_in = shared.inputs.into_iter();
        let inputs: Vec<Vec<&[f32]>> = self
            .scratch
            .inputs
            .iter()
            .enumerate()
            .map(|(bus, channels)| {
                channels
                    .iter()
                    .enumerate()
                    .map(|(ch, scratch)| match (bus, ch) {
                        (0, ch) if ch < BOUND_CHANNELS => {
                            shared_in.next().unwrap_or(&scratch[..frames])
                        }
                        _ => &scratch[..frames],
                    })
                    .collect()
            })
            .collect();

        let mut shared_out = [Some(out_left), Some(out_right)].into_iter().flatten();
        let outputs: Vec<Vec<&mut [f32]>> = self
            .scratch
            .outputs
            .iter_mut()
            .enumerate()
            .map(|(bus, channels)| {
                channels
                    .iter_mut()
                    .enumerate()
                    .map(|(ch, scratch)| match (bus, ch) {
                        (0, ch) if ch < BOUND_CHANNELS => match shared_out.next() {
                            Some(slot) => slot,
                            None => &mut scratch[..frames],
                        },
                        _ => &mut scratch[..frames],
                    })
                    .collect()
            })
            .collect();

        let mut data = ProcessData {
            num_samples: frames,
            sample_rate,
            inputs,
            outputs,
            input_params: &self.input_changes,
            output_params: &mut self.output_changes,
        };

        if let Err(code) = active.processor.process(&mut data) {
            tracing::debug!("process returned {}", code);
        }
        drop(data);

        if !self.output_changes.is_empty() {
            self.updates.post_all(
                self.output_changes
                    .queues
                    .iter()
                    .filter_map(|q| q.last_value().map(|v| (q.param_id, v))),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{PluginResult, ProcessSetup};
    use vstbridge_ipc::{AudioHeader, ResetMode, Slot};

    struct Recorder {
        calls: Arc<Mutex<Vec<(usize, Vec<usize>, Vec<(u32, f64)>)>>>,
        emit: Vec<(u32, f64)>,
    }

    impl Processor for Recorder {
        fn setup_processing(&mut self, _setup: &ProcessSetup) -> PluginResult {
            Ok(())
        }
        fn set_processing(&mut self, _processing: bool) -> PluginResult {
            Ok(())
        }
        fn process(&mut self, data: &mut ProcessData<'_>) -> PluginResult {
            let params = data
                .input_params
                .queues
                .iter()
                .map(|q| (q.param_id, q.points[0].value))
                .collect();
            let channels = data.outputs.iter().map(Vec::len).collect();
            self.calls.lock().push((data.num_samples, channels, params));

            // copy-through with gain on the main bus
            for ch in 0..data.outputs[0].len().min(data.inputs.first().map_or(0, Vec::len)) {
                for i in 0..data.num_samples {
                    data.outputs[0][ch][i] = data.inputs[0][ch][i] * 2.0;
                }
            }
            for &(id, value) in &self.emit {
                data.output_params.queue_mut(id).add_point(0, value * 0.5);
                data.output_params.queue_mut(id).add_point(16, value);
            }
            Ok(())
        }
    }

    struct Fixture {
        audio: AudioBlockProcessor,
        client: AudioSharedRegion,
        done: NamedSignal,
        slot: Arc<ProcessorSlot>,
        pending: Arc<ParameterMailbox>,
        updates: Arc<ParameterMailbox>,
    }

    fn fixture(tag: &str) -> Fixture {
        let base = format!("test_audio_{}_{}", tag, std::process::id());
        let region = AudioSharedRegion::create(&format!("{base}_shm")).unwrap();
        let client = AudioSharedRegion::open(&format!("{base}_shm")).unwrap();
        let ready =
            Arc::new(NamedSignal::create(&format!("{base}_ready"), ResetMode::Manual).unwrap());
        let done_owner = NamedSignal::create(&format!("{base}_done"), ResetMode::Auto).unwrap();
        let done = NamedSignal::open(&format!("{base}_done"), ResetMode::Auto).unwrap();
        let slot = Arc::new(ProcessorSlot::new());
        let pending = Arc::new(ParameterMailbox::new());
        let updates = Arc::new(ParameterMailbox::new());
        let audio = AudioBlockProcessor::new(
            region,
            ready,
            done_owner,
            Arc::clone(&slot),
            Arc::clone(&pending),
            Arc::clone(&updates),
            Duration::from_millis(10),
        );
        Fixture {
            audio,
            client,
            done,
            slot,
            pending,
            updates,
        }
    }

    fn stereo() -> BusLayout {
        BusLayout {
            inputs: vec![2],
            outputs: vec![2],
        }
    }

    #[test]
    fn test_cycle_without_processor_still_signals_done() {
        let mut f = fixture("noproc");
        f.client.write_header(&AudioHeader {
            sample_rate: 44100.0,
            num_samples: 256,
            num_channels: 2,
        });
        f.audio.serve_cycle().unwrap();
        assert!(f.done.wait(Duration::ZERO).unwrap());
        assert!(!f.done.wait(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_cycle_processes_shared_buffers() {
        let mut f = fixture("process");
        let calls = Arc::default();
        f.slot.install(ActiveProcessor {
            processor: Box::new(Recorder {
                calls: Arc::clone(&calls),
                emit: vec![(11, 0.8)],
            }),
            layout: BusLayout {
                inputs: vec![2, 2],
                outputs: vec![2, 1],
            },
        });
        f.pending.post(3, 0.4);
        f.pending.post(3, 0.6);

        f.client.write_slot(Slot::InputLeft, &[0.5; 256]).unwrap();
        f.client.write_slot(Slot::InputRight, &[0.25; 256]).unwrap();
        f.client.write_header(&AudioHeader {
            sample_rate: 48000.0,
            num_samples: 256,
            num_channels: 2,
        });
        f.audio.serve_cycle().unwrap();

        let calls = calls.lock();
        assert_eq!(calls.len(), 1);
        let (frames, channels, params) = &calls[0];
        assert_eq!(*frames, 256);
        assert_eq!(channels, &vec![2, 1]);
        assert_eq!(params, &vec![(3, 0.6)]);

        let mut out = vec![0.0; 256];
        f.client.read_slot_into(Slot::OutputLeft, &mut out);
        assert!(out.iter().all(|&s| s == 1.0));
        f.client.read_slot_into(Slot::OutputRight, &mut out);
        assert!(out.iter().all(|&s| s == 0.5));

        assert!(f.pending.is_empty());
        assert_eq!(f.updates.drain()[&11], 0.8);
    }

    #[test]
    fn test_zero_frames_skips_plugin() {
        let mut f = fixture("zero");
        let calls = Arc::default();
        f.slot.install(ActiveProcessor {
            processor: Box::new(Recorder {
                calls: Arc::clone(&calls),
                emit: Vec::new(),
            }),
            layout: stereo(),
        });
        f.pending.post(1, 0.1);
        f.client.write_header(&AudioHeader {
            sample_rate: 44100.0,
            num_samples: 0,
            num_channels: 2,
        });

        f.audio.serve_cycle().unwrap();
        assert!(calls.lock().is_empty());
        assert!(f.done.wait(Duration::ZERO).unwrap());
        // edits survive until a real cycle
        assert!(!f.pending.is_empty());
    }

    #[test]
    fn test_slot_take_returns_processor() {
        let slot = ProcessorSlot::new();
        assert!(!slot.is_occupied());
        slot.install(ActiveProcessor {
            processor: Box::new(Recorder {
                calls: Arc::default(),
                emit: Vec::new(),
            }),
            layout: stereo(),
        });
        assert!(slot.is_occupied());
        assert!(slot.take().is_some());
        assert!(slot.take().is_none());
    }

    #[test]
    fn test_slot_try_take_gives_up_while_a_cycle_holds_it() {
        let slot = ProcessorSlot::new();
        slot.install(ActiveProcessor {
            processor: Box::new(Recorder {
                calls: Arc::default(),
                emit: Vec::new(),
            }),
            layout: stereo(),
        });

        let in_cycle = slot.lock();
        assert!(slot.try_take_for(Duration::from_millis(20)).is_none());
        drop(in_cycle);

        assert!(matches!(slot.try_take_for(Duration::from_millis(20)), Some(Some(_))));
        assert!(matches!(slot.try_take_for(Duration::from_millis(20)), Some(None)));
    }
}
