//! One running host: IPC resources, worker threads, cooperative shutdown.

use crate::audio::{AudioBlockProcessor, ProcessorSlot};
use crate::dispatcher::{self, MainLoop, MainLoopHandle};
use crate::editor::{EditorSession, WindowProvider};
use crate::host_context::HostContext;
use crate::lifecycle::PluginLifecycle;
use crate::listener::{self, ExitRequest, ListenerConfig};
use crate::module::ModuleLoader;
use crate::params::ParameterMailbox;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::watch;
use vstbridge_ipc::{AudioSharedRegion, BridgeConfig, NamedSignal, ResetMode, Result};

struct ShutdownInner {
    running: Arc<AtomicBool>,
    stop_listener: watch::Sender<bool>,
    ready: Arc<NamedSignal>,
    main_loop: MainLoopHandle,
}

/// Stops a session from any thread. Idempotent.
#[derive(Clone)]
pub struct ShutdownHandle {
    inner: Arc<ShutdownInner>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("shutdown requested");
        let _ = self.inner.stop_listener.send(true);
        // wake the audio thread out of its ready wait
        let _ = self.inner.ready.set();
        self.inner.main_loop.close();
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
}

impl ExitRequest for ShutdownHandle {
    fn request_exit(&self) {
        self.request();
    }
}

struct Worker {
    name: &'static str,
    handle: JoinHandle<()>,
    done: Receiver<()>,
}

impl Worker {
    fn spawn(name: &'static str, body: impl FnOnce() + Send + 'static) -> Result<Self> {
        let (done_tx, done) = crossbeam_channel::bounded(1);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                body();
                let _ = done_tx.send(());
            })?;
        Ok(Self { name, handle, done })
    }

    /// Join within `timeout`, otherwise leave the thread running detached.
    /// Returns `false` if the thread was abandoned.
    fn join(self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if self.handle.join().is_err() {
                    tracing::warn!("{} panicked", self.name);
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("{} did not stop within {:?}; abandoning it", self.name, timeout);
                false
            }
        }
    }
}

pub struct Session {
    config: BridgeConfig,
    main_loop: MainLoop,
    shutdown: ShutdownHandle,
    workers: Vec<Worker>,
}

impl Session {
    /// Create the IPC endpoints and start the audio and listener threads.
    /// The main loop runs on the caller's thread in [`Session::run`].
    pub fn start(
        config: BridgeConfig,
        loader: Box<dyn ModuleLoader>,
        windows: Box<dyn WindowProvider>,
    ) -> Result<Self> {
        let region = AudioSharedRegion::create(&config.shm_name())?;
        let ready = Arc::new(NamedSignal::create(
            &config.event_ready_name(),
            ResetMode::Manual,
        )?);
        let done = NamedSignal::create(&config.event_done_name(), ResetMode::Auto)?;

        let pending = Arc::new(ParameterMailbox::new());
        let updates = Arc::new(ParameterMailbox::new());
        let processors = Arc::new(ProcessorSlot::new());

        let events = dispatcher::channel();
        let handler = Arc::new(HostContext::new(Arc::clone(&pending), events.0.clone()));
        let lifecycle = PluginLifecycle::new(
            loader,
            handler,
            Arc::clone(&processors),
            EditorSession::new(windows),
        );
        let (main_loop, main_loop_handle) = MainLoop::new(
            lifecycle,
            events,
            Arc::clone(&updates),
            config.tick_interval(),
        );

        let (stop_listener, stop_rx) = watch::channel(false);
        let shutdown = ShutdownHandle {
            inner: Arc::new(ShutdownInner {
                running: Arc::new(AtomicBool::new(true)),
                stop_listener,
                ready: Arc::clone(&ready),
                main_loop: main_loop_handle.clone(),
            }),
        };

        let mut session = Session {
            config,
            main_loop,
            shutdown,
            workers: Vec::with_capacity(2),
        };

        let audio = AudioBlockProcessor::new(
            region,
            ready,
            done,
            processors,
            pending,
            updates,
            session.config.audio_wait_timeout(),
        );
        let running = Arc::clone(&session.shutdown.inner.running);
        session
            .workers
            .push(Worker::spawn("vstbridge-audio", move || audio.run(running))?);

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let handle = listener::spawn(
            ListenerConfig {
                pipe_name: session.config.pipe_name(),
                max_command_len: session.config.max_command_len,
            },
            main_loop_handle,
            Arc::new(session.shutdown.clone()),
            stop_rx,
            move || {
                let _ = done_tx.send(());
            },
        )?;
        session.workers.push(Worker {
            name: "vstbridge-listener",
            handle,
            done: done_rx,
        });

        tracing::info!(
            "session {} started (pipe {}, shm {})",
            session.config.session_id,
            session.config.pipe_name(),
            session.config.shm_name()
        );
        Ok(session)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run the main loop until `exit` or an external shutdown request, then
    /// tear everything down.
    pub fn run(mut self) {
        self.main_loop.run();
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown.request();
        let timeout = self.config.join_timeout();
        let abandoned = self
            .workers
            .drain(..)
            .map(|worker| worker.join(timeout))
            .filter(|stopped| !stopped)
            .count();
        // a stuck audio thread still holds the processor slot
        let released = self.main_loop.lifecycle_mut().release_within(timeout);
        if abandoned == 0 && released {
            tracing::info!("session {} stopped", self.config.session_id);
        } else {
            tracing::warn!(
                "session {} stopped with {} thread(s) abandoned",
                self.config.session_id,
                abandoned
            );
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}
