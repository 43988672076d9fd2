//! Main loop: the single owner of plugin and editor state.
//!
//! Wakes on queued commands, synchronous requests, GUI events and a periodic
//! tick. On every wake an outstanding synchronous request is served first,
//! then queued events are drained in arrival order.

use crate::lifecycle::PluginLifecycle;
use crate::params::ParameterMailbox;
use crossbeam_channel::{select, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vstbridge_ipc::state::NO_PLUGIN;
use vstbridge_ipc::{AsyncCommand, BridgeError, Response, StateCodec, SyncCommand};

/// Reply given to a synchronous caller released by shutdown.
pub const SHUTTING_DOWN: &str = "ShuttingDown";

#[derive(Debug, Clone, PartialEq)]
pub enum MainLoopEvent {
    /// A raw command line from the transport.
    Command(String),
    SyncPending,
    ShowGui,
    HideGui,
    Quit,
}

#[derive(Default)]
struct SyncState {
    request: Option<SyncCommand>,
    result: Option<Response>,
    closed: bool,
}

/// Single-slot rendezvous between the listener and the main loop.
#[derive(Default)]
pub struct SyncSlot {
    state: Mutex<SyncState>,
    ready: Condvar,
}

impl SyncSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a request and block until the main loop answers or the slot is
    /// closed.
    ///
    /// Callers must not submit while another request is outstanding; the
    /// listener serves one connection at a time, which guarantees this.
    pub fn submit(&self, command: SyncCommand, wake: impl FnOnce()) -> Option<Response> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.request = Some(command);
        state.result = None;
        wake();
        loop {
            if state.closed {
                state.request = None;
                return None;
            }
            if let Some(result) = state.result.take() {
                return Some(result);
            }
            self.ready.wait(&mut state);
        }
    }

    fn take_request(&self) -> Option<SyncCommand> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        state.request.take()
    }

    fn complete(&self, response: Response) {
        let mut state = self.state.lock();
        state.result = Some(response);
        self.ready.notify_all();
    }

    /// Release any blocked caller; later submits return immediately.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }
}

/// What other threads hold to talk to the main loop.
#[derive(Clone)]
pub struct MainLoopHandle {
    events: Sender<MainLoopEvent>,
    sync: Arc<SyncSlot>,
}

impl MainLoopHandle {
    pub fn enqueue(&self, line: String) {
        let _ = self.events.send(MainLoopEvent::Command(line));
    }

    pub fn post(&self, event: MainLoopEvent) {
        let _ = self.events.send(event);
    }

    /// Blocks the caller, never the main loop.
    pub fn request(&self, command: SyncCommand) -> Response {
        self.sync
            .submit(command, || {
                let _ = self.events.send(MainLoopEvent::SyncPending);
            })
            .unwrap_or_else(|| Response::Fail(SHUTTING_DOWN.to_string()))
    }

    pub fn close(&self) {
        self.sync.close();
        let _ = self.events.send(MainLoopEvent::Quit);
    }
}

pub struct MainLoop {
    lifecycle: PluginLifecycle,
    events: Receiver<MainLoopEvent>,
    sync: Arc<SyncSlot>,
    updates: Arc<ParameterMailbox>,
    codec: StateCodec,
    tick_interval: Duration,
}

/// Create the event channel and the matching handle.
pub fn channel() -> (Sender<MainLoopEvent>, Receiver<MainLoopEvent>) {
    crossbeam_channel::unbounded()
}

impl MainLoop {
    pub fn new(
        lifecycle: PluginLifecycle,
        events: (Sender<MainLoopEvent>, Receiver<MainLoopEvent>),
        updates: Arc<ParameterMailbox>,
        tick_interval: Duration,
    ) -> (Self, MainLoopHandle) {
        let (tx, rx) = events;
        let sync = Arc::new(SyncSlot::new());
        let handle = MainLoopHandle {
            events: tx,
            sync: Arc::clone(&sync),
        };
        let main_loop = Self {
            lifecycle,
            events: rx,
            sync,
            updates,
            codec: StateCodec::new(),
            tick_interval,
        };
        (main_loop, handle)
    }

    pub fn lifecycle(&self) -> &PluginLifecycle {
        &self.lifecycle
    }

    pub fn lifecycle_mut(&mut self) -> &mut PluginLifecycle {
        &mut self.lifecycle
    }

    /// Run until `Quit` arrives or every sender is gone.
    pub fn run(&mut self) {
        let ticker = crossbeam_channel::tick(self.tick_interval);
        let events = self.events.clone();
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        if !self.wake(event) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => self.tick(),
            }
        }
        tracing::debug!("main loop stopped");
    }

    /// Process everything currently queued, waiting up to `timeout` for the
    /// first event. Returns `false` once `Quit` has been seen.
    pub fn pump(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        match self.events.recv_deadline(deadline) {
            Ok(event) => self.wake(event),
            Err(_) => true,
        }
    }

    fn wake(&mut self, first: MainLoopEvent) -> bool {
        self.serve_sync();
        if !self.handle(first) {
            return false;
        }
        while let Ok(event) = self.events.try_recv() {
            self.serve_sync();
            if !self.handle(event) {
                return false;
            }
        }
        true
    }

    fn serve_sync(&mut self) {
        if let Some(command) = self.sync.take_request() {
            let response = self.execute_sync(command);
            self.sync.complete(response);
        }
    }

    pub fn execute_sync(&mut self, command: SyncCommand) -> Response {
        match command {
            SyncCommand::GetState => match self.lifecycle.save_state() {
                Some(state) => Response::Ok(Some(self.codec.encode(&state))),
                None => Response::Fail(NO_PLUGIN.to_string()),
            },
        }
    }

    fn handle(&mut self, event: MainLoopEvent) -> bool {
        match event {
            MainLoopEvent::Command(line) => self.execute_line(&line),
            MainLoopEvent::SyncPending => {}
            MainLoopEvent::ShowGui => self.show_gui(),
            MainLoopEvent::HideGui => self.lifecycle.hide_editor(),
            MainLoopEvent::Quit => return false,
        }
        true
    }

    /// Parse and run one queued command. Failures are logged; the loop continues.
    pub fn execute_line(&mut self, line: &str) {
        match AsyncCommand::parse(line) {
            Ok(command) => self.execute(command),
            Err(e) => tracing::warn!("dropping command: {}", e),
        }
    }

    pub fn execute(&mut self, command: AsyncCommand) {
        match command {
            AsyncCommand::LoadPlugin(request) => {
                if let Err(e) = self.lifecycle.load(&request) {
                    tracing::warn!("{}", load_failure("load_plugin", &e));
                }
            }
            AsyncCommand::LoadAndSetState { request, state } => {
                if let Err(e) = self.lifecycle.load(&request) {
                    tracing::warn!("{}", load_failure("load_and_set_state", &e));
                    return;
                }
                if let Some(payload) = state {
                    self.restore(&payload);
                }
            }
            AsyncCommand::SetState(payload) => {
                tracing::warn!("set_state is deprecated; use load_and_set_state");
                if !self.lifecycle.is_loaded() {
                    tracing::debug!("set_state ignored: no plugin loaded");
                    return;
                }
                self.restore(&payload);
            }
            AsyncCommand::ShowGui => self.show_gui(),
            AsyncCommand::HideGui => self.lifecycle.hide_editor(),
            AsyncCommand::Unknown(verb) => tracing::debug!("ignoring unknown command {:?}", verb),
        }
    }

    fn restore(&mut self, payload: &str) {
        match self.codec.decode(payload) {
            Ok(state) if state.is_empty() => tracing::debug!("empty state, nothing to restore"),
            Ok(state) => {
                self.lifecycle.restore_state(&state);
            }
            Err(e) => tracing::warn!("state restore skipped: {}", e),
        }
    }

    fn show_gui(&mut self) {
        if let Err(e) = self.lifecycle.show_editor() {
            tracing::warn!("show_gui: {}", e);
        }
    }

    /// Forward processor-originated parameter values to the open editor.
    pub fn tick(&mut self) {
        if !self.lifecycle.editor_open() {
            return;
        }
        let updates = self.updates.drain();
        if !updates.is_empty() {
            self.lifecycle.relay_parameter_updates(updates);
        }
    }
}

fn load_failure(verb: &str, error: &BridgeError) -> String {
    match error.load_stage() {
        Some(stage) => format!("{} failed while {}: {}", verb, stage, error),
        None => format!("{} failed: {}", verb, error),
    }
}
