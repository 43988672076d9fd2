//! Fixtures for bridge integration tests.
//!
//! Each fixture runs a real [`Session`] on its own thread, backed by the stub
//! plugin module, with endpoint names unique to the test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vstbridge::host::testing::{StubBehavior, StubLoader, StubProbe};
use vstbridge::host::HeadlessWindows;
use vstbridge::prelude::*;

/// Generous bound for anything that crosses threads.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(3);

pub const TEST_SAMPLE_RATE: f64 = 48000.0;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// A config whose endpoints no other test (or test binary) shares.
pub fn test_config() -> BridgeConfig {
    let session_id =
        (u64::from(std::process::id()) << 20) | NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
    BridgeConfig {
        audio_wait_timeout_ms: 20,
        tick_interval_ms: 10,
        ..BridgeConfig::default().with_session_id(session_id)
    }
}

pub struct HostFixture {
    pub config: BridgeConfig,
    pub probe: StubProbe,
    shutdown: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
    stopped: mpsc::Receiver<()>,
}

impl HostFixture {
    pub fn start() -> Self {
        Self::with_behavior(StubBehavior::default())
    }

    pub fn with_behavior(behavior: StubBehavior) -> Self {
        Self::with_config(test_config(), behavior)
    }

    pub fn with_config(config: BridgeConfig, behavior: StubBehavior) -> Self {
        let loader = StubLoader::new(behavior);
        let probe = loader.probe();

        let (started_tx, started_rx) = mpsc::channel();
        let (stopped_tx, stopped) = mpsc::channel();
        let session_config = config.clone();
        let thread = thread::spawn(move || {
            match Session::start(session_config, Box::new(loader), Box::new(HeadlessWindows)) {
                Ok(session) => {
                    started_tx.send(Ok(session.shutdown_handle())).unwrap();
                    session.run();
                }
                Err(e) => started_tx.send(Err(e)).unwrap(),
            }
            let _ = stopped_tx.send(());
        });

        let shutdown = started_rx
            .recv_timeout(TEST_TIMEOUT)
            .expect("session thread did not report")
            .expect("session failed to start");

        Self {
            config,
            probe,
            shutdown,
            thread: Some(thread),
            stopped,
        }
    }

    pub async fn connect(&self) -> CommandClient {
        CommandClient::connect(&self.config)
            .await
            .expect("failed to connect to host")
    }

    pub fn audio(&self) -> AudioClient {
        AudioClient::open(&self.config).expect("failed to open shared audio")
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request();
    }

    /// Whether the session thread finished within `timeout`.
    pub fn wait_stopped(&self, timeout: Duration) -> bool {
        self.stopped.recv_timeout(timeout).is_ok()
    }
}

impl Drop for HostFixture {
    fn drop(&mut self) {
        self.shutdown.request();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Queued commands run after `get_state` is answered, so poll until the
/// main loop has caught up with a load.
pub async fn wait_for_state(client: &mut CommandClient) -> DualState {
    let deadline = Instant::now() + TEST_TIMEOUT;
    loop {
        if let Some(state) = client.get_state().await.expect("get_state failed") {
            return state;
        }
        assert!(Instant::now() < deadline, "plugin never finished loading");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll `condition` until it holds or [`TEST_TIMEOUT`] passes.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn load_line(path: &str) -> String {
    format!("load_plugin \"{}\" {} 256", path, TEST_SAMPLE_RATE)
}
