//! Shutdown integration tests
//!
//! `exit` over the pipe and external shutdown both stop every thread and
//! release the plugin.

use crate::helpers::*;
use std::time::{Duration, Instant};
use vstbridge::host::testing::StubBehavior;
use vstbridge::ipc::AudioHeader;
use vstbridge::prelude::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_is_acknowledged_and_stops_the_session() {
    let host = HostFixture::start();
    let mut client = host.connect().await;
    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;

    let reply = client.send_line("exit").await.unwrap();
    assert_eq!(reply, Response::ExitAck);
    assert_eq!(reply.to_string(), "OK: Exit requested.");

    assert!(host.wait_stopped(TEST_TIMEOUT), "session did not stop");
    assert_eq!(host.probe.live_instances(), 0);
    assert_eq!(host.probe.open_modules(), 0);
    assert!(host
        .probe
        .calls()
        .contains(&"processor.set_processing(false)".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exit_closes_the_connection() {
    let host = HostFixture::start();
    let mut client = host.connect().await;
    client.exit().await.unwrap();

    assert!(client.send_line("get_state").await.is_err());
    assert!(host.wait_stopped(TEST_TIMEOUT));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_external_shutdown_releases_plugin() {
    let host = HostFixture::start();
    let mut client = host.connect().await;
    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;
    assert_eq!(host.probe.live_instances(), 1);

    drop(client);
    let probe = host.probe.clone();
    drop(host);

    assert_eq!(probe.live_instances(), 0);
    assert_eq!(probe.open_modules(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_endpoints_are_gone_after_shutdown() {
    let host = HostFixture::start();
    let config = host.config.clone();
    drop(host);

    assert!(CommandClient::connect(&config).await.is_err());
    assert!(AudioClient::open(&config).is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_does_not_wait_for_a_stalled_process_call() {
    let config = BridgeConfig {
        join_timeout_ms: 200,
        ..test_config()
    };
    let host = HostFixture::with_config(
        config,
        StubBehavior {
            process_delay: Duration::from_secs(4),
            ..Default::default()
        },
    );
    let mut client = host.connect().await;
    client
        .send_line(&load_line("/plugins/Slow.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;
    drop(client);

    let mut audio = host.audio();
    let header = AudioHeader {
        sample_rate: TEST_SAMPLE_RATE,
        num_samples: 256,
        num_channels: 2,
    };
    // the plugin is still inside process when the wait runs out
    assert!(audio.signal_raw(header, Duration::from_millis(50)).is_err());
    let probe = host.probe.clone();
    assert!(eventually(|| probe.process_calls() == 1).await);

    let started = Instant::now();
    host.request_shutdown();
    assert!(
        host.wait_stopped(Duration::from_secs(2)),
        "shutdown waited for the plugin"
    );
    assert!(started.elapsed() < Duration::from_secs(2));
}
