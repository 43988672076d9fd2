//! Shared audio integration tests
//!
//! One ready signal must produce exactly one process call and one done signal.

use crate::helpers::*;
use vstbridge::host::testing::StubBehavior;
use vstbridge::ipc::AudioHeader;

fn ramp(len: usize, scale: f32) -> Vec<f32> {
    (0..len).map(|i| i as f32 * scale).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_block_is_processed_through_shared_memory() {
    let host = HostFixture::with_behavior(StubBehavior {
        gain: 0.5,
        ..Default::default()
    });
    let mut client = host.connect().await;
    client
        .send_line(&load_line("/plugins/Gain.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;

    let mut audio = host.audio();
    let left = ramp(256, 0.01);
    let right = ramp(256, -0.02);
    let mut out_left = vec![9.0; 256];
    let mut out_right = vec![9.0; 256];
    audio
        .process_block(
            TEST_SAMPLE_RATE,
            [&left, &right],
            [&mut out_left, &mut out_right],
            TEST_TIMEOUT,
        )
        .unwrap();

    for i in 0..256 {
        assert!((out_left[i] - left[i] * 0.5).abs() < 1e-6, "left sample {}", i);
        assert!((out_right[i] - right[i] * 0.5).abs() < 1e-6, "right sample {}", i);
    }
    assert_eq!(host.probe.process_calls(), 1);
    assert!(!audio.poll_done().unwrap(), "done signalled more than once");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_each_ready_produces_one_cycle() {
    let host = HostFixture::start();
    let mut client = host.connect().await;
    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;

    let mut audio = host.audio();
    let input = vec![0.25; 64];
    let mut out_left = vec![0.0; 64];
    let mut out_right = vec![0.0; 64];
    for cycle in 1..=5 {
        audio
            .process_block(
                TEST_SAMPLE_RATE,
                [&input, &input],
                [&mut out_left, &mut out_right],
                TEST_TIMEOUT,
            )
            .unwrap();
        assert_eq!(host.probe.process_calls(), cycle);
    }
    assert_eq!(out_left, input);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_handshake_completes_without_plugin() {
    let host = HostFixture::start();
    let mut audio = host.audio();

    let input = vec![0.5; 32];
    let mut out_left = vec![0.0; 32];
    let mut out_right = vec![0.0; 32];
    audio
        .process_block(
            TEST_SAMPLE_RATE,
            [&input, &input],
            [&mut out_left, &mut out_right],
            TEST_TIMEOUT,
        )
        .unwrap();
    assert_eq!(host.probe.process_calls(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_zero_length_block_skips_the_plugin() {
    let host = HostFixture::start();
    let mut client = host.connect().await;
    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;

    let mut audio = host.audio();
    audio
        .signal_raw(
            AudioHeader {
                sample_rate: TEST_SAMPLE_RATE,
                num_samples: 0,
                num_channels: 2,
            },
            TEST_TIMEOUT,
        )
        .unwrap();
    assert_eq!(host.probe.process_calls(), 0);
}
