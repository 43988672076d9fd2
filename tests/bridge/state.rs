//! Plugin state integration tests
//!
//! `get_state` encoding and restore through `load_and_set_state` / `set_state`.

use crate::helpers::*;
use vstbridge::host::testing::StubBehavior;
use vstbridge::prelude::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_plugin_state_is_reported_as_empty() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;

    let reply = client.send_line("get_state").await.unwrap();
    assert_eq!(reply.to_string(), "OK EMPTY");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_state_carries_both_sections() {
    let host = HostFixture::with_behavior(StubBehavior {
        component_state: b"component".to_vec(),
        controller_state: b"ctl".to_vec(),
        ..Default::default()
    });
    let mut client = host.connect().await;

    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    let state = wait_for_state(&mut client).await;
    assert_eq!(state, DualState::new(b"component".to_vec(), b"ctl".to_vec()));

    let Response::Ok(Some(payload)) = client.send_line("get_state").await.unwrap() else {
        panic!("expected an encoded state");
    };
    assert!(payload.starts_with("VST3_DUAL:"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_and_set_state_restores_sections() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    let saved = DualState::new(vec![1, 2, 3], vec![4, 5]);
    let encoded = StateCodec::new().encode(&saved);
    let line = format!(
        "load_and_set_state \"/plugins/Stub.vst3\" {} 512 {}",
        TEST_SAMPLE_RATE, encoded
    );
    assert_eq!(client.send_line(&line).await.unwrap(), Response::Ok(None));

    let expected = saved.clone();
    assert!(
        eventually(|| host.probe.calls().contains(&"controller.set_state(2)".to_string())).await,
        "controller state was never restored"
    );
    let calls = host.probe.calls();
    assert!(calls.contains(&"component.set_state(3)".to_string()));
    assert_eq!(wait_for_state(&mut client).await, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_undecodable_state_still_loads() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    let line = format!(
        "load_and_set_state \"/plugins/Stub.vst3\" {} 512 VST3_DUAL:!!not-base64!!",
        TEST_SAMPLE_RATE
    );
    client.send_line(&line).await.unwrap();

    assert_eq!(wait_for_state(&mut client).await, DualState::default());
    assert!(!host
        .probe
        .calls()
        .iter()
        .any(|call| call.starts_with("component.set_state")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_legacy_set_state_applies_to_loaded_plugin() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    // Ignored: nothing loaded yet.
    let early = StateCodec::new().encode(&DualState::new(vec![9], Vec::new()));
    client.send_line(&format!("set_state {}", early)).await.unwrap();

    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    wait_for_state(&mut client).await;

    let state = DualState::new(vec![7; 16], vec![8; 4]);
    let encoded = StateCodec::new().encode(&state);
    client.send_line(&format!("set_state {}", encoded)).await.unwrap();

    assert!(eventually(|| host.probe.calls().contains(&"component.set_state(16)".to_string())).await);
    assert!(!host.probe.calls().contains(&"component.set_state(1)".to_string()));
    assert_eq!(wait_for_state(&mut client).await, state);
}
