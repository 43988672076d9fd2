//! Command pipe integration tests
//!
//! Replies to every command class and behavior after bad input.

use crate::helpers::*;
use vstbridge::prelude::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_get_state_without_plugin_fails() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    let reply = client.send_line("get_state").await.unwrap();
    assert_eq!(reply, Response::Fail("NoPlugin".to_string()));
    assert_eq!(reply.to_string(), "FAIL NoPlugin");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_commands_are_acknowledged() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    for line in [
        load_line("/plugins/Stub.vst3").as_str(),
        "show_gui",
        "hide_gui",
        "frobnicate 1 2 3",
    ] {
        let reply = client.send_line(line).await.unwrap();
        assert_eq!(reply, Response::Ok(None), "reply to {:?}", line);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_load_reaches_the_module_with_parsed_arguments() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    let request = LoadRequest::new("/plugins/Stub.vst3")
        .with_sample_rate(96000.0)
        .with_block_size(128);
    let reply = client.send(&AsyncCommand::LoadPlugin(request)).await.unwrap();
    assert_eq!(reply, Response::Ok(None));
    wait_for_state(&mut client).await;

    assert!(host
        .probe
        .calls()
        .contains(&"open(/plugins/Stub.vst3)".to_string()));
    let setup = host.probe.last_setup().expect("processing was never set up");
    assert_eq!(setup.sample_rate, 96000.0);
    assert_eq!(setup.max_block_size, 128);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_command_does_not_break_the_session() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    let reply = client
        .send_line("load_plugin \"/plugins/Unterminated.vst3 48000")
        .await
        .unwrap();
    assert_eq!(reply, Response::Ok(None));

    // Nothing was loaded, and the next command is served normally.
    assert_eq!(client.get_state().await.unwrap(), None);
    client
        .send_line(&load_line("/plugins/Stub.vst3"))
        .await
        .unwrap();
    assert_eq!(wait_for_state(&mut client).await, DualState::default());
    assert_eq!(host.probe.open_modules(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failed_load_leaves_host_unloaded() {
    let host = HostFixture::with_behavior(vstbridge::host::testing::StubBehavior {
        fail_open: true,
        ..Default::default()
    });
    let mut client = host.connect().await;

    client
        .send_line(&load_line("/plugins/Broken.vst3"))
        .await
        .unwrap();
    assert!(
        eventually(|| !host.probe.calls().is_empty()).await,
        "load never reached the module"
    );
    assert_eq!(client.get_state().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_queued_commands_run_in_arrival_order() {
    let host = HostFixture::start();
    let mut client = host.connect().await;

    client
        .send_line(&load_line("/plugins/First.vst3"))
        .await
        .unwrap();
    client
        .send_line(&load_line("/plugins/Second.vst3"))
        .await
        .unwrap();
    assert!(
        eventually(|| host
            .probe
            .calls()
            .contains(&"open(/plugins/Second.vst3)".to_string()))
        .await
    );

    let opens: Vec<String> = host
        .probe
        .calls()
        .into_iter()
        .filter(|call| call.starts_with("open("))
        .collect();
    assert_eq!(
        opens,
        vec![
            "open(/plugins/First.vst3)".to_string(),
            "open(/plugins/Second.vst3)".to_string(),
        ]
    );
    // Loading the second module released the first.
    assert!(eventually(|| host.probe.open_modules() == 1).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnect_after_disconnect() {
    let host = HostFixture::start();
    {
        let mut first = host.connect().await;
        first
            .send_line(&load_line("/plugins/Stub.vst3"))
            .await
            .unwrap();
    }

    let mut second = host.connect().await;
    assert_eq!(wait_for_state(&mut second).await, DualState::default());
}
