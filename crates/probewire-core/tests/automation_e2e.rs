//! End-to-end automation tests.
//!
//! A test driver's [`AutomationClient`] talks to a running application over
//! real sockets: client -> transport -> dispatcher -> automation service ->
//! document store / event loop -> reply.

mod common;

use serde_json::json;

use common::TestHarness;
use probewire_core::client::{AutomationError, Locator};
use probewire_core::selector::Selector;
use probewire_rpc::client::ClientError;
use probewire_rpc::error::ErrorKind;

// =============================================================================
// Windows
// =============================================================================

#[tokio::test]
async fn test_hello_and_windows_over_http() {
    let harness = TestHarness::start().await;
    let mut client = harness.http_client();

    assert_eq!(client.hello().await.unwrap(), "hello");

    let login = client.window("login").await.unwrap();
    assert_eq!(client.current_window().await.unwrap(), Some(login));

    let mut names = client.window_names().await.unwrap();
    names.sort();
    assert_eq!(names, vec!["login", "settings"]);

    assert!(matches!(client.window("missing").await, Err(AutomationError::NotFound)));
    assert!(matches!(
        client.render_window("missing").await,
        Err(AutomationError::NotFound)
    ));

    harness.stop().await;
}

#[tokio::test]
async fn test_render_switches_current_window() {
    let harness = TestHarness::start().await;
    let mut client = harness.stream_client();

    let settings = client.render_window("settings").await.unwrap();
    assert_eq!(client.current_window().await.unwrap(), Some(settings));
    assert_eq!(client.window("settings").await.unwrap(), settings);

    harness.stop().await;
}

// =============================================================================
// Locating controls
// =============================================================================

#[tokio::test]
async fn test_find_control_by_name_and_selector() {
    let harness = TestHarness::start().await;
    let mut client = harness.http_client();
    let root = client.window("login").await.unwrap();

    let ok = client.find_control(root, "ok").await.unwrap();
    assert_eq!(client.attr(ok, "text").await.unwrap().as_deref(), Some("OK"));
    assert_eq!(client.attr(ok, "class").await.unwrap().as_deref(), Some("Button"));

    let by_path = Selector::parse("/name='buttons' /class='Button' && instance=1").unwrap();
    let cancel = client.find_control(root, by_path).await.unwrap();
    assert_eq!(client.attr(cancel, "name").await.unwrap().as_deref(), Some("cancel"));

    // The window itself is part of its own subtree.
    assert_eq!(client.find_control(root, "login").await.unwrap(), root);

    harness.stop().await;
}

#[tokio::test]
async fn test_find_control_reports_ambiguity_and_absence() {
    let harness = TestHarness::start().await;
    let mut client = harness.stream_client();
    let root = client.window("login").await.unwrap();

    let buttons = Selector::parse("/class='Button' && maxdepth=2").unwrap();
    assert!(matches!(
        client.find_control(root, buttons).await,
        Err(AutomationError::Ambiguous { count: 2 })
    ));
    assert!(matches!(
        client.find_control(root, Locator::Name("nope".into())).await,
        Err(AutomationError::NotFound)
    ));

    let out_of_range = Selector::parse("/class='Edit' && instance=5").unwrap();
    assert!(matches!(
        client.find_control(root, out_of_range).await,
        Err(AutomationError::NotFound)
    ));

    harness.stop().await;
}

#[tokio::test]
async fn test_regex_predicates_anchor_at_start() {
    let harness = TestHarness::start().await;
    let mut client = harness.http_client();
    let root = client.window("login").await.unwrap();

    let prefix = Selector::parse("/class~='Ed'").unwrap();
    assert_eq!(client.find_controls(root, &prefix).await.unwrap().len(), 2);

    let infix = Selector::parse("/class~='dit'").unwrap();
    assert!(client.find_controls(root, &infix).await.unwrap().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn test_malformed_selector_is_invalid_params() {
    let harness = TestHarness::start().await;
    let mut client = harness.http_client();
    let root = client.window("login").await.unwrap();

    let result = client
        .proxy_mut()
        .method("find_controls")
        .arg(root)
        .unwrap()
        .arg(json!([{ "name": "ok" }]))
        .unwrap()
        .call()
        .await;

    match result {
        Err(ClientError::Rpc(err)) => assert_eq!(err.kind(), ErrorKind::InvalidParams),
        other => panic!("expected InvalidParams, got {other:?}"),
    }

    harness.stop().await;
}

// =============================================================================
// Mutations
// =============================================================================

#[tokio::test]
async fn test_set_attr_round_trip() {
    let harness = TestHarness::start().await;
    let mut client = harness.stream_client();
    let root = client.window("login").await.unwrap();
    let user = client.find_control(root, "user").await.unwrap();

    assert_eq!(client.attr(user, "text").await.unwrap(), None);
    client.set_attr(user, "text", "alice").await.unwrap();
    assert_eq!(client.attr(user, "text").await.unwrap().as_deref(), Some("alice"));

    harness.stop().await;
}

#[tokio::test]
async fn test_click_is_handled_by_application() {
    let harness = TestHarness::start().await;
    let mut client = harness.http_client();
    let root = client.window("login").await.unwrap();
    let ok = client.find_control(root, "ok").await.unwrap();
    let status = client.find_control(root, "status").await.unwrap();

    client.click(ok).await.unwrap();
    // Writes are applied in queue order, so once this one is acknowledged
    // the click has been handled.
    client.set_attr(root, "title", "Login").await.unwrap();

    assert_eq!(
        client.attr(status, "text").await.unwrap().as_deref(),
        Some("clicked ok")
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_handles_expire_after_render() {
    let harness = TestHarness::start().await;
    let mut client = harness.stream_client();
    let root = client.window("login").await.unwrap();
    let ok = client.find_control(root, "ok").await.unwrap();

    let fresh = client.render_window("login").await.unwrap();
    assert_ne!(fresh, root);

    assert!(matches!(client.click(ok).await, Err(AutomationError::Expired(h)) if h == ok));
    assert!(matches!(client.children(root).await, Err(AutomationError::Expired(h)) if h == root));

    // The re-rendered tree has the same shape under new handles.
    let ok_again = client.find_control(fresh, "ok").await.unwrap();
    assert_ne!(ok_again, ok);
    assert_eq!(client.children(fresh).await.unwrap().len(), 4);

    harness.stop().await;
}
