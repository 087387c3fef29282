//! Shared test helpers for probewire-core integration tests.
//!
//! [`TestHarness`] runs a small instrumented application (an event loop with
//! a login form) and serves its automation service over HTTP and the stream
//! binding on ephemeral ports.

#![allow(dead_code)]

use std::sync::Arc;

use probewire_core::app::{EventLoop, EventLoopHandle};
use probewire_core::client::AutomationClient;
use probewire_core::document::{DocumentStore, ElementSpec, NodeHandle};
use probewire_core::service::AutomationService;
use probewire_rpc::client::{HttpTransport, ServerProxy, StreamTransport};
use probewire_rpc::config::RpcConfig;
use probewire_rpc::transport::http::HttpServer;
use probewire_rpc::transport::stream::StreamServer;
use probewire_rpc::transport::ServerHandle;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Sample documents
// ---------------------------------------------------------------------------

/// ```text
/// Window name=login
/// ├── Edit name=user
/// ├── Edit name=password
/// ├── Panel name=buttons
/// │   ├── Button name=ok text=OK
/// │   └── Button name=cancel text=Cancel
/// └── Label name=status text=idle
/// ```
pub fn login_form() -> ElementSpec {
    ElementSpec::new("Window")
        .attr("name", "login")
        .child(ElementSpec::new("Edit").attr("name", "user"))
        .child(ElementSpec::new("Edit").attr("name", "password"))
        .child(
            ElementSpec::new("Panel")
                .attr("name", "buttons")
                .child(ElementSpec::new("Button").attr("name", "ok").attr("text", "OK"))
                .child(ElementSpec::new("Button").attr("name", "cancel").attr("text", "Cancel")),
        )
        .child(ElementSpec::new("Label").attr("name", "status").attr("text", "idle"))
}

pub fn settings_form() -> ElementSpec {
    ElementSpec::new("Window")
        .attr("name", "settings")
        .child(ElementSpec::new("CheckBox").attr("name", "verbose"))
}

/// Click handler: writes `clicked <name>` into the current window's status
/// label.
pub fn record_click(store: &mut DocumentStore, handle: NodeHandle) {
    let Ok(clicked) = store.node(handle) else {
        return;
    };
    let text = format!("clicked {}", clicked.attr("name").unwrap_or("?"));
    let Some(root) = store.current_root() else {
        return;
    };
    let status = store
        .node(root)
        .ok()
        .and_then(|r| r.subtree().find(|n| n.attr("name") == Some("status")))
        .map(|n| n.handle());
    if let Some(status) = status {
        let _ = store.set_attr(status, "text", text);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// Route library logs to the test writer. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestHarness {
    pub event_loop: EventLoopHandle,
    pub http: ServerHandle,
    pub stream: ServerHandle,
}

impl TestHarness {
    /// Start the application with `login` rendered and `settings` registered.
    pub async fn start() -> Self {
        init_tracing();
        let event_loop = EventLoop::spawn(record_click);
        let app = event_loop.app();
        app.register_window("login", login_form()).await.unwrap();
        app.register_window("settings", settings_form()).await.unwrap();
        app.render_window("login").await.unwrap();

        let dispatcher = Arc::new(AutomationService::new(app).into_dispatcher());
        let config = RpcConfig::default();
        let http = HttpServer::bind("127.0.0.1:0", dispatcher.clone(), &config)
            .await
            .unwrap();
        let stream = StreamServer::bind("127.0.0.1:0", dispatcher, &config)
            .await
            .unwrap();

        Self {
            event_loop,
            http,
            stream,
        }
    }

    pub fn http_client(&self) -> AutomationClient<HttpTransport> {
        let uri = format!("http://{}/", self.http.local_addr());
        AutomationClient::new(ServerProxy::new(HttpTransport::new(&uri).unwrap()))
    }

    pub fn stream_client(&self) -> AutomationClient<StreamTransport> {
        AutomationClient::new(ServerProxy::new(StreamTransport::new(self.stream.local_addr())))
    }

    pub async fn stop(self) {
        self.http.stop().await;
        self.stream.stop().await;
        self.event_loop.stop().await;
    }
}
