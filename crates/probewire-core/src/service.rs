//! The automation service an instrumented application registers with its
//! dispatcher.
//!
//! Queries (window lookup, selector evaluation, attribute reads, children)
//! run directly against the shared store under a read lock. Anything that
//! changes the documents (attribute writes, clicks, renders) is posted to the
//! application's event loop.
//!
//! | Method                               | Result                       |
//! |--------------------------------------|------------------------------|
//! | `hello()`                            | `"hello"`                    |
//! | `get_window_by_name(name)`           | root handle or `null`        |
//! | `find_controls_by_name(parent, name)`| handles, parent included     |
//! | `find_controls(parent, selector)`    | handles                      |
//! | `get_control_children(handle)`       | handles                      |
//! | `get_control_attr(handle, name)`     | string or `null`             |
//! | `set_control_attr(handle, name, v)`  | `null` once applied          |
//! | `click_control(handle)`              | `null` once queued           |
//! | `window.current()`                   | root handle or `null`        |
//! | `window.names()`                     | window names                 |
//! | `window.render(name)`                | new root handle              |
//!
//! Handle problems are reported as server errors with the codes below, so
//! callers can tell a stale handle from a missing one.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use probewire_rpc::dispatcher::{Dispatcher, HandlerFault, HandlerResult, Member, RpcService};
use probewire_rpc::error::RpcError;
use probewire_rpc::protocol::Params;

use crate::app::{AppError, AppHandle};
use crate::document::{DocumentError, NodeHandle};
use crate::selector::{Selector, SelectorError};

/// The handle's document has been replaced.
pub const CONTROL_EXPIRED: i64 = -32001;
/// The handle names no node.
pub const CONTROL_NOT_FOUND: i64 = -32002;
/// A selector step's `instance` is out of range.
pub const INSTANCE_OUT_OF_RANGE: i64 = -32003;
/// No window has the requested name.
pub const WINDOW_NOT_FOUND: i64 = -32004;

// ---------------------------------------------------------------------------
// Fault conversion
// ---------------------------------------------------------------------------

impl From<DocumentError> for HandlerFault {
    fn from(err: DocumentError) -> Self {
        let message = err.to_string();
        let error = match err {
            DocumentError::Expired(handle) => {
                RpcError::server(CONTROL_EXPIRED, message).with_data(json!(handle))
            }
            DocumentError::NotFound(handle) => {
                RpcError::server(CONTROL_NOT_FOUND, message).with_data(json!(handle))
            }
            DocumentError::UnknownWindow(name) => {
                RpcError::server(WINDOW_NOT_FOUND, message).with_data(json!(name))
            }
        };
        HandlerFault::Rpc(error)
    }
}

impl From<SelectorError> for HandlerFault {
    fn from(err: SelectorError) -> Self {
        HandlerFault::Rpc(RpcError::invalid_params(format!("invalid selector: {err}")))
    }
}

impl From<AppError> for HandlerFault {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Document(doc) => doc.into(),
            closed @ AppError::Closed => HandlerFault::fault(closed),
        }
    }
}

fn to_json<T: serde::Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(HandlerFault::fault)
}

// ---------------------------------------------------------------------------
// AutomationService
// ---------------------------------------------------------------------------

/// Root service object.
pub struct AutomationService {
    app: AppHandle,
    window: WindowService,
}

impl AutomationService {
    pub fn new(app: AppHandle) -> Self {
        Self {
            window: WindowService { app: app.clone() },
            app,
        }
    }

    /// A dispatcher with this service registered.
    pub fn into_dispatcher(self) -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register_service(self);
        dispatcher
    }

    async fn get_window_by_name(&self, params: Params) -> HandlerResult {
        let (name,): (String,) = params.bind(&["name"])?;
        let store = self.app.store().read().await;
        to_json(store.window_root(&name))
    }

    async fn find_controls_by_name(&self, params: Params) -> HandlerResult {
        let (parent, name): (NodeHandle, String) = params.bind(&["parent", "name"])?;
        let store = self.app.store().read().await;
        let found: Vec<NodeHandle> = store
            .node(parent)?
            .subtree()
            .filter(|node| node.attr("name") == Some(name.as_str()))
            .map(|node| node.handle())
            .collect();
        to_json(found)
    }

    async fn find_controls(&self, params: Params) -> HandlerResult {
        let (parent, selector): (NodeHandle, Value) = params.bind(&["parent", "selector"])?;
        let selector = Selector::from_value(&selector)?;
        let store = self.app.store().read().await;
        let found = selector
            .evaluate(store.node(parent)?)
            .map_err(|e| RpcError::server(INSTANCE_OUT_OF_RANGE, e.to_string()))?;
        debug!(%selector, matches = found.len(), "selector evaluated");
        to_json(found)
    }

    async fn get_control_children(&self, params: Params) -> HandlerResult {
        let (handle,): (NodeHandle,) = params.bind(&["handle"])?;
        let store = self.app.store().read().await;
        let children: Vec<NodeHandle> = store.node(handle)?.children().map(|c| c.handle()).collect();
        to_json(children)
    }

    async fn get_control_attr(&self, params: Params) -> HandlerResult {
        let (handle, name): (NodeHandle, String) = params.bind(&["handle", "name"])?;
        let store = self.app.store().read().await;
        to_json(store.node(handle)?.attr(&name))
    }

    async fn set_control_attr(&self, params: Params) -> HandlerResult {
        let (handle, name, value): (NodeHandle, String, String) =
            params.bind(&["handle", "name", "value"])?;
        self.app.set_attr(handle, name, value).await?;
        Ok(Value::Null)
    }

    async fn click_control(&self, params: Params) -> HandlerResult {
        let (handle,): (NodeHandle,) = params.bind(&["handle"])?;
        // Reject bad handles now rather than dropping the click later.
        self.app.store().read().await.node(handle)?;
        self.app.click(handle).await?;
        Ok(Value::Null)
    }
}

#[async_trait]
impl RpcService for AutomationService {
    fn member(&self, name: &str) -> Option<Member<'_>> {
        match name {
            "hello"
            | "get_window_by_name"
            | "find_controls_by_name"
            | "find_controls"
            | "get_control_children"
            | "get_control_attr"
            | "set_control_attr"
            | "click_control" => Some(Member::Method),
            "window" => Some(Member::Nested(&self.window)),
            _ => None,
        }
    }

    async fn call(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            "hello" => {
                params.expect_empty()?;
                Ok(json!("hello"))
            }
            "get_window_by_name" => self.get_window_by_name(params).await,
            "find_controls_by_name" => self.find_controls_by_name(params).await,
            "find_controls" => self.find_controls(params).await,
            "get_control_children" => self.get_control_children(params).await,
            "get_control_attr" => self.get_control_attr(params).await,
            "set_control_attr" => self.set_control_attr(params).await,
            "click_control" => self.click_control(params).await,
            _ => Err(RpcError::method_not_found(method).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// WindowService
// ---------------------------------------------------------------------------

/// `window.*` members.
pub struct WindowService {
    app: AppHandle,
}

#[async_trait]
impl RpcService for WindowService {
    fn member(&self, name: &str) -> Option<Member<'_>> {
        match name {
            "current" | "names" | "render" => Some(Member::Method),
            _ => None,
        }
    }

    async fn call(&self, method: &str, params: Params) -> HandlerResult {
        match method {
            "current" => {
                params.expect_empty()?;
                to_json(self.app.store().read().await.current_root())
            }
            "names" => {
                params.expect_empty()?;
                to_json(self.app.store().read().await.window_names())
            }
            "render" => {
                let (name,): (String,) = params.bind(&["name"])?;
                to_json(self.app.render_window(name).await?)
            }
            _ => Err(RpcError::method_not_found(method).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
