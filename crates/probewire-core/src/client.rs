//! Typed client for the automation service.
//!
//! [`AutomationClient`] wraps a [`ServerProxy`] and turns the service's
//! handle error codes back into [`AutomationError`] variants, so a test
//! driver can match on "expired" or "not found" instead of raw codes.
//!
//! # Example
//!
//! ```no_run
//! use probewire_core::client::AutomationClient;
//! use probewire_core::selector::Selector;
//! use probewire_rpc::client::{HttpTransport, ServerProxy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let proxy = ServerProxy::new(HttpTransport::new("http://127.0.0.1:9800/")?);
//! let mut client = AutomationClient::new(proxy);
//!
//! let root = client.window("login").await?;
//! let ok = client.find_control(root, Selector::parse("/name='ok'")?).await?;
//! client.click(ok).await?;
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;

use probewire_rpc::client::{ClientError, ServerProxy, Transport};

use crate::document::NodeHandle;
use crate::selector::{exactly_one, LocateError, Selector};
use crate::service::{CONTROL_EXPIRED, CONTROL_NOT_FOUND, INSTANCE_OUT_OF_RANGE, WINDOW_NOT_FOUND};

/// Errors surfaced to test drivers.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("control not found")]
    NotFound,

    #[error("locator matched {count} controls, expected exactly one")]
    Ambiguous { count: usize },

    /// The handle belongs to a window that has since been re-rendered.
    #[error("control {0} has expired")]
    Expired(NodeHandle),

    #[error(transparent)]
    Rpc(ClientError),
}

impl From<ClientError> for AutomationError {
    fn from(err: ClientError) -> Self {
        let (code, data) = match &err {
            ClientError::Rpc(rpc) => (rpc.code, rpc.data.clone()),
            _ => return AutomationError::Rpc(err),
        };
        match code {
            CONTROL_EXPIRED => match data.and_then(|d| serde_json::from_value(d).ok()) {
                Some(handle) => AutomationError::Expired(handle),
                None => AutomationError::Rpc(err),
            },
            CONTROL_NOT_FOUND | INSTANCE_OUT_OF_RANGE | WINDOW_NOT_FOUND => AutomationError::NotFound,
            _ => AutomationError::Rpc(err),
        }
    }
}

impl From<LocateError> for AutomationError {
    fn from(err: LocateError) -> Self {
        match err {
            LocateError::Ambiguous(count) => AutomationError::Ambiguous { count },
            LocateError::NotFound | LocateError::InstanceOutOfRange { .. } => AutomationError::NotFound,
        }
    }
}

/// How to pick a single control below a root.
#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    /// Every node in the subtree whose `name` attribute equals this.
    Name(String),
    Selector(Selector),
}

impl From<Selector> for Locator {
    fn from(selector: Selector) -> Self {
        Locator::Selector(selector)
    }
}

impl From<&str> for Locator {
    fn from(name: &str) -> Self {
        Locator::Name(name.to_string())
    }
}

impl From<String> for Locator {
    fn from(name: String) -> Self {
        Locator::Name(name)
    }
}

// ---------------------------------------------------------------------------
// AutomationClient
// ---------------------------------------------------------------------------

pub struct AutomationClient<T: Transport> {
    proxy: ServerProxy<T>,
}

impl<T: Transport> AutomationClient<T> {
    pub fn new(proxy: ServerProxy<T>) -> Self {
        Self { proxy }
    }

    pub fn proxy_mut(&mut self) -> &mut ServerProxy<T> {
        &mut self.proxy
    }

    pub fn into_proxy(self) -> ServerProxy<T> {
        self.proxy
    }

    async fn invoke<R: DeserializeOwned>(
        &mut self,
        method: &str,
        args: Vec<Value>,
    ) -> Result<R, AutomationError> {
        let mut call = self.proxy.method(method);
        for arg in args {
            call = call.arg(arg)?;
        }
        Ok(call.call_as().await?)
    }

    pub async fn hello(&mut self) -> Result<String, AutomationError> {
        self.invoke("hello", Vec::new()).await
    }

    /// Root handle of the named window.
    pub async fn window(&mut self, name: &str) -> Result<NodeHandle, AutomationError> {
        let root: Option<NodeHandle> = self.invoke("get_window_by_name", vec![json!(name)]).await?;
        root.ok_or(AutomationError::NotFound)
    }

    pub async fn current_window(&mut self) -> Result<Option<NodeHandle>, AutomationError> {
        self.invoke("window.current", Vec::new()).await
    }

    pub async fn window_names(&mut self) -> Result<Vec<String>, AutomationError> {
        self.invoke("window.names", Vec::new()).await
    }

    /// Re-render a window, returning its new root. Handles from the previous
    /// rendering expire.
    pub async fn render_window(&mut self, name: &str) -> Result<NodeHandle, AutomationError> {
        self.invoke("window.render", vec![json!(name)]).await
    }

    pub async fn find_controls_by_name(
        &mut self,
        parent: NodeHandle,
        name: &str,
    ) -> Result<Vec<NodeHandle>, AutomationError> {
        self.invoke("find_controls_by_name", vec![json!(parent), json!(name)]).await
    }

    pub async fn find_controls(
        &mut self,
        parent: NodeHandle,
        selector: &Selector,
    ) -> Result<Vec<NodeHandle>, AutomationError> {
        self.invoke("find_controls", vec![json!(parent), selector.to_value()]).await
    }

    /// Resolve `locator` to exactly one control below `root`.
    pub async fn find_control(
        &mut self,
        root: NodeHandle,
        locator: impl Into<Locator>,
    ) -> Result<NodeHandle, AutomationError> {
        let matches = match locator.into() {
            Locator::Name(name) => self.find_controls_by_name(root, &name).await?,
            Locator::Selector(selector) => self.find_controls(root, &selector).await?,
        };
        Ok(exactly_one(matches)?)
    }

    pub async fn children(&mut self, handle: NodeHandle) -> Result<Vec<NodeHandle>, AutomationError> {
        self.invoke("get_control_children", vec![json!(handle)]).await
    }

    pub async fn attr(&mut self, handle: NodeHandle, name: &str) -> Result<Option<String>, AutomationError> {
        self.invoke("get_control_attr", vec![json!(handle), json!(name)]).await
    }

    pub async fn set_attr(&mut self, handle: NodeHandle, name: &str, value: &str) -> Result<(), AutomationError> {
        let _: Value = self.invoke("set_control_attr", vec![json!(handle), json!(name), json!(value)]).await?;
        Ok(())
    }

    /// Queue a click. Returns before the application has handled it.
    pub async fn click(&mut self, handle: NodeHandle) -> Result<(), AutomationError> {
        let _: Value = self.invoke("click_control", vec![json!(handle)]).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
