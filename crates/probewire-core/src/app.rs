//! Application side: the document store and the event loop that owns writes
//! to it.
//!
//! Every mutation of the element documents (registering or rendering a
//! window, writing an attribute, delivering a click) is posted as an
//! [`AppEvent`] to one [`EventLoop`] task, which applies events strictly in
//! order. Readers share the store through an `Arc<RwLock<_>>` and never
//! mutate it.
//!
//! # Example
//!
//! ```no_run
//! use probewire_core::app::EventLoop;
//! use probewire_core::document::{DocumentStore, ElementSpec, NodeHandle};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_loop = EventLoop::spawn(|_store: &mut DocumentStore, handle: NodeHandle| {
//!     println!("clicked {handle}");
//! });
//! let app = event_loop.app();
//!
//! app.register_window("main", ElementSpec::new("Window")).await?;
//! app.render_window("main").await?;
//!
//! event_loop.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::document::{DocumentError, DocumentStore, ElementSpec, NodeHandle};

/// Capacity of the event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Errors raised when posting to the application.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// The event loop has stopped; nothing will process the event.
    #[error("application event loop is not running")]
    Closed,

    #[error(transparent)]
    Document(#[from] DocumentError),
}

/// A unit of work for the event loop.
#[derive(Debug)]
pub enum AppEvent {
    RegisterWindow {
        name: String,
        spec: ElementSpec,
        reply: oneshot::Sender<NodeHandle>,
    },
    RenderWindow {
        name: String,
        reply: oneshot::Sender<Result<NodeHandle, DocumentError>>,
    },
    Click {
        handle: NodeHandle,
    },
    SetAttr {
        handle: NodeHandle,
        name: String,
        value: String,
        reply: oneshot::Sender<Result<(), DocumentError>>,
    },
    Stop,
}

/// Receives clicks on the event loop, with write access to the store.
pub trait ClickHandler: Send + 'static {
    fn on_click(&mut self, store: &mut DocumentStore, handle: NodeHandle);
}

impl<F> ClickHandler for F
where
    F: FnMut(&mut DocumentStore, NodeHandle) + Send + 'static,
{
    fn on_click(&mut self, store: &mut DocumentStore, handle: NodeHandle) {
        self(store, handle)
    }
}

/// Handler that ignores clicks.
pub struct IgnoreClicks;

impl ClickHandler for IgnoreClicks {
    fn on_click(&mut self, _store: &mut DocumentStore, _handle: NodeHandle) {}
}

// ---------------------------------------------------------------------------
// AppHandle
// ---------------------------------------------------------------------------

/// Cheap, cloneable access to a running application.
#[derive(Clone)]
pub struct AppHandle {
    events: mpsc::Sender<AppEvent>,
    store: Arc<RwLock<DocumentStore>>,
}

impl AppHandle {
    /// Shared read access to the documents.
    pub fn store(&self) -> &Arc<RwLock<DocumentStore>> {
        &self.store
    }

    /// Post an event without waiting for it to be processed.
    pub async fn post(&self, event: AppEvent) -> Result<(), AppError> {
        self.events.send(event).await.map_err(|_| AppError::Closed)
    }

    pub async fn register_window(
        &self,
        name: impl Into<String>,
        spec: ElementSpec,
    ) -> Result<NodeHandle, AppError> {
        let (reply, rx) = oneshot::channel();
        self.post(AppEvent::RegisterWindow {
            name: name.into(),
            spec,
            reply,
        })
        .await?;
        rx.await.map_err(|_| AppError::Closed)
    }

    /// Make `name` current and rebuild it. Resolves once the new tree is live.
    pub async fn render_window(&self, name: impl Into<String>) -> Result<NodeHandle, AppError> {
        let (reply, rx) = oneshot::channel();
        self.post(AppEvent::RenderWindow {
            name: name.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| AppError::Closed)??)
    }

    /// Queue a click. Returns once queued, not once handled.
    pub async fn click(&self, handle: NodeHandle) -> Result<(), AppError> {
        self.post(AppEvent::Click { handle }).await
    }

    /// Write an attribute and wait for the event loop to apply it.
    pub async fn set_attr(
        &self,
        handle: NodeHandle,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), AppError> {
        let (reply, rx) = oneshot::channel();
        self.post(AppEvent::SetAttr {
            handle,
            name: name.into(),
            value: value.into(),
            reply,
        })
        .await?;
        Ok(rx.await.map_err(|_| AppError::Closed)??)
    }
}

// ---------------------------------------------------------------------------
// EventLoop
// ---------------------------------------------------------------------------

/// Handle for controlling a running event loop.
pub struct EventLoopHandle {
    app: AppHandle,
    join_handle: JoinHandle<()>,
}

impl EventLoopHandle {
    pub fn app(&self) -> AppHandle {
        self.app.clone()
    }

    /// Posts [`AppEvent::Stop`] and waits for the loop to drain up to it.
    pub async fn stop(self) {
        let _ = self.app.post(AppEvent::Stop).await;
        let _ = self.join_handle.await;
    }

    /// Returns whether the loop is still running.
    pub fn is_running(&self) -> bool {
        !self.join_handle.is_finished()
    }
}

/// The single writer of an application's documents.
pub struct EventLoop;

impl EventLoop {
    /// Spawns the loop over an empty store.
    pub fn spawn(handler: impl ClickHandler) -> EventLoopHandle {
        Self::spawn_with_store(DocumentStore::new(), handler)
    }

    pub fn spawn_with_store(store: DocumentStore, handler: impl ClickHandler) -> EventLoopHandle {
        let (events, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let store = Arc::new(RwLock::new(store));
        let app = AppHandle {
            events,
            store: store.clone(),
        };

        let join_handle = tokio::spawn(async move {
            Self::run_loop(rx, store, handler).await;
        });

        EventLoopHandle { app, join_handle }
    }

    async fn run_loop(
        mut rx: mpsc::Receiver<AppEvent>,
        store: Arc<RwLock<DocumentStore>>,
        mut handler: impl ClickHandler,
    ) {
        debug!("event loop started");
        while let Some(event) = rx.recv().await {
            match event {
                AppEvent::Stop => break,
                AppEvent::RegisterWindow { name, spec, reply } => {
                    let root = store.write().await.register_window(name.clone(), spec);
                    debug!(window = %name, %root, "window registered");
                    let _ = reply.send(root);
                }
                AppEvent::RenderWindow { name, reply } => {
                    let result = store.write().await.render_window(&name);
                    match &result {
                        Ok(root) => debug!(window = %name, %root, "window rendered"),
                        Err(e) => warn!(window = %name, error = %e, "render failed"),
                    }
                    let _ = reply.send(result);
                }
                AppEvent::SetAttr {
                    handle,
                    name,
                    value,
                    reply,
                } => {
                    let result = store.write().await.set_attr(handle, name, value);
                    let _ = reply.send(result);
                }
                AppEvent::Click { handle } => {
                    let mut store = store.write().await;
                    let live = store.node(handle).map(|_| ());
                    match live {
                        Ok(()) => handler.on_click(&mut store, handle),
                        Err(e) => warn!(%handle, error = %e, "dropping click"),
                    }
                }
            }
        }
        debug!("event loop stopped");
    }
}
