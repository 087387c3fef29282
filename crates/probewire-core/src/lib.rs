//! # probewire-core
//!
//! Element documents and the automation surface built on `probewire-rpc`.
//!
//! The application side keeps its element trees in a [`DocumentStore`],
//! mutated only by the [`EventLoop`], and exposes them through the
//! [`AutomationService`]. A test driver talks to that service with an
//! [`AutomationClient`], locating controls by name or by [`Selector`].
//!
//! ## Modules
//!
//! - [`document`] - Generation-checked element arena and node handles
//! - [`selector`] - Selector steps, the wire and text forms, evaluation
//! - [`app`] - Application event loop, the single writer of the documents
//! - [`service`] - RPC service object and its handle error codes
//! - [`client`] - Typed client for test drivers
//!
//! [`DocumentStore`]: document::DocumentStore
//! [`EventLoop`]: app::EventLoop
//! [`AutomationService`]: service::AutomationService
//! [`AutomationClient`]: client::AutomationClient
//! [`Selector`]: selector::Selector

pub mod app;
pub mod client;
pub mod document;
pub mod selector;
pub mod service;
