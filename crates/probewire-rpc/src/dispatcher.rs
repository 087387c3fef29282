//! Method resolution and invocation.
//!
//! A [`Dispatcher`] owns a table of explicitly registered functions and at
//! most one registered [`RpcService`]. A method name is resolved against the
//! function table first, then against the service's declared members, walking
//! dotted paths (`window.current`) through [`Member::Nested`] services.
//!
//! Handlers never take the dispatcher down: structured [`RpcError`]s pass
//! through as-is, while any other fault, including a panic, is reported as
//! `InternalError` with the fault's type name, message and cause chain.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use probewire_rpc::dispatcher::Dispatcher;
//! use serde_json::json;
//!
//! # async fn example() {
//! let mut dispatcher = Dispatcher::new();
//! dispatcher.register_function("add", |params| {
//!     let (a, b): (i64, i64) = params.bind(&["a", "b"])?;
//!     Ok(json!(a + b))
//! });
//! let dispatcher = Arc::new(dispatcher);
//!
//! let reply = dispatcher
//!     .marshaled_dispatch(br#"{"jsonrpc":"2.0","id":1,"method":"add","params":[2,3]}"#)
//!     .await;
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, debug_span, warn, Instrument};

use crate::error::RpcError;
use crate::protocol::{decode_request, encode_response, Params, Request, Response};

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

/// A failure raised by a handler.
#[derive(Error, Debug)]
pub enum HandlerFault {
    /// A structured error the handler chose deliberately; sent unchanged.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Any other error; reported to the caller as `InternalError`.
    #[error("{type_name}: {source}")]
    Fault {
        type_name: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl HandlerFault {
    /// Wrap an arbitrary error, remembering its type name for the report.
    pub fn fault<E: StdError + Send + Sync + 'static>(err: E) -> Self {
        HandlerFault::Fault {
            type_name: short_type_name(std::any::type_name::<E>()),
            source: Box::new(err),
        }
    }

    /// Convert into the error sent on the wire.
    pub fn into_rpc_error(self) -> RpcError {
        match self {
            HandlerFault::Rpc(err) => err,
            HandlerFault::Fault { type_name, source } => {
                let message = format!("{type_name}: {source}");
                let stack = format_cause_chain(&message, source.as_ref());
                RpcError::internal(message, stack).with_data(json!({ "type": type_name }))
            }
        }
    }
}

/// Result type returned by every handler.
pub type HandlerResult = Result<Value, HandlerFault>;

type FunctionHandler = Arc<dyn Fn(Params) -> HandlerResult + Send + Sync>;

/// What a service exposes under a given member name.
pub enum Member<'a> {
    /// A callable method, invoked through [`RpcService::call`].
    Method,
    /// A sub-service reached by the next segment of a dotted path.
    Nested(&'a dyn RpcService),
}

/// An object whose declared members are callable over RPC.
///
/// The resolvable surface is exactly what [`member`](Self::member) reports;
/// nothing is discovered by reflection.
#[async_trait]
pub trait RpcService: Send + Sync {
    /// Look up a single path segment.
    fn member(&self, name: &str) -> Option<Member<'_>>;

    /// Invoke a method previously reported as [`Member::Method`].
    async fn call(&self, method: &str, params: Params) -> HandlerResult;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Resolves method names and turns raw requests into raw responses.
#[derive(Default)]
pub struct Dispatcher {
    functions: HashMap<String, FunctionHandler>,
    service: Option<Arc<dyn RpcService>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under an explicit name. Replaces any previous
    /// function of the same name.
    pub fn register_function<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(Params) -> HandlerResult + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(handler));
    }

    /// Register the service object. Only one service is held at a time.
    pub fn register_service<S: RpcService + 'static>(&mut self, service: S) {
        self.service = Some(Arc::new(service));
    }

    /// Decode, dispatch and encode one request payload.
    ///
    /// Always produces a response payload, even for undecodable input.
    pub async fn marshaled_dispatch(self: &Arc<Self>, data: &[u8]) -> Vec<u8> {
        let response = match decode_request(data) {
            Ok(request) => self.dispatch(request).await,
            Err(rejected) => {
                debug!(code = rejected.error.code, error = %rejected.error.message, "request rejected");
                rejected.into_response()
            }
        };
        encode_response(&response)
    }

    /// Dispatch a decoded request.
    ///
    /// The handler runs on its own task so that a panic is contained and
    /// reported rather than unwinding through the caller's connection loop.
    pub async fn dispatch(self: &Arc<Self>, request: Request) -> Response {
        let Request { id, method, params } = request;
        let span = debug_span!("dispatch", method = %method);

        let dispatcher = Arc::clone(self);
        let task_method = method.clone();
        let outcome = tokio::spawn(
            async move { dispatcher.invoke(&task_method, params).await }.instrument(span),
        )
        .await;

        let outcome = match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(fault)) => {
                let error = fault.into_rpc_error();
                debug!(method = %method, code = error.code, error = %error.message, "handler failed");
                Err(error)
            }
            Err(join_err) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                warn!(method = %method, %message, "handler panicked");
                Err(RpcError::internal(
                    format!("panic: {message}"),
                    format!("panic: {message}\n  in handler for \"{method}\""),
                )
                .with_data(json!({ "type": "panic" })))
            }
            Err(join_err) => Err(RpcError::internal(
                format!("JoinError: {join_err}"),
                format!("JoinError: {join_err}"),
            )),
        };

        Response { id, outcome }
    }

    async fn invoke(&self, method: &str, params: Params) -> HandlerResult {
        if let Some(function) = self.functions.get(method) {
            return function(params);
        }
        if let Some(service) = self.service.as_deref() {
            if let Some((owner, name)) = resolve_member(service, method) {
                return owner.call(name, params).await;
            }
        }
        Err(RpcError::method_not_found(method).into())
    }
}

/// Walk a dotted path through declared members.
///
/// Every segment but the last must name a nested service; the last must name
/// a method. Empty segments never resolve.
fn resolve_member<'a>(root: &'a dyn RpcService, path: &'a str) -> Option<(&'a dyn RpcService, &'a str)> {
    let mut service = root;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if segment.is_empty() {
            return None;
        }
        let last = segments.peek().is_none();
        match (service.member(segment)?, last) {
            (Member::Method, true) => return Some((service, segment)),
            (Member::Nested(inner), false) => service = inner,
            _ => return None,
        }
    }
    None
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

fn format_cause_chain(headline: &str, err: &(dyn StdError + 'static)) -> String {
    let mut out = String::from(headline);
    let mut cause = err.source();
    while let Some(inner) = cause {
        out.push_str("\n  caused by: ");
        out.push_str(&inner.to_string());
        cause = inner.source();
    }
    out
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::decode_response;

    struct Inner;

    #[async_trait]
    impl RpcService for Inner {
        fn member(&self, name: &str) -> Option<Member<'_>> {
            match name {
                "depth" => Some(Member::Method),
                _ => None,
            }
        }

        async fn call(&self, method: &str, params: Params) -> HandlerResult {
            params.expect_empty()?;
            match method {
                "depth" => Ok(json!(2)),
                _ => Err(RpcError::method_not_found(method).into()),
            }
        }
    }

    struct Outer {
        inner: Inner,
    }

    #[async_trait]
    impl RpcService for Outer {
        fn member(&self, name: &str) -> Option<Member<'_>> {
            match name {
                "echo" | "fail" | "explode" => Some(Member::Method),
                "inner" => Some(Member::Nested(&self.inner)),
                _ => None,
            }
        }

        async fn call(&self, method: &str, params: Params) -> HandlerResult {
            match method {
                "echo" => {
                    let (text,): (String,) = params.bind(&["text"])?;
                    Ok(json!(text))
                }
                "fail" => {
                    let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
                    Err(HandlerFault::fault(err))
                }
                "explode" => panic!("kaboom"),
                _ => Err(RpcError::method_not_found(method).into()),
            }
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        let mut d = Dispatcher::new();
        d.register_function("add", |params| {
            let (a, b): (i64, i64) = params.bind(&["a", "b"])?;
            Ok(json!(a + b))
        });
        d.register_function("echo", |_| Ok(json!("from function")));
        d.register_service(Outer { inner: Inner });
        Arc::new(d)
    }

    async fn call(raw: &str) -> Response {
        let reply = dispatcher().marshaled_dispatch(raw.as_bytes()).await;
        decode_response(&reply).expect("dispatcher must emit a valid envelope")
    }

    #[tokio::test]
    async fn positional_add() {
        let resp = call(r#"{"jsonrpc":"2.0","id":"x","method":"add","params":[2,3]}"#).await;
        assert_eq!(resp, Response::success(json!("x"), json!(5)));
    }

    #[tokio::test]
    async fn named_add_missing_argument_is_invalid_params() {
        let resp = call(r#"{"jsonrpc":"2.0","id":1,"method":"add","params":{"a":2}}"#).await;
        assert_eq!(resp.id, json!(1));
        assert_eq!(resp.outcome.unwrap_err().kind(), ErrorKind::InvalidParams);
    }

    #[tokio::test]
    async fn function_table_wins_over_service() {
        let resp = call(r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":["hi"]}"#).await;
        assert_eq!(resp.outcome, Ok(json!("from function")));
    }

    #[tokio::test]
    async fn dotted_path_reaches_nested_service() {
        let resp = call(r#"{"jsonrpc":"2.0","id":1,"method":"inner.depth"}"#).await;
        assert_eq!(resp.outcome, Ok(json!(2)));
    }

    #[tokio::test]
    async fn unknown_method_echoes_id() {
        let resp = call(r#"{"jsonrpc":"2.0","id":"abc","method":"nope"}"#).await;
        assert_eq!(resp.id, json!("abc"));
        let err = resp.outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MethodNotFound);
        assert!(err.message.contains("nope"));
    }

    #[tokio::test]
    async fn dotted_paths_only_follow_declared_members() {
        for method in ["inner", "echo.depth", "inner.depth.x", "inner.", ".echo", "inner.missing"] {
            let raw = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"{method}"}}"#);
            let err = call(&raw).await.outcome.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MethodNotFound, "method {method}");
        }
    }

    #[tokio::test]
    async fn handler_fault_becomes_internal_error_with_type_name() {
        let resp = call(r#"{"jsonrpc":"2.0","id":1,"method":"fail"}"#).await;
        let err = resp.outcome.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.message, "Error: disk on fire");
        assert!(err.stack.is_some());
    }

    #[tokio::test]
    async fn panicking_handler_is_contained() {
        let d = dispatcher();
        let raw = br#"{"jsonrpc":"2.0","id":9,"method":"explode"}"#;
        let err = decode_response(&d.marshaled_dispatch(raw).await)
            .unwrap()
            .outcome
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.message.contains("kaboom"));

        // The dispatcher keeps serving afterwards.
        let raw = br#"{"jsonrpc":"2.0","id":10,"method":"add","params":[1,1]}"#;
        let ok = decode_response(&d.marshaled_dispatch(raw).await).unwrap();
        assert_eq!(ok.outcome, Ok(json!(2)));
    }

    #[tokio::test]
    async fn malformed_payload_gets_parse_error_and_null_id() {
        let resp = call("this is not json").await;
        assert_eq!(resp.id, Value::Null);
        assert_eq!(resp.outcome.unwrap_err().kind(), ErrorKind::Parse);
    }

    #[test]
    fn short_type_names() {
        assert_eq!(short_type_name("std::io::error::Error"), "Error");
        assert_eq!(short_type_name("alloc::vec::Vec<u8>"), "Vec");
        assert_eq!(short_type_name("Plain"), "Plain");
    }
}
