//! JSON-RPC 2.0 envelope codec.
//!
//! This module encodes and decodes request and response envelopes. It knows
//! nothing about transports: callers hand it complete payloads and get
//! complete payloads back.
//!
//! # Envelope Shape
//!
//! ```text
//! request:  {"jsonrpc": "2.0", "id": <id>, "method": "a.b.c", "params": [..] | {..}}
//! response: {"jsonrpc": "2.0", "id": <id>, "result": <value>}
//!           {"jsonrpc": "2.0", "id": <id>, "error": {"code", "message", "data", "stack"}}
//! ```
//!
//! Notifications (requests without an `id`) and batches are not supported;
//! every call is answered.
//!
//! # Example
//!
//! ```
//! use probewire_rpc::protocol::{Params, Request, decode_request, encode_request};
//! use serde_json::json;
//!
//! let req = Request::new(json!("abc123"), "add", Params::positional(vec![json!(2), json!(3)]));
//! let wire = encode_request(&req);
//! let decoded = decode_request(&wire).unwrap();
//! assert_eq!(decoded, req);
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::RpcError;

/// The only protocol version this crate speaks.
pub const JSONRPC_VERSION: &str = "2.0";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Protocol-level failures seen by a client.
///
/// These are distinct from application errors ([`RpcError`]): they mean the
/// peer did not speak the protocol correctly, not that a call failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// The payload is not well-formed JSON.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The payload is JSON but not an object.
    #[error("response is not an object")]
    NotAnObject,

    /// The `jsonrpc` field names a version this crate does not speak.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Neither `result` nor `error` is present.
    #[error("response does not have a result or error key")]
    MissingOutcome,

    /// `error` is present but is not a valid error object.
    #[error("invalid error object: {0}")]
    InvalidErrorObject(String),

    /// The response answers a different request.
    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: Value, actual: Value },

    /// A call tried to send positional and named arguments together.
    #[error("cannot use both positional and named arguments")]
    MixedParams,
}

/// A request the server refused to dispatch.
///
/// Carries the id to echo back (`null` when the id could not be recovered)
/// together with the error to send.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{error}")]
pub struct RejectedRequest {
    pub id: Value,
    #[source]
    pub error: RpcError,
}

impl RejectedRequest {
    fn new(id: Value, error: RpcError) -> Self {
        Self { id, error }
    }

    /// Turn the rejection into the response the server should send.
    pub fn into_response(self) -> Response {
        Response::failure(self.id, self.error)
    }
}

// ---------------------------------------------------------------------------
// Params
// ---------------------------------------------------------------------------

/// Call arguments: positional and named forms are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    /// No `params` member was sent.
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    pub fn positional(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }

    pub fn named(values: Map<String, Value>) -> Self {
        Params::Named(values)
    }

    /// Number of arguments carried.
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(v) => v.len(),
            Params::Named(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wire representation, or `None` when nothing should be sent.
    pub fn to_value(&self) -> Option<Value> {
        match self {
            Params::None => None,
            Params::Positional(v) => Some(Value::Array(v.clone())),
            Params::Named(m) => Some(Value::Object(m.clone())),
        }
    }

    /// Reject any arguments, for handlers that take none.
    pub fn expect_empty(self) -> Result<(), RpcError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(RpcError::invalid_params(format!(
                "expected no arguments, got {}",
                self.len()
            )))
        }
    }

    /// Bind the arguments to a typed tuple (or any sequence-shaped type).
    ///
    /// `names` lists the handler's parameter names in positional order.
    /// Positional params are used as-is; named params are reordered by
    /// `names`. Missing, unknown or ill-typed arguments all produce an
    /// `InvalidParams` error.
    ///
    /// ```
    /// use probewire_rpc::protocol::Params;
    /// use serde_json::{json, Map};
    ///
    /// let mut named = Map::new();
    /// named.insert("b".into(), json!(3));
    /// named.insert("a".into(), json!(2));
    /// let (a, b): (i64, i64) = Params::Named(named).bind(&["a", "b"]).unwrap();
    /// assert_eq!((a, b), (2, 3));
    /// ```
    pub fn bind<T: serde::de::DeserializeOwned>(self, names: &[&str]) -> Result<T, RpcError> {
        let args = match self {
            Params::None => Vec::new(),
            Params::Positional(values) => values,
            Params::Named(mut map) => {
                let mut ordered = Vec::with_capacity(names.len());
                for name in names {
                    match map.remove(*name) {
                        Some(v) => ordered.push(v),
                        None => {
                            return Err(RpcError::invalid_params(format!(
                                "missing argument \"{name}\""
                            )))
                        }
                    }
                }
                if let Some(extra) = map.keys().next() {
                    return Err(RpcError::invalid_params(format!(
                        "unexpected argument \"{extra}\""
                    )));
                }
                ordered
            }
        };
        if args.len() != names.len() {
            return Err(RpcError::invalid_params(format!(
                "expected {} argument(s), got {}",
                names.len(),
                args.len()
            )));
        }
        serde_json::from_value(Value::Array(args))
            .map_err(|e| RpcError::invalid_params(format!("invalid argument: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A decoded call.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Caller-chosen correlation token.
    pub id: Value,
    /// Dotted method path, e.g. `window.current`.
    pub method: String,
    pub params: Params,
}

impl Request {
    pub fn new(id: Value, method: impl Into<String>, params: Params) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

/// A decoded reply: exactly one of a result or an error.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Echo of the originating request id (`null` if it was unrecoverable).
    pub id: Value,
    pub outcome: Result<Value, RpcError>,
}

impl Response {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: Value, error: RpcError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

#[derive(Serialize)]
struct RequestEnvelope<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Serialize)]
struct ResultEnvelope<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    result: &'a Value,
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    error: &'a RpcError,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Encode a request envelope. Empty params are omitted.
pub fn encode_request(req: &Request) -> Vec<u8> {
    let params = if req.params.is_empty() {
        None
    } else {
        req.params.to_value()
    };
    let envelope = RequestEnvelope {
        jsonrpc: JSONRPC_VERSION,
        id: &req.id,
        method: &req.method,
        params,
    };
    // Serializing a struct of JSON values and strings cannot fail.
    serde_json::to_vec(&envelope).unwrap_or_default()
}

/// Encode a response envelope.
pub fn encode_response(resp: &Response) -> Vec<u8> {
    let encoded = match &resp.outcome {
        Ok(result) => serde_json::to_vec(&ResultEnvelope {
            jsonrpc: JSONRPC_VERSION,
            id: &resp.id,
            result,
        }),
        Err(error) => serde_json::to_vec(&ErrorEnvelope {
            jsonrpc: JSONRPC_VERSION,
            id: &resp.id,
            error,
        }),
    };
    encoded.unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode and validate a request envelope.
///
/// Checks run in a fixed order so that the first defect found decides the
/// error: well-formed JSON, object shape, `id`, `jsonrpc`, `method`, then the
/// shape of `params`.
pub fn decode_request(data: &[u8]) -> Result<Request, RejectedRequest> {
    let value: Value = serde_json::from_slice(data).map_err(|_| {
        RejectedRequest::new(
            Value::Null,
            RpcError::parse_error("parse JSON data from request error"),
        )
    })?;

    let Value::Object(mut obj) = value else {
        return Err(RejectedRequest::new(
            Value::Null,
            RpcError::invalid_request("request should be a JSON object"),
        ));
    };

    let Some(id) = obj.remove("id") else {
        return Err(RejectedRequest::new(
            Value::Null,
            RpcError::invalid_request("notification is not supported"),
        ));
    };

    match obj.get("jsonrpc") {
        None => {
            return Err(RejectedRequest::new(
                id,
                RpcError::invalid_request("request field \"jsonrpc\" is missing"),
            ))
        }
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(RejectedRequest::new(
                id,
                RpcError::invalid_request(format!("unsupported version {other}")),
            ))
        }
    }

    let method = match obj.remove("method") {
        Some(Value::String(method)) => method,
        Some(_) => {
            return Err(RejectedRequest::new(
                id,
                RpcError::invalid_request("request field \"method\" should be a string"),
            ))
        }
        None => {
            return Err(RejectedRequest::new(
                id,
                RpcError::invalid_request("request field \"method\" is missing"),
            ))
        }
    };

    let params = match obj.remove("params") {
        None => Params::None,
        Some(Value::Array(values)) => Params::Positional(values),
        Some(Value::Object(map)) => Params::Named(map),
        Some(_) => {
            return Err(RejectedRequest::new(
                id,
                RpcError::invalid_request("request field \"params\" should be a list or object"),
            ))
        }
    };

    Ok(Request { id, method, params })
}

/// Decode a response envelope on the client side.
pub fn decode_response(data: &[u8]) -> Result<Response, ProtocolError> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let Value::Object(mut obj) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    if let Some(version) = obj.get("jsonrpc") {
        if version.as_str() != Some(JSONRPC_VERSION) {
            return Err(ProtocolError::UnsupportedVersion(version.to_string()));
        }
    }

    let id = obj.remove("id").unwrap_or(Value::Null);

    match obj.remove("error") {
        Some(Value::Null) | None => {}
        Some(error) => {
            let error: RpcError = serde_json::from_value(error)
                .map_err(|e| ProtocolError::InvalidErrorObject(e.to_string()))?;
            return Ok(Response::failure(id, error));
        }
    }

    match obj.remove("result") {
        Some(result) => Ok(Response::success(id, result)),
        None => Err(ProtocolError::MissingOutcome),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
