//! Error taxonomy shared by the codec, dispatcher and client.
//!
//! Every error that crosses the wire is an [`RpcError`]: a numeric code, a
//! message, and optional `data`/`stack` payloads. The code alone determines
//! the [`ErrorKind`]; classification is total, so any integer maps to exactly
//! one kind.
//!
//! | Code                | Kind                          |
//! |---------------------|-------------------------------|
//! | `-32700`            | [`ErrorKind::Parse`]          |
//! | `-32600`            | [`ErrorKind::InvalidRequest`] |
//! | `-32601`            | [`ErrorKind::MethodNotFound`] |
//! | `-32602`            | [`ErrorKind::InvalidParams`]  |
//! | `-32603`            | [`ErrorKind::Internal`]       |
//! | `-32099..=-32000`   | [`ErrorKind::Server`]         |
//! | anything else       | [`ErrorKind::Generic`]        |

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Malformed wire payload.
pub const PARSE_ERROR: i64 = -32700;
/// Structurally invalid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The dispatcher could not resolve the method name.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Arguments do not fit the handler's signature.
pub const INVALID_PARAMS: i64 = -32602;
/// Uncaught handler fault.
pub const INTERNAL_ERROR: i64 = -32603;

/// Upper bound (inclusive) of the reserved server-error range.
pub const SERVER_ERROR_MAX: i64 = -32000;
/// Lower bound (inclusive) of the reserved server-error range.
pub const SERVER_ERROR_MIN: i64 = -32099;

/// Classification of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    Internal,
    /// Application-defined fault inside the reserved server range.
    Server,
    /// Any code outside both the predefined table and the server range.
    Generic,
}

impl ErrorKind {
    /// Classify a numeric code.
    pub fn from_code(code: i64) -> Self {
        match code {
            PARSE_ERROR => ErrorKind::Parse,
            INVALID_REQUEST => ErrorKind::InvalidRequest,
            METHOD_NOT_FOUND => ErrorKind::MethodNotFound,
            INVALID_PARAMS => ErrorKind::InvalidParams,
            INTERNAL_ERROR => ErrorKind::Internal,
            SERVER_ERROR_MIN..=SERVER_ERROR_MAX => ErrorKind::Server,
            _ => ErrorKind::Generic,
        }
    }

    /// Short name used in log fields and `Display` output.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Parse => "ParseError",
            ErrorKind::InvalidRequest => "InvalidRequestError",
            ErrorKind::MethodNotFound => "MethodNotFoundError",
            ErrorKind::InvalidParams => "InvalidParamsError",
            ErrorKind::Internal => "InternalError",
            ErrorKind::Server => "ServerError",
            ErrorKind::Generic => "Error",
        }
    }
}

/// A structured error as carried in a response envelope.
///
/// The `kind` is never serialized; it is recomputed from `code` whenever an
/// error is built or decoded, so a decoded error always reports the most
/// specific kind its code allows.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("[code={code}] {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub stack: Option<String>,
}

impl RpcError {
    /// Build an error with an arbitrary code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
            stack: None,
        }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("unsupported method \"{method}\""))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message).with_stack(stack)
    }

    /// Build an application fault in the reserved server range.
    ///
    /// Codes outside `-32099..=-32000` are clamped to `-32000` so the result
    /// always classifies as [`ErrorKind::Server`].
    pub fn server(code: i64, message: impl Into<String>) -> Self {
        let code = if (SERVER_ERROR_MIN..=SERVER_ERROR_MAX).contains(&code) {
            code
        } else {
            SERVER_ERROR_MAX
        };
        Self::new(code, message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// The kind this error's code classifies as.
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::from_code(self.code)
    }
}
