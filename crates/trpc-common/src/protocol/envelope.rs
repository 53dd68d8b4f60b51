//! trpc message envelopes
//!
//! Requests and responses are JSON objects shaped after JSON-RPC:
//!
//! ```text
//! {"version": "2.0", "id": 7, "method": "add", "params": [1, 2]}
//! {"version": "2.0", "id": 7, "result": 3}
//! {"version": "2.0", "id": 7, "error": {"code": -32601, "message": "..."}}
//! ```
//!
//! A response carries exactly one of `result` or `error`, and always the `id`
//! of the request it answers.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::error::Fault;

/// Protocol tag carried in every envelope
pub const VERSION: &str = "2.0";

/// Per-call correlation token
pub type Token = u64;

/// Positional call arguments
pub type Params = Vec<Value>;

/// A call request sent by a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Request {
    /// Protocol tag (always [`VERSION`] when produced by this crate)
    pub version: String,
    /// Correlation token echoed back in the response
    pub id: Token,
    /// Name of the bound method to invoke
    pub method: String,
    /// Positional arguments
    #[serde(default)]
    pub params: Params,
}

impl Request {
    pub fn new(id: Token, method: impl Into<String>, params: Params) -> Self {
        Request {
            version: VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error member of a failure response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorObject {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<&Fault> for ErrorObject {
    fn from(fault: &Fault) -> Self {
        let message = fault.message();
        ErrorObject {
            code: fault.code(),
            message: if message.is_empty() { None } else { Some(message) },
        }
    }
}

/// A response sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Response {
    pub version: String,
    pub id: Token,
    /// Present on success. A `null` result is kept as `Some(Value::Null)`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    pub result: Option<Value>,
    /// Present on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    /// Creates a response skeleton answering `request`, with neither member set.
    pub fn empty_for(request: &Request) -> Self {
        Response {
            version: VERSION.to_string(),
            id: request.id,
            result: None,
            error: None,
        }
    }

    pub fn success(id: Token, result: Value) -> Self {
        Response {
            version: VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Token, error: ErrorObject) -> Self {
        Response {
            version: VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Splits the response into its result or its error member.
    ///
    /// A success response without a `result` member yields `null`.
    pub fn into_result(self) -> std::result::Result<Value, ErrorObject> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

fn deserialize_present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
