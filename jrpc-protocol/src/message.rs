//! JSON-RPC 2.0 envelope types.

use crate::error::{ErrorCode, ProtocolError};
use crate::JSONRPC_VERSION;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Number, Value};
use std::fmt;

/// Correlation id linking a Request to its Response.
///
/// Numbers are kept as [`Number`] so that whatever a peer sends comes back
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Id {
    Number(Number),
    String(String),
    Null,
}

impl Id {
    /// Returns the id as an unsigned sequence number, if it is one.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Id::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Id::Null)
    }

    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => Ok(Id::Number(n)),
            Value::String(s) => Ok(Id::String(s)),
            Value::Null => Ok(Id::Null),
            other => Err(format!("invalid id: {}", other)),
        }
    }
}

impl From<u64> for Id {
    fn from(n: u64) -> Self {
        Id::Number(n.into())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id::String(s)
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id::String(s.to_string())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Number(n) => write!(f, "{}", n),
            Id::String(s) => write!(f, "{:?}", s),
            Id::Null => write!(f, "null"),
        }
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Id::Number(n) => n.serialize(serializer),
            Id::String(s) => serializer.serialize_str(s),
            Id::Null => serializer.serialize_unit(),
        }
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Id::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Request envelope. A response is expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    /// Positional parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub id: Id,
}

impl Request {
    pub fn new(id: impl Into<Id>, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(Value::Array(params)),
            id: id.into(),
        }
    }
}

/// Notification envelope. Never carries an `id`; no response is sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params: Some(Value::Array(params)),
        }
    }
}

/// Error details carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn parse_error(detail: impl fmt::Display) -> Self {
        Self::new(ErrorCode::ParseError, format!("parse error: {}", detail))
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorCode::MethodNotFound,
            format!("method not found: {}", method),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Application failure; the message is passed through verbatim.
    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServerError, message)
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RPC error {}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for ErrorObject {}

/// Payload of a response: exactly one of `result` or `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

/// Response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawResponse", into = "RawResponse")]
pub struct Response {
    pub jsonrpc: String,
    pub outcome: Outcome,
    pub id: Id,
}

impl Response {
    pub fn ok(id: Id, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            outcome: Outcome::Result(result),
            id,
        }
    }

    pub fn error(id: Id, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            outcome: Outcome::Error(error),
            id,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, Outcome::Error(_))
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    pub fn error_object(&self) -> Option<&ErrorObject> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match self.outcome {
            Outcome::Result(value) => Ok(value),
            Outcome::Error(err) => Err(err),
        }
    }
}

/// Wire shape of a response, before the result/error exclusivity check.
#[derive(Serialize, Deserialize)]
struct RawResponse {
    jsonrpc: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
    id: Id,
}

/// Maps a present key to `Some`, so that `"result": null` is kept.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawResponse> for Response {
    type Error = ProtocolError;

    fn try_from(raw: RawResponse) -> Result<Self, Self::Error> {
        let outcome = match (raw.result, raw.error) {
            (Some(result), None) => Outcome::Result(result),
            (None, Some(error)) => Outcome::Error(error),
            (Some(_), Some(_)) => {
                return Err(ProtocolError::InvalidEnvelope(
                    "response carries both result and error".to_string(),
                ))
            }
            (None, None) => {
                return Err(ProtocolError::InvalidEnvelope(
                    "response carries neither result nor error".to_string(),
                ))
            }
        };
        Ok(Self {
            jsonrpc: raw.jsonrpc,
            outcome,
            id: raw.id,
        })
    }
}

impl From<Response> for RawResponse {
    fn from(response: Response) -> Self {
        let (result, error) = match response.outcome {
            Outcome::Result(value) => (Some(value), None),
            Outcome::Error(err) => (None, Some(err)),
        };
        Self {
            jsonrpc: response.jsonrpc,
            result,
            error,
            id: response.id,
        }
    }
}

/// A list of responses answering a batch request.
///
/// Only the wire shape exists; no batch execution order is defined.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResponse(pub Vec<Response>);

impl BatchResponse {
    /// Returns the response correlated to `id`, if any.
    pub fn response_for(&self, id: &Id) -> Option<&Response> {
        self.0.iter().find(|response| &response.id == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Response> {
        self.0.iter()
    }
}

/// An envelope that failed validation.
///
/// `id` is set when the frame was request-shaped, in which case the error
/// must be answered; otherwise it can only be logged.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeError {
    pub id: Option<Id>,
    pub error: ErrorObject,
}

impl EnvelopeError {
    fn answer(id: Id, error: ErrorObject) -> Self {
        Self {
            id: Some(id),
            error,
        }
    }

    fn drop(error: ErrorObject) -> Self {
        Self { id: None, error }
    }

    /// Converts into the response owed to the peer, if one is owed.
    pub fn into_response(self) -> Option<Response> {
        self.id.map(|id| Response::error(id, self.error))
    }
}

impl fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

/// An inbound call, classified by the presence of `id`.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Request(Request),
    Notification(Notification),
}

impl Incoming {
    /// Parses and classifies a raw frame.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::answer(Id::Null, ErrorObject::parse_error(e)))?;
        Self::from_value(value)
    }

    /// Classifies an already parsed frame.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let mut map = match value {
            Value::Object(map) => map,
            Value::Array(_) => {
                return Err(EnvelopeError::answer(
                    Id::Null,
                    ErrorObject::invalid_request("batch requests are not supported"),
                ))
            }
            _ => {
                return Err(EnvelopeError::answer(
                    Id::Null,
                    ErrorObject::invalid_request("envelope must be a JSON object"),
                ))
            }
        };

        let id = match map.remove("id") {
            Some(raw) => match Id::from_value(raw) {
                Ok(id) => Some(id),
                Err(msg) => {
                    return Err(EnvelopeError::answer(
                        Id::Null,
                        ErrorObject::invalid_request(msg),
                    ))
                }
            },
            None => None,
        };

        let reject = |error: ErrorObject| match &id {
            Some(id) => EnvelopeError::answer(id.clone(), error),
            None => EnvelopeError::drop(error),
        };

        match map.remove("jsonrpc") {
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            _ => {
                return Err(reject(ErrorObject::invalid_request(
                    "jsonrpc must be \"2.0\"",
                )))
            }
        }

        let method = match map.remove("method") {
            Some(Value::String(method)) => method,
            _ => {
                return Err(reject(ErrorObject::invalid_request(
                    "missing or invalid method",
                )))
            }
        };

        let params = match map.remove("params") {
            None | Some(Value::Null) => None,
            Some(params) => Some(params),
        };

        let jsonrpc = JSONRPC_VERSION.to_string();
        Ok(match id {
            Some(id) => Incoming::Request(Request {
                jsonrpc,
                method,
                params,
                id,
            }),
            None => Incoming::Notification(Notification {
                jsonrpc,
                method,
                params,
            }),
        })
    }

    pub fn method(&self) -> &str {
        match self {
            Incoming::Request(req) => &req.method,
            Incoming::Notification(note) => &note.method,
        }
    }

    pub fn params(&self) -> Option<&Value> {
        match self {
            Incoming::Request(req) => req.params.as_ref(),
            Incoming::Notification(note) => note.params.as_ref(),
        }
    }

    /// Returns the id for requests, `None` for notifications.
    pub fn id(&self) -> Option<&Id> {
        match self {
            Incoming::Request(req) => Some(&req.id),
            Incoming::Notification(_) => None,
        }
    }

    pub fn is_notification(&self) -> bool {
        matches!(self, Incoming::Notification(_))
    }
}
