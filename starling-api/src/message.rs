//! # Wire Envelope
//!
//! This module defines the request/response envelope exchanged between nodes.
//! The envelope is transport-agnostic and serializes to camelCase JSON:
//!
//! ```text
//! Request:  { header: { timestamp, requestId, requesterAddress, recipientAddress?,
//!                       requestType, authToken?, sessionId? }, body }
//! Response: { requestHeader, responseHeader: { responderAddress, timestamp }, body: { data, success, error } }
//! ```
//!
//! ## Correlation
//!
//! A response carries a full copy of the request header it answers. The
//! `requestId` inside that copy is the only thing used to match it to the
//! pending request on the caller side; arrival order is never relied on.
//!
//! ## Usage Example
//!
//! ```rust
//! use starling_api::message::{Envelope, Request, RequestHeader};
//!
//! let header = RequestHeader::new("ping", "acme:caller:1").with_recipient("acme:caller:1");
//! let request = Request::new(header, serde_json::json!("ping"));
//! let wire = serde_json::to_value(&request).unwrap();
//! assert!(matches!(Envelope::from_value(wire), Ok(Envelope::Request(_))));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::now_millis;

/// Request type announced on the lobby when a node comes online.
pub const CHECKIN: &str = "CHECKIN";

/// Request type announced on the lobby when a node goes offline.
pub const CHECKOUT: &str = "CHECKOUT";

/// Suffix of the status update request type, prefixed by the namespace.
pub const STATUS_UPDATE_SUFFIX: &str = "::StatusUpdate";

/// Request type of intermediate status updates within `namespace`.
pub fn status_update_type(namespace: &str) -> String {
    format!("{namespace}{STATUS_UPDATE_SUFFIX}")
}

/// Error codes carried in [`ErrorInfo::code`].
pub mod error_codes {
    pub const NO_HANDLER: &str = "NO_HANDLER";
    pub const INVALID_BODY: &str = "INVALID_BODY";
    pub const HANDLER_ERROR: &str = "HANDLER_ERROR";
    pub const HANDLER_PANIC: &str = "HANDLER_PANIC";
    pub const EMPTY_RESPONSE: &str = "EMPTY_RESPONSE";
    pub const TIMEOUT: &str = "TIMEOUT";
}

/// Generates a fresh request id.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Envelope metadata for an outbound or inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestHeader {
    /// Milliseconds since the unix epoch at send time
    pub timestamp: u64,
    /// Unique among the requester's concurrently outstanding requests
    pub request_id: String,
    pub requester_address: String,
    /// Where the reply should be published; absent for one-way messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
    pub request_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Caller supplied header fields, carried through untouched
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl RequestHeader {
    /// Creates a header with a fresh request id and no recipient.
    pub fn new(request_type: impl Into<String>, requester_address: impl Into<String>) -> Self {
        Self {
            timestamp: now_millis(),
            request_id: new_request_id(),
            requester_address: requester_address.into(),
            recipient_address: None,
            request_type: request_type.into(),
            auth_token: None,
            session_id: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient_address = Some(recipient.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Whether the requester expects a reply.
    pub fn expects_reply(&self) -> bool {
        self.recipient_address.is_some()
    }
}

/// A message carrying a typed body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request<T> {
    pub header: RequestHeader,
    pub body: T,
}

impl<T> Request<T> {
    pub fn new(header: RequestHeader, body: T) -> Self {
        Self { header, body }
    }

    pub fn request_id(&self) -> &str {
        &self.header.request_id
    }

    pub fn request_type(&self) -> &str {
        &self.header.request_type
    }
}

/// Envelope metadata for a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseHeader {
    pub responder_address: String,
    pub timestamp: u64,
}

/// Structured error carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Outcome of processing a request.
///
/// `success` is false exactly when `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseBody<T> {
    pub data: T,
    pub success: bool,
    #[serde(default)]
    pub error: Option<ErrorInfo>,
}

impl<T> ResponseBody<T> {
    pub fn ok(data: T) -> Self {
        Self {
            data,
            success: true,
            error: None,
        }
    }

    pub fn failed(data: T, error: ErrorInfo) -> Self {
        Self {
            data,
            success: false,
            error: Some(error),
        }
    }
}

/// A reply correlated to a request through `request_header.request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    pub request_header: RequestHeader,
    pub response_header: ResponseHeader,
    pub body: ResponseBody<T>,
}

impl<T> Response<T> {
    pub fn request_id(&self) -> &str {
        &self.request_header.request_id
    }

    pub fn is_success(&self) -> bool {
        self.body.success
    }
}

impl Response<Value> {
    /// Deserializes the response data into a concrete type.
    pub fn data_as<R: serde::de::DeserializeOwned>(&self) -> Result<R, serde_json::Error> {
        serde_json::from_value(self.body.data.clone())
    }
}

/// Inbound payload classified as either a request or a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Request(Request<Value>),
    Response(Response<Value>),
}

impl Envelope {
    /// Classifies a raw payload: anything carrying a `responseHeader` is a response.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        if value.get("responseHeader").is_some() {
            serde_json::from_value(value).map(Envelope::Response)
        } else {
            serde_json::from_value(value).map(Envelope::Request)
        }
    }
}

/// Intermediate progress report for an outstanding request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub request_id: String,
    /// Address of the node reporting progress
    pub from: String,
    pub status: Value,
}

/// Snapshot of a node, announced on the lobby at checkin and checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub address: String,
    pub namespace: String,
    pub service_id: String,
    pub instance_id: String,
    pub queued_tasks: usize,
    pub running_tasks: usize,
    pub pending_requests: usize,
    pub uptime_ms: u64,
    pub timestamp: u64,
}

/// Whether `data` counts as an empty reply: `null`, or an object with no keys.
pub fn is_empty_payload(data: &Value) -> bool {
    match data {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
