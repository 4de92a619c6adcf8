//! # Node Error Types
//!
//! This module defines the error types used throughout Starling.
//!
//! ## Design Philosophy
//!
//! Every failure is local to the call or request that caused it. Nothing in this
//! taxonomy is fatal to a node:
//! - Handler failures become `success: false` responses on the wire
//! - Task failures are captured into a task outcome
//! - Placement, transport and timeout failures reject the caller's request
//!
//! ## Core Components
//!
//! - `NodeError`: Caller-side error returned by outbound operations
//! - `HandlerError`: Responder-side error produced while running a handler
//! - `TaskError`: Failure of a unit executed by the task scheduler
//! - `TransportError`: Pub/sub backend failures
//! - `RegistryError`: Service registry backend failures
//! - `AddressError`: Malformed node addresses

use std::time::Duration;

use thiserror::Error;

use crate::message::{error_codes, ErrorInfo};

/// Errors raised while parsing or building an [`Address`](crate::address::Address).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("Malformed address: {0}")]
    Malformed(String),
    #[error("Address {0} must not be empty")]
    EmptyPart(&'static str),
    #[error("Address {part} '{value}' contains the reserved ':' separator")]
    ReservedSeparator { part: &'static str, value: String },
}

/// Errors reported by a transport backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,
    #[error("Failed to publish to channel {channel}: {reason}")]
    PublishFailed { channel: String, reason: String },
    #[error("Failed to subscribe to channel {channel}: {reason}")]
    SubscribeFailed { channel: String, reason: String },
    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors reported by a service registry backend.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Service registry unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a unit of work executed by the task scheduler.
///
/// Task errors never escape the scheduler; they are only observable through
/// the completion outcome of the task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The unit returned an error. The original error is flattened to its message.
    #[error("Task execution failed: {0}")]
    Execution(String),
    /// The unit panicked while running.
    #[error("Task panicked: {0}")]
    Panicked(String),
    /// The scheduler was shut down before the unit could run.
    #[error("Task scheduler stopped")]
    SchedulerStopped,
}

/// Responder-side failure while dispatching an inbound request.
///
/// Converted into a failed response, never propagated out of the node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("No handler registered for request type {0}")]
    NoHandler(String),
    #[error("Invalid body for request type {request_type}: {reason}")]
    InvalidBody { request_type: String, reason: String },
    #[error("{0}")]
    Failed(String),
    #[error("Handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Wraps any error returned by user handler code.
    pub fn failed(err: impl Into<anyhow::Error>) -> Self {
        Self::Failed(format!("{:#}", err.into()))
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NoHandler(_) => error_codes::NO_HANDLER,
            Self::InvalidBody { .. } => error_codes::INVALID_BODY,
            Self::Failed(_) => error_codes::HANDLER_ERROR,
            Self::Panicked(_) => error_codes::HANDLER_PANIC,
        }
    }
}

impl From<HandlerError> for ErrorInfo {
    fn from(err: HandlerError) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

/// Caller-side error for every outbound node operation.
#[derive(Error, Debug)]
pub enum NodeError {
    /// No healthy instance of the target service could be found.
    #[error("No nodes available for service {service_id}")]
    Placement { service_id: String },

    /// Publishing or subscribing failed.
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: TransportError,
    },

    /// No response arrived before the (possibly slid) deadline.
    #[error("Request to {target} timed out after {}ms", .elapsed.as_millis())]
    Timeout { target: String, elapsed: Duration },

    /// A request with the same id is still waiting for its response.
    #[error("Request id {request_id} is already pending")]
    DuplicateRequest { request_id: String },

    /// The remote handler replied with `success: false`.
    #[error("Remote request failed: {0}")]
    Remote(ErrorInfo),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The node was stopped while the operation was outstanding.
    #[error("Node stopped")]
    Stopped,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl NodeError {
    pub fn transport(context: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Wire error code carried by a remote failure, if any.
    pub fn remote_code(&self) -> Option<&str> {
        match self {
            Self::Remote(info) => Some(info.code.as_str()),
            _ => None,
        }
    }
}
