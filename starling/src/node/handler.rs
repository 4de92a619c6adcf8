//! Static request handler tables.
//!
//! Every node type declares its handlers once, up front, by returning a
//! [`HandlerTable`] from [`NodeService::handlers`](super::NodeService::handlers).
//! An entry maps a `requestType` to a function plus two flags: whether the
//! function takes the whole request or only its body, and whether it is
//! synchronous or asynchronous.
//!
//! ```rust,ignore
//! fn handlers() -> HandlerTable<Self> {
//!     HandlerTable::new()
//!         .sync_body("ping", |_svc: &Self, _body: String| Ok::<_, anyhow::Error>("pong"))
//!         .async_request("lookup", |svc: Arc<Self>, req: Request<Query>| async move { svc.lookup(req).await })
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use starling_api::errors::HandlerError;
use starling_api::message::Request;
use starling_api::types::BoxedFuture;

/// What the handler function receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    /// Only the deserialized body
    Body,
    /// The whole request, header included
    FullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Runs to completion inline when the scheduler admits it
    Sync,
    /// Returns a future that may await I/O
    Async,
}

type HandlerFuture = BoxedFuture<'static, Result<Value, HandlerError>>;
type HandlerFn<S> = Arc<dyn Fn(Arc<S>, Request<Value>) -> HandlerFuture + Send + Sync>;

/// One registered handler.
pub struct HandlerEntry<S> {
    shape: RequestShape,
    execution: Execution,
    call: HandlerFn<S>,
}

impl<S> HandlerEntry<S> {
    pub fn shape(&self) -> RequestShape {
        self.shape
    }

    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Invokes the handler. Nothing runs until the returned future is polled.
    pub fn call(&self, service: Arc<S>, request: Request<Value>) -> BoxedFuture<'static, Result<Value, HandlerError>> {
        (self.call)(service, request)
    }
}

impl<S> fmt::Debug for HandlerEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("shape", &self.shape)
            .field("execution", &self.execution)
            .finish_non_exhaustive()
    }
}

/// Mapping from request type to handler, built once per node type.
pub struct HandlerTable<S> {
    entries: HashMap<String, HandlerEntry<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for HandlerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter()).finish()
    }
}

impl<S: Send + Sync + 'static> HandlerTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a synchronous handler receiving the deserialized body.
    pub fn sync_body<B, R, E, F>(self, request_type: impl Into<String>, handler: F) -> Self
    where
        B: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn(&S, B) -> Result<R, E> + Send + Sync + 'static,
    {
        let request_type = request_type.into();
        let handler = Arc::new(handler);
        let call: HandlerFn<S> = Arc::new(move |service, request| {
            let handler = handler.clone();
            Box::pin(async move {
                let body = decode_body::<B>(request)?;
                encode_output(handler(&*service, body))
            })
        });
        self.insert(request_type, RequestShape::Body, Execution::Sync, call)
    }

    /// Registers a synchronous handler receiving the whole request.
    pub fn sync_request<B, R, E, F>(self, request_type: impl Into<String>, handler: F) -> Self
    where
        B: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn(&S, Request<B>) -> Result<R, E> + Send + Sync + 'static,
    {
        let request_type = request_type.into();
        let handler = Arc::new(handler);
        let call: HandlerFn<S> = Arc::new(move |service, request| {
            let handler = handler.clone();
            Box::pin(async move {
                let request = decode_request::<B>(request)?;
                encode_output(handler(&*service, request))
            })
        });
        self.insert(request_type, RequestShape::FullRequest, Execution::Sync, call)
    }

    /// Registers an asynchronous handler receiving the deserialized body.
    pub fn async_body<B, R, E, F, Fut>(self, request_type: impl Into<String>, handler: F) -> Self
    where
        B: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn(Arc<S>, B) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let request_type = request_type.into();
        let handler = Arc::new(handler);
        let call: HandlerFn<S> = Arc::new(move |service, request| {
            let handler = handler.clone();
            Box::pin(async move {
                let body = decode_body::<B>(request)?;
                encode_output(handler(service, body).await)
            })
        });
        self.insert(request_type, RequestShape::Body, Execution::Async, call)
    }

    /// Registers an asynchronous handler receiving the whole request.
    pub fn async_request<B, R, E, F, Fut>(self, request_type: impl Into<String>, handler: F) -> Self
    where
        B: DeserializeOwned + Send + 'static,
        R: Serialize + 'static,
        E: Into<anyhow::Error> + 'static,
        F: Fn(Arc<S>, Request<B>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let request_type = request_type.into();
        let handler = Arc::new(handler);
        let call: HandlerFn<S> = Arc::new(move |service, request| {
            let handler = handler.clone();
            Box::pin(async move {
                let request = decode_request::<B>(request)?;
                encode_output(handler(service, request).await)
            })
        });
        self.insert(request_type, RequestShape::FullRequest, Execution::Async, call)
    }

    fn insert(mut self, request_type: String, shape: RequestShape, execution: Execution, call: HandlerFn<S>) -> Self {
        if self.entries.contains_key(&request_type) {
            tracing::warn!(request_type = %request_type, "Handler registered twice, keeping the last one");
        }
        self.entries.insert(request_type, HandlerEntry { shape, execution, call });
        self
    }

    pub fn get(&self, request_type: &str) -> Option<&HandlerEntry<S>> {
        self.entries.get(request_type)
    }

    pub fn contains(&self, request_type: &str) -> bool {
        self.entries.contains_key(request_type)
    }

    pub fn request_types(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_body<B: DeserializeOwned>(request: Request<Value>) -> Result<B, HandlerError> {
    let request_type = request.header.request_type;
    serde_json::from_value(request.body).map_err(|err| HandlerError::InvalidBody {
        request_type,
        reason: err.to_string(),
    })
}

fn decode_request<B: DeserializeOwned>(request: Request<Value>) -> Result<Request<B>, HandlerError> {
    let body = serde_json::from_value(request.body).map_err(|err| HandlerError::InvalidBody {
        request_type: request.header.request_type.clone(),
        reason: err.to_string(),
    })?;
    Ok(Request::new(request.header, body))
}

fn encode_output<R: Serialize, E: Into<anyhow::Error>>(output: Result<R, E>) -> Result<Value, HandlerError> {
    let output = output.map_err(HandlerError::failed)?;
    serde_json::to_value(output).map_err(HandlerError::failed)
}
