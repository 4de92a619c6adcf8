use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use starling_api::address::{self, Address};
use starling_api::errors::{NodeError, TransportError};
use starling_api::message::{status_update_type, Request, RequestHeader, Response, StatusUpdate};
use starling_api::transport::{Channel, Transport};
use starling_api::types::NodeResult;
use tracing::{debug, Instrument};

use super::pending::{PendingTable, StatusHandler, TimeoutCallback, TimeoutContext};
use crate::discovery::ServiceDiscovery;
use crate::{log_error, log_request, request_span};

/// Options of one outbound request.
///
/// ```rust,ignore
/// let options = RequestOptions::new("billing", "invoice.create", json!({"amount": 10}))
///     .timeout(Duration::from_secs(5))
///     .on_status_update(|update| println!("progress: {}", update.status));
/// ```
#[derive(Clone)]
pub struct RequestOptions {
    /// Service id (placed through discovery) or fully qualified address
    pub to: String,
    pub request_type: String,
    pub body: Value,
    pub request_id: Option<String>,
    /// Where the reply is published. Defaults to the sending node.
    pub reply_to: Option<String>,
    /// Overrides the node's request callback timeout
    pub timeout: Option<Duration>,
    pub on_timeout: Option<TimeoutCallback>,
    /// Overrides the service's status update hook
    pub on_status_update: Option<StatusHandler>,
    pub auth_token: Option<String>,
    pub session_id: Option<String>,
    /// Extra header fields carried through untouched
    pub headers: BTreeMap<String, Value>,
}

impl RequestOptions {
    pub fn new(to: impl Into<String>, request_type: impl Into<String>, body: Value) -> Self {
        Self {
            to: to.into(),
            request_type: request_type.into(),
            body,
            request_id: None,
            reply_to: None,
            timeout: None,
            on_timeout: None,
            on_status_update: None,
            auth_token: None,
            session_id: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn reply_to(mut self, address: impl Into<String>) -> Self {
        self.reply_to = Some(address.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replaces the default timeout error. The request is always dropped on timeout.
    pub fn on_timeout<F>(mut self, callback: F) -> Self
    where
        F: Fn(TimeoutContext) -> NodeError + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(callback));
        self
    }

    pub fn on_status_update<F>(mut self, handler: F) -> Self
    where
        F: Fn(StatusUpdate) + Send + Sync + 'static,
    {
        self.on_status_update = Some(Arc::new(handler));
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: Value) -> Self {
        self.headers.insert(name.into(), value);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("to", &self.to)
            .field("request_type", &self.request_type)
            .field("request_id", &self.request_id)
            .field("reply_to", &self.reply_to)
            .field("timeout", &self.timeout)
            .field("custom_timeout", &self.on_timeout.is_some())
            .field("custom_status_handler", &self.on_status_update.is_some())
            .finish_non_exhaustive()
    }
}

struct ClientInner {
    address: Address,
    transport: Arc<dyn Transport>,
    discovery: ServiceDiscovery,
    pending: Arc<PendingTable>,
    request_timeout: Duration,
    status_hook: Option<StatusHandler>,
    stopped: AtomicBool,
}

/// Outbound half of a node.
///
/// Cheap to clone. Services receive one through
/// [`NodeService::attach`](super::NodeService::attach) so handlers can call
/// other nodes.
#[derive(Clone)]
pub struct NodeClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for NodeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeClient")
            .field("address", &self.inner.address)
            .field("pending", &self.inner.pending)
            .finish()
    }
}

impl NodeClient {
    pub(crate) fn new(
        address: Address,
        transport: Arc<dyn Transport>,
        discovery: ServiceDiscovery,
        request_timeout: Duration,
        status_hook: Option<StatusHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                address,
                transport,
                discovery,
                pending: PendingTable::new(request_timeout),
                request_timeout,
                status_hook,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Requests still waiting for a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    pub(crate) fn pending(&self) -> &Arc<PendingTable> {
        &self.inner.pending
    }

    pub(crate) fn mark_stopped(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }

    fn ensure_running(&self) -> NodeResult<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(NodeError::Stopped);
        }
        Ok(())
    }

    /// Resolves a service id or qualified address into a concrete peer address.
    ///
    /// Qualified addresses are used verbatim. Anything else is treated as a
    /// service id and placed on its least loaded healthy instance.
    pub async fn resolve_target(&self, to: &str) -> NodeResult<String> {
        let namespace = self.inner.address.namespace();
        if address::is_qualified(namespace, to) {
            return Ok(to.to_string());
        }
        match self.inner.discovery.get_least_loaded_node(to).await? {
            Some(instance_id) => Ok(Address::new(namespace, to, instance_id)?.to_string()),
            None => Err(NodeError::Placement {
                service_id: to.to_string(),
            }),
        }
    }

    /// Publishes a raw payload on `channel`.
    pub(crate) async fn publish(&self, channel: &str, payload: Value) -> Result<(), TransportError> {
        let channel = Channel::bind(self.inner.transport.clone(), channel, None).await?;
        channel.send(payload).await
    }

    /// Sends a request and waits for the correlated response.
    ///
    /// Resolves with the response when the remote handler succeeded and rejects
    /// with [`NodeError::Remote`] when it did not. Status updates for the
    /// request push the deadline a full timeout into the future.
    pub async fn make_request(&self, options: RequestOptions) -> NodeResult<Response<Value>> {
        self.ensure_running()?;
        let RequestOptions {
            to,
            request_type,
            body,
            request_id,
            reply_to,
            timeout,
            on_timeout,
            on_status_update,
            auth_token,
            session_id,
            headers,
        } = options;
        let target = self.resolve_target(&to).await?;

        let own_address = self.inner.address.to_string();
        let mut header = RequestHeader::new(&request_type, &own_address)
            .with_recipient(reply_to.unwrap_or_else(|| own_address.clone()));
        if let Some(request_id) = request_id {
            header = header.with_request_id(request_id);
        }
        if let Some(token) = auth_token {
            header = header.with_auth_token(token);
        }
        if let Some(session_id) = session_id {
            header = header.with_session_id(session_id);
        }
        header.extra = headers;

        let request_id = header.request_id.clone();
        let payload = serde_json::to_value(Request::new(header, body))?;
        let on_status = on_status_update.or_else(|| self.inner.status_hook.clone());
        let timeout = timeout.unwrap_or(self.inner.request_timeout);

        let span = request_span!(request_type, request_id, target = %target);
        async move {
            let reply = self
                .inner
                .pending
                .insert(&request_id, &target, timeout, on_timeout, on_status)?;

            if let Err(err) = self.publish(&target, payload).await {
                self.inner.pending.remove(&request_id);
                log_error!(
                    err,
                    request_id = %request_id,
                    request_type = %request_type,
                    target = %target,
                    "Failed to send request"
                );
                return Err(NodeError::transport(
                    format!("Failed to send {request_type} request {request_id} to {target}"),
                    err,
                ));
            }
            log_request!(request_type, "sent");

            // The sender is only dropped without a value when the table is torn down.
            reply.await.unwrap_or(Err(NodeError::Stopped))
        }
        .instrument(span)
        .await
    }

    /// Typed convenience over [`make_request`](Self::make_request).
    pub async fn request<B, R>(&self, to: &str, request_type: &str, body: &B) -> NodeResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_value(body)?;
        let response = self.make_request(RequestOptions::new(to, request_type, body)).await?;
        Ok(response.data_as::<R>()?)
    }

    /// Sends a request that expects no reply. Returns its request id.
    pub async fn send_one_way_message(
        &self,
        request_type: &str,
        to: &str,
        body: Value,
        request_id: Option<String>,
    ) -> NodeResult<String> {
        self.ensure_running()?;
        let target = self.resolve_target(to).await?;
        let mut header = RequestHeader::new(request_type, self.inner.address.to_string());
        if let Some(request_id) = request_id {
            header = header.with_request_id(request_id);
        }
        let request_id = header.request_id.clone();
        self.publish_one_way(&target, header, body).await?;
        Ok(request_id)
    }

    /// Reports progress on a request back to its requester, which slides the
    /// requester's deadline.
    pub async fn send_status_update(&self, request: &RequestHeader, status: Value) -> NodeResult<()> {
        let update = StatusUpdate {
            request_id: request.request_id.clone(),
            from: self.inner.address.to_string(),
            status,
        };
        self.send_one_way_message(
            &status_update_type(self.inner.address.namespace()),
            &request.requester_address,
            serde_json::to_value(update)?,
            Some(request.request_id.clone()),
        )
        .await
        .map(|_| ())
    }

    /// Publishes a one-way request to every instance of `service_id`.
    pub async fn broadcast(&self, service_id: &str, request_type: &str, body: Value) -> NodeResult<()> {
        self.ensure_running()?;
        let channel = address::broadcast_channel(self.inner.address.namespace(), service_id);
        let header = RequestHeader::new(request_type, self.inner.address.to_string());
        self.publish_one_way(&channel, header, body).await
    }

    /// Publishes a one-way request on the lobby even after the client was stopped.
    pub(crate) async fn announce(&self, request_type: &str, body: Value) -> NodeResult<()> {
        let channel = self.inner.address.lobby_channel();
        let header = RequestHeader::new(request_type, self.inner.address.to_string());
        self.publish_one_way(&channel, header, body).await
    }

    async fn publish_one_way(&self, channel: &str, header: RequestHeader, body: Value) -> NodeResult<()> {
        debug_assert!(!header.expects_reply());
        let request_type = header.request_type.clone();
        let request_id = header.request_id.clone();
        let payload = serde_json::to_value(Request::new(header, body))?;

        self.publish(channel, payload).await.map_err(|err| {
            log_error!(
                err,
                request_id = %request_id,
                request_type = %request_type,
                target = %channel,
                "Failed to send one-way message"
            );
            NodeError::transport(
                format!("Failed to send {request_type} message {request_id} to {channel}"),
                err,
            )
        })?;
        debug!(request_type = %request_type, request_id = %request_id, target = %channel, "One-way message sent");
        Ok(())
    }
}
