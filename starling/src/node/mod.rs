//! # Node Runtime
//!
//! A [`Node`] is one addressable instance of a service. It owns:
//! - an [`Address`] `namespace:serviceId:instanceId`
//! - four channel subscriptions: service-wide, broadcast, lobby and its own address
//! - a [`TaskScheduler`] that admits inbound requests
//! - a [`NodeClient`] with the pending-request table for outbound requests
//!
//! ## Inbound Flow
//! Every message on the instance channel is acknowledged (fire-and-forget) and
//! classified. Responses complete the matching pending request. Status updates
//! (`{namespace}::StatusUpdate`) slide the matching request's deadline. Any
//! other request is scheduled; when the scheduler runs it, the registered
//! handler produces the response, which is published to the request's
//! `recipientAddress`. Requests without a recipient are one-way and their
//! response is dropped.
//!
//! ## Empty Responses
//! When a reply was requested and a handler succeeds with `null` or `{}`, the
//! response is turned into an `EMPTY_RESPONSE` failure. Other values, empty
//! strings and arrays included, are delivered as they are.
//!
//! ## Lifecycle
//! [`Node::initialize`] binds the channels, registers with discovery,
//! announces `CHECKIN` on the lobby and starts the load reporter.
//! [`Node::stop`] undoes all of it exactly once, announcing `CHECKOUT`.

pub mod client;
pub mod handler;
pub mod pending;
pub mod service;

use std::convert::Infallible;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use starling_api::address::Address;
use starling_api::errors::{HandlerError, NodeError};
use starling_api::message::{
    error_codes, is_empty_payload, status_update_type, Envelope, ErrorInfo, Request, RequestHeader, Response,
    ResponseBody, ResponseHeader, ServerStatus, StatusUpdate, CHECKIN, CHECKOUT,
};
use starling_api::transport::{Channel, Transport, TransportMessage};
use starling_api::types::{now_millis, MessageHandler, NodeResult};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn, Instrument};

use crate::config::NodeConfig;
use crate::discovery::ServiceDiscovery;
use crate::scheduler::task::panic_message;
use crate::scheduler::{SchedulerStats, TaskOutcome, TaskScheduler};
use crate::{log_error, log_lifecycle, log_request, node_span, request_span};

pub use client::{NodeClient, RequestOptions};
pub use handler::{Execution, HandlerEntry, HandlerTable, RequestShape};
pub use pending::{StatusHandler, TimeoutCallback, TimeoutContext};
pub use service::NodeService;

/// One running instance of service `S`.
pub struct Node<S: NodeService> {
    config: NodeConfig,
    address: Address,
    dispatcher: Arc<Dispatcher<S>>,
    discovery: ServiceDiscovery,
    channels: Mutex<Vec<Channel>>,
    load_reporter: Mutex<Option<JoinHandle<()>>>,
    started_at: Instant,
    init_lock: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    stopped: AtomicBool,
}

impl<S: NodeService> Node<S> {
    /// Builds a node. Nothing is published or subscribed until [`initialize`](Self::initialize).
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        config: NodeConfig,
        service: S,
        transport: Arc<dyn Transport>,
        discovery: ServiceDiscovery,
    ) -> NodeResult<Self> {
        config.validate()?;
        let address = Address::new(&config.namespace, &config.service_id, &config.instance_id)?;
        let service = Arc::new(service);

        let client = NodeClient::new(
            address.clone(),
            transport.clone(),
            discovery.clone(),
            config.request_callback_timeout,
            Some(status_hook(&service)),
        );

        let scheduler = TaskScheduler::new(config.scheduler.clone())?;
        scheduler
            .on_task_complete(reply_listener(client.clone()))
            .map_err(|err| NodeError::Other(anyhow::Error::new(err)))?;

        service.attach(client.clone());

        let dispatcher = Arc::new(Dispatcher {
            address: address.to_string(),
            status_type: status_update_type(&config.namespace),
            handlers: S::handlers(),
            service,
            client,
            scheduler,
            transport,
        });
        log_lifecycle!(address, "created", handlers = dispatcher.handlers.len());

        Ok(Self {
            config,
            address,
            dispatcher,
            discovery,
            channels: Mutex::new(Vec::new()),
            load_reporter: Mutex::new(None),
            started_at: Instant::now(),
            init_lock: tokio::sync::Mutex::new(()),
            initialized: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<S> {
        &self.dispatcher.service
    }

    /// Outbound API of this node, cloneable and usable from other tasks.
    pub fn client(&self) -> NodeClient {
        self.dispatcher.client.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Binds the channels, registers with discovery, announces `CHECKIN` and
    /// starts reporting load. Calling it again after success is a no-op.
    ///
    /// If a step fails the node stays uninitialized and a later call resumes:
    /// channels that are already bound are kept, the rest are bound.
    pub async fn initialize(&self) -> NodeResult<()> {
        let _guard = self.init_lock.lock().await;
        if self.is_stopped() {
            return Err(NodeError::Stopped);
        }
        if self.initialized.load(Ordering::SeqCst) {
            debug!(address = %self.address, "Node already initialized");
            return Ok(());
        }

        let span = node_span!(self.address);
        async {
            self.bind_channels().await?;

            let load = self.dispatcher.scheduler.queue_len() as u64;
            self.discovery
                .register_node(self.address.service_id(), self.address.instance_id(), load)
                .await?;

            let status = serde_json::to_value(self.server_status())?;
            self.dispatcher.client.announce(CHECKIN, status).await?;

            self.start_load_reporter();
            self.initialized.store(true, Ordering::SeqCst);
            log_lifecycle!(self.address, "initialized");
            Ok::<(), NodeError>(())
        }
        .instrument(span)
        .await
    }

    async fn bind_channels(&self) -> NodeResult<()> {
        let dispatcher = &self.dispatcher;
        let bindings = [
            (self.address.service_channel(), Peripheral::Service),
            (self.address.broadcast_channel(), Peripheral::Broadcast),
            (self.address.lobby_channel(), Peripheral::Lobby),
        ]
        .map(|(name, kind)| (name, dispatcher.peripheral_handler(kind)));
        let inbound = (self.address.to_string(), dispatcher.inbound_handler());

        for (name, handler) in bindings.into_iter().chain(std::iter::once(inbound)) {
            if self.channels().iter().any(|channel| channel.name() == name) {
                continue;
            }
            let channel = Channel::bind(dispatcher.transport.clone(), &name, Some(handler))
                .await
                .map_err(|err| NodeError::transport(format!("Failed to bind channel {name}"), err))?;
            self.channels().push(channel);
        }
        Ok(())
    }

    /// Leaves the cluster. Safe to call any number of times, and after a failed
    /// [`initialize`](Self::initialize); only the first call does anything.
    ///
    /// Every step runs even if an earlier one failed. The first failure is returned.
    pub async fn stop(&self) -> NodeResult<()> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(address = %self.address, "Node already stopped");
            return Ok(());
        }
        // Waits out an initialize in flight so nothing it starts outlives the stop.
        let _guard = self.init_lock.lock().await;

        let span = node_span!(self.address);
        async {
            let mut first_error = None;
            let client = &self.dispatcher.client;
            client.mark_stopped();

            if let Some(reporter) = self.load_reporter().take() {
                reporter.abort();
            }

            if let Err(err) = self
                .discovery
                .unregister_node(self.address.service_id(), self.address.instance_id())
                .await
            {
                log_error!(err, step = "deregister");
                keep_first(&mut first_error, err.into());
            }

            let checkout = match serde_json::to_value(self.server_status()) {
                Ok(status) => client.announce(CHECKOUT, status).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = checkout {
                log_error!(err, step = "checkout");
                keep_first(&mut first_error, err);
            }

            let channels = std::mem::take(&mut *self.channels());
            for channel in channels {
                if let Err(err) = channel.unsubscribe().await {
                    log_error!(err, step = "unsubscribe", channel = %channel.name());
                    keep_first(
                        &mut first_error,
                        NodeError::transport(format!("Failed to unsubscribe from {}", channel.name()), err),
                    );
                }
            }

            let rejected = client.pending().reject_all(|| NodeError::Stopped);
            self.dispatcher.scheduler.shutdown();
            log_lifecycle!(self.address, "stopped", rejected_requests = rejected);

            first_error.map_or(Ok(()), Err)
        }
        .instrument(span)
        .await
    }

    /// Snapshot of this node, also used as the `CHECKIN`/`CHECKOUT` body.
    pub fn server_status(&self) -> ServerStatus {
        ServerStatus {
            address: self.address.to_string(),
            namespace: self.address.namespace().to_string(),
            service_id: self.address.service_id().to_string(),
            instance_id: self.address.instance_id().to_string(),
            queued_tasks: self.dispatcher.scheduler.queue_len(),
            running_tasks: self.dispatcher.scheduler.running_tasks(),
            pending_requests: self.dispatcher.client.pending_requests(),
            uptime_ms: self.started_at.elapsed().as_millis() as u64,
            timestamp: now_millis(),
        }
    }

    /// Exact admission counters of the inbound scheduler.
    pub async fn scheduler_stats(&self) -> NodeResult<SchedulerStats> {
        self.dispatcher
            .scheduler
            .stats()
            .await
            .map_err(|err| NodeError::Other(anyhow::Error::new(err)))
    }

    pub async fn make_request(&self, options: RequestOptions) -> NodeResult<Response<Value>> {
        self.dispatcher.client.make_request(options).await
    }

    pub async fn request<B, R>(&self, to: &str, request_type: &str, body: &B) -> NodeResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.dispatcher.client.request(to, request_type, body).await
    }

    pub async fn send_one_way_message(
        &self,
        request_type: &str,
        to: &str,
        body: Value,
        request_id: Option<String>,
    ) -> NodeResult<String> {
        self.dispatcher
            .client
            .send_one_way_message(request_type, to, body, request_id)
            .await
    }

    pub async fn send_status_update(&self, request: &RequestHeader, status: Value) -> NodeResult<()> {
        self.dispatcher.client.send_status_update(request, status).await
    }

    pub async fn broadcast(&self, service_id: &str, request_type: &str, body: Value) -> NodeResult<()> {
        self.dispatcher.client.broadcast(service_id, request_type, body).await
    }

    fn start_load_reporter(&self) {
        let discovery = self.discovery.clone();
        let scheduler = self.dispatcher.scheduler.clone();
        let service_id = self.address.service_id().to_string();
        let instance_id = self.address.instance_id().to_string();
        let period = self.config.status_update_interval;

        let reporter = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let load = scheduler.queue_len() as u64;
                match discovery.update_node_load(&service_id, &instance_id, load).await {
                    Ok(()) => trace!(service_id = %service_id, load, "Load reported"),
                    Err(err) => log_error!(err, service_id = %service_id, "Failed to report load"),
                }
            }
        });
        *self.load_reporter() = Some(reporter);
    }

    fn channels(&self) -> MutexGuard<'_, Vec<Channel>> {
        self.channels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn load_reporter(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.load_reporter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: NodeService> Drop for Node<S> {
    fn drop(&mut self) {
        if let Some(reporter) = self.load_reporter().take() {
            reporter.abort();
        }
        if !self.is_stopped() {
            debug!(address = %self.address, "Node dropped without stop");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Peripheral {
    Service,
    Broadcast,
    Lobby,
}

/// State shared with the channel subscriptions and scheduled request tasks.
struct Dispatcher<S: NodeService> {
    address: String,
    status_type: String,
    service: Arc<S>,
    handlers: HandlerTable<S>,
    client: NodeClient,
    scheduler: TaskScheduler<Response<Value>>,
    transport: Arc<dyn Transport>,
}

impl<S: NodeService> Dispatcher<S> {
    fn inbound_handler(self: &Arc<Self>) -> MessageHandler {
        let dispatcher = self.clone();
        Arc::new(move |message| {
            let dispatcher = dispatcher.clone();
            Box::pin(async move { dispatcher.handle_incoming(message) })
        })
    }

    fn peripheral_handler(self: &Arc<Self>, kind: Peripheral) -> MessageHandler {
        let dispatcher = self.clone();
        Arc::new(move |message| Box::pin(dispatcher.clone().handle_peripheral(kind, message)))
    }

    fn ack(&self, message: &TransportMessage) {
        let transport = self.transport.clone();
        let message = message.clone();
        tokio::spawn(async move {
            if let Err(err) = transport.ack(&message).await {
                warn!(
                    message_id = %message.id,
                    channel = %message.channel,
                    error = %err,
                    "Failed to acknowledge message"
                );
            }
        });
    }

    fn handle_incoming(self: &Arc<Self>, message: TransportMessage) {
        self.ack(&message);

        let envelope = match Envelope::from_value(message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "Dropping malformed message");
                return;
            }
        };

        match envelope {
            Envelope::Response(response) => {
                let request_id = response.request_id().to_string();
                if self.client.pending().resolve(response) {
                    trace!(request_id = %request_id, "Response correlated");
                } else {
                    warn!(request_id = %request_id, "Received response for unknown request");
                }
            }
            Envelope::Request(request) if request.header.request_type == self.status_type => {
                self.handle_status_update(request);
            }
            Envelope::Request(request) => self.enqueue(request),
        }
    }

    fn handle_status_update(&self, request: Request<Value>) {
        let Request { header, body } = request;
        let status = match serde_json::from_value::<StatusUpdate>(body.clone()) {
            Ok(update) => update.status,
            Err(_) => body,
        };
        // Correlation always follows the header, never the body.
        let update = StatusUpdate {
            request_id: header.request_id,
            from: header.requester_address,
            status,
        };
        let request_id = update.request_id.clone();
        if self.client.pending().slide(update) {
            trace!(request_id = %request_id, "Deadline extended by status update");
        } else {
            debug!(request_id = %request_id, "Status update for unknown request");
        }
    }

    fn enqueue(self: &Arc<Self>, request: Request<Value>) {
        let request_type = request.header.request_type.clone();
        let request_id = request.header.request_id.clone();
        let dispatcher = self.clone();

        let scheduled = self.scheduler.schedule_task(
            move |request: Request<Value>| async move { Ok::<_, Infallible>(dispatcher.execute(request).await) },
            request,
        );
        match scheduled {
            Ok(task_id) => log_request!(request_type, "scheduled", request_id = %request_id, task_id),
            Err(err) => warn!(request_type = %request_type, request_id = %request_id, error = %err, "Dropping request"),
        }
    }

    async fn execute(self: Arc<Self>, request: Request<Value>) -> Response<Value> {
        let header = request.header.clone();
        let span = request_span!(header.request_type, header.request_id, requester = %header.requester_address);

        let result = async {
            let Some(entry) = self.handlers.get(&header.request_type) else {
                return Err(HandlerError::NoHandler(header.request_type.clone()));
            };
            match AssertUnwindSafe(entry.call(self.service.clone(), request)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => Err(HandlerError::Panicked(panic_message(panic))),
            }
        }
        .instrument(span)
        .await;

        match &result {
            Ok(_) => log_request!(header.request_type, "handled", request_id = %header.request_id),
            Err(err) => debug!(
                request_type = %header.request_type,
                request_id = %header.request_id,
                error = %err,
                "Handler failed"
            ),
        }
        build_response(&self.address, header, result)
    }

    async fn handle_peripheral(self: Arc<Self>, kind: Peripheral, message: TransportMessage) {
        self.ack(&message);

        if let Peripheral::Service = kind {
            self.service.on_service_message(message.payload).await;
            return;
        }

        let request: Request<Value> = match serde_json::from_value(message.payload) {
            Ok(request) => request,
            Err(err) => {
                warn!(channel = %message.channel, error = %err, "Dropping malformed message");
                return;
            }
        };
        match kind {
            Peripheral::Broadcast => self.service.on_broadcast(request).await,
            _ => self.service.on_lobby_message(request).await,
        }
    }
}

/// Wraps a handler result into the response published to the requester.
///
/// A successful `null` or `{}` becomes an `EMPTY_RESPONSE` failure when a
/// reply was requested.
pub(crate) fn build_response(
    responder: &str,
    header: RequestHeader,
    result: Result<Value, HandlerError>,
) -> Response<Value> {
    let body = match result {
        Ok(data) if header.expects_reply() && is_empty_payload(&data) => ResponseBody::failed(
            data,
            ErrorInfo::new(error_codes::EMPTY_RESPONSE, "Empty response data"),
        ),
        Ok(data) => ResponseBody::ok(data),
        Err(err) => ResponseBody::failed(Value::Null, err.into()),
    };
    Response {
        request_header: header,
        response_header: ResponseHeader {
            responder_address: responder.to_string(),
            timestamp: now_millis(),
        },
        body,
    }
}

fn reply_listener(client: NodeClient) -> impl Fn(&TaskOutcome<Response<Value>>) + Send + Sync + 'static {
    move |outcome| match &outcome.result {
        Ok(response) => {
            let Some(recipient) = response.request_header.recipient_address.clone() else {
                return;
            };
            tokio::spawn(deliver_response(client.clone(), recipient, response.clone()));
        }
        Err(err) => warn!(task_id = outcome.task_id, error = %err, "Request task ended without a response"),
    }
}

async fn deliver_response(client: NodeClient, recipient: String, response: Response<Value>) {
    let request_id = response.request_id().to_string();
    let payload = match serde_json::to_value(&response) {
        Ok(payload) => payload,
        Err(err) => {
            log_error!(err, request_id = %request_id, "Failed to encode response");
            return;
        }
    };
    if let Err(err) = client.publish(&recipient, payload).await {
        log_error!(err, request_id = %request_id, recipient = %recipient, "Failed to deliver response");
    }
}

fn status_hook<S: NodeService>(service: &Arc<S>) -> StatusHandler {
    let service = Arc::downgrade(service);
    Arc::new(move |update| {
        if let Some(service) = service.upgrade() {
            tokio::spawn(async move { service.on_status_update(update).await });
        }
    })
}

fn keep_first(slot: &mut Option<NodeError>, err: NodeError) {
    if slot.is_none() {
        *slot = Some(err);
    }
}
