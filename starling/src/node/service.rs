use async_trait::async_trait;
use serde_json::Value;
use starling_api::message::{Request, StatusUpdate};

use super::client::NodeClient;
use super::handler::HandlerTable;

/// Behavior of a concrete node type.
///
/// The only required item is the handler table. Every hook has a no-op default
/// and is an extension point for one of the peripheral channels.
///
/// # Example
///
/// ```rust,ignore
/// struct Pinger;
///
/// impl NodeService for Pinger {
///     fn handlers() -> HandlerTable<Self> {
///         HandlerTable::new().sync_body("ping", |_: &Self, _: String| Ok::<_, anyhow::Error>("pong"))
///     }
/// }
/// ```
#[async_trait]
pub trait NodeService: Send + Sync + Sized + 'static {
    /// Request handlers of this node type, built once per node.
    fn handlers() -> HandlerTable<Self>;

    /// Hands the service its node's client, before any handler runs.
    fn attach(&self, _client: NodeClient) {}

    /// Raw message published on the service-wide channel `namespace:serviceId`.
    async fn on_service_message(&self, _message: Value) {}

    /// Request published on the broadcast channel `namespace:serviceId:broadcast`.
    async fn on_broadcast(&self, _request: Request<Value>) {}

    /// Presence announcement (`CHECKIN`/`CHECKOUT`) or other lobby traffic.
    async fn on_lobby_message(&self, _request: Request<Value>) {}

    /// Progress report for an outstanding request that has no handler of its own.
    async fn on_status_update(&self, _update: StatusUpdate) {}
}
