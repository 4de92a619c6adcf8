use std::sync::Arc;

use crate::errors::NodeError;
use crate::transport::TransportMessage;

// Type aliases for common types
pub type NodeResult<T> = Result<T, NodeError>;
pub type BoxedFuture<'a, T> = futures::future::BoxFuture<'a, T>;

/// Callback invoked by a transport for every message delivered on a subscribed channel.
pub type MessageHandler = Arc<dyn Fn(TransportMessage) -> BoxedFuture<'static, ()> + Send + Sync>;

/// Milliseconds since the unix epoch, the timestamp unit used on the wire.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
