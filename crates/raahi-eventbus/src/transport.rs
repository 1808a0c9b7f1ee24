use async_trait::async_trait;
use raahi_model::DispatchEvent;

/// A concrete protocol implementation delivering channel events to
/// clients (§4.7). Every transport — SSE, broker, bidirectional
/// socket — implements this the same way.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    fn name(&self) -> &str;

    /// Best-effort delivery. Must never block on a slow client — a full
    /// write buffer fails the send rather than queuing it (§5).
    async fn deliver(&self, channel: &str, event: &DispatchEvent);

    fn channel_size(&self, channel: &str) -> usize;

    fn is_healthy(&self) -> bool;
}
