use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use raahi_model::DispatchEvent;
use tokio::sync::RwLock;

use crate::metrics::{Metrics, MetricsSnapshot};
use crate::transport::RealtimeTransport;

/// In-process typed pub/sub (§4.3). Publish is synchronous from the
/// caller's point of view: every registered transport's `deliver` is
/// awaited before `publish` returns. A panic inside one transport's
/// `deliver` is caught (the same `catch_unwind` shape the `actors`
/// crate uses for its supervised mailbox loop) so it can never prevent
/// the remaining transports from being called.
pub struct EventBus {
    transports: RwLock<Vec<Arc<dyn RealtimeTransport>>>,
    metrics: Metrics,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            transports: RwLock::new(Vec::new()),
            metrics: Metrics::default(),
        }
    }

    pub async fn register_transport(&self, transport: Arc<dyn RealtimeTransport>) {
        self.transports.write().await.push(transport);
    }

    pub async fn publish(&self, channel: &str, event: DispatchEvent) {
        self.metrics.record_publish(event.kind());

        if self.get_total_listeners(channel).await == 0 {
            self.metrics.record_zero_subscribers();
            log::warn!(
                "publish to channel '{channel}' found zero reachable subscribers (event={})",
                event.kind()
            );
        }

        let transports = self.transports.read().await;
        for transport in transports.iter() {
            let transport = Arc::clone(transport);
            let channel = channel.to_owned();
            let event = event.clone();
            let result = AssertUnwindSafe(async move {
                transport.deliver(&channel, &event).await;
                transport
            })
            .catch_unwind()
            .await;

            match result {
                Ok(transport) => {
                    if !transport.is_healthy() {
                        log::warn!("transport '{}' reports unhealthy", transport.name());
                    }
                }
                Err(why) => {
                    log::error!("transport delivery panicked: {why:?}");
                    // We don't have the transport name here (it was
                    // moved into the panicking future), so attribute
                    // the failure to the channel instead.
                    self.metrics.record_delivery_failure(channel.as_str());
                }
            }
        }
    }

    pub async fn publish_to_many(&self, channels: &[String], event: DispatchEvent) {
        for channel in channels {
            self.publish(channel, event.clone()).await;
        }
    }

    pub async fn get_total_listeners(&self, channel: &str) -> usize {
        let transports = self.transports.read().await;
        transports.iter().map(|t| t.channel_size(channel)).sum()
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        name: String,
        delivered: AtomicUsize,
        panics: bool,
    }

    #[async_trait::async_trait]
    impl RealtimeTransport for CountingTransport {
        fn name(&self) -> &str {
            &self.name
        }

        async fn deliver(&self, _channel: &str, _event: &DispatchEvent) {
            if self.panics {
                panic!("simulated transport failure");
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }

        fn channel_size(&self, _channel: &str) -> usize {
            1
        }

        fn is_healthy(&self) -> bool {
            true
        }
    }

    fn event() -> DispatchEvent {
        DispatchEvent::DriverRegistration {
            driver_id: "d1".into(),
            is_online: true,
        }
    }

    #[tokio::test]
    async fn publish_invokes_every_transport() {
        let bus = EventBus::new();
        let a = Arc::new(CountingTransport {
            name: "a".into(),
            delivered: AtomicUsize::new(0),
            panics: false,
        });
        let b = Arc::new(CountingTransport {
            name: "b".into(),
            delivered: AtomicUsize::new(0),
            panics: false,
        });
        bus.register_transport(a.clone()).await;
        bus.register_transport(b.clone()).await;

        bus.publish("driver:d1", event()).await;

        assert_eq!(a.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(b.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn one_transport_panicking_does_not_block_the_others() {
        let bus = EventBus::new();
        let failing = Arc::new(CountingTransport {
            name: "failing".into(),
            delivered: AtomicUsize::new(0),
            panics: true,
        });
        let healthy = Arc::new(CountingTransport {
            name: "healthy".into(),
            delivered: AtomicUsize::new(0),
            panics: false,
        });
        bus.register_transport(failing).await;
        bus.register_transport(healthy.clone()).await;

        bus.publish("ride:r1", event()).await;

        assert_eq!(healthy.delivered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn metrics_count_publishes_by_kind() {
        let bus = EventBus::new();
        bus.publish("driver:d1", event()).await;
        bus.publish("driver:d2", event()).await;

        let snapshot = bus.get_metrics();
        assert_eq!(
            snapshot.published_by_kind.get("driver_registration"),
            Some(&2)
        );
    }
}
