//! Shared subscriber bookkeeping used by every transport in §4.7. Each
//! connected client gets a bounded `mpsc` channel; delivery is
//! best-effort `try_send` so a client with a full buffer never stalls
//! the publisher (§5) — the event is dropped for that one subscriber
//! instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use raahi_model::DispatchEvent;
use tokio::sync::{mpsc, RwLock};

pub type SubscriberId = u64;

const DEFAULT_BUFFER: usize = 64;

#[derive(Default)]
pub struct SubscriberRegistry {
    channels: RwLock<HashMap<String, HashMap<SubscriberId, mpsc::Sender<DispatchEvent>>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn subscribe(&self, channel: &str) -> (SubscriberId, mpsc::Receiver<DispatchEvent>) {
        self.subscribe_with_buffer(channel, DEFAULT_BUFFER).await
    }

    pub async fn subscribe_with_buffer(
        &self,
        channel: &str,
        buffer: usize,
    ) -> (SubscriberId, mpsc::Receiver<DispatchEvent>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(buffer);
        self.channels
            .write()
            .await
            .entry(channel.to_owned())
            .or_default()
            .insert(id, tx);
        (id, rx)
    }

    pub async fn unsubscribe(&self, channel: &str, id: SubscriberId) {
        let mut channels = self.channels.write().await;
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Moves a subscriber from one channel to another without dropping
    /// its connection — used when a driver's h3 cell changes and a
    /// client following `h3:<cell>` needs to follow the move (§4.7).
    pub async fn move_channel(
        &self,
        old_channel: &str,
        new_channel: &str,
        id: SubscriberId,
    ) {
        let sender = {
            let mut channels = self.channels.write().await;
            let sender = channels
                .get_mut(old_channel)
                .and_then(|subs| subs.remove(&id));
            if let Some(subs) = channels.get(old_channel) {
                if subs.is_empty() {
                    channels.remove(old_channel);
                }
            }
            sender
        };
        if let Some(sender) = sender {
            self.channels
                .write()
                .await
                .entry(new_channel.to_owned())
                .or_default()
                .insert(id, sender);
        }
    }

    pub async fn deliver(&self, channel: &str, event: &DispatchEvent) {
        let channels = self.channels.read().await;
        let Some(subscribers) = channels.get(channel) else {
            return;
        };
        for sender in subscribers.values() {
            if sender.try_send(event.clone()).is_err() {
                log::debug!("subscriber buffer full or closed on channel '{channel}', dropping");
            }
        }
    }

    pub async fn channel_size(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub async fn total_subscribers(&self) -> usize {
        self.channels.read().await.values().map(|s| s.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> DispatchEvent {
        DispatchEvent::DriverRegistration {
            driver_id: "d1".into(),
            is_online: true,
        }
    }

    #[tokio::test]
    async fn delivers_to_subscribers_of_the_exact_channel() {
        let registry = SubscriberRegistry::new();
        let (_id, mut rx) = registry.subscribe("driver:d1").await;

        registry.deliver("driver:d1", &event()).await;
        registry.deliver("driver:d2", &event()).await;

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let registry = SubscriberRegistry::new();
        let (id, mut rx) = registry.subscribe("ride:r1").await;
        registry.unsubscribe("ride:r1", id).await;

        registry.deliver("ride:r1", &event()).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn move_channel_preserves_the_connection() {
        let registry = SubscriberRegistry::new();
        let (id, mut rx) = registry.subscribe("h3:cell-a").await;
        registry.move_channel("h3:cell-a", "h3:cell-b", id).await;

        registry.deliver("h3:cell-a", &event()).await;
        assert!(rx.try_recv().is_err());

        registry.deliver("h3:cell-b", &event()).await;
        assert!(rx.try_recv().is_ok());
    }
}
