//! Broker transport (§4.7) — a minimal pub/sub broker over raw TCP and
//! WebSocket, topic-hierarchy `raahi/...`. Unlike the SSE/socket
//! transports (HTTP-framed, owned by `raahi-web`'s axum router), the
//! broker speaks its own line-delimited JSON protocol directly over
//! `tokio`/`tokio-tungstenite` sockets, the way `groblegark-coop`'s
//! `transport::ws` module owns its socket loop end to end rather than
//! handing it to a web framework.
//!
//! Delivery is at-most-once by default (a slow/disconnected subscriber
//! just misses events, per §5's no-blocking rule); `retained` topics
//! keep the last event and replay it to new subscribers immediately —
//! this is how `driver-locations` gives a freshly-connected client
//! something to show before the next real update arrives, which is
//! the broker's one at-least-once guarantee (delivery of the *latest*
//! state, not of every intermediate one).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use raahi_eventbus::RealtimeTransport;
use raahi_model::DispatchEvent;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::subscription::SubscriberRegistry;

pub fn topic(parts: &[&str]) -> String {
    format!("raahi/{}", parts.join("/"))
}

pub struct BrokerTransport {
    registry: Arc<SubscriberRegistry>,
    retained: RwLock<HashMap<String, DispatchEvent>>,
}

impl BrokerTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: SubscriberRegistry::new(),
            retained: RwLock::new(HashMap::new()),
        })
    }

    /// Accepts TCP connections forever. Each connection speaks one
    /// command per line: `SUBSCRIBE <topic>`; every subsequent line
    /// sent back is one JSON-encoded `DispatchEvent`.
    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    log::info!("broker tcp subscriber connected: {addr}");
                    let broker = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(why) = broker.handle_tcp_connection(socket).await {
                            log::warn!("broker tcp connection {addr} ended: {why}");
                        }
                    });
                }
                Err(why) => log::error!("broker tcp accept failed: {why}"),
            }
        }
    }

    async fn handle_tcp_connection(&self, socket: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let Some(first) = lines.next_line().await? else {
            return Ok(());
        };
        let Some(channel) = first.strip_prefix("SUBSCRIBE ").map(str::trim) else {
            write_half.write_all(b"ERR expected SUBSCRIBE <topic>\n").await?;
            return Ok(());
        };

        let (id, mut rx) = self.registry.subscribe(channel).await;
        if let Some(retained) = self.retained.read().await.get(channel).cloned() {
            let _ = send_line(&mut write_half, &retained).await;
        }

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if send_line(&mut write_half, &event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(_)) => {} // no further client->broker commands today
                        _ => break,
                    }
                }
            }
        }

        self.registry.unsubscribe(channel, id).await;
        Ok(())
    }

    /// Accepts WebSocket connections forever, speaking the same
    /// `SUBSCRIBE <topic>` first-message protocol as the TCP side.
    pub async fn serve_ws(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    log::info!("broker ws subscriber connected: {addr}");
                    let broker = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(why) = broker.handle_ws_connection(socket).await {
                            log::warn!("broker ws connection {addr} ended: {why}");
                        }
                    });
                }
                Err(why) => log::error!("broker ws accept failed: {why}"),
            }
        }
    }

    async fn handle_ws_connection(
        &self,
        socket: TcpStream,
    ) -> Result<(), tokio_tungstenite::tungstenite::Error> {
        use futures::{SinkExt, StreamExt};

        let ws = tokio_tungstenite::accept_async(socket).await?;
        let (mut sink, mut stream) = ws.split();

        let Some(Ok(Message::Text(first))) = stream.next().await else {
            return Ok(());
        };
        let Some(channel) = first.strip_prefix("SUBSCRIBE ").map(|s| s.trim().to_owned()) else {
            return Ok(());
        };

        let (id, mut rx) = self.registry.subscribe(&channel).await;
        if let Some(retained) = self.retained.read().await.get(&channel).cloned() {
            if let Ok(json) = serde_json::to_string(&retained) {
                let _ = sink.send(Message::Text(json)).await;
            }
        }

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            let Ok(json) = serde_json::to_string(&event) else { continue };
                            if sink.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        self.registry.unsubscribe(&channel, id).await;
        Ok(())
    }
}

async fn send_line(
    writer: &mut (impl AsyncWriteExt + Unpin),
    event: &DispatchEvent,
) -> std::io::Result<()> {
    let mut json = serde_json::to_string(event).unwrap_or_default();
    json.push('\n');
    writer.write_all(json.as_bytes()).await
}

#[async_trait]
impl RealtimeTransport for BrokerTransport {
    fn name(&self) -> &str {
        "broker"
    }

    async fn deliver(&self, channel: &str, event: &DispatchEvent) {
        if channel == raahi_eventbus::channels::DRIVER_LOCATIONS || channel.starts_with("h3:") {
            self.retained.write().await.insert(channel.to_owned(), event.clone());
        }
        self.registry.deliver(channel, event).await;
    }

    fn channel_size(&self, channel: &str) -> usize {
        futures::executor::block_on(self.registry.channel_size(channel))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_hierarchy_uses_the_raahi_prefix() {
        assert_eq!(topic(&["ride", "r1"]), "raahi/ride/r1");
    }

    #[tokio::test]
    async fn retained_event_is_kept_for_driver_locations() {
        let broker = BrokerTransport::new();
        broker
            .deliver(
                raahi_eventbus::channels::DRIVER_LOCATIONS,
                &DispatchEvent::DriverLocation {
                    ride_id: None,
                    driver_id: "d1".into(),
                    lat: 1.0,
                    lng: 2.0,
                    heading: None,
                    speed: None,
                },
            )
            .await;
        assert!(broker
            .retained
            .read()
            .await
            .contains_key(raahi_eventbus::channels::DRIVER_LOCATIONS));
    }
}
