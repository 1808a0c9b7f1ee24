//! Bidirectional socket transport (§4.7) — room-based, axum-hosted
//! WebSocket. Unlike the broker, this one is meant to sit on the same
//! HTTP server as the REST routes (grounded on `groblegark-coop`'s
//! `transport::ws` connection loop shape, adapted from its own
//! listener to axum's `extract::ws`). `resolveDriverId` happens once,
//! right here at connection registration, and never again — the rest
//! of the core only ever sees the resolved `driverId` (§4.4 edge note).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use raahi_eventbus::RealtimeTransport;
use raahi_model::DispatchEvent;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::subscription::SubscriberRegistry;

#[async_trait]
pub trait DriverIdResolver: Send + Sync {
    async fn resolve(&self, candidate: &str) -> Option<String>;
}

#[async_trait]
pub trait LocationSink: Send + Sync {
    async fn update_location(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    );
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum ClientEvent {
    Join { room: String },
    Leave { room: String },
    DriverRegister { id: String },
    LocationUpdate {
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    },
    Heartbeat,
}

pub struct SocketTransport {
    registry: Arc<SubscriberRegistry>,
}

impl SocketTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: SubscriberRegistry::new(),
        })
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self {
            registry: SubscriberRegistry::new(),
        }
    }
}

#[async_trait]
impl RealtimeTransport for SocketTransport {
    fn name(&self) -> &str {
        "socket"
    }

    async fn deliver(&self, channel: &str, event: &DispatchEvent) {
        self.registry.deliver(channel, event).await;
    }

    fn channel_size(&self, channel: &str) -> usize {
        futures::executor::block_on(self.registry.channel_size(channel))
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Drives one client's connection to completion. Spawned by the axum
/// route handler after the upgrade in `raahi-web`.
pub async fn handle_socket(
    socket: WebSocket,
    transport: Arc<SocketTransport>,
    driver_resolver: Arc<dyn DriverIdResolver>,
    location_sink: Arc<dyn LocationSink>,
) {
    let (mut sender, mut receiver) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<DispatchEvent>(128);
    let mut joined: HashMap<String, (crate::subscription::SubscriberId, tokio::task::JoinHandle<()>)> =
        HashMap::new();
    let mut driver_id: Option<String> = None;

    loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                let Some(event) = outgoing else { break };
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if sender.send(WsMessage::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(ClientEvent::Join { room }) => {
                                let (id, mut rx) = transport.registry.subscribe(&room).await;
                                let forward = out_tx.clone();
                                let handle = tokio::spawn(async move {
                                    while let Some(event) = rx.recv().await {
                                        if forward.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                });
                                joined.insert(room, (id, handle));
                            }
                            Ok(ClientEvent::Leave { room }) => {
                                if let Some((id, handle)) = joined.remove(&room) {
                                    transport.registry.unsubscribe(&room, id).await;
                                    handle.abort();
                                }
                            }
                            Ok(ClientEvent::DriverRegister { id }) => {
                                driver_id = driver_resolver.resolve(&id).await;
                                if driver_id.is_none() {
                                    log::warn!("socket client sent unresolvable driver id '{id}'");
                                }
                            }
                            Ok(ClientEvent::LocationUpdate { lat, lng, heading, speed }) => {
                                if let Some(id) = &driver_id {
                                    location_sink.update_location(id, lat, lng, heading, speed).await;
                                } else {
                                    log::warn!("location update received before driverRegister");
                                }
                            }
                            Ok(ClientEvent::Heartbeat) => {}
                            Err(why) => log::warn!("malformed socket client event: {why}"),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    for (room, (id, handle)) in joined {
        transport.registry.unsubscribe(&room, id).await;
        handle.abort();
    }
}
