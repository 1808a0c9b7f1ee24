//! Bidirectional socket route — upgrades to the room-based transport in
//! `raahi-transports::socket`, bridging its narrow `DriverIdResolver`/
//! `LocationSink` seams onto the real `Dispatcher` so that crate stays
//! free of a circular dependency on this one.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use raahi_dispatch_core::Dispatcher;
use raahi_transports::{handle_socket, DriverIdResolver, LocationSink, SocketTransport};

use crate::WebState;

pub fn routes() -> Router<WebState> {
    Router::new().route("/ws/socket", get(upgrade))
}

async fn upgrade(
    State(state): State<WebState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let transport = Arc::clone(&state.socket);
    let dispatcher = Arc::clone(&state.dispatcher);
    ws.on_upgrade(move |socket| {
        handle_socket(
            socket,
            transport,
            Arc::new(DispatcherDriverResolver(Arc::clone(&dispatcher))),
            Arc::new(DispatcherLocationSink(dispatcher)),
        )
    })
}

struct DispatcherDriverResolver(Arc<Dispatcher>);

#[async_trait]
impl DriverIdResolver for DispatcherDriverResolver {
    async fn resolve(&self, candidate: &str) -> Option<String> {
        self.0.drivers().resolve_driver_id(candidate).await
    }
}

struct DispatcherLocationSink(Arc<Dispatcher>);

#[async_trait]
impl LocationSink for DispatcherLocationSink {
    async fn update_location(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) {
        if let Err(why) = self
            .0
            .update_driver_location(driver_id, lat, lng, heading, speed)
            .await
        {
            log::warn!("socket location update for driver {driver_id} rejected: {why}");
        }
    }
}
