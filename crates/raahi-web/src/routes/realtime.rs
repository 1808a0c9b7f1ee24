//! SSE routes (§6) — ride-channel and driver-channel push, plus the h3
//! subscription-churn endpoint. Grounded on `crates/web/src/api/v1/realtime.rs`'s
//! `Sse::new(stream).keep_alive(...)` shape, generalized from a
//! throttled-poll stream to a push stream over the transport's own
//! `mpsc::Receiver`.

use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, patch},
    Json, Router,
};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::{wrappers::ReceiverStream, StreamExt as _};

use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;
use raahi_eventbus::channels;

pub fn routes() -> Router<WebState> {
    Router::new()
        .route("/sse/ride/:id", get(ride_stream))
        .route("/sse/driver/:id", get(driver_stream))
        .route("/sse/driver/:id/location", patch(move_subscription))
}

async fn ride_stream(
    State(state): State<WebState>,
    Path(ride_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let channel = channels::ride_channel(&ride_id);
    let (_subscriber, rx) = state.sse.subscribe(&channel).await;

    let stream = ReceiverStream::new(rx).map(|event| {
        Ok(Event::default()
            .json_data(event)
            .unwrap_or_else(|_| Event::default().data("encoding error")))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriverStreamQuery {
    lat: f64,
    lng: f64,
}

/// Subscribes to both the driver's own channel and the h3 cell its
/// reported position falls in, so a rider's app sees both "my driver"
/// events and the ambient `DRIVER_LOCATIONS` broadcast for that cell.
async fn driver_stream(
    State(state): State<WebState>,
    Path(driver_id): Path<String>,
    Query(params): Query<DriverStreamQuery>,
) -> RouteResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let cell = state
        .dispatcher
        .drivers()
        .geo()
        .encode(params.lat, params.lng)
        .map_err(|err| RouteErrorResponse::new(
            axum::http::StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
        )
        .with_message(err.to_string()))?;

    let (_driver_sub, driver_rx) = state.sse.subscribe(&channels::driver_channel(&driver_id)).await;
    let (_cell_sub, cell_rx) = state.sse.subscribe(&channels::h3_channel(&cell)).await;

    let stream = ReceiverStream::new(driver_rx)
        .merge(ReceiverStream::new(cell_rx))
        .map(|event| {
            Ok(Event::default()
                .json_data(event)
                .unwrap_or_else(|_| Event::default().data("encoding error")))
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveSubscriptionBody {
    old_cell: String,
    new_cell: String,
    subscriber: u64,
}

/// Re-points a live h3 subscription after a driver moves into a new
/// cell, so the rider's stream keeps following `DRIVER_LOCATIONS`
/// without tearing down and re-issuing the whole SSE connection.
async fn move_subscription(
    State(state): State<WebState>,
    Json(body): Json<MoveSubscriptionBody>,
) -> RouteResult<Json<serde_json::Value>> {
    state
        .sse
        .follow_cell(
            &channels::h3_channel(&body.old_cell),
            &channels::h3_channel(&body.new_cell),
            body.subscriber,
        )
        .await;
    Ok(Json(serde_json::json!({ "ok": true })))
}
