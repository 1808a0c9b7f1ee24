//! Operator-facing routes (§4.3 ambient observability) — event bus
//! metrics and DTO schema introspection, nested under `/internal` so
//! they sit behind the same gateway trust boundary as everything else
//! rather than needing a separate auth story.

use axum::{extract::State, routing::get, Json, Router};
use raahi_model::{Driver, Ride};

use crate::common::schema;
use crate::WebState;

pub fn routes() -> Router<WebState> {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/schema/ride", get(schema::<Ride>))
        .route("/schema/driver", get(schema::<Driver>))
}

async fn metrics(State(state): State<WebState>) -> Json<serde_json::Value> {
    let snapshot = state.events.get_metrics();
    Json(serde_json::json!({
        "publishedByKind": snapshot.published_by_kind,
        "deliveryFailuresByTransport": snapshot.delivery_failures_by_transport,
        "zeroSubscriberPublishes": snapshot.zero_subscriber_publishes,
    }))
}
