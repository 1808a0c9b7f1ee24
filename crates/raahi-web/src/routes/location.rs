//! `POST /location/binary` (§6) — raw byte-body ingestion for the
//! codec's standard/extended layouts. Content negotiation here is by
//! exact byte length rather than `Accept`, since the body itself
//! carries no format marker; `raahi_codec::WireFormat` still drives
//! what we hand back.

use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use raahi_codec::{CodecError, LocationSample, EXTENDED_LEN, STANDARD_LEN};

use crate::auth::CallerContext;
use crate::common::{RouteErrorResponse, RouteResult};
use crate::WebState;
use axum::extract::Extension;
use std::sync::Arc;

pub fn routes() -> Router<WebState> {
    Router::new().route("/location/binary", post(ingest_binary))
}

impl From<CodecError> for RouteErrorResponse {
    fn from(err: CodecError) -> Self {
        RouteErrorResponse::new(axum::http::StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            .with_message(err.to_string())
    }
}

/// Driver identity never comes from the wire payload — the extended
/// layout only carries a one-way hash of it (§4.2) — so this endpoint
/// is only reachable behind the same auth middleware every other route
/// uses, and trusts the resolved `CallerContext` instead.
async fn ingest_binary(
    State(state): State<WebState>,
    Extension(caller): Extension<Arc<CallerContext>>,
    body: Bytes,
) -> RouteResult<Json<serde_json::Value>> {
    let sample = match body.len() {
        STANDARD_LEN => LocationSample::decode_standard(&body)?,
        EXTENDED_LEN => LocationSample::decode_extended(&body)?,
        other => {
            return Err(RouteErrorResponse::new(
                axum::http::StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
            )
            .with_message(format!(
                "expected {STANDARD_LEN} or {EXTENDED_LEN} bytes, got {other}"
            )))
        }
    };

    state
        .dispatcher
        .update_driver_location(
            &caller.caller_id,
            sample.lat,
            sample.lng,
            sample.heading,
            sample.speed,
        )
        .await?;

    Ok(Json(serde_json::json!({ "ok": true })))
}
