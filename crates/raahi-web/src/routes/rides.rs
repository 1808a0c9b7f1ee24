//! `/rides` routes (§6). Grounded on `crates/web/src/api/v1/stops.rs`'s
//! handler shape (`State`/`Path`/`Query` extraction, `RouteResult`
//! return type, `.map_err(RouteErrorResponse::from)`), generalized from
//! read-only stop lookups to the ride state machine's full surface.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use raahi_model::{CancelledBy, Ride, RideCreateRequest, RideStatus};
use serde::Deserialize;

use crate::auth::{CallerContext, CallerType};
use crate::common::{schema, RouteErrorResponse, RouteResult};
use crate::WebState;

pub fn routes() -> Router<WebState> {
    Router::new()
        .route("/rides/schema", get(schema::<Ride>))
        .route("/rides", post(create_ride))
        .route("/rides/available", get(list_available))
        .route("/rides/:id", get(get_ride))
        .route("/rides/:id/accept", post(accept_ride))
        .route("/rides/:id/start", post(start_ride))
        .route("/rides/:id/status", put(update_status))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/track", post(track_location))
}

/// Strips the OTP (§8 invariant 6) unless the caller is the ride's own
/// passenger — a driver-authenticated `GET`, or any call with no
/// resolved caller context, never sees it.
fn render(ride: Ride, caller: Option<&CallerContext>) -> Ride {
    match caller {
        Some(CallerContext {
            caller_type: CallerType::Passenger,
            caller_id,
        }) if *caller_id == ride.passenger_id => ride,
        _ => ride.without_otp(),
    }
}

async fn create_ride(
    State(state): State<WebState>,
    Json(req): Json<RideCreateRequest>,
) -> RouteResult<Json<Ride>> {
    let ride = state.dispatcher.create_ride(req).await?;
    Ok(Json(ride))
}

async fn get_ride(
    State(state): State<WebState>,
    Path(ride_id): Path<String>,
    caller: Option<Extension<Arc<CallerContext>>>,
) -> RouteResult<Json<Ride>> {
    let ride = state.dispatcher.rides().get_ride(&ride_id).await?;
    Ok(Json(render(ride, caller.map(|Extension(c)| c).as_deref())))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearbyQuery {
    lat: f64,
    lng: f64,
    radius: Option<f64>,
}

/// Driver poll fallback (§6) — lists pending rides whose pickup falls
/// within `radius` km, for drivers not (or no longer) connected to a
/// push transport.
async fn list_available(
    State(state): State<WebState>,
    Query(params): Query<NearbyQuery>,
) -> RouteResult<Json<Vec<Ride>>> {
    let radius = params.radius.unwrap_or(5.0);
    let geo = raahi_geo::GeoIndex::new(h3o::Resolution::Nine);

    let pending = state.dispatcher.rides().get_pending_rides().await;
    let nearby = pending
        .into_iter()
        .filter(|ride| {
            geo.haversine_km(params.lat, params.lng, ride.pickup.lat, ride.pickup.lng) <= radius
        })
        .map(|ride| ride.without_otp())
        .collect();

    Ok(Json(nearby))
}

async fn accept_ride(
    State(state): State<WebState>,
    Path(ride_id): Path<String>,
    Extension(caller): Extension<Arc<CallerContext>>,
) -> RouteResult<Json<Ride>> {
    if caller.caller_type != CallerType::Driver {
        return Err(RouteErrorResponse::forbidden(
            "NOT_PARTICIPANT",
            "only a driver can accept a ride",
        ));
    }
    let ride = state
        .dispatcher
        .accept_ride(&ride_id, &caller.caller_id)
        .await?;
    Ok(Json(ride))
}

#[derive(Debug, Deserialize)]
struct StartRideBody {
    otp: String,
}

async fn start_ride(
    State(state): State<WebState>,
    Path(ride_id): Path<String>,
    Json(body): Json<StartRideBody>,
) -> RouteResult<Json<Ride>> {
    let ride = state.dispatcher.start_ride(&ride_id, &body.otp).await?;
    Ok(Json(ride.without_otp()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusBody {
    status: RideStatus,
    reason: Option<String>,
    otp: Option<String>,
}

/// Generic status-transition endpoint (§6). `RideStarted` and
/// `Cancelled` are special-cased onto the same OTP-gated / cancel-by
/// logic the dedicated `/start` and `/cancel` routes use, so there is
/// exactly one code path per transition regardless of which endpoint a
/// caller used to reach it.
async fn update_status(
    State(state): State<WebState>,
    Path(ride_id): Path<String>,
    caller: Option<Extension<Arc<CallerContext>>>,
    Json(body): Json<UpdateStatusBody>,
) -> RouteResult<Json<Ride>> {
    let ride = match body.status {
        RideStatus::RideStarted => {
            let otp = body
                .otp
                .ok_or_else(|| RouteErrorResponse::new(axum::http::StatusCode::BAD_REQUEST, "VALIDATION_ERROR").with_message("otp is required to start a ride"))?;
            state.dispatcher.start_ride(&ride_id, &otp).await?
        }
        RideStatus::Cancelled => {
            let cancelled_by = match caller.as_ref().map(|Extension(c)| c.caller_type) {
                Some(CallerType::Driver) => CancelledBy::Driver,
                _ => CancelledBy::Passenger,
            };
            state
                .dispatcher
                .cancel_ride(&ride_id, cancelled_by, body.reason)
                .await?
        }
        RideStatus::RideCompleted => state.dispatcher.complete_ride(&ride_id).await?,
        other => {
            let triggered_by = caller.map(|Extension(c)| c.caller_id.clone());
            state
                .dispatcher
                .advance_status(&ride_id, other, triggered_by)
                .await?
        }
    };
    Ok(Json(render(ride, None)))
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    reason: Option<String>,
}

async fn cancel_ride(
    State(state): State<WebState>,
    Path(ride_id): Path<String>,
    Extension(caller): Extension<Arc<CallerContext>>,
    Json(body): Json<CancelBody>,
) -> RouteResult<Json<Ride>> {
    let cancelled_by = match caller.caller_type {
        CallerType::Driver => CancelledBy::Driver,
        CallerType::Passenger => CancelledBy::Passenger,
    };
    let ride = state
        .dispatcher
        .cancel_ride(&ride_id, cancelled_by, body.reason)
        .await?;
    Ok(Json(ride.without_otp()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackBody {
    lat: f64,
    lng: f64,
    heading: Option<f64>,
    speed: Option<f64>,
}

async fn track_location(
    State(state): State<WebState>,
    Extension(caller): Extension<Arc<CallerContext>>,
    Json(body): Json<TrackBody>,
) -> RouteResult<Json<serde_json::Value>> {
    state
        .dispatcher
        .update_driver_location(&caller.caller_id, body.lat, body.lng, body.heading, body.speed)
        .await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}
