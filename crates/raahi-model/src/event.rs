use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ride::{CancelledBy, FareBreakdown, RideStatus};

/// Events routed by the `EventBus` (§4.3). Tagged on `type` so every
/// transport can forward the JSON payload verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DispatchEvent {
    RideStatusUpdate {
        ride_id: String,
        status: RideStatus,
        triggered_by: Option<String>,
    },
    DriverLocation {
        ride_id: Option<String>,
        driver_id: String,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    },
    NewRideRequest {
        ride_id: String,
        pickup_lat: f64,
        pickup_lng: f64,
        vehicle_type: String,
    },
    DriverAssigned {
        ride_id: String,
        driver_id: String,
    },
    RideCancelled {
        ride_id: String,
        cancelled_by: CancelledBy,
        reason: Option<String>,
    },
    RideChatMessage {
        ride_id: String,
        sender_id: String,
        message: String,
    },
    DriverRegistration {
        driver_id: String,
        is_online: bool,
    },
    /// Emitted on `available-drivers` the instant a ride is taken, so
    /// every other candidate driver stops showing it (§4.5, §8 S3).
    RideTaken {
        ride_id: String,
        assigned_to: String,
    },
    RideCompleted {
        ride_id: String,
        fare_total: f64,
        commission: f64,
        net_amount: f64,
    },
}

impl DispatchEvent {
    /// A short label for metrics/logging — avoids re-serializing the
    /// whole event just to count it by kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchEvent::RideStatusUpdate { .. } => "ride_status_update",
            DispatchEvent::DriverLocation { .. } => "driver_location",
            DispatchEvent::NewRideRequest { .. } => "new_ride_request",
            DispatchEvent::DriverAssigned { .. } => "driver_assigned",
            DispatchEvent::RideCancelled { .. } => "ride_cancelled",
            DispatchEvent::RideChatMessage { .. } => "ride_chat_message",
            DispatchEvent::DriverRegistration { .. } => "driver_registration",
            DispatchEvent::RideTaken { .. } => "ride_taken",
            DispatchEvent::RideCompleted { .. } => "ride_completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Earnings {
    pub fare: FareBreakdown,
    pub commission: f64,
    pub net_amount: f64,
}
