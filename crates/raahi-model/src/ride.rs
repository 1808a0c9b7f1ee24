use chrono::{DateTime, Local};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    Pending,
    DriverAssigned,
    Confirmed,
    DriverArrived,
    RideStarted,
    RideCompleted,
    Cancelled,
}

impl RideStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RideStatus::RideCompleted | RideStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Passenger,
    Driver,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FareBreakdown {
    pub base: f64,
    pub distance: f64,
    pub time: f64,
    pub surge_multiplier: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Cached counterparty identity, captured at assignment time so the
/// ride record can be rendered without a driver/passenger-profile
/// round-trip.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartyIdentity {
    pub driver_name: Option<String>,
    pub driver_vehicle: Option<String>,
    pub driver_rating: Option<f64>,
    pub passenger_name: Option<String>,
}

/// Ride record owned by Fireball (§3) — one per ride id.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub ride_id: String,
    pub passenger_id: String,
    pub driver_id: Option<String>,

    pub pickup: Coordinates,
    pub pickup_address: String,
    pub drop: Coordinates,
    pub drop_address: String,
    pub pickup_h3: String,

    pub fare: FareBreakdown,
    pub distance_km: f64,
    pub duration_min: f64,

    /// Visible to the passenger only — see invariant 6 in §8.
    pub ride_otp: String,
    pub payment_method: String,
    pub vehicle_type: String,

    pub driver_lat: Option<f64>,
    pub driver_lng: Option<f64>,
    pub driver_heading: Option<f64>,
    pub driver_speed: Option<f64>,

    #[schemars(with = "String")]
    pub created_at: DateTime<Local>,
    #[schemars(with = "Option<String>")]
    pub assigned_at: Option<DateTime<Local>>,
    #[schemars(with = "Option<String>")]
    pub confirmed_at: Option<DateTime<Local>>,
    #[schemars(with = "Option<String>")]
    pub arrived_at: Option<DateTime<Local>>,
    #[schemars(with = "Option<String>")]
    pub started_at: Option<DateTime<Local>>,
    #[schemars(with = "Option<String>")]
    pub completed_at: Option<DateTime<Local>>,
    #[schemars(with = "Option<String>")]
    pub cancelled_at: Option<DateTime<Local>>,
    pub cancelled_by: Option<CancelledBy>,
    pub cancellation_reason: Option<String>,

    pub identity: CounterpartyIdentity,

    pub status: RideStatus,

    // Internal bookkeeping (§3) — never rendered to a passenger/driver DTO.
    #[serde(skip)]
    pub dirty: bool,
    #[serde(skip)]
    #[schemars(skip)]
    pub last_synced_at: Option<DateTime<Local>>,
    #[serde(skip)]
    pub version: u64,
}

impl Ride {
    /// OTP must never leave the passenger-side view (§4.5 rationale,
    /// §8 invariant 6). Call this before returning a ride to a
    /// driver-authenticated caller or publishing on a `driver:*` channel.
    pub fn without_otp(mut self) -> Self {
        self.ride_otp = String::new();
        self
    }
}

/// Input to `Dispatcher::create_ride` — everything the external pricing
/// collaborator and the HTTP layer have already gathered.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RideCreateRequest {
    pub passenger_id: String,
    pub pickup: Coordinates,
    pub pickup_address: String,
    pub drop: Coordinates,
    pub drop_address: String,
    pub vehicle_type: String,
    pub payment_method: String,
    pub fare: FareBreakdown,
    pub distance_km: f64,
    pub duration_min: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(RideStatus::RideCompleted.is_terminal());
        assert!(RideStatus::Cancelled.is_terminal());
        assert!(!RideStatus::Pending.is_terminal());
        assert!(!RideStatus::DriverArrived.is_terminal());
    }
}
