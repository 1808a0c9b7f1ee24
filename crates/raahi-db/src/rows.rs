//! Row structs separate from the domain types (§3 ambient addition),
//! the way `database::data_model` keeps `StopRow` etc. distinct from
//! `model::Stop`. Enum columns round-trip through their `serde`
//! representation rather than a hand-written match per variant.

use std::collections::HashSet;

use chrono::{DateTime, Local};
use raahi_model::{
    CancelledBy, Coordinates, CounterpartyIdentity, Driver, FareBreakdown, OnboardingStatus, Ride,
    RideStatus,
};
use sqlx::FromRow;

fn to_text<T: serde::Serialize>(value: &T) -> String {
    match serde_json::to_value(value).expect("enum serialization is infallible") {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

fn from_text<T: for<'de> serde::Deserialize<'de>>(text: &str) -> T {
    serde_json::from_value(serde_json::Value::String(text.to_owned()))
        .expect("column holds a value this enum previously serialized")
}

#[derive(Debug, FromRow)]
pub struct DriverRow {
    pub driver_id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub vehicle_number: String,
    pub vehicle_model: String,
    pub vehicle_type: String,
    pub rating: Option<f64>,
    pub is_online: bool,
    pub is_active: bool,
    pub is_verified: bool,
    pub onboarding_status: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub h3_index: Option<String>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub last_active_at: DateTime<Local>,
}

impl From<DriverRow> for Driver {
    fn from(row: DriverRow) -> Self {
        Driver {
            driver_id: row.driver_id,
            user_id: row.user_id,
            name: row.name,
            phone: row.phone,
            vehicle_number: row.vehicle_number,
            vehicle_model: row.vehicle_model,
            vehicle_type: row.vehicle_type,
            rating: row.rating,
            is_online: row.is_online,
            is_active: row.is_active,
            is_verified: row.is_verified,
            onboarding_status: from_text::<OnboardingStatus>(&row.onboarding_status),
            lat: row.lat,
            lng: row.lng,
            h3_index: row.h3_index,
            heading: row.heading,
            speed: row.speed,
            last_active_at: row.last_active_at,
            // Transport connections are runtime-only (§3) — never persisted.
            connected_transports: HashSet::new(),
        }
    }
}

pub struct DriverParams<'a> {
    pub driver: &'a Driver,
    pub onboarding_status: String,
}

impl<'a> DriverParams<'a> {
    pub fn new(driver: &'a Driver) -> Self {
        Self {
            onboarding_status: to_text(&driver.onboarding_status),
            driver,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct RideRow {
    pub ride_id: String,
    pub passenger_id: String,
    pub driver_id: Option<String>,
    pub pickup_lat: f64,
    pub pickup_lng: f64,
    pub pickup_address: String,
    pub drop_lat: f64,
    pub drop_lng: f64,
    pub drop_address: String,
    pub pickup_h3: String,
    pub fare_base: f64,
    pub fare_distance: f64,
    pub fare_time: f64,
    pub fare_surge_multiplier: f64,
    pub fare_total: f64,
    pub distance_km: f64,
    pub duration_min: f64,
    pub ride_otp: String,
    pub payment_method: String,
    pub vehicle_type: String,
    pub driver_lat: Option<f64>,
    pub driver_lng: Option<f64>,
    pub driver_heading: Option<f64>,
    pub driver_speed: Option<f64>,
    pub status: String,
    pub created_at: DateTime<Local>,
    pub assigned_at: Option<DateTime<Local>>,
    pub confirmed_at: Option<DateTime<Local>>,
    pub arrived_at: Option<DateTime<Local>>,
    pub started_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    pub cancelled_at: Option<DateTime<Local>>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub identity: serde_json::Value,
}

impl From<RideRow> for Ride {
    fn from(row: RideRow) -> Self {
        Ride {
            ride_id: row.ride_id,
            passenger_id: row.passenger_id,
            driver_id: row.driver_id,
            pickup: Coordinates {
                lat: row.pickup_lat,
                lng: row.pickup_lng,
            },
            pickup_address: row.pickup_address,
            drop: Coordinates {
                lat: row.drop_lat,
                lng: row.drop_lng,
            },
            drop_address: row.drop_address,
            pickup_h3: row.pickup_h3,
            fare: FareBreakdown {
                base: row.fare_base,
                distance: row.fare_distance,
                time: row.fare_time,
                surge_multiplier: row.fare_surge_multiplier,
                total: row.fare_total,
            },
            distance_km: row.distance_km,
            duration_min: row.duration_min,
            ride_otp: row.ride_otp,
            payment_method: row.payment_method,
            vehicle_type: row.vehicle_type,
            driver_lat: row.driver_lat,
            driver_lng: row.driver_lng,
            driver_heading: row.driver_heading,
            driver_speed: row.driver_speed,
            created_at: row.created_at,
            assigned_at: row.assigned_at,
            confirmed_at: row.confirmed_at,
            arrived_at: row.arrived_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            cancelled_at: row.cancelled_at,
            cancelled_by: row.cancelled_by.map(|s| from_text::<CancelledBy>(&s)),
            cancellation_reason: row.cancellation_reason,
            identity: serde_json::from_value(row.identity).unwrap_or_else(|_| CounterpartyIdentity::default()),
            status: from_text::<RideStatus>(&row.status),
            dirty: false,
            last_synced_at: Some(chrono::Local::now()),
            version: 0,
        }
    }
}

pub struct RideParams<'a> {
    pub ride: &'a Ride,
    pub status: String,
    pub cancelled_by: Option<String>,
    pub identity: serde_json::Value,
}

impl<'a> RideParams<'a> {
    pub fn new(ride: &'a Ride) -> Self {
        Self {
            status: to_text(&ride.status),
            cancelled_by: ride.cancelled_by.map(|c| to_text(&c)),
            identity: serde_json::to_value(&ride.identity).unwrap_or(serde_json::Value::Null),
            ride,
        }
    }
}
