use std::collections::HashSet;

use chrono::{DateTime, Local};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingStatus {
    Pending,
    InReview,
    Completed,
    Rejected,
}

/// Driver presence record owned by RAMEN (§3) — one per driver id.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    pub driver_id: String,
    pub user_id: String,

    // Identity fields, mutable only via full-sync (registerDriver).
    pub name: String,
    pub phone: String,
    pub vehicle_number: String,
    pub vehicle_model: String,
    pub vehicle_type: String,
    pub rating: Option<f64>,

    pub is_online: bool,
    pub is_active: bool,
    pub is_verified: bool,
    pub onboarding_status: OnboardingStatus,

    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub h3_index: Option<String>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,

    #[schemars(with = "String")]
    pub last_active_at: DateTime<Local>,
    pub connected_transports: HashSet<String>,
}

impl Driver {
    /// Invariant from §3: a driver is dispatchable iff online, active,
    /// verified, and fully onboarded.
    pub fn is_dispatchable(&self) -> bool {
        self.is_online
            && self.is_active
            && self.is_verified
            && self.onboarding_status == OnboardingStatus::Completed
    }

    pub fn has_location(&self) -> bool {
        self.lat.is_some() && self.lng.is_some()
    }
}

/// Driver record the way it comes off the wire (registration / full
/// sync); never includes derived fields like `h3Index`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriverRegistration {
    pub driver_id: String,
    pub user_id: String,
    pub name: String,
    pub phone: String,
    pub vehicle_number: String,
    pub vehicle_model: String,
    pub vehicle_type: String,
    pub rating: Option<f64>,
    pub is_active: bool,
    pub is_verified: bool,
    pub onboarding_status: OnboardingStatus,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_driver() -> Driver {
        Driver {
            driver_id: "d1".into(),
            user_id: "u1".into(),
            name: "A".into(),
            phone: "0".into(),
            vehicle_number: "DL1".into(),
            vehicle_model: "Swift".into(),
            vehicle_type: "SEDAN".into(),
            rating: Some(4.8),
            is_online: true,
            is_active: true,
            is_verified: true,
            onboarding_status: OnboardingStatus::Completed,
            lat: Some(28.0),
            lng: Some(77.0),
            h3_index: Some("abc".into()),
            heading: None,
            speed: None,
            last_active_at: Local::now(),
            connected_transports: HashSet::new(),
        }
    }

    #[test]
    fn dispatchable_requires_all_four_flags() {
        let mut d = base_driver();
        assert!(d.is_dispatchable());

        d.is_online = false;
        assert!(!d.is_dispatchable());
        d.is_online = true;

        d.onboarding_status = OnboardingStatus::Pending;
        assert!(!d.is_dispatchable());
    }
}
