//! Outbound notification seam (§6 ambient wiring) — fires on
//! terminal/key ride transitions so an external webhook subscriber can
//! hear about them without the dispatcher itself knowing what HTTP is.
//! Kept as narrow as [`crate::earnings::EarningsSink`] for the same
//! reason: this crate stays reqwest-free and testable standalone.

use async_trait::async_trait;
use raahi_model::Ride;

#[async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, ride: &Ride);
}

pub struct NullStatusNotifier;

#[async_trait]
impl StatusNotifier for NullStatusNotifier {
    async fn notify(&self, _ride: &Ride) {}
}

#[derive(Default)]
pub struct RecordingStatusNotifier {
    pub notified: tokio::sync::Mutex<Vec<Ride>>,
}

#[async_trait]
impl StatusNotifier for RecordingStatusNotifier {
    async fn notify(&self, ride: &Ride) {
        self.notified.lock().await.push(ride.clone());
    }
}
