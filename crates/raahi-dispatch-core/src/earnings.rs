//! Narrow seam to the external earnings/ledger collaborator (§1, §4.8).
//! The dispatch core computes the commission split at `RideCompleted`
//! but never owns driver payout state — it just hands the breakdown to
//! whatever is injected here.

use async_trait::async_trait;
use raahi_model::Earnings;

#[async_trait]
pub trait EarningsSink: Send + Sync {
    async fn record(&self, driver_id: &str, earnings: Earnings);
}

pub struct NullEarningsSink;

#[async_trait]
impl EarningsSink for NullEarningsSink {
    async fn record(&self, _driver_id: &str, _earnings: Earnings) {}
}

#[derive(Default)]
pub struct RecordingEarningsSink {
    pub entries: tokio::sync::Mutex<Vec<(String, Earnings)>>,
}

#[async_trait]
impl EarningsSink for RecordingEarningsSink {
    async fn record(&self, driver_id: &str, earnings: Earnings) {
        self.entries
            .lock()
            .await
            .push((driver_id.to_owned(), earnings));
    }
}
