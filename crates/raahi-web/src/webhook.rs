//! Outbound notification webhook (§6) — fire-and-forget POST of the
//! full ride record to a configured URL on terminal/key transitions.
//! `Dispatcher::notify_async` already does the "never awaited by the
//! caller" part; this impl just has to not panic and to log rather
//! than propagate a failed delivery, matching how `deutsche_bahn`'s
//! collector treats a failed `reqwest` call as a logged miss, not a
//! crash.

use async_trait::async_trait;
use raahi_dispatch_core::notifier::StatusNotifier;
use raahi_model::Ride;

pub struct ReqwestStatusNotifier {
    client: reqwest::Client,
    url: String,
}

impl ReqwestStatusNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

#[async_trait]
impl StatusNotifier for ReqwestStatusNotifier {
    async fn notify(&self, ride: &Ride) {
        let body = ride.clone().without_otp();
        if let Err(why) = self.client.post(&self.url).json(&body).send().await {
            log::warn!(
                "webhook notification for ride {} failed: {why}",
                ride.ride_id
            );
        }
    }
}
