use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Default, Clone)]
pub struct MetricsSnapshot {
    pub published_by_kind: HashMap<String, u64>,
    pub delivery_failures_by_transport: HashMap<String, u64>,
    pub zero_subscriber_publishes: u64,
}

#[derive(Default)]
pub(crate) struct Metrics {
    published_by_kind: Mutex<HashMap<String, u64>>,
    delivery_failures_by_transport: Mutex<HashMap<String, u64>>,
    zero_subscriber_publishes: Mutex<u64>,
}

impl Metrics {
    pub(crate) fn record_publish(&self, kind: &str) {
        *self
            .published_by_kind
            .lock()
            .unwrap()
            .entry(kind.to_owned())
            .or_insert(0) += 1;
    }

    pub(crate) fn record_delivery_failure(&self, transport: &str) {
        *self
            .delivery_failures_by_transport
            .lock()
            .unwrap()
            .entry(transport.to_owned())
            .or_insert(0) += 1;
    }

    pub(crate) fn record_zero_subscribers(&self) {
        *self.zero_subscriber_publishes.lock().unwrap() += 1;
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published_by_kind: self.published_by_kind.lock().unwrap().clone(),
            delivery_failures_by_transport: self
                .delivery_failures_by_transport
                .lock()
                .unwrap()
                .clone(),
            zero_subscriber_publishes: *self.zero_subscriber_publishes.lock().unwrap(),
        }
    }
}
