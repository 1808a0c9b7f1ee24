pub mod bus;
pub mod channels;
pub mod metrics;
pub mod transport;

pub use bus::EventBus;
pub use metrics::MetricsSnapshot;
pub use transport::RealtimeTransport;
