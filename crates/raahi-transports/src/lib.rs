//! Realtime fan-out transports (§4.7): SSE, a TCP/WebSocket pub/sub
//! broker, and a room-based bidirectional socket transport. All three
//! share [`subscription::SubscriberRegistry`] for subscriber
//! bookkeeping and implement `raahi_eventbus::RealtimeTransport` so the
//! event bus can fan out to them uniformly.

pub mod broker;
pub mod sse;
pub mod socket;
pub mod subscription;

pub use broker::BrokerTransport;
pub use sse::SseTransport;
pub use socket::{handle_socket, DriverIdResolver, LocationSink, SocketTransport};
pub use subscription::{SubscriberId, SubscriberRegistry};
