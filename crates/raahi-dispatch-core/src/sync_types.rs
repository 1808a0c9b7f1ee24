//! The narrow seam between the in-memory stores and StateSync (§4.6).
//!
//! `DriverStateStore`/`RideStateStore` never touch the database
//! directly — they push a `WriteOp` onto whatever sink was injected at
//! construction, and StateSync (crate `raahi-db`) is the only thing
//! that drains it. Kept as traits rather than a concrete channel type
//! so the stores are testable with an in-memory sink and no Postgres.

use async_trait::async_trait;
use raahi_model::{Driver, Ride};

/// Write ops carry a full snapshot rather than a delta wherever the
/// caller already has one lying around (creation, status transitions):
/// the store clones the whole record on every mutation anyway, and a
/// full-row upsert means StateSync never has to reconstruct a partial
/// update's SQL per variant. Only `LocationUpdate` stays a delta, since
/// it is the one write that actually happens at a rate worth coalescing.
#[derive(Debug, Clone)]
pub enum RideWriteOp {
    Upsert(Box<Ride>),
    LocationUpdate {
        ride_id: String,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    },
}

impl RideWriteOp {
    pub fn ride_id(&self) -> &str {
        match self {
            RideWriteOp::Upsert(r) => &r.ride_id,
            RideWriteOp::LocationUpdate { ride_id, .. } => ride_id,
        }
    }
}

#[derive(Debug, Clone)]
pub enum DriverWriteOp {
    Upsert(Box<Driver>),
    LocationUpdate {
        driver_id: String,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    },
}

impl DriverWriteOp {
    pub fn driver_id(&self) -> &str {
        match self {
            DriverWriteOp::Upsert(d) => &d.driver_id,
            DriverWriteOp::LocationUpdate { driver_id, .. } => driver_id,
        }
    }
}

#[async_trait]
pub trait RideWriteSink: Send + Sync {
    async fn enqueue(&self, op: RideWriteOp);
}

#[async_trait]
pub trait DriverWriteSink: Send + Sync {
    async fn enqueue(&self, op: DriverWriteOp);
}

/// Resolves a `userId` to a `driverId` on a RAMEN cache miss (§4.4
/// `resolveDriverId`). Implemented against Postgres in `raahi-db`;
/// stubbed out in tests.
#[async_trait]
pub trait UserIdResolver: Send + Sync {
    async fn resolve(&self, user_id: &str) -> Option<String>;
}

pub struct NoopUserIdResolver;

#[async_trait]
impl UserIdResolver for NoopUserIdResolver {
    async fn resolve(&self, _user_id: &str) -> Option<String> {
        None
    }
}

/// Discards every write. Used where only the in-memory behavior of a
/// store is under test and persistence is irrelevant.
pub struct NullRideWriteSink;

#[async_trait]
impl RideWriteSink for NullRideWriteSink {
    async fn enqueue(&self, _op: RideWriteOp) {}
}

pub struct NullDriverWriteSink;

#[async_trait]
impl DriverWriteSink for NullDriverWriteSink {
    async fn enqueue(&self, _op: DriverWriteOp) {}
}

/// Collects every enqueued op in order. Used by tests that need to
/// assert a write actually happened, without standing up Postgres.
#[derive(Default)]
pub struct RecordingRideWriteSink {
    pub ops: tokio::sync::Mutex<Vec<RideWriteOp>>,
}

#[async_trait]
impl RideWriteSink for RecordingRideWriteSink {
    async fn enqueue(&self, op: RideWriteOp) {
        self.ops.lock().await.push(op);
    }
}

#[derive(Default)]
pub struct RecordingDriverWriteSink {
    pub ops: tokio::sync::Mutex<Vec<DriverWriteOp>>,
}

#[async_trait]
impl DriverWriteSink for RecordingDriverWriteSink {
    async fn enqueue(&self, op: DriverWriteOp) {
        self.ops.lock().await.push(op);
    }
}
