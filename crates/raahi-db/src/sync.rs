//! StateSync (C6, §4.6) — the only thing in this workspace that talks
//! to Postgres on the write path. RAMEN/Fireball enqueue `WriteOp`s
//! onto an unbounded channel; two supervised loops drain them on a
//! fixed interval, coalescing by id so a burst of location updates for
//! the same entity costs one `UPDATE`, not N. Shaped after
//! `public_transport::collector::run`'s supervised-loop-with-backoff
//! pattern, simplified to a fixed tick since there's no per-instance
//! DB-stored schedule to restore here.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use raahi_dispatch_core::driver_store::DriverStateStore;
use raahi_dispatch_core::ride_store::RideStateStore;
use raahi_dispatch_core::earnings::EarningsSink;
use raahi_dispatch_core::sync_types::{DriverWriteOp, DriverWriteSink, RideWriteOp, RideWriteSink, UserIdResolver};
use raahi_model::Earnings;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::error::DbError;
use crate::repo;

const RIDE_FLUSH_INTERVAL: Duration = Duration::from_millis(500);
const DRIVER_FLUSH_INTERVAL: Duration = Duration::from_secs(2);
const MAX_RETRIES: u32 = 3;

pub async fn connect(database_url: &str) -> Result<PgPool, DbError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(DbError::Connect)?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Loads every driver and every non-terminal ride into RAM. Failure
/// here is startup-fatal (§7) — the caller is expected to log and
/// exit non-zero, mirroring the teacher's `.expect(...)` on connect
/// failure in `main.rs`.
pub async fn hydrate(
    pool: &PgPool,
    drivers: &DriverStateStore,
    rides: &RideStateStore,
) -> Result<(), DbError> {
    for driver in repo::driver::load_all(pool).await? {
        drivers.hydrate(driver).await;
    }
    for ride in repo::ride::load_open(pool).await? {
        rides.hydrate(ride).await;
    }
    Ok(())
}

pub struct StateSync {
    pool: PgPool,
    ride_tx: mpsc::UnboundedSender<RideWriteOp>,
    driver_tx: mpsc::UnboundedSender<DriverWriteOp>,
}

impl StateSync {
    pub fn new(pool: PgPool) -> Arc<Self> {
        let (ride_tx, ride_rx) = mpsc::unbounded_channel();
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();

        let sync = Arc::new(Self {
            pool,
            ride_tx,
            driver_tx,
        });

        spawn_ride_flush_loop(sync.pool.clone(), ride_rx);
        spawn_driver_flush_loop(sync.pool.clone(), driver_rx);

        sync
    }
}

#[async_trait]
impl RideWriteSink for StateSync {
    async fn enqueue(&self, op: RideWriteOp) {
        // An unbounded send only fails once the receiver half (the
        // flush loop) is gone, which only happens if that task
        // panicked past its own catch_unwind — treat it as fatal
        // rather than silently dropping writes.
        if self.ride_tx.send(op).is_err() {
            log::error!("ride flush loop is gone, dropping write");
        }
    }
}

#[async_trait]
impl DriverWriteSink for StateSync {
    async fn enqueue(&self, op: DriverWriteOp) {
        if self.driver_tx.send(op).is_err() {
            log::error!("driver flush loop is gone, dropping write");
        }
    }
}

/// Resolves a `userId` against Postgres on a RAMEN cache miss. A full
/// table scan is fine at this scale (§9 notes this store is meant for
/// a single-node deployment); an indexed point lookup would be the
/// first thing to add if that stopped being true.
pub struct PgUserIdResolver {
    pool: PgPool,
}

impl PgUserIdResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserIdResolver for PgUserIdResolver {
    async fn resolve(&self, user_id: &str) -> Option<String> {
        sqlx::query_scalar::<_, String>("SELECT driver_id FROM drivers WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .ok()
            .flatten()
    }
}

/// Persists completed-ride earnings (§4.8, §6). The dispatcher doesn't
/// hand us a `rideId` (an earnings record is keyed by driver first),
/// so it's recorded `NULL` here — fine for now since there is no
/// per-ride earnings lookup in this core, only the driver ledger.
pub struct PgEarningsSink {
    pool: PgPool,
}

impl PgEarningsSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EarningsSink for PgEarningsSink {
    async fn record(&self, driver_id: &str, earnings: Earnings) {
        if let Err(why) = repo::ride::insert_earning(
            &self.pool,
            driver_id,
            None,
            earnings.fare.total,
            earnings.commission,
            earnings.net_amount,
        )
        .await
        {
            log::error!("failed to record earnings for driver {driver_id}: {why}");
        }
    }
}

fn coalesce_rides(ops: Vec<RideWriteOp>) -> Vec<RideWriteOp> {
    let mut latest: HashMap<String, RideWriteOp> = HashMap::new();
    for op in ops {
        latest.insert(op.ride_id().to_owned(), op);
    }
    latest.into_values().collect()
}

fn coalesce_drivers(ops: Vec<DriverWriteOp>) -> Vec<DriverWriteOp> {
    let mut latest: HashMap<String, DriverWriteOp> = HashMap::new();
    for op in ops {
        latest.insert(op.driver_id().to_owned(), op);
    }
    latest.into_values().collect()
}

async fn apply_ride_op(pool: &PgPool, op: &RideWriteOp) -> Result<(), DbError> {
    match op {
        RideWriteOp::Upsert(ride) => repo::ride::upsert(pool, ride).await,
        RideWriteOp::LocationUpdate {
            ride_id,
            lat,
            lng,
            heading,
            speed,
        } => repo::ride::update_location(pool, ride_id, *lat, *lng, *heading, *speed).await,
    }
}

async fn apply_driver_op(pool: &PgPool, op: &DriverWriteOp) -> Result<(), DbError> {
    match op {
        DriverWriteOp::Upsert(driver) => repo::driver::upsert(pool, driver).await,
        DriverWriteOp::LocationUpdate {
            driver_id,
            lat,
            lng,
            heading,
            speed,
        } => repo::driver::update_location(pool, driver_id, *lat, *lng, *heading, *speed).await,
    }
}

async fn apply_with_retry<F, Fut>(mut attempt: F) -> Result<(), DbError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), DbError>>,
{
    let mut last_err = None;
    for retry in 0..=MAX_RETRIES {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(why) => {
                log::warn!("write failed (attempt {retry}/{MAX_RETRIES}): {why}");
                last_err = Some(why);
                if retry < MAX_RETRIES {
                    tokio::time::sleep(Duration::from_millis(50 * 2u64.pow(retry))).await;
                }
            }
        }
    }
    Err(last_err.expect("loop always runs at least once"))
}

fn spawn_ride_flush_loop(pool: PgPool, mut rx: mpsc::UnboundedReceiver<RideWriteOp>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RIDE_FLUSH_INTERVAL);
        loop {
            interval.tick().await;

            let mut batch = Vec::new();
            while let Ok(op) = rx.try_recv() {
                batch.push(op);
            }
            if batch.is_empty() {
                continue;
            }

            for op in coalesce_rides(batch) {
                let result = AssertUnwindSafe(apply_with_retry(|| apply_ride_op(&pool, &op)))
                    .catch_unwind()
                    .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(why)) => log::error!("ride write permanently failed: {why}"),
                    Err(why) => log::error!("ride flush panicked: {why:?}"),
                }
            }
        }
    });
}

fn spawn_driver_flush_loop(pool: PgPool, mut rx: mpsc::UnboundedReceiver<DriverWriteOp>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DRIVER_FLUSH_INTERVAL);
        loop {
            interval.tick().await;

            let mut batch = Vec::new();
            while let Ok(op) = rx.try_recv() {
                batch.push(op);
            }
            if batch.is_empty() {
                continue;
            }

            for op in coalesce_drivers(batch) {
                let result = AssertUnwindSafe(apply_with_retry(|| apply_driver_op(&pool, &op)))
                    .catch_unwind()
                    .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(why)) => log::error!("driver write permanently failed: {why}"),
                    Err(why) => log::error!("driver flush panicked: {why:?}"),
                }
            }
        }
    });
}
