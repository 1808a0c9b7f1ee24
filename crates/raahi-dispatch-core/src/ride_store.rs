//! Fireball (§4.5) — the in-memory ride record store and its state
//! machine. One `Arc<Mutex<Ride>>` per ride id, a per-ride lock for the
//! accept-ride critical section (Testable Property 2), and a
//! per-passenger lock spanning the active-ride check and the create
//! (§9 Open Question resolution).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use raahi_geo::GeoIndex;
use raahi_model::{Ride, RideCreateRequest, RideStatus};
use tokio::sync::{Mutex, RwLock};

use crate::error::DispatchError;
use crate::sync_types::{RideWriteOp, RideWriteSink};

/// §4.5 transition table. `RideCompleted` and `Cancelled` are terminal;
/// `Cancelled` is reachable from every non-terminal state, including
/// `RideStarted` — either party can still call off a trip in progress.
fn is_valid_transition(from: RideStatus, to: RideStatus) -> bool {
    use RideStatus::*;
    matches!(
        (from, to),
        (Pending, DriverAssigned)
            | (Pending, Cancelled)
            | (DriverAssigned, Confirmed)
            | (DriverAssigned, Cancelled)
            | (Confirmed, DriverArrived)
            | (Confirmed, Cancelled)
            | (DriverArrived, RideStarted)
            | (DriverArrived, Cancelled)
            | (RideStarted, RideCompleted)
            | (RideStarted, Cancelled)
    )
}

pub struct RideStateStore {
    geo: GeoIndex,
    rides: RwLock<HashMap<String, Arc<Mutex<Ride>>>>,
    passenger_active_ride: RwLock<HashMap<String, String>>,
    driver_active_ride: RwLock<HashMap<String, String>>,
    pending_rides: RwLock<HashSet<String>>,
    passenger_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    ride_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    write_sink: Arc<dyn RideWriteSink>,
}

impl RideStateStore {
    pub fn new(geo: GeoIndex, write_sink: Arc<dyn RideWriteSink>) -> Self {
        Self {
            geo,
            rides: RwLock::new(HashMap::new()),
            passenger_active_ride: RwLock::new(HashMap::new()),
            driver_active_ride: RwLock::new(HashMap::new()),
            pending_rides: RwLock::new(HashSet::new()),
            passenger_locks: RwLock::new(HashMap::new()),
            ride_locks: RwLock::new(HashMap::new()),
            write_sink,
        }
    }

    async fn passenger_lock(&self, passenger_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.passenger_locks.read().await.get(passenger_id) {
            return Arc::clone(lock);
        }
        let mut guard = self.passenger_locks.write().await;
        Arc::clone(
            guard
                .entry(passenger_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn ride_lock(&self, ride_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.ride_locks.read().await.get(ride_id) {
            return Arc::clone(lock);
        }
        let mut guard = self.ride_locks.write().await;
        Arc::clone(
            guard
                .entry(ride_id.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Generates a ride id, a 4-digit OTP, and creates the record in
    /// `Pending`. Holds the per-passenger lock across the active-ride
    /// check and the insert so two concurrent create calls for the
    /// same passenger can't both win (§9).
    pub async fn create_ride(&self, req: RideCreateRequest) -> Result<Ride, DispatchError> {
        let passenger_lock = self.passenger_lock(&req.passenger_id).await;
        let _guard = passenger_lock.lock().await;

        if self
            .passenger_active_ride
            .read()
            .await
            .contains_key(&req.passenger_id)
        {
            return Err(DispatchError::PassengerAlreadyRiding(req.passenger_id));
        }

        let pickup_h3 = self
            .geo
            .encode(req.pickup.lat, req.pickup.lng)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let ride_id = uuid::Uuid::new_v4().to_string();
        let ride_otp = format!("{:04}", rand::random::<u16>() % 10_000);

        let ride = Ride {
            ride_id: ride_id.clone(),
            passenger_id: req.passenger_id.clone(),
            driver_id: None,
            pickup: req.pickup,
            pickup_address: req.pickup_address,
            drop: req.drop,
            drop_address: req.drop_address,
            pickup_h3,
            fare: req.fare,
            distance_km: req.distance_km,
            duration_min: req.duration_min,
            ride_otp,
            payment_method: req.payment_method,
            vehicle_type: req.vehicle_type,
            driver_lat: None,
            driver_lng: None,
            driver_heading: None,
            driver_speed: None,
            created_at: chrono::Local::now(),
            assigned_at: None,
            confirmed_at: None,
            arrived_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancelled_by: None,
            cancellation_reason: None,
            identity: Default::default(),
            status: RideStatus::Pending,
            dirty: true,
            last_synced_at: None,
            version: 0,
        };

        self.rides
            .write()
            .await
            .insert(ride_id.clone(), Arc::new(Mutex::new(ride.clone())));
        self.pending_rides.write().await.insert(ride_id.clone());
        self.passenger_active_ride
            .write()
            .await
            .insert(req.passenger_id, ride_id);

        self.write_sink
            .enqueue(RideWriteOp::Upsert(Box::new(ride.clone())))
            .await;

        Ok(ride)
    }

    /// Accept-ride atomic critical section (Testable Property 2). Only
    /// the first caller for a still-`Pending` ride wins; every later
    /// caller gets `RideAlreadyTaken` naming the winner.
    pub async fn accept_ride(&self, ride_id: &str, driver_id: &str) -> Result<Ride, DispatchError> {
        let lock = self.ride_lock(ride_id).await;
        let _guard = lock.lock().await;

        let handle = self.get_handle(ride_id).await?;
        let mut guard = handle.lock().await;

        if guard.status != RideStatus::Pending {
            let assigned_to = guard.driver_id.clone().unwrap_or_default();
            return Err(DispatchError::RideAlreadyTaken {
                ride_id: ride_id.to_owned(),
                assigned_to,
            });
        }

        guard.driver_id = Some(driver_id.to_owned());
        guard.status = RideStatus::DriverAssigned;
        guard.assigned_at = Some(chrono::Local::now());
        guard.dirty = true;
        guard.version += 1;
        let snapshot = guard.clone();
        drop(guard);

        self.pending_rides.write().await.remove(ride_id);
        self.driver_active_ride
            .write()
            .await
            .insert(driver_id.to_owned(), ride_id.to_owned());

        self.write_sink
            .enqueue(RideWriteOp::Upsert(Box::new(snapshot.clone())))
            .await;

        Ok(snapshot)
    }

    /// Generic status transition, validated against §4.5's table.
    /// Callers that need OTP verification (`RideStarted`) must use
    /// [`Self::start_ride`] instead — this method does not check OTPs.
    pub async fn transition_status(
        &self,
        ride_id: &str,
        to: RideStatus,
    ) -> Result<Ride, DispatchError> {
        let handle = self.get_handle(ride_id).await?;
        let mut guard = handle.lock().await;

        if !is_valid_transition(guard.status, to) {
            return Err(DispatchError::InvalidTransition {
                from: guard.status,
                to,
            });
        }

        let now = chrono::Local::now();
        match to {
            RideStatus::Confirmed => guard.confirmed_at = Some(now),
            RideStatus::DriverArrived => guard.arrived_at = Some(now),
            RideStatus::RideCompleted => guard.completed_at = Some(now),
            _ => {}
        }
        guard.status = to;
        guard.dirty = true;
        guard.version += 1;
        let snapshot = guard.clone();
        drop(guard);

        if to.is_terminal() {
            self.retire_active_indices(&snapshot).await;
        }

        self.write_sink
            .enqueue(RideWriteOp::Upsert(Box::new(snapshot.clone())))
            .await;

        Ok(snapshot)
    }

    /// Start-ride OTP-gated transition (`DriverArrived -> RideStarted`).
    pub async fn start_ride(&self, ride_id: &str, otp: &str) -> Result<Ride, DispatchError> {
        let handle = self.get_handle(ride_id).await?;
        {
            let guard = handle.lock().await;
            if guard.status != RideStatus::DriverArrived {
                return Err(DispatchError::InvalidTransition {
                    from: guard.status,
                    to: RideStatus::RideStarted,
                });
            }
            if guard.ride_otp != otp {
                return Err(DispatchError::OtpMismatch);
            }
        }
        self.transition_status(ride_id, RideStatus::RideStarted).await
    }

    pub async fn cancel_ride(
        &self,
        ride_id: &str,
        cancelled_by: raahi_model::CancelledBy,
        reason: Option<String>,
    ) -> Result<Ride, DispatchError> {
        let handle = self.get_handle(ride_id).await?;
        {
            let mut guard = handle.lock().await;
            if !is_valid_transition(guard.status, RideStatus::Cancelled) {
                return Err(DispatchError::InvalidTransition {
                    from: guard.status,
                    to: RideStatus::Cancelled,
                });
            }
            guard.cancelled_by = Some(cancelled_by);
            guard.cancellation_reason = reason;
            guard.cancelled_at = Some(chrono::Local::now());
        }
        self.transition_status(ride_id, RideStatus::Cancelled).await
    }

    pub async fn update_ride_location(
        &self,
        ride_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) -> Result<(), DispatchError> {
        let handle = self.get_handle(ride_id).await?;
        {
            let mut guard = handle.lock().await;
            guard.driver_lat = Some(lat);
            guard.driver_lng = Some(lng);
            guard.driver_heading = heading;
            guard.driver_speed = speed;
            guard.dirty = true;
        }
        self.write_sink
            .enqueue(RideWriteOp::LocationUpdate {
                ride_id: ride_id.to_owned(),
                lat,
                lng,
                heading,
                speed,
            })
            .await;
        Ok(())
    }

    pub async fn verify_otp(&self, ride_id: &str, otp: &str) -> Result<bool, DispatchError> {
        let handle = self.get_handle(ride_id).await?;
        Ok(handle.lock().await.ride_otp == otp)
    }

    /// Startup rehydration (§4.6) — inserts a ride record loaded
    /// verbatim from the durable store and rebuilds whichever
    /// secondary indices still apply to it, without touching the
    /// write sink.
    pub async fn hydrate(&self, ride: Ride) {
        let ride_id = ride.ride_id.clone();
        let passenger_id = ride.passenger_id.clone();
        let driver_id = ride.driver_id.clone();
        let status = ride.status;

        self.rides
            .write()
            .await
            .insert(ride_id.clone(), Arc::new(Mutex::new(ride)));

        if !status.is_terminal() {
            self.passenger_active_ride
                .write()
                .await
                .insert(passenger_id, ride_id.clone());
            if let Some(driver_id) = driver_id {
                self.driver_active_ride.write().await.insert(driver_id, ride_id.clone());
            }
        }
        if status == RideStatus::Pending {
            self.pending_rides.write().await.insert(ride_id);
        }
    }

    pub async fn get_ride(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        let handle = self.get_handle(ride_id).await?;
        Ok(handle.lock().await.clone())
    }

    pub async fn get_passenger_active_ride(
        &self,
        passenger_id: &str,
    ) -> Result<Option<Ride>, DispatchError> {
        let Some(ride_id) = self
            .passenger_active_ride
            .read()
            .await
            .get(passenger_id)
            .cloned()
        else {
            return Ok(None);
        };
        Ok(Some(self.get_ride(&ride_id).await?))
    }

    pub async fn get_driver_active_ride(
        &self,
        driver_id: &str,
    ) -> Result<Option<Ride>, DispatchError> {
        let Some(ride_id) = self
            .driver_active_ride
            .read()
            .await
            .get(driver_id)
            .cloned()
        else {
            return Ok(None);
        };
        Ok(Some(self.get_ride(&ride_id).await?))
    }

    pub async fn get_pending_rides(&self) -> Vec<Ride> {
        let ids: Vec<String> = self.pending_rides.read().await.iter().cloned().collect();
        let rides = self.rides.read().await;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(handle) = rides.get(&id) {
                out.push(handle.lock().await.clone());
            }
        }
        out
    }

    pub async fn get_active_rides(&self) -> Vec<Ride> {
        let rides = self.rides.read().await;
        let mut out = Vec::new();
        for handle in rides.values() {
            let guard = handle.lock().await;
            if !guard.status.is_terminal() {
                out.push(guard.clone());
            }
        }
        out
    }

    /// TTL cleanup sweep (§4.6) — evicts terminal, already-synced rides
    /// older than `max_age` from RAM. Run roughly every 60s by the
    /// owning process; logic lives here because it inspects the same
    /// per-ride locks the rest of the store uses.
    pub async fn sweep_expired(&self, max_age: Duration) -> Vec<String> {
        let now = chrono::Local::now();
        let mut evicted = Vec::new();
        let ids: Vec<String> = self.rides.read().await.keys().cloned().collect();

        for id in ids {
            let handle = {
                let rides = self.rides.read().await;
                match rides.get(&id) {
                    Some(h) => Arc::clone(h),
                    None => continue,
                }
            };
            let should_evict = {
                let guard = handle.lock().await;
                let terminal_at = guard.completed_at.or(guard.cancelled_at);
                guard.status.is_terminal()
                    && !guard.dirty
                    && terminal_at
                        .and_then(|at| (now - at).to_std().ok())
                        .map(|age| age > max_age)
                        .unwrap_or(false)
            };
            if should_evict {
                self.rides.write().await.remove(&id);
                self.ride_locks.write().await.remove(&id);
                evicted.push(id);
            }
        }
        evicted
    }

    async fn retire_active_indices(&self, ride: &Ride) {
        self.passenger_active_ride.write().await.remove(&ride.passenger_id);
        if let Some(driver_id) = &ride.driver_id {
            self.driver_active_ride.write().await.remove(driver_id);
        }
    }

    async fn get_handle(&self, ride_id: &str) -> Result<Arc<Mutex<Ride>>, DispatchError> {
        self.rides
            .read()
            .await
            .get(ride_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("ride {ride_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_types::NullRideWriteSink;
    use h3o::Resolution;
    use raahi_model::{Coordinates, FareBreakdown};

    fn store() -> RideStateStore {
        RideStateStore::new(GeoIndex::new(Resolution::Nine), Arc::new(NullRideWriteSink))
    }

    fn request(passenger_id: &str) -> RideCreateRequest {
        RideCreateRequest {
            passenger_id: passenger_id.into(),
            pickup: Coordinates {
                lat: 28.6139,
                lng: 77.2090,
            },
            pickup_address: "A".into(),
            drop: Coordinates {
                lat: 28.7041,
                lng: 77.1025,
            },
            drop_address: "B".into(),
            vehicle_type: "SEDAN".into(),
            payment_method: "CASH".into(),
            fare: FareBreakdown {
                base: 50.0,
                distance: 100.0,
                time: 20.0,
                surge_multiplier: 1.0,
                total: 170.0,
            },
            distance_km: 12.0,
            duration_min: 25.0,
        }
    }

    #[tokio::test]
    async fn create_ride_rejects_second_active_ride_for_same_passenger() {
        let store = store();
        store.create_ride(request("p1")).await.unwrap();
        let err = store.create_ride(request("p1")).await.unwrap_err();
        assert!(matches!(err, DispatchError::PassengerAlreadyRiding(_)));
    }

    #[tokio::test]
    async fn accept_ride_only_one_driver_wins() {
        let store = store();
        let ride = store.create_ride(request("p1")).await.unwrap();

        let a = store.accept_ride(&ride.ride_id, "d1");
        let b = store.accept_ride(&ride.ride_id, "d2");
        let (a, b) = tokio::join!(a, b);

        let results = [a, b];
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let losses = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(wins, 1);
        assert_eq!(losses, 1);

        if let Err(DispatchError::RideAlreadyTaken { assigned_to, .. }) =
            results.iter().find(|r| r.is_err()).unwrap()
        {
            assert!(assigned_to == "d1" || assigned_to == "d2");
        } else {
            panic!("expected RideAlreadyTaken");
        }
    }

    #[tokio::test]
    async fn full_happy_path_transition_sequence() {
        let store = store();
        let ride = store.create_ride(request("p1")).await.unwrap();
        store.accept_ride(&ride.ride_id, "d1").await.unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::Confirmed)
            .await
            .unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::DriverArrived)
            .await
            .unwrap();

        let otp = store.get_ride(&ride.ride_id).await.unwrap().ride_otp;
        let started = store.start_ride(&ride.ride_id, &otp).await.unwrap();
        assert_eq!(started.status, RideStatus::RideStarted);

        let completed = store
            .transition_status(&ride.ride_id, RideStatus::RideCompleted)
            .await
            .unwrap();
        assert_eq!(completed.status, RideStatus::RideCompleted);

        assert!(store
            .get_passenger_active_ride("p1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn start_ride_rejects_wrong_otp() {
        let store = store();
        let ride = store.create_ride(request("p1")).await.unwrap();
        store.accept_ride(&ride.ride_id, "d1").await.unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::Confirmed)
            .await
            .unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::DriverArrived)
            .await
            .unwrap();

        let err = store.start_ride(&ride.ride_id, "0000").await.unwrap_err();
        assert!(matches!(err, DispatchError::OtpMismatch));
    }

    #[tokio::test]
    async fn can_cancel_after_ride_started() {
        let store = store();
        let ride = store.create_ride(request("p1")).await.unwrap();
        store.accept_ride(&ride.ride_id, "d1").await.unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::Confirmed)
            .await
            .unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::DriverArrived)
            .await
            .unwrap();
        let otp = store.get_ride(&ride.ride_id).await.unwrap().ride_otp;
        store.start_ride(&ride.ride_id, &otp).await.unwrap();

        let cancelled = store
            .cancel_ride(&ride.ride_id, raahi_model::CancelledBy::Passenger, None)
            .await
            .unwrap();
        assert_eq!(cancelled.status, RideStatus::Cancelled);
    }

    #[tokio::test]
    async fn cannot_cancel_after_ride_completed() {
        let store = store();
        let ride = store.create_ride(request("p1")).await.unwrap();
        store.accept_ride(&ride.ride_id, "d1").await.unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::Confirmed)
            .await
            .unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::DriverArrived)
            .await
            .unwrap();
        let otp = store.get_ride(&ride.ride_id).await.unwrap().ride_otp;
        store.start_ride(&ride.ride_id, &otp).await.unwrap();
        store
            .transition_status(&ride.ride_id, RideStatus::RideCompleted)
            .await
            .unwrap();

        let err = store
            .cancel_ride(&ride.ride_id, raahi_model::CancelledBy::Passenger, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));
    }
}
