//! RAMEN (§4.4) — the in-memory driver presence store. One
//! `Arc<Mutex<Driver>>` per driver id plus a secondary h3-cell index,
//! matching the concurrency model in §5: per-driver locks for the
//! record itself, a single `RwLock` for the shared cell index, held
//! only for the short remove-then-add critical section on a cell move.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use raahi_geo::GeoIndex;
use raahi_model::{Driver, DriverRegistration, OnboardingStatus};
use tokio::sync::{Mutex, RwLock};

use crate::error::DispatchError;
use crate::sync_types::{DriverWriteOp, DriverWriteSink, UserIdResolver};

pub struct LocationUpdateResult {
    pub h3_index: String,
    pub h3_changed: bool,
}

pub struct DriverStateStore {
    geo: GeoIndex,
    max_k: u32,
    drivers: RwLock<HashMap<String, Arc<Mutex<Driver>>>>,
    h3_cell_index: RwLock<HashMap<String, HashSet<String>>>,
    user_to_driver: RwLock<HashMap<String, String>>,
    write_sink: Arc<dyn DriverWriteSink>,
    user_id_resolver: Arc<dyn UserIdResolver>,
}

impl DriverStateStore {
    pub fn new(
        geo: GeoIndex,
        max_k: u32,
        write_sink: Arc<dyn DriverWriteSink>,
        user_id_resolver: Arc<dyn UserIdResolver>,
    ) -> Self {
        Self {
            geo,
            max_k,
            drivers: RwLock::new(HashMap::new()),
            h3_cell_index: RwLock::new(HashMap::new()),
            user_to_driver: RwLock::new(HashMap::new()),
            write_sink,
            user_id_resolver,
        }
    }

    /// The resolution this store encodes driver positions at — needed
    /// by callers (e.g. the HTTP layer's h3 subscription endpoints)
    /// that must compute the same cell string without duplicating the
    /// resolution constant.
    pub fn geo(&self) -> GeoIndex {
        self.geo
    }

    /// The expanding-search ceiling this store was built with — needed
    /// by callers that replicate its k-ring expansion (e.g. the
    /// dispatcher's create-ride fan-out) without duplicating the limit.
    pub fn max_k(&self) -> u32 {
        self.max_k
    }

    /// Inserts a brand-new driver record, or merges identity fields
    /// into an existing one. `isOnline` is never set by registration —
    /// only `setOnlineStatus` toggles it (§4.4).
    pub async fn register_driver(
        &self,
        reg: DriverRegistration,
    ) -> Result<Driver, DispatchError> {
        let h3_index = match (reg.lat, reg.lng) {
            (Some(lat), Some(lng)) => Some(
                self.geo
                    .encode(lat, lng)
                    .map_err(|e| DispatchError::Validation(e.to_string()))?,
            ),
            _ => None,
        };

        let mut drivers = self.drivers.write().await;
        let entry = drivers.get(&reg.driver_id).cloned();

        let driver = match entry {
            Some(existing) => {
                let mut guard = existing.lock().await;
                let old_h3 = guard.h3_index.clone();
                guard.name = reg.name;
                guard.phone = reg.phone;
                guard.vehicle_number = reg.vehicle_number;
                guard.vehicle_model = reg.vehicle_model;
                guard.vehicle_type = reg.vehicle_type;
                guard.rating = reg.rating;
                guard.is_active = reg.is_active;
                guard.is_verified = reg.is_verified;
                guard.onboarding_status = reg.onboarding_status;
                if let (Some(lat), Some(lng)) = (reg.lat, reg.lng) {
                    guard.lat = Some(lat);
                    guard.lng = Some(lng);
                    guard.h3_index = h3_index.clone();
                }
                let snapshot = guard.clone();
                drop(guard);
                if old_h3 != h3_index {
                    self.move_cell(&reg.driver_id, old_h3.as_deref(), h3_index.as_deref())
                        .await;
                }
                snapshot
            }
            None => {
                let driver = Driver {
                    driver_id: reg.driver_id.clone(),
                    user_id: reg.user_id.clone(),
                    name: reg.name,
                    phone: reg.phone,
                    vehicle_number: reg.vehicle_number,
                    vehicle_model: reg.vehicle_model,
                    vehicle_type: reg.vehicle_type,
                    rating: reg.rating,
                    is_online: false,
                    is_active: reg.is_active,
                    is_verified: reg.is_verified,
                    onboarding_status: reg.onboarding_status,
                    lat: reg.lat,
                    lng: reg.lng,
                    h3_index: h3_index.clone(),
                    heading: None,
                    speed: None,
                    last_active_at: chrono::Local::now(),
                    connected_transports: HashSet::new(),
                };
                drivers.insert(reg.driver_id.clone(), Arc::new(Mutex::new(driver.clone())));
                self.user_to_driver
                    .write()
                    .await
                    .insert(reg.user_id.clone(), reg.driver_id.clone());
                if let Some(cell) = &h3_index {
                    self.h3_cell_index
                        .write()
                        .await
                        .entry(cell.clone())
                        .or_default()
                        .insert(reg.driver_id.clone());
                }
                driver
            }
        };

        self.write_sink
            .enqueue(DriverWriteOp::Upsert(Box::new(driver.clone())))
            .await;

        Ok(driver)
    }

    pub async fn set_online_status(
        &self,
        driver_id: &str,
        is_online: bool,
    ) -> Result<(), DispatchError> {
        let handle = self.get_handle(driver_id).await?;
        let snapshot = {
            let mut guard = handle.lock().await;
            guard.is_online = is_online;
            guard.last_active_at = chrono::Local::now();
            guard.clone()
        };
        self.write_sink
            .enqueue(DriverWriteOp::Upsert(Box::new(snapshot)))
            .await;
        Ok(())
    }

    pub async fn update_location(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) -> Result<LocationUpdateResult, DispatchError> {
        let handle = self.get_handle(driver_id).await?;
        let new_h3 = self
            .geo
            .encode(lat, lng)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let old_h3 = {
            let mut guard = handle.lock().await;
            let old = guard.h3_index.clone();
            guard.lat = Some(lat);
            guard.lng = Some(lng);
            guard.heading = heading;
            guard.speed = speed;
            guard.h3_index = Some(new_h3.clone());
            guard.last_active_at = chrono::Local::now();
            old
        };

        let h3_changed = old_h3.as_deref() != Some(new_h3.as_str());
        if h3_changed {
            self.move_cell(driver_id, old_h3.as_deref(), Some(&new_h3))
                .await;
        }

        self.write_sink
            .enqueue(DriverWriteOp::LocationUpdate {
                driver_id: driver_id.to_owned(),
                lat,
                lng,
                heading,
                speed,
            })
            .await;

        Ok(LocationUpdateResult {
            h3_index: new_h3,
            h3_changed,
        })
    }

    /// `findNearbyDrivers` (§4.4) — expanding k-ring search, sorted by
    /// distance ascending with `driverId` as the tie-break so repeated
    /// calls against an unchanged snapshot are stable.
    pub async fn find_nearby_drivers(
        &self,
        lat: f64,
        lng: f64,
        radius_km: f64,
        vehicle_type: Option<&str>,
    ) -> Result<Vec<(Driver, f64)>, DispatchError> {
        let center = self
            .geo
            .encode(lat, lng)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        let cell_index = self.h3_cell_index.read().await;
        let drivers = self.drivers.read().await;

        let mut found = self
            .geo
            .find_expanding(&center, self.max_k, |cells| {
                let mut matches = Vec::new();
                for cell in cells {
                    let Some(ids) = cell_index.get(cell) else {
                        continue;
                    };
                    for id in ids {
                        let Some(handle) = drivers.get(id) else {
                            continue;
                        };
                        let Ok(guard) = handle.try_lock() else {
                            continue;
                        };
                        if !guard.is_dispatchable() {
                            continue;
                        }
                        if let Some(vt) = vehicle_type {
                            if guard.vehicle_type != vt {
                                continue;
                            }
                        }
                        let (Some(dlat), Some(dlng)) = (guard.lat, guard.lng) else {
                            continue;
                        };
                        let distance = self.geo.haversine_km(lat, lng, dlat, dlng);
                        if distance <= radius_km {
                            matches.push((guard.clone(), distance));
                        }
                    }
                }
                matches
            })
            .map_err(|e| DispatchError::Internal(e.to_string()))?;

        found.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.driver_id.cmp(&b.0.driver_id))
        });

        Ok(found)
    }

    /// Resolves a caller-supplied id that may be a `driverId` already,
    /// a `userId` with a cached mapping, or (on miss) something only
    /// the durable store knows about.
    pub async fn resolve_driver_id(&self, candidate: &str) -> Option<String> {
        if self.drivers.read().await.contains_key(candidate) {
            return Some(candidate.to_owned());
        }
        if let Some(driver_id) = self.user_to_driver.read().await.get(candidate).cloned() {
            return Some(driver_id);
        }
        let resolved = self.user_id_resolver.resolve(candidate).await?;
        self.user_to_driver
            .write()
            .await
            .insert(candidate.to_owned(), resolved.clone());
        Some(resolved)
    }

    pub async fn add_transport(&self, driver_id: &str, transport: &str) -> Result<(), DispatchError> {
        let handle = self.get_handle(driver_id).await?;
        handle
            .lock()
            .await
            .connected_transports
            .insert(transport.to_owned());
        Ok(())
    }

    pub async fn remove_transport(
        &self,
        driver_id: &str,
        transport: &str,
    ) -> Result<(), DispatchError> {
        let handle = self.get_handle(driver_id).await?;
        handle.lock().await.connected_transports.remove(transport);
        Ok(())
    }

    /// Startup rehydration (§4.6) — inserts a driver record loaded
    /// verbatim from the durable store, bypassing `register_driver`'s
    /// merge semantics and the write sink (there is nothing new to
    /// persist, this *is* what's already persisted).
    pub async fn hydrate(&self, driver: Driver) {
        let cell = driver.h3_index.clone();
        let driver_id = driver.driver_id.clone();
        let user_id = driver.user_id.clone();

        self.drivers
            .write()
            .await
            .insert(driver_id.clone(), Arc::new(Mutex::new(driver)));
        self.user_to_driver.write().await.insert(user_id, driver_id.clone());
        if let Some(cell) = cell {
            self.h3_cell_index
                .write()
                .await
                .entry(cell)
                .or_default()
                .insert(driver_id);
        }
    }

    pub async fn get_driver(&self, driver_id: &str) -> Result<Driver, DispatchError> {
        let handle = self.get_handle(driver_id).await?;
        Ok(handle.lock().await.clone())
    }

    /// Detects the P0 conditions named in §7 that RAMEN itself can
    /// check without a DB round-trip: an h3-index entry pointing at a
    /// driver whose own record disagrees, and a driver with open
    /// transports but marked offline.
    pub async fn audit_invariants(&self) -> Vec<String> {
        let mut violations = Vec::new();
        let drivers = self.drivers.read().await;
        let cell_index = self.h3_cell_index.read().await;

        for (cell, ids) in cell_index.iter() {
            for id in ids {
                match drivers.get(id) {
                    None => violations.push(format!(
                        "h3 cell {cell} references unknown driver {id}"
                    )),
                    Some(handle) => {
                        let guard = handle.lock().await;
                        if guard.h3_index.as_deref() != Some(cell.as_str()) {
                            violations.push(format!(
                                "driver {id} indexed under {cell} but h3_index is {:?}",
                                guard.h3_index
                            ));
                        }
                    }
                }
            }
        }

        for (id, handle) in drivers.iter() {
            let guard = handle.lock().await;
            if !guard.connected_transports.is_empty() && !guard.is_online {
                violations.push(format!(
                    "driver {id} has open transports but is_online=false"
                ));
            }
        }

        if !violations.is_empty() {
            for v in &violations {
                log::error!("driver store invariant violation: {v}");
            }
        }
        violations
    }

    async fn get_handle(&self, driver_id: &str) -> Result<Arc<Mutex<Driver>>, DispatchError> {
        self.drivers
            .read()
            .await
            .get(driver_id)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id}")))
    }

    async fn move_cell(&self, driver_id: &str, old_cell: Option<&str>, new_cell: Option<&str>) {
        let mut index = self.h3_cell_index.write().await;
        if let Some(old) = old_cell {
            if let Some(set) = index.get_mut(old) {
                set.remove(driver_id);
                if set.is_empty() {
                    index.remove(old);
                }
            }
        }
        if let Some(new) = new_cell {
            index.entry(new.to_owned()).or_default().insert(driver_id.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_types::{NullDriverWriteSink, NoopUserIdResolver};
    use h3o::Resolution;

    fn store() -> DriverStateStore {
        DriverStateStore::new(
            GeoIndex::new(Resolution::Nine),
            3,
            Arc::new(NullDriverWriteSink),
            Arc::new(NoopUserIdResolver),
        )
    }

    fn registration(id: &str, lat: f64, lng: f64) -> DriverRegistration {
        DriverRegistration {
            driver_id: id.into(),
            user_id: format!("user-{id}"),
            name: "Driver".into(),
            phone: "0".into(),
            vehicle_number: "DL1".into(),
            vehicle_model: "Swift".into(),
            vehicle_type: "SEDAN".into(),
            rating: Some(4.9),
            is_active: true,
            is_verified: true,
            onboarding_status: OnboardingStatus::Completed,
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    #[tokio::test]
    async fn register_then_set_online_makes_driver_dispatchable() {
        let store = store();
        store
            .register_driver(registration("d1", 28.6139, 77.2090))
            .await
            .unwrap();
        assert!(!store.get_driver("d1").await.unwrap().is_dispatchable());

        store.set_online_status("d1", true).await.unwrap();
        assert!(store.get_driver("d1").await.unwrap().is_dispatchable());
    }

    #[tokio::test]
    async fn update_location_unknown_driver_is_not_found() {
        let store = store();
        let err = store
            .update_location("ghost", 28.0, 77.0, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn find_nearby_drivers_excludes_non_dispatchable() {
        let store = store();
        store
            .register_driver(registration("d1", 28.6139, 77.2090))
            .await
            .unwrap();
        store.set_online_status("d1", true).await.unwrap();

        let found = store
            .find_nearby_drivers(28.6139, 77.2090, 5.0, None)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        store.set_online_status("d1", false).await.unwrap();
        let found = store
            .find_nearby_drivers(28.6139, 77.2090, 5.0, None)
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn find_nearby_drivers_sorts_by_distance_then_id() {
        let store = store();
        for (id, lat, lng) in [
            ("far", 28.70, 77.20),
            ("near", 28.6140, 77.2091),
        ] {
            store.register_driver(registration(id, lat, lng)).await.unwrap();
            store.set_online_status(id, true).await.unwrap();
        }

        let found = store
            .find_nearby_drivers(28.6139, 77.2090, 50.0, None)
            .await
            .unwrap();
        assert_eq!(found[0].0.driver_id, "near");
    }

    #[tokio::test]
    async fn resolve_driver_id_finds_by_user_id() {
        let store = store();
        store
            .register_driver(registration("d1", 28.6139, 77.2090))
            .await
            .unwrap();
        assert_eq!(
            store.resolve_driver_id("user-d1").await,
            Some("d1".to_owned())
        );
        assert_eq!(store.resolve_driver_id("no-such-id").await, None);
    }

    #[tokio::test]
    async fn cell_index_moves_with_driver_location() {
        let store = store();
        store
            .register_driver(registration("d1", 28.6139, 77.2090))
            .await
            .unwrap();
        let far_away_result = store
            .update_location("d1", -33.8688, 151.2093, None, None)
            .await
            .unwrap();
        assert!(far_away_result.h3_changed);
        assert!(store.audit_invariants().await.is_empty());
    }

    #[tokio::test]
    async fn audit_detects_transports_without_online_flag() {
        let store = store();
        store
            .register_driver(registration("d1", 28.6139, 77.2090))
            .await
            .unwrap();
        store.add_transport("d1", "sse").await.unwrap();
        let violations = store.audit_invariants().await;
        assert!(violations.iter().any(|v| v.contains("open transports")));
    }
}
