//! Dispatcher (C8, §4.8) — the orchestration layer that glues
//! `DriverStateStore`, `RideStateStore`, and the `EventBus` together
//! and applies the platform's business rules (commission split,
//! dispatchability gate) around the raw state-machine transitions.

use std::sync::Arc;

use raahi_eventbus::channels;
use raahi_eventbus::EventBus;
use raahi_model::{
    CancelledBy, DispatchEvent, Earnings, Ride, RideCreateRequest, RideStatus,
};

use crate::driver_store::DriverStateStore;
use crate::earnings::EarningsSink;
use crate::error::DispatchError;
use crate::notifier::{NullStatusNotifier, StatusNotifier};
use crate::ride_store::RideStateStore;

/// Matches the driver-poll fallback's default radius (`GET
/// /rides/available`) so a ride's push fan-out and its pull fallback
/// cover the same catchment.
const DISPATCH_RADIUS_KM: f64 = 5.0;

pub struct Dispatcher {
    drivers: Arc<DriverStateStore>,
    rides: Arc<RideStateStore>,
    events: Arc<EventBus>,
    commission_rate: f64,
    earnings_sink: Arc<dyn EarningsSink>,
    notifier: Arc<dyn StatusNotifier>,
}

impl Dispatcher {
    pub fn new(
        drivers: Arc<DriverStateStore>,
        rides: Arc<RideStateStore>,
        events: Arc<EventBus>,
        commission_rate: f64,
        earnings_sink: Arc<dyn EarningsSink>,
    ) -> Self {
        Self::with_notifier(
            drivers,
            rides,
            events,
            commission_rate,
            earnings_sink,
            Arc::new(NullStatusNotifier),
        )
    }

    pub fn with_notifier(
        drivers: Arc<DriverStateStore>,
        rides: Arc<RideStateStore>,
        events: Arc<EventBus>,
        commission_rate: f64,
        earnings_sink: Arc<dyn EarningsSink>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            drivers,
            rides,
            events,
            commission_rate,
            earnings_sink,
            notifier,
        }
    }

    /// Fires the outbound webhook seam without making the caller wait
    /// on it (§6 — "spawned, errors logged, never awaited").
    fn notify_async(&self, ride: Ride) {
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier.notify(&ride).await;
        });
    }

    /// Create-ride flow: inserts the ride in `Pending` and fans the
    /// request out over every channel a prospective driver or an
    /// observer of the ride itself might be listening on (§4.5, §4.8):
    /// `available-drivers`, each nearby driver's own `driver:<id>`
    /// channel, the pickup's k-ring `h3:<cell>` channels, and a
    /// `PENDING` status update on `ride:<id>`.
    pub async fn create_ride(&self, req: RideCreateRequest) -> Result<Ride, DispatchError> {
        let ride = self.rides.create_ride(req).await?;

        let new_ride_request = DispatchEvent::NewRideRequest {
            ride_id: ride.ride_id.clone(),
            pickup_lat: ride.pickup.lat,
            pickup_lng: ride.pickup.lng,
            vehicle_type: ride.vehicle_type.clone(),
        };

        let nearby = self
            .drivers
            .find_nearby_drivers(
                ride.pickup.lat,
                ride.pickup.lng,
                DISPATCH_RADIUS_KM,
                Some(&ride.vehicle_type),
            )
            .await?;
        let k_ring = self
            .drivers
            .geo()
            .k_ring(&ride.pickup_h3, self.drivers.max_k())
            .map_err(|e| DispatchError::Internal(e.to_string()))?;

        let mut fan_out: Vec<String> = vec![channels::AVAILABLE_DRIVERS.to_owned()];
        fan_out.extend(
            nearby
                .into_iter()
                .map(|(driver, _distance)| channels::driver_channel(&driver.driver_id)),
        );
        fan_out.extend(k_ring.into_iter().map(|cell| channels::h3_channel(&cell)));

        self.events.publish_to_many(&fan_out, new_ride_request).await;

        self.events
            .publish(
                channels::ride_channel(&ride.ride_id),
                DispatchEvent::RideStatusUpdate {
                    ride_id: ride.ride_id.clone(),
                    status: RideStatus::Pending,
                    triggered_by: None,
                },
            )
            .await;

        Ok(ride)
    }

    /// Accept-ride flow. Rejects a non-dispatchable driver before even
    /// attempting the atomic assignment, then — on success — tells
    /// every other driver the ride is gone via `RideTaken` (§8 S3).
    pub async fn accept_ride(&self, ride_id: &str, driver_id: &str) -> Result<Ride, DispatchError> {
        let driver = self.drivers.get_driver(driver_id).await?;
        if !driver.is_dispatchable() {
            return Err(DispatchError::DriverNotDispatchable);
        }

        let ride = self.rides.accept_ride(ride_id, driver_id).await?;

        self.events
            .publish(
                channels::AVAILABLE_DRIVERS,
                DispatchEvent::RideTaken {
                    ride_id: ride.ride_id.clone(),
                    assigned_to: driver_id.to_owned(),
                },
            )
            .await;
        self.events
            .publish(
                &channels::ride_channel(&ride.ride_id),
                DispatchEvent::DriverAssigned {
                    ride_id: ride.ride_id.clone(),
                    driver_id: driver_id.to_owned(),
                },
            )
            .await;
        self.notify_async(ride.clone());

        Ok(ride)
    }

    /// Plain status advance (`Confirmed`, `DriverArrived`) — no OTP, no
    /// money. Publishes the generic `RideStatusUpdate` event.
    pub async fn advance_status(
        &self,
        ride_id: &str,
        to: RideStatus,
        triggered_by: Option<String>,
    ) -> Result<Ride, DispatchError> {
        let ride = self.rides.transition_status(ride_id, to).await?;
        self.events
            .publish(
                &channels::ride_channel(ride_id),
                DispatchEvent::RideStatusUpdate {
                    ride_id: ride_id.to_owned(),
                    status: to,
                    triggered_by,
                },
            )
            .await;
        Ok(ride)
    }

    /// Start-ride flow, gated on the OTP the passenger reads aloud to
    /// the driver (§8 invariant 6).
    pub async fn start_ride(&self, ride_id: &str, otp: &str) -> Result<Ride, DispatchError> {
        let ride = self.rides.start_ride(ride_id, otp).await?;
        self.events
            .publish(
                &channels::ride_channel(ride_id),
                DispatchEvent::RideStatusUpdate {
                    ride_id: ride_id.to_owned(),
                    status: RideStatus::RideStarted,
                    triggered_by: ride.driver_id.clone(),
                },
            )
            .await;
        Ok(ride)
    }

    /// Complete-ride flow: transitions to `RideCompleted`, computes the
    /// platform commission, and records the driver's net earnings via
    /// the injected `EarningsSink`.
    pub async fn complete_ride(&self, ride_id: &str) -> Result<Ride, DispatchError> {
        let ride = self
            .rides
            .transition_status(ride_id, RideStatus::RideCompleted)
            .await?;

        let commission = ride.fare.total * self.commission_rate;
        let net_amount = ride.fare.total - commission;

        if let Some(driver_id) = &ride.driver_id {
            self.earnings_sink
                .record(
                    driver_id,
                    Earnings {
                        fare: ride.fare,
                        commission,
                        net_amount,
                    },
                )
                .await;
        }

        self.events
            .publish(
                &channels::ride_channel(ride_id),
                DispatchEvent::RideCompleted {
                    ride_id: ride_id.to_owned(),
                    fare_total: ride.fare.total,
                    commission,
                    net_amount,
                },
            )
            .await;
        self.notify_async(ride.clone());

        Ok(ride)
    }

    pub async fn cancel_ride(
        &self,
        ride_id: &str,
        cancelled_by: CancelledBy,
        reason: Option<String>,
    ) -> Result<Ride, DispatchError> {
        let ride = self
            .rides
            .cancel_ride(ride_id, cancelled_by, reason.clone())
            .await?;

        self.events
            .publish(
                &channels::ride_channel(ride_id),
                DispatchEvent::RideCancelled {
                    ride_id: ride_id.to_owned(),
                    cancelled_by,
                    reason,
                },
            )
            .await;
        self.notify_async(ride.clone());

        Ok(ride)
    }

    /// Updates a driver's location and, if they have an active ride,
    /// mirrors it onto the ride record and fans it out on both the
    /// driver channel and (when applicable) the ride channel.
    pub async fn update_driver_location(
        &self,
        driver_id: &str,
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
    ) -> Result<(), DispatchError> {
        self.drivers
            .update_location(driver_id, lat, lng, heading, speed)
            .await?;

        let active_ride = self.rides.get_driver_active_ride(driver_id).await?;
        if let Some(ride) = &active_ride {
            self.rides
                .update_ride_location(&ride.ride_id, lat, lng, heading, speed)
                .await?;
        }

        let event = DispatchEvent::DriverLocation {
            ride_id: active_ride.as_ref().map(|r| r.ride_id.clone()),
            driver_id: driver_id.to_owned(),
            lat,
            lng,
            heading,
            speed,
        };

        self.events
            .publish(&channels::driver_channel(driver_id), event.clone())
            .await;
        if let Some(ride) = &active_ride {
            self.events
                .publish(&channels::ride_channel(&ride.ride_id), event)
                .await;
        }

        Ok(())
    }

    pub fn drivers(&self) -> &DriverStateStore {
        &self.drivers
    }

    pub fn rides(&self) -> &RideStateStore {
        &self.rides
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earnings::RecordingEarningsSink;
    use crate::sync_types::{NoopUserIdResolver, NullDriverWriteSink, NullRideWriteSink};
    use h3o::Resolution;
    use raahi_geo::GeoIndex;
    use raahi_model::{Coordinates, DriverRegistration, FareBreakdown, OnboardingStatus};

    fn dispatcher() -> (Dispatcher, Arc<DriverStateStore>, Arc<RideStateStore>) {
        let geo = GeoIndex::new(Resolution::Nine);
        let drivers = Arc::new(DriverStateStore::new(
            geo,
            3,
            Arc::new(NullDriverWriteSink),
            Arc::new(NoopUserIdResolver),
        ));
        let rides = Arc::new(RideStateStore::new(geo, Arc::new(NullRideWriteSink)));
        let events = Arc::new(EventBus::new());
        let dispatcher = Dispatcher::new(
            drivers.clone(),
            rides.clone(),
            events,
            0.20,
            Arc::new(RecordingEarningsSink::default()),
        );
        (dispatcher, drivers, rides)
    }

    fn ride_request() -> RideCreateRequest {
        RideCreateRequest {
            passenger_id: "p1".into(),
            pickup: Coordinates { lat: 28.6139, lng: 77.2090 },
            pickup_address: "A".into(),
            drop: Coordinates { lat: 28.7041, lng: 77.1025 },
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

    async fn registered_driver(drivers: &DriverStateStore, id: &str) {
        drivers
            .register_driver(DriverRegistration {
                driver_id: id.into(),
                user_id: format!("user-{id}"),
                name: "D".into(),
                phone: "0".into(),
                vehicle_number: "DL1".into(),
                vehicle_model: "Swift".into(),
                vehicle_type: "SEDAN".into(),
                rating: Some(4.9),
                is_active: true,
                is_verified: true,
                onboarding_status: OnboardingStatus::Completed,
                lat: Some(28.6140),
                lng: Some(77.2091),
            })
            .await
            .unwrap();
        drivers.set_online_status(id, true).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_accept_from_non_dispatchable_driver() {
        let (dispatcher, drivers, _rides) = dispatcher();
        registered_driver(&drivers, "d1").await;
        drivers.set_online_status("d1", false).await.unwrap();

        let ride = dispatcher.create_ride(ride_request()).await.unwrap();
        let err = dispatcher
            .accept_ride(&ride.ride_id, "d1")
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DriverNotDispatchable));
    }

    #[tokio::test]
    async fn complete_ride_computes_commission_split() {
        let (dispatcher, drivers, _rides) = dispatcher();
        registered_driver(&drivers, "d1").await;

        let ride = dispatcher.create_ride(ride_request()).await.unwrap();
        dispatcher.accept_ride(&ride.ride_id, "d1").await.unwrap();
        dispatcher
            .advance_status(&ride.ride_id, RideStatus::Confirmed, None)
            .await
            .unwrap();
        dispatcher
            .advance_status(&ride.ride_id, RideStatus::DriverArrived, None)
            .await
            .unwrap();
        let otp = dispatcher.rides().get_ride(&ride.ride_id).await.unwrap().ride_otp;
        dispatcher.start_ride(&ride.ride_id, &otp).await.unwrap();

        let completed = dispatcher.complete_ride(&ride.ride_id).await.unwrap();
        assert_eq!(completed.status, RideStatus::RideCompleted);
        // 170.0 * 0.20 = 34.0
        assert!((completed.fare.total - 170.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn location_update_mirrors_onto_active_ride() {
        let (dispatcher, drivers, rides) = dispatcher();
        registered_driver(&drivers, "d1").await;
        let ride = dispatcher.create_ride(ride_request()).await.unwrap();
        dispatcher.accept_ride(&ride.ride_id, "d1").await.unwrap();

        dispatcher
            .update_driver_location("d1", 28.62, 77.21, Some(90.0), Some(12.0))
            .await
            .unwrap();

        let updated = rides.get_ride(&ride.ride_id).await.unwrap();
        assert_eq!(updated.driver_lat, Some(28.62));
        assert_eq!(updated.driver_lng, Some(77.21));
    }

    #[tokio::test]
    async fn accept_ride_fires_the_status_notifier() {
        use crate::notifier::RecordingStatusNotifier;

        let geo = GeoIndex::new(Resolution::Nine);
        let drivers = Arc::new(DriverStateStore::new(
            geo,
            3,
            Arc::new(NullDriverWriteSink),
            Arc::new(NoopUserIdResolver),
        ));
        let rides = Arc::new(RideStateStore::new(geo, Arc::new(NullRideWriteSink)));
        let notifier = Arc::new(RecordingStatusNotifier::default());
        let dispatcher = Dispatcher::with_notifier(
            drivers.clone(),
            rides.clone(),
            Arc::new(EventBus::new()),
            0.20,
            Arc::new(RecordingEarningsSink::default()),
            notifier.clone(),
        );
        registered_driver(&drivers, "d1").await;

        let ride = dispatcher.create_ride(ride_request()).await.unwrap();
        dispatcher.accept_ride(&ride.ride_id, "d1").await.unwrap();

        // notify_async is fire-and-forget; give the spawned task a turn.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        assert_eq!(notifier.notified.lock().await.len(), 1);
    }
}
