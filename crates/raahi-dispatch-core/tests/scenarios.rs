//! Integration scenarios (§8 S1-S6) exercising the stores and the
//! dispatcher together, with no transport and no database — an
//! in-memory `EarningsSink` stands in for the external ledger.

use std::sync::Arc;

use h3o::Resolution;
use raahi_dispatch_core::driver_store::DriverStateStore;
use raahi_dispatch_core::earnings::RecordingEarningsSink;
use raahi_dispatch_core::error::DispatchError;
use raahi_dispatch_core::ride_store::RideStateStore;
use raahi_dispatch_core::sync_types::{NoopUserIdResolver, NullDriverWriteSink, NullRideWriteSink};
use raahi_dispatch_core::Dispatcher;
use raahi_eventbus::EventBus;
use raahi_geo::GeoIndex;
use raahi_model::{CancelledBy, Coordinates, DriverRegistration, FareBreakdown, OnboardingStatus, RideCreateRequest, RideStatus};

fn harness() -> (Dispatcher, Arc<DriverStateStore>, Arc<RideStateStore>) {
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

fn ride_request(passenger_id: &str) -> RideCreateRequest {
    RideCreateRequest {
        passenger_id: passenger_id.into(),
        pickup: Coordinates {
            lat: 28.6139,
            lng: 77.2090,
        },
        pickup_address: "Connaught Place".into(),
        drop: Coordinates {
            lat: 28.5562,
            lng: 77.1000,
        },
        drop_address: "IGI Airport".into(),
        vehicle_type: "SEDAN".into(),
        payment_method: "CASH".into(),
        fare: FareBreakdown {
            base: 50.0,
            distance: 180.0,
            time: 40.0,
            surge_multiplier: 1.0,
            total: 270.0,
        },
        distance_km: 18.0,
        duration_min: 35.0,
    }
}

async fn register(drivers: &DriverStateStore, id: &str, lat: f64, lng: f64) {
    drivers
        .register_driver(DriverRegistration {
            driver_id: id.into(),
            user_id: format!("user-{id}"),
            name: "Driver".into(),
            phone: "0".into(),
            vehicle_number: "DL1AA1234".into(),
            vehicle_model: "Swift".into(),
            vehicle_type: "SEDAN".into(),
            rating: Some(4.8),
            is_active: true,
            is_verified: true,
            onboarding_status: OnboardingStatus::Completed,
            lat: Some(lat),
            lng: Some(lng),
        })
        .await
        .unwrap();
    drivers.set_online_status(id, true).await.unwrap();
}

/// S1: two drivers race to accept the same pending ride — exactly one
/// wins, the other is told who got it.
#[tokio::test]
async fn s1_concurrent_accept_has_exactly_one_winner() {
    let (dispatcher, drivers, _rides) = harness();
    register(&drivers, "d1", 28.6140, 77.2091).await;
    register(&drivers, "d2", 28.6141, 77.2092).await;

    let ride = dispatcher.create_ride(ride_request("p1")).await.unwrap();

    let (r1, r2) = tokio::join!(
        dispatcher.accept_ride(&ride.ride_id, "d1"),
        dispatcher.accept_ride(&ride.ride_id, "d2")
    );

    let outcomes = [r1, r2];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser,
        Err(DispatchError::RideAlreadyTaken { .. })
    ));
}

/// S2: a driver going offline mid-ride does not cancel or otherwise
/// mutate the ride they're already assigned to — `isOnline` and ride
/// status are independent.
#[tokio::test]
async fn s2_driver_offline_does_not_affect_assigned_ride() {
    let (dispatcher, drivers, rides) = harness();
    register(&drivers, "d1", 28.6140, 77.2091).await;

    let ride = dispatcher.create_ride(ride_request("p1")).await.unwrap();
    dispatcher.accept_ride(&ride.ride_id, "d1").await.unwrap();

    drivers.set_online_status("d1", false).await.unwrap();

    let still_assigned = rides.get_ride(&ride.ride_id).await.unwrap();
    assert_eq!(still_assigned.status, RideStatus::DriverAssigned);
    assert_eq!(still_assigned.driver_id.as_deref(), Some("d1"));
}

/// S3: once a ride is accepted, `findNearbyDrivers`/pending-ride
/// listings no longer surface it as available (it has left the
/// `Pending` bucket), matching the `RideTaken` broadcast's intent.
#[tokio::test]
async fn s3_accepted_ride_drops_out_of_pending_list() {
    let (dispatcher, drivers, rides) = harness();
    register(&drivers, "d1", 28.6140, 77.2091).await;

    let ride = dispatcher.create_ride(ride_request("p1")).await.unwrap();
    assert_eq!(rides.get_pending_rides().await.len(), 1);

    dispatcher.accept_ride(&ride.ride_id, "d1").await.unwrap();
    assert!(rides.get_pending_rides().await.is_empty());
}

/// S4: a driver's location updates are mirrored onto whatever ride
/// they're actively serving, end to end through the dispatcher.
#[tokio::test]
async fn s4_driver_location_propagates_to_active_ride() {
    let (dispatcher, drivers, rides) = harness();
    register(&drivers, "d1", 28.6140, 77.2091).await;
    let ride = dispatcher.create_ride(ride_request("p1")).await.unwrap();
    dispatcher.accept_ride(&ride.ride_id, "d1").await.unwrap();

    dispatcher
        .update_driver_location("d1", 28.62, 77.205, Some(45.0), Some(30.0))
        .await
        .unwrap();

    let updated = rides.get_ride(&ride.ride_id).await.unwrap();
    assert_eq!(updated.driver_lat, Some(28.62));
    assert_eq!(updated.driver_heading, Some(45.0));
}

/// S5: disconnecting a transport is not the same as going offline —
/// removing the driver's last connected transport leaves `isOnline`
/// untouched until `setOnlineStatus` is called explicitly.
#[tokio::test]
async fn s5_transport_disconnect_is_not_going_offline() {
    let (_dispatcher, drivers, _rides) = harness();
    register(&drivers, "d1", 28.6140, 77.2091).await;
    drivers.add_transport("d1", "sse").await.unwrap();
    drivers.remove_transport("d1", "sse").await.unwrap();

    let driver = drivers.get_driver("d1").await.unwrap();
    assert!(driver.is_online);
}

/// S6: a passenger with an existing active ride cannot open a second
/// one until the first reaches a terminal state.
#[tokio::test]
async fn s6_passenger_cannot_double_book() {
    let (dispatcher, _drivers, rides) = harness();
    let first = dispatcher.create_ride(ride_request("p1")).await.unwrap();

    let err = dispatcher.create_ride(ride_request("p1")).await.unwrap_err();
    assert!(matches!(err, DispatchError::PassengerAlreadyRiding(_)));

    dispatcher
        .cancel_ride(&first.ride_id, CancelledBy::Passenger, Some("changed my mind".into()))
        .await
        .unwrap();

    // Now that the first ride is terminal, a new one is allowed.
    let second = dispatcher.create_ride(ride_request("p1")).await.unwrap();
    assert_ne!(first.ride_id, second.ride_id);
    let _ = rides.get_ride(&second.ride_id).await.unwrap();
}
