use raahi_model::Ride;
use sqlx::PgPool;

use crate::error::{convert_error, DbError};
use crate::rows::{RideParams, RideRow};

pub async fn upsert(pool: &PgPool, ride: &Ride) -> Result<(), DbError> {
    let params = RideParams::new(ride);
    let r = params.ride;
    sqlx::query(
        "
        INSERT INTO rides (
            ride_id, passenger_id, driver_id,
            pickup_lat, pickup_lng, pickup_address,
            drop_lat, drop_lng, drop_address, pickup_h3,
            fare_base, fare_distance, fare_time, fare_surge_multiplier, fare_total,
            distance_km, duration_min, ride_otp, payment_method, vehicle_type,
            driver_lat, driver_lng, driver_heading, driver_speed,
            status, created_at, assigned_at, confirmed_at, arrived_at,
            started_at, completed_at, cancelled_at, cancelled_by,
            cancellation_reason, identity, updated_at
        ) VALUES (
            $1,$2,$3, $4,$5,$6, $7,$8,$9,$10,
            $11,$12,$13,$14,$15, $16,$17,$18,$19,$20,
            $21,$22,$23,$24, $25,$26,$27,$28,$29,
            $30,$31,$32,$33, $34,$35, now()
        )
        ON CONFLICT (ride_id) DO UPDATE SET
            driver_id = EXCLUDED.driver_id,
            driver_lat = EXCLUDED.driver_lat,
            driver_lng = EXCLUDED.driver_lng,
            driver_heading = EXCLUDED.driver_heading,
            driver_speed = EXCLUDED.driver_speed,
            status = EXCLUDED.status,
            assigned_at = EXCLUDED.assigned_at,
            confirmed_at = EXCLUDED.confirmed_at,
            arrived_at = EXCLUDED.arrived_at,
            started_at = EXCLUDED.started_at,
            completed_at = EXCLUDED.completed_at,
            cancelled_at = EXCLUDED.cancelled_at,
            cancelled_by = EXCLUDED.cancelled_by,
            cancellation_reason = EXCLUDED.cancellation_reason,
            identity = EXCLUDED.identity,
            updated_at = now();
        ",
    )
    .bind(&r.ride_id)
    .bind(&r.passenger_id)
    .bind(&r.driver_id)
    .bind(r.pickup.lat)
    .bind(r.pickup.lng)
    .bind(&r.pickup_address)
    .bind(r.drop.lat)
    .bind(r.drop.lng)
    .bind(&r.drop_address)
    .bind(&r.pickup_h3)
    .bind(r.fare.base)
    .bind(r.fare.distance)
    .bind(r.fare.time)
    .bind(r.fare.surge_multiplier)
    .bind(r.fare.total)
    .bind(r.distance_km)
    .bind(r.duration_min)
    .bind(&r.ride_otp)
    .bind(&r.payment_method)
    .bind(&r.vehicle_type)
    .bind(r.driver_lat)
    .bind(r.driver_lng)
    .bind(r.driver_heading)
    .bind(r.driver_speed)
    .bind(&params.status)
    .bind(r.created_at)
    .bind(r.assigned_at)
    .bind(r.confirmed_at)
    .bind(r.arrived_at)
    .bind(r.started_at)
    .bind(r.completed_at)
    .bind(r.cancelled_at)
    .bind(&params.cancelled_by)
    .bind(&r.cancellation_reason)
    .bind(&params.identity)
    .execute(pool)
    .await
    .map_err(convert_error)?;

    Ok(())
}

pub async fn update_location(
    pool: &PgPool,
    ride_id: &str,
    lat: f64,
    lng: f64,
    heading: Option<f64>,
    speed: Option<f64>,
) -> Result<(), DbError> {
    sqlx::query(
        "
        UPDATE rides
        SET driver_lat = $2, driver_lng = $3, driver_heading = $4, driver_speed = $5, updated_at = now()
        WHERE ride_id = $1;
        ",
    )
    .bind(ride_id)
    .bind(lat)
    .bind(lng)
    .bind(heading)
    .bind(speed)
    .execute(pool)
    .await
    .map_err(convert_error)?;

    Ok(())
}

/// Loads every ride StateSync needs to rehydrate — non-terminal rides,
/// since terminal ones are already fully synced and RAM can rebuild
/// them lazily only if actually requested (there is no such lookup
/// path today, so terminal rides simply stay out of RAM after a
/// restart, matching the TTL-eviction behavior they'd eventually get
/// anyway).
pub async fn load_open(pool: &PgPool) -> Result<Vec<Ride>, DbError> {
    let rows: Vec<RideRow> = sqlx::query_as(
        "
        SELECT ride_id, passenger_id, driver_id,
               pickup_lat, pickup_lng, pickup_address,
               drop_lat, drop_lng, drop_address, pickup_h3,
               fare_base, fare_distance, fare_time, fare_surge_multiplier, fare_total,
               distance_km, duration_min, ride_otp, payment_method, vehicle_type,
               driver_lat, driver_lng, driver_heading, driver_speed,
               status, created_at, assigned_at, confirmed_at, arrived_at,
               started_at, completed_at, cancelled_at, cancelled_by,
               cancellation_reason, identity
        FROM rides
        WHERE status NOT IN ('RIDE_COMPLETED', 'CANCELLED');
        ",
    )
    .fetch_all(pool)
    .await
    .map_err(convert_error)?;

    Ok(rows.into_iter().map(Ride::from).collect())
}

pub async fn insert_earning(
    pool: &PgPool,
    driver_id: &str,
    ride_id: Option<&str>,
    fare_total: f64,
    commission: f64,
    net_amount: f64,
) -> Result<(), DbError> {
    sqlx::query(
        "
        INSERT INTO earnings (driver_id, ride_id, fare_total, commission, net_amount)
        VALUES ($1, $2, $3, $4, $5);
        ",
    )
    .bind(driver_id)
    .bind(ride_id)
    .bind(fare_total)
    .bind(commission)
    .bind(net_amount)
    .execute(pool)
    .await
    .map_err(convert_error)?;

    Ok(())
}
