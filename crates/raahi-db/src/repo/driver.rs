use raahi_model::Driver;
use sqlx::PgPool;

use crate::error::{convert_error, DbError};
use crate::rows::{DriverParams, DriverRow};

pub async fn upsert(pool: &PgPool, driver: &Driver) -> Result<(), DbError> {
    let params = DriverParams::new(driver);
    sqlx::query(
        "
        INSERT INTO drivers (
            driver_id, user_id, name, phone, vehicle_number, vehicle_model,
            vehicle_type, rating, is_online, is_active, is_verified,
            onboarding_status, lat, lng, h3_index, heading, speed,
            last_active_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18, now())
        ON CONFLICT (driver_id) DO UPDATE SET
            name = EXCLUDED.name,
            phone = EXCLUDED.phone,
            vehicle_number = EXCLUDED.vehicle_number,
            vehicle_model = EXCLUDED.vehicle_model,
            vehicle_type = EXCLUDED.vehicle_type,
            rating = EXCLUDED.rating,
            is_online = EXCLUDED.is_online,
            is_active = EXCLUDED.is_active,
            is_verified = EXCLUDED.is_verified,
            onboarding_status = EXCLUDED.onboarding_status,
            lat = EXCLUDED.lat,
            lng = EXCLUDED.lng,
            h3_index = EXCLUDED.h3_index,
            heading = EXCLUDED.heading,
            speed = EXCLUDED.speed,
            last_active_at = EXCLUDED.last_active_at,
            updated_at = now();
        ",
    )
    .bind(&params.driver.driver_id)
    .bind(&params.driver.user_id)
    .bind(&params.driver.name)
    .bind(&params.driver.phone)
    .bind(&params.driver.vehicle_number)
    .bind(&params.driver.vehicle_model)
    .bind(&params.driver.vehicle_type)
    .bind(params.driver.rating)
    .bind(params.driver.is_online)
    .bind(params.driver.is_active)
    .bind(params.driver.is_verified)
    .bind(&params.onboarding_status)
    .bind(params.driver.lat)
    .bind(params.driver.lng)
    .bind(&params.driver.h3_index)
    .bind(params.driver.heading)
    .bind(params.driver.speed)
    .bind(params.driver.last_active_at)
    .execute(pool)
    .await
    .map_err(convert_error)?;

    Ok(())
}

pub async fn update_location(
    pool: &PgPool,
    driver_id: &str,
    lat: f64,
    lng: f64,
    heading: Option<f64>,
    speed: Option<f64>,
) -> Result<(), DbError> {
    sqlx::query(
        "
        UPDATE drivers
        SET lat = $2, lng = $3, heading = $4, speed = $5, updated_at = now()
        WHERE driver_id = $1;
        ",
    )
    .bind(driver_id)
    .bind(lat)
    .bind(lng)
    .bind(heading)
    .bind(speed)
    .execute(pool)
    .await
    .map_err(convert_error)?;

    Ok(())
}

pub async fn load_all(pool: &PgPool) -> Result<Vec<Driver>, DbError> {
    let rows: Vec<DriverRow> = sqlx::query_as(
        "
        SELECT driver_id, user_id, name, phone, vehicle_number, vehicle_model,
               vehicle_type, rating, is_online, is_active, is_verified,
               onboarding_status, lat, lng, h3_index, heading, speed, last_active_at
        FROM drivers;
        ",
    )
    .fetch_all(pool)
    .await
    .map_err(convert_error)?;

    Ok(rows.into_iter().map(Driver::from).collect())
}
