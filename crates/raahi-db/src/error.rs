#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connect(sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("query failed: {0}")]
    Query(sqlx::Error),
    #[error("row not found")]
    NotFound,
}

pub(crate) fn convert_error(why: sqlx::Error) -> DbError {
    match why {
        sqlx::Error::RowNotFound => DbError::NotFound,
        _ => DbError::Query(why),
    }
}
