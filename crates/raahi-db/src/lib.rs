pub mod error;
pub mod repo;
pub mod rows;
pub mod sync;

pub use error::DbError;
pub use sync::{connect, hydrate, PgEarningsSink, PgUserIdResolver, StateSync};
