pub mod dispatcher;
pub mod driver_store;
pub mod earnings;
pub mod error;
pub mod notifier;
pub mod ride_store;
pub mod sync_types;

pub use dispatcher::Dispatcher;
pub use driver_store::{DriverStateStore, LocationUpdateResult};
pub use earnings::EarningsSink;
pub use error::DispatchError;
pub use notifier::StatusNotifier;
pub use ride_store::RideStateStore;
