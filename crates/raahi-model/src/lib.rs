pub mod driver;
pub mod event;
pub mod ride;

pub use driver::{Driver, DriverRegistration, OnboardingStatus};
pub use event::{DispatchEvent, Earnings};
pub use ride::{
    CancelledBy, Coordinates, CounterpartyIdentity, FareBreakdown, Ride, RideCreateRequest,
    RideStatus,
};
