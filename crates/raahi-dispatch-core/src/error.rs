use raahi_model::RideStatus;

/// Error kinds for the dispatch core (§7). Carries `thiserror`-derived
/// `Display`/`std::error::Error` so it can cross the HTTP boundary with
/// a stable message, unlike the teacher's hand-rolled `Debug`-only
/// error enums.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{0}")]
    Validation(String),

    #[error("driver or ride not found: {0}")]
    NotFound(String),

    #[error("ride {ride_id} already taken by {assigned_to}")]
    RideAlreadyTaken {
        ride_id: String,
        assigned_to: String,
    },

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition { from: RideStatus, to: RideStatus },

    #[error("otp mismatch")]
    OtpMismatch,

    #[error("driver is not dispatchable")]
    DriverNotDispatchable,

    #[error("passenger {0} already has an active ride")]
    PassengerAlreadyRiding(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Short machine-readable code, stable across message wording
    /// changes — mirrors the teacher's `RouteErrorResponse` pattern of
    /// separating a status-mapped code from a human message.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Validation(_) => "VALIDATION_ERROR",
            DispatchError::NotFound(_) => "NOT_FOUND",
            DispatchError::RideAlreadyTaken { .. } => "RIDE_ALREADY_TAKEN",
            DispatchError::InvalidTransition { .. } => "INVALID_TRANSITION",
            DispatchError::OtpMismatch => "OTP_MISMATCH",
            DispatchError::DriverNotDispatchable => "DRIVER_NOT_DISPATCHABLE",
            DispatchError::PassengerAlreadyRiding(_) => "PASSENGER_ALREADY_RIDING",
            DispatchError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
