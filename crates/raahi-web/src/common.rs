//! Commonly used response shapes and error plumbing, grounded on
//! `crates/web/src/common.rs`'s `RouteErrorResponse`/`schema` pair but
//! stripped of HATEOAS (no multi-origin browsing here, so there is
//! nothing for a `links` map to point at).

use axum::{
    extract::{OriginalUri, Request},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::MethodFilter,
    Json,
};
use raahi_dispatch_core::DispatchError;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

pub type RouteResult<O> = Result<O, RouteErrorResponse>;

pub(crate) const METHOD_FILTER_ALL: MethodFilter = MethodFilter::GET
    .or(MethodFilter::POST)
    .or(MethodFilter::PATCH)
    .or(MethodFilter::PUT)
    .or(MethodFilter::DELETE);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteErrorResponse {
    #[serde(skip)]
    pub status_code: StatusCode,

    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RouteErrorResponse {
    pub fn new(status_code: StatusCode, code: impl Into<String>) -> Self {
        Self {
            status_code,
            code: code.into(),
            http_method: None,
            requested_uri: None,
            message: None,
        }
    }

    pub fn not_found(method: &Method, uri: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND")
            .with_method(method)
            .with_uri(uri)
            .with_message("The requested route does not exist.")
    }

    pub fn unauthorised(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORISED").with_message(message)
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code).with_message(message)
    }

    pub fn with_method(mut self, method: &Method) -> Self {
        self.http_method = Some(method.to_string());
        self
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.requested_uri = Some(uri.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Maps `DispatchError` onto the status codes enumerated in spec §6/§7
/// (400/403/404/409/422/500), carrying the stable `code()` alongside
/// the human message the way the teacher's `RouteErrorResponse`
/// carries a status plus a message.
impl From<DispatchError> for RouteErrorResponse {
    fn from(err: DispatchError) -> Self {
        let status = match &err {
            DispatchError::Validation(_) => StatusCode::BAD_REQUEST,
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::RideAlreadyTaken { .. } => StatusCode::CONFLICT,
            DispatchError::InvalidTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::OtpMismatch => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::DriverNotDispatchable => StatusCode::FORBIDDEN,
            DispatchError::PassengerAlreadyRiding(_) => StatusCode::CONFLICT,
            DispatchError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.code()).with_message(err.to_string())
    }
}

impl IntoResponse for RouteErrorResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status_code, Json(self)).into_response()
    }
}

pub(crate) async fn route_not_found(
    OriginalUri(original_uri): OriginalUri,
    req: Request,
) -> impl IntoResponse {
    RouteErrorResponse::not_found(req.method(), original_uri.path())
}

pub(crate) async fn schema<T: JsonSchema + Serialize>() -> impl IntoResponse {
    Json(schema_for!(T))
}
