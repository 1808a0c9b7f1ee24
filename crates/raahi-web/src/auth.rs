//! Service-boundary auth (§6 "Auth" column). Issuing tokens for
//! passengers/drivers is an external collaborator's job (§1
//! Non-goals); this core only needs to trust that the caller in front
//! of it — typically an API gateway — has already done that and is
//! relaying the verified participant id. Two headers carry that: a
//! shared secret proving the caller is the trusted gateway, and the
//! participant id/type it vouches for. Modeled on `base_url_middleware`'s
//! shape (extract from headers, stash an `Extension`, call `next`).

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::IntoResponse,
};

use crate::common::RouteErrorResponse;
use crate::WebState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerType {
    Passenger,
    Driver,
}

#[derive(Debug, Clone)]
pub struct CallerContext {
    pub caller_type: CallerType,
    pub caller_id: String,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name)?.to_str().ok().map(str::to_owned)
}

pub async fn require_internal_secret(
    State(state): State<WebState>,
    req: Request,
    next: Next,
) -> impl IntoResponse {
    let provided = header(req.headers(), "x-internal-secret");
    if provided.as_deref() != Some(state.config.internal_shared_secret.as_str()) {
        return RouteErrorResponse::unauthorised("missing or invalid x-internal-secret")
            .into_response();
    }

    let caller_type = match header(req.headers(), "x-caller-type").as_deref() {
        Some("passenger") => Some(CallerType::Passenger),
        Some("driver") => Some(CallerType::Driver),
        _ => None,
    };
    let caller_id = header(req.headers(), "x-caller-id");

    let mut req = req;
    if let (Some(caller_type), Some(caller_id)) = (caller_type, caller_id) {
        req.extensions_mut().insert(Arc::new(CallerContext {
            caller_type,
            caller_id,
        }));
    }

    next.run(req).await.into_response()
}
