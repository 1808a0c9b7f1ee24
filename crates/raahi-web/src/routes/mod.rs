use axum::{middleware, routing::on, Router};
use tower_http::trace::TraceLayer;

pub mod internal;
pub mod location;
pub mod realtime;
pub mod rides;
pub mod socket;

use crate::{
    auth::require_internal_secret,
    common::{route_not_found, METHOD_FILTER_ALL},
    WebState,
};

pub fn routes(state: WebState) -> Router {
    Router::new()
        .merge(rides::routes())
        .merge(realtime::routes())
        .merge(location::routes())
        .merge(socket::routes())
        .nest("/internal", internal::routes())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_secret,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
        .fallback_service(on(METHOD_FILTER_ALL, route_not_found))
}
