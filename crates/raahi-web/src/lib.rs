//! HTTP front door for the dispatch core (§6). Mirrors
//! `crates/web`'s `lib.rs` shape — a `WebState` handed to `axum::Router`,
//! a `start_web_server` entry point — minus the static-file fallback
//! and HATEOAS layer, neither of which this core's surface needs.

use std::sync::Arc;

use axum::Router;
use raahi_config::Config;
use raahi_dispatch_core::Dispatcher;
use raahi_eventbus::EventBus;
use raahi_transports::{SocketTransport, SseTransport};
use tokio::net::TcpListener;

pub mod auth;
pub mod common;
pub mod routes;
pub mod webhook;

#[derive(Clone)]
pub struct WebState {
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
    pub sse: Arc<SseTransport>,
    pub socket: Arc<SocketTransport>,
    pub events: Arc<EventBus>,
}

pub async fn start_web_server(state: WebState) -> std::io::Result<()> {
    let port = state.config.sse_port;
    let routes = routes::routes(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    log::info!("raahi-web listening on :{port}");
    axum::serve(listener, routes.into_make_service()).await?;

    Ok(())
}
