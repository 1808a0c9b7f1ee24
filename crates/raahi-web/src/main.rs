//! Binary entry point. Mirrors `crates/web/src/main.rs`'s shape — load
//! config, connect + hydrate storage, wire the collaborators, serve —
//! but with three listeners instead of one, since the realtime fan-out
//! here spans HTTP (SSE + socket) and a standalone broker protocol.

use std::sync::Arc;

use raahi_config::Config;
use raahi_db::{connect, hydrate, PgEarningsSink, PgUserIdResolver, StateSync};
use raahi_dispatch_core::{DriverStateStore, Dispatcher, RideStateStore};
use raahi_eventbus::EventBus;
use raahi_geo::{GeoIndex, H3Resolution};
use raahi_transports::{BrokerTransport, SocketTransport, SseTransport};
use raahi_web::{start_web_server, webhook::ReqwestStatusNotifier, WebState};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Config::from_env().expect("expected dispatch core config in env");

    let pool = connect(&config.database_url)
        .await
        .expect("could not connect to database");

    let resolution = H3Resolution::try_from(config.h3_resolution)
        .expect("H3_RESOLUTION out of range");
    let geo = GeoIndex::new(resolution);

    let state_sync = StateSync::new(pool.clone());
    let drivers = Arc::new(DriverStateStore::new(
        geo,
        config.max_k_ring,
        state_sync.clone(),
        Arc::new(PgUserIdResolver::new(pool.clone())),
    ));
    let rides = Arc::new(RideStateStore::new(geo, state_sync.clone()));

    hydrate(&pool, &drivers, &rides)
        .await
        .expect("failed to hydrate state from database");

    let events = Arc::new(EventBus::new());

    let sse = Arc::new(SseTransport::new());
    let broker = BrokerTransport::new();
    let socket = SocketTransport::new();

    events.register_transport(sse.clone()).await;
    events.register_transport(broker.clone()).await;
    events.register_transport(socket.clone()).await;

    let notifier: Arc<dyn raahi_dispatch_core::notifier::StatusNotifier> =
        match &config.webhook_url {
            Some(url) => Arc::new(ReqwestStatusNotifier::new(url.clone())),
            None => Arc::new(raahi_dispatch_core::notifier::NullStatusNotifier),
        };

    let dispatcher = Arc::new(Dispatcher::with_notifier(
        drivers,
        rides,
        events.clone(),
        config.platform_commission_rate,
        Arc::new(PgEarningsSink::new(pool.clone())),
        notifier,
    ));

    let broker_tcp = TcpListener::bind(("0.0.0.0", config.broker_tcp_port))
        .await
        .expect("failed to bind broker tcp listener");
    let broker_ws = TcpListener::bind(("0.0.0.0", config.broker_ws_port))
        .await
        .expect("failed to bind broker ws listener");

    tokio::spawn(broker.clone().serve_tcp(broker_tcp));
    tokio::spawn(broker.serve_ws(broker_ws));

    let config = Arc::new(config);
    let state = WebState {
        dispatcher,
        config,
        sse,
        socket,
        events,
    };

    if let Err(why) = start_web_server(state).await {
        log::error!("web server exited: {why}");
    }
}
