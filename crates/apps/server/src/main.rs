use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod locations;
mod ws_viewport;

use config::ServerConfig;
use locations::LocationsStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<LocationsStore>,
    pub config: Arc<ServerConfig>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::from_env();
    info!(
        "feed config: max_viewport_span={} expansion_factor={} page_size={} leaderboard_limit={}",
        config.feed.max_viewport_span,
        config.feed.expansion_factor,
        config.feed.page_size,
        config.feed.leaderboard_limit
    );

    let store = match LocationsStore::open(&config.data_path).await {
        Ok(store) => store,
        Err(err) => {
            error!("failed to open {}: {err}", config.data_path.display());
            std::process::exit(1);
        }
    };

    let addr = config.addr;
    let data_path = config.data_path.clone();
    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/locations", post(locations::add_location))
        .route("/locations/within", get(locations::list_within))
        .route("/locations/near", get(locations::list_near))
        .route("/locations/count", get(locations::count_locations))
        .route("/leaderboard", get(locations::leaderboard))
        .route("/profiles/:id", get(locations::get_profile))
        .route("/ws", get(ws_viewport::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "location feed server listening on http://{addr} (data: {})",
        data_path.display()
    );
    if let Err(err) = axum::serve(listener, app).await {
        error!("server error: {err}");
    }
}

async fn healthz() -> Response {
    (StatusCode::OK, "ok").into_response()
}
