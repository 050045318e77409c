use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use feed::FeedConfig;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_path: PathBuf,
    pub feed: FeedConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let default_addr: SocketAddr = ([127, 0, 0, 1], 9200).into();
        let addr = match env::var("PROXIMA_ADDR") {
            Ok(raw) => raw.parse().unwrap_or_else(|err| {
                warn!("invalid PROXIMA_ADDR {raw:?} ({err}), using {default_addr}");
                default_addr
            }),
            Err(_) => default_addr,
        };

        let defaults = FeedConfig::default();
        let feed = FeedConfig {
            max_viewport_span: env_var_f64("PROXIMA_MAX_VIEWPORT_SPAN", defaults.max_viewport_span),
            expansion_factor: env_var_f64("PROXIMA_EXPANSION_FACTOR", defaults.expansion_factor),
            page_size: env_var_usize("PROXIMA_PAGE_SIZE", defaults.page_size),
            leaderboard_limit: env_var_usize(
                "PROXIMA_LEADERBOARD_LIMIT",
                defaults.leaderboard_limit,
            ),
        };

        Self {
            addr,
            data_path: env::var("PROXIMA_DATA")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/locations.json")),
            feed,
        }
    }
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f64| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}
