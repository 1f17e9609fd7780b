#![allow(dead_code)]

use axum::http::StatusCode;
use axum::Router;
use resolver::config::{Auth, AuthMode, Config, Global, Logging, Metrics, ResolverOptions, StoreBackend, StoreConfig, ToolkitConfig};
use resolver::server::{build_data_entry_app, build_resolver_app, build_state};

pub fn base_config() -> Config {
    Config {
        version: "1".to_string(),
        global: Global {
            listen: "127.0.0.1:0".to_string(),
            data_entry_listen: "127.0.0.1:0".to_string(),
            auth: Auth {
                mode: AuthMode::None,
                keys: None,
            },
            fqdn: "example.com".to_string(),
        },
        toolkit: ToolkitConfig::default(),
        resolver: ResolverOptions::default(),
        store: StoreConfig {
            backend: StoreBackend::Memory,
            path: None,
        },
        logging: Logging {
            level: "info".to_string(),
            dir: None,
        },
        metrics: Metrics {
            enabled: true,
            path: "/metrics".to_string(),
        },
    }
}

pub fn resolver_app(config: Config) -> Router {
    let state = build_state(config).expect("build_state");
    build_resolver_app(state)
}

pub fn data_entry_app(config: Config) -> Router {
    let state = build_state(config).expect("build_state");
    build_data_entry_app(state)
}

/// Builds both apps over the same shared state, for tests that write via
/// the data-entry surface and then read back via the resolver surface.
pub fn apps(config: Config) -> (Router, Router) {
    let state = build_state(config).expect("build_state");
    (build_resolver_app(state.clone()), build_data_entry_app(state))
}

pub async fn response_text(resp: axum::response::Response) -> (StatusCode, String) {
    let status = resp.status();
    let body_bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body_text = String::from_utf8(body_bytes.to_vec()).unwrap();
    (status, body_text)
}

pub fn headers_of(resp: &axum::response::Response) -> &axum::http::HeaderMap {
    resp.headers()
}
