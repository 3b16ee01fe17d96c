//! gd-daemon entry point.
//!
//! Sets up tracing, loads config and secrets, connects to Postgres, builds the
//! shared state, wires middleware and starts the HTTP server. Handlers live in
//! `routes.rs`; shared state types in `state.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use gd_cart::CartService;
use gd_daemon::{routes, state};
use gd_rye::RyeClient;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

const ENV_DAEMON_ADDR: &str = "GIFTDRIVE_DAEMON_ADDR";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let loaded = gd_config::load_from_env().context("load config")?;
    let settings = loaded.settings()?;
    let mode = settings.config_mode()?;

    let unused = gd_config::report_unused_keys(
        mode,
        &loaded.config_json,
        gd_config::UnusedKeyPolicy::Warn,
    )?;
    if !unused.is_clean() {
        warn!(keys = ?unused.unused_leaf_pointers, "config contains keys no code reads");
    }

    let secrets = gd_config::resolve_secrets_for_mode(&loaded.config_json, mode)?;
    let api_key = secrets.rye_api_key.clone().with_context(|| {
        format!(
            "commerce api key missing: set env var '{}'",
            secrets.rye_api_key_var
        )
    })?;
    let rye = RyeClient::new(
        settings.rye.endpoint.clone(),
        api_key,
        settings.rye.shopper_ip.clone(),
        Duration::from_secs(settings.rye.timeout_secs),
    )
    .context("build commerce client")?;

    let pool = gd_db::connect_from_env().await?;
    gd_db::migrate(&pool).await?;

    let cart = CartService::new(pool, Arc::new(rye), settings.cart.clone());
    let shared = Arc::new(state::AppState::with_config(
        cart,
        mode.as_str(),
        Some(loaded.config_hash.clone()),
    ));

    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!(
        mode = mode.as_str(),
        config_hash = %loaded.config_hash,
        endpoint = %settings.rye.endpoint,
        "gd-daemon listening on http://{}",
        addr
    );

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var(ENV_DAEMON_ADDR).ok()?.parse().ok()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed; shutting down");
    }
    info!("shutdown requested");
}

/// CORS: allow only localhost origins (the donor storefront in dev).
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
}
