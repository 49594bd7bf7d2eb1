//! CardForge marketplace backend
//!
//! Single-binary companion service for the on-chain card game: keeps a
//! local cache of marketplace listings synchronized with the Marketplace
//! contract (backfill + live event tail + periodic reconciliation) and
//! hosts the player leaderboard. The chain stays authoritative for trades;
//! this process only ever observes.

mod api;
mod chain;
mod config;
mod leaderboard;
mod market;
mod models;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::AppState;
use chain::rpc::RpcMarketplaceChain;
use chain::MarketplaceChain;
use config::MarketConfig;
use leaderboard::{Leaderboard, RankingSink};
use market::snapshot::SnapshotStore;
use market::MarketSync;

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let cfg = MarketConfig::from_env();
    info!(port = cfg.port, "🃏 CardForge marketplace backend starting");

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let chain: Option<Arc<dyn MarketplaceChain>> = match cfg.marketplace_address {
        Some(address) => {
            info!(contract = %address, rpc = %cfg.rpc_url, "marketplace chain sync enabled");
            Some(Arc::new(RpcMarketplaceChain::new(
                http_client,
                cfg.rpc_url.clone(),
                address,
                Duration::from_millis(cfg.poll_interval_ms),
            )))
        }
        None => {
            info!("no marketplace address resolved; starting in cache-only mode");
            None
        }
    };

    let leaderboard = Arc::new(Leaderboard::new(cfg.leaderboard_path.clone()));
    leaderboard.load().await;

    let market = MarketSync::new(
        SnapshotStore::new(cfg.snapshot_path.clone()),
        chain,
        Some(leaderboard.clone() as Arc<dyn RankingSink>),
        cfg.sync_from_block,
    );

    let app_state = AppState {
        market,
        leaderboard,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api/marketplace/listings",
            get(api::marketplace::get_listings).post(api::marketplace::create_listing),
        )
        .route(
            "/api/marketplace/listings/:id",
            delete(api::marketplace::delete_listing),
        )
        .route(
            "/api/marketplace/listings/:id/purchase",
            post(api::marketplace::purchase_listing),
        )
        .route(
            "/api/marketplace/listings/:id/onchain",
            get(api::marketplace::get_onchain_listing),
        )
        .route(
            "/api/leaderboard",
            get(api::leaderboard::get_leaderboard).delete(api::leaderboard::reset_leaderboard),
        )
        .route(
            "/api/leaderboard/events",
            post(api::leaderboard::post_ranking_event),
        )
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardforge_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents), plus the manifest directory
    // for runs started from elsewhere with --manifest-path.
    let _ = dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
