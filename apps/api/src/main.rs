mod auth;
mod config;
mod crm;
mod db;
mod decisions;
mod errors;
mod events;
mod llm_client;
mod models;
mod personas;
mod routes;
mod session;
mod state;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::events::ChangeFeed;
use crate::llm_client::LlmClient;
use crate::personas::PersonaRegistry;
use crate::routes::build_router;
use crate::session::guard::{GuardBackend, LocalTurnGuard, RedisTurnGuard, TurnGuard};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting HoldAI API v{}", env!("CARGO_PKG_VERSION"));

    // PostgreSQL (runs pending migrations)
    let db = create_pool(&config.database_url).await?;

    // Redis backs the per-session turn lock and the change feed
    let redis = redis::Client::open(config.redis_url.clone())?;
    info!("Redis client initialized");

    let s3 = build_s3_client(&config).await;
    info!("S3 client initialized");

    let llm = Arc::new(LlmClient::new(config.anthropic_api_key.clone())?);
    info!("LLM client initialized (default model: {})", config.default_model);

    let personas = PersonaRegistry::load(config.personas_path.as_deref())?;
    info!(
        "Persona roster loaded from {}",
        config.personas_path.as_deref().unwrap_or("built-in defaults")
    );

    let turn_guard: Arc<dyn TurnGuard> = match config.turn_guard {
        GuardBackend::Redis => Arc::new(RedisTurnGuard::new(
            redis.clone(),
            Duration::from_secs(config.turn_lock_ttl_secs),
        )),
        GuardBackend::Local => Arc::new(LocalTurnGuard::new()),
    };
    info!("Turn guard: {:?}", config.turn_guard);

    let state = AppState {
        db,
        s3,
        llm,
        config: config.clone(),
        personas,
        turn_guard,
        events: ChangeFeed::new(redis),
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins to the web app host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "holdai-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
