use anyhow::{bail, Context, Result};

use crate::llm_client::{is_allowed_model, DEFAULT_MODEL};
use crate::session::guard::GuardBackend;

/// Shortest lease the turn guard accepts. Leases are renewed every third of it.
const MIN_TURN_LOCK_TTL_SECS: u64 = 3;

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
    pub anthropic_api_key: String,
    pub port: u16,
    pub rust_log: String,
    /// Model used when a session does not ask for one (or asks for an unknown one).
    pub default_model: String,
    /// Hard cap on debate rounds in phase O.
    pub max_debate_rounds: u32,
    pub turn_lock_ttl_secs: u64,
    /// `redis` (default) or `local` for a single instance without shared locking.
    pub turn_guard: GuardBackend,
    /// Optional JSON roster replacing the built-in personas.
    pub personas_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let default_model = optional_env("DEFAULT_MODEL", DEFAULT_MODEL);
        if !is_allowed_model(&default_model) {
            bail!("DEFAULT_MODEL '{default_model}' is not on the model allow-list");
        }

        let max_debate_rounds = optional_env("MAX_DEBATE_ROUNDS", "3")
            .parse::<u32>()
            .context("MAX_DEBATE_ROUNDS must be a positive integer")?;
        if max_debate_rounds == 0 {
            bail!("MAX_DEBATE_ROUNDS must be at least 1");
        }

        let turn_lock_ttl_secs = optional_env("TURN_LOCK_TTL_SECS", "180")
            .parse::<u64>()
            .context("TURN_LOCK_TTL_SECS must be a number of seconds")?;
        if turn_lock_ttl_secs < MIN_TURN_LOCK_TTL_SECS {
            bail!("TURN_LOCK_TTL_SECS must be at least {MIN_TURN_LOCK_TTL_SECS}");
        }

        let turn_guard = optional_env("TURN_GUARD", "redis")
            .parse::<GuardBackend>()
            .map_err(|e| anyhow::anyhow!("TURN_GUARD: {e}"))?;

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            redis_url: require_env("REDIS_URL")?,
            s3_bucket: require_env("S3_BUCKET")?,
            s3_endpoint: require_env("S3_ENDPOINT")?,
            aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
            aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            port: optional_env("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG", "info"),
            default_model,
            max_debate_rounds,
            turn_lock_ttl_secs,
            turn_guard,
            personas_path: std::env::var("PERSONAS_PATH").ok().filter(|p| !p.is_empty()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
