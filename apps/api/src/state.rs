use std::sync::Arc;

use aws_sdk_s3::Client as S3Client;
use sqlx::PgPool;

use crate::config::Config;
use crate::events::ChangeFeed;
use crate::llm_client::TextGenerator;
use crate::personas::PersonaRegistry;
use crate::session::guard::TurnGuard;
use crate::session::store::DocumentDefaults;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub s3: S3Client,
    /// Pluggable text generator. Default: LlmClient against the Anthropic API.
    pub llm: Arc<dyn TextGenerator>,
    pub config: Config,
    /// Editable persona roster. Sessions snapshot their cast from it at creation.
    pub personas: PersonaRegistry,
    /// At most one generation call per session at a time.
    pub turn_guard: Arc<dyn TurnGuard>,
    pub events: ChangeFeed,
}

impl AppState {
    pub fn document_defaults(&self) -> DocumentDefaults {
        DocumentDefaults {
            model: self.config.default_model.clone(),
            max_rounds: self.config.max_debate_rounds,
        }
    }
}
