use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub schema_version: i32,
    pub phase: String,
    pub mode: String,
    pub document: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Listing projection: no transcript.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SessionListRow {
    pub id: Uuid,
    pub phase: String,
    pub mode: String,
    pub topic: Option<String>,
    pub decision_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
