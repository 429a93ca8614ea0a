use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::crm::models::{NorthStar, Project};

#[derive(Debug, Clone, FromRow)]
pub struct ProjectRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub stage: String,
    pub description: String,
    pub problem: String,
    pub audience: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<ProjectRow> for Project {
    type Error = anyhow::Error;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        Ok(Project {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            stage: row.stage.parse().map_err(anyhow::Error::msg)?,
            description: row.description,
            problem: row.problem,
            audience: row.audience,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct NorthStarRow {
    pub owner_id: Uuid,
    pub statement: String,
    pub metric: String,
    pub horizon: String,
    pub updated_at: DateTime<Utc>,
}

impl From<NorthStarRow> for NorthStar {
    fn from(row: NorthStarRow) -> Self {
        NorthStar {
            owner_id: row.owner_id,
            statement: row.statement,
            metric: row.metric,
            horizon: row.horizon,
            updated_at: row.updated_at,
        }
    }
}
