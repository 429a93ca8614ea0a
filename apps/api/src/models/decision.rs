use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::decisions::models::Decision;

#[derive(Debug, Clone, FromRow)]
pub struct DecisionRow {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub decision: String,
    pub context: String,
    pub status: String,
    pub outcome: Option<String>,
    pub meeting_id: Option<Uuid>,
    pub personas: Vec<String>,
    pub project_id: Option<Uuid>,
    pub action: Option<String>,
    pub review_date: Option<NaiveDate>,
    pub revises: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DecisionRow> for Decision {
    type Error = anyhow::Error;

    fn try_from(row: DecisionRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(anyhow::Error::msg)?;
        let outcome = row
            .outcome
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(anyhow::Error::msg)?;
        let decision = Decision {
            id: row.id,
            owner_id: row.owner_id,
            decision: row.decision,
            context: row.context,
            status,
            outcome,
            meeting_id: row.meeting_id,
            personas: row.personas,
            project_id: row.project_id,
            action: row.action,
            review_date: row.review_date,
            revises: row.revises,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };
        if !decision.invariant_holds() {
            anyhow::bail!(
                "decision {} has status {} with outcome {:?}",
                decision.id,
                decision.status,
                decision.outcome
            );
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decisions::models::{DecisionStatus, Outcome};

    fn row(status: &str, outcome: Option<&str>) -> DecisionRow {
        let now = Utc::now();
        DecisionRow {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            decision: "Launch beta".to_string(),
            context: String::new(),
            status: status.to_string(),
            outcome: outcome.map(str::to_string),
            meeting_id: None,
            personas: vec!["Helena".to_string()],
            project_id: None,
            action: None,
            review_date: None,
            revises: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_row_converts() {
        let d = Decision::try_from(row("revisited", Some("failure"))).unwrap();
        assert_eq!(d.status, DecisionStatus::Revisited);
        assert_eq!(d.outcome, Some(Outcome::Failure));
    }

    #[test]
    fn test_row_with_broken_invariant_is_rejected() {
        assert!(Decision::try_from(row("taken", Some("success"))).is_err());
        assert!(Decision::try_from(row("revisited", None)).is_err());
        assert!(Decision::try_from(row("archived", None)).is_err());
    }
}
