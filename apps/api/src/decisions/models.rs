use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kanban lifecycle: pending → taken → revisited. Never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    Pending,
    Taken,
    Revisited,
}

impl DecisionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Taken => "taken",
            DecisionStatus::Revisited => "revisited",
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DecisionStatus::Pending),
            "taken" => Ok(DecisionStatus::Taken),
            "revisited" => Ok(DecisionStatus::Revisited),
            other => Err(format!("unknown decision status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
        }
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failure" => Ok(Outcome::Failure),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

/// A persisted, long-lived decision.
///
/// Invariant: `outcome.is_some()` ⇔ `status == Revisited`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub decision: String,
    pub context: String,
    pub status: DecisionStatus,
    pub outcome: Option<Outcome>,
    /// Session the decision came out of, if any.
    pub meeting_id: Option<Uuid>,
    pub personas: Vec<String>,
    /// Dangling ids are allowed: deleting a project only detaches its decisions.
    pub project_id: Option<Uuid>,
    pub action: Option<String>,
    pub review_date: Option<NaiveDate>,
    /// Earlier decision this one revises.
    pub revises: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    pub fn invariant_holds(&self) -> bool {
        self.outcome.is_some() == (self.status == DecisionStatus::Revisited)
    }
}
