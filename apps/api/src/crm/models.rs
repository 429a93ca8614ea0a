use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    #[default]
    Idea,
    Validation,
    Mvp,
    Growth,
    Scale,
}

impl ProjectStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStage::Idea => "idea",
            ProjectStage::Validation => "validation",
            ProjectStage::Mvp => "mvp",
            ProjectStage::Growth => "growth",
            ProjectStage::Scale => "scale",
        }
    }
}

impl fmt::Display for ProjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idea" => Ok(ProjectStage::Idea),
            "validation" => Ok(ProjectStage::Validation),
            "mvp" => Ok(ProjectStage::Mvp),
            "growth" => Ok(ProjectStage::Growth),
            "scale" => Ok(ProjectStage::Scale),
            other => Err(format!("unknown project stage '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub stage: ProjectStage,
    pub description: String,
    pub problem: String,
    pub audience: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Editable fields of a project, as sent by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInput {
    pub name: String,
    #[serde(default)]
    pub stage: ProjectStage,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub notes: String,
}

impl ProjectInput {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("project name cannot be empty".to_string()));
        }
        Ok(())
    }
}

impl Project {
    pub fn new(owner_id: Uuid, input: ProjectInput, now: DateTime<Utc>) -> Result<Self, AppError> {
        input.validate()?;
        Ok(Project {
            id: Uuid::new_v4(),
            owner_id,
            name: input.name.trim().to_string(),
            stage: input.stage,
            description: input.description,
            problem: input.problem,
            audience: input.audience,
            notes: input.notes,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn apply(&mut self, input: ProjectInput, now: DateTime<Utc>) -> Result<(), AppError> {
        input.validate()?;
        self.name = input.name.trim().to_string();
        self.stage = input.stage;
        self.description = input.description;
        self.problem = input.problem;
        self.audience = input.audience;
        self.notes = input.notes;
        self.updated_at = now;
        Ok(())
    }
}

/// The one metric the founder is steering the company by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NorthStar {
    pub owner_id: Uuid,
    pub statement: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub horizon: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NorthStarInput {
    pub statement: String,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub horizon: String,
}

impl NorthStar {
    /// Single line fed into session prompts.
    pub fn prompt_line(&self) -> String {
        let mut line = self.statement.trim().to_string();
        if !self.metric.trim().is_empty() {
            line.push_str(&format!(" (metric: {})", self.metric.trim()));
        }
        if !self.horizon.trim().is_empty() {
            line.push_str(&format!(" by {}", self.horizon.trim()));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str) -> ProjectInput {
        serde_json::from_value(serde_json::json!({ "name": name })).unwrap()
    }

    #[test]
    fn test_project_input_defaults() {
        let p = Project::new(Uuid::new_v4(), input("Acme"), Utc::now()).unwrap();
        assert_eq!(p.stage, ProjectStage::Idea);
        assert!(p.notes.is_empty());
    }

    #[test]
    fn test_project_requires_name() {
        assert!(Project::new(Uuid::new_v4(), input("  "), Utc::now()).is_err());
    }

    #[test]
    fn test_stage_round_trips_through_str() {
        for stage in ["idea", "validation", "mvp", "growth", "scale"] {
            assert_eq!(stage.parse::<ProjectStage>().unwrap().as_str(), stage);
        }
        assert!("ipo".parse::<ProjectStage>().is_err());
    }

    #[test]
    fn test_north_star_prompt_line() {
        let ns = NorthStar {
            owner_id: Uuid::new_v4(),
            statement: "Become the default tool for indie founders".to_string(),
            metric: "weekly active teams".to_string(),
            horizon: "end of 2027".to_string(),
            updated_at: Utc::now(),
        };
        assert_eq!(
            ns.prompt_line(),
            "Become the default tool for indie founders (metric: weekly active teams) by end of 2027"
        );
    }
}
