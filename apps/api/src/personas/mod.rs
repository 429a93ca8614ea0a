//! Persona Registry: the roster of AI roles a session can cast.
//!
//! The registry is an explicit configuration object held in `AppState`, never a global.
//! Sessions take a `Cast` snapshot by value at creation, so edits made here only
//! affect sessions created afterwards.

pub mod handlers;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use crate::errors::AppError;
use crate::session::models::Mode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaRole {
    Moderator,
    Counselor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    pub name: String,
    pub role: PersonaRole,
    pub description: String,
    pub style: String,
    pub tone: String,
    #[serde(default)]
    pub principles: Vec<String>,
    #[serde(default)]
    pub biases: Vec<String>,
    /// 0.0 = capital preservation at all costs, 1.0 = swing for the fences.
    pub risk_tolerance: f32,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl Persona {
    /// Renders the persona into the system instruction sent with every turn it speaks.
    pub fn system_instruction(&self) -> String {
        let role_line = match self.role {
            PersonaRole::Moderator => {
                "You are the MODERATOR of this advisory board. You steer, provoke and summarize; \
                 you do not take sides."
            }
            PersonaRole::Counselor => {
                "You are a COUNSELOR on this advisory board. You argue from your own perspective \
                 and defend it with reasons."
            }
        };

        let mut out = format!(
            "{role_line}\n\nNAME: {}\nWHO YOU ARE: {}\nSTYLE: {}\nTONE: {}\nRISK TOLERANCE: {:.1} ({})\n",
            self.name,
            self.description,
            self.style,
            self.tone,
            self.risk_tolerance,
            risk_label(self.risk_tolerance)
        );
        push_list(&mut out, "PRINCIPLES", &self.principles);
        push_list(&mut out, "KNOWN BIASES (own them openly)", &self.biases);
        push_list(&mut out, "OBJECTIVES", &self.objectives);
        push_list(&mut out, "INSTRUCTIONS", &self.instructions);
        out.push_str("\nStay in character. Keep every reply under 180 words.");
        out
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.name.trim().is_empty() {
            return Err(AppError::Validation("persona name cannot be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.risk_tolerance) {
            return Err(AppError::Validation(format!(
                "risk_tolerance must be within [0, 1], got {}",
                self.risk_tolerance
            )));
        }
        Ok(())
    }
}

fn risk_label(risk: f32) -> &'static str {
    match risk {
        r if r < 0.34 => "conservative",
        r if r < 0.67 => "balanced",
        _ => "aggressive",
    }
}

fn push_list(out: &mut String, title: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("{title}:\n"));
    for item in items {
        out.push_str(&format!("- {item}\n"));
    }
}

/// The personas taking part in one session, copied out of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    pub moderator: Persona,
    pub counselors: Vec<Persona>,
}

impl Cast {
    pub fn find(&self, persona_id: &str) -> Option<&Persona> {
        std::iter::once(&self.moderator)
            .chain(self.counselors.iter())
            .find(|p| p.id == persona_id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Persona> {
        std::iter::once(&self.moderator)
            .chain(self.counselors.iter())
            .find(|p| p.name == name)
    }

    pub fn counselor_index(&self, persona_id: &str) -> Option<usize> {
        self.counselors.iter().position(|p| p.id == persona_id)
    }

    pub fn names(&self) -> Vec<String> {
        std::iter::once(&self.moderator)
            .chain(self.counselors.iter())
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Editable persona roster shared across handlers.
#[derive(Clone)]
pub struct PersonaRegistry {
    personas: Arc<RwLock<Vec<Persona>>>,
}

impl PersonaRegistry {
    pub fn new(personas: Vec<Persona>) -> Result<Self> {
        let moderators = personas
            .iter()
            .filter(|p| p.role == PersonaRole::Moderator)
            .count();
        let counselors = personas.len() - moderators;
        if moderators == 0 {
            bail!("persona roster needs at least one moderator");
        }
        if counselors < 2 {
            bail!("persona roster needs at least two counselors, found {counselors}");
        }
        for p in &personas {
            p.validate()
                .map_err(|e| anyhow::anyhow!("persona '{}': {e}", p.id))?;
        }
        Ok(Self {
            personas: Arc::new(RwLock::new(personas)),
        })
    }

    /// Loads the roster from `path` when given, otherwise uses the built-in one.
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read persona roster at {path}"))?;
                let personas: Vec<Persona> = serde_json::from_str(&raw)
                    .with_context(|| format!("Persona roster at {path} is not valid JSON"))?;
                info!("Loaded {} personas from {path}", personas.len());
                Self::new(personas)
            }
            None => Self::new(default_personas()),
        }
    }

    pub async fn list(&self) -> Vec<Persona> {
        self.personas.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Persona> {
        self.personas.read().await.iter().find(|p| p.id == id).cloned()
    }

    /// Replaces a persona definition. The id and role of an existing persona are fixed.
    pub async fn update(&self, id: &str, mut persona: Persona) -> Result<Persona, AppError> {
        persona.validate()?;
        let mut guard = self.personas.write().await;
        let slot = guard
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Persona {id} not found")))?;
        if persona.role != slot.role {
            return Err(AppError::Validation(format!(
                "persona {id} cannot change role"
            )));
        }
        persona.id = slot.id.clone();
        *slot = persona.clone();
        info!("Persona {id} updated");
        Ok(persona)
    }

    /// Builds the cast for a new session. When `counselor_ids` is empty the first
    /// counselors of the roster are used.
    pub async fn cast(&self, mode: Mode, counselor_ids: &[String]) -> Result<Cast, AppError> {
        let needed = mode.counselor_count();
        let roster = self.personas.read().await;

        let moderator = roster
            .iter()
            .find(|p| p.role == PersonaRole::Moderator)
            .cloned()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("roster has no moderator")))?;

        let counselors: Vec<Persona> = if counselor_ids.is_empty() {
            roster
                .iter()
                .filter(|p| p.role == PersonaRole::Counselor)
                .take(needed)
                .cloned()
                .collect()
        } else {
            if counselor_ids.len() != needed {
                return Err(AppError::Validation(format!(
                    "{mode:?} mode takes {needed} counselor(s), got {}",
                    counselor_ids.len()
                )));
            }
            if needed == 2 && counselor_ids[0] == counselor_ids[1] {
                return Err(AppError::Validation(
                    "mesa mode needs two different counselors".to_string(),
                ));
            }
            counselor_ids
                .iter()
                .map(|id| {
                    roster
                        .iter()
                        .find(|p| &p.id == id && p.role == PersonaRole::Counselor)
                        .cloned()
                        .ok_or_else(|| AppError::Validation(format!("Unknown counselor {id}")))
                })
                .collect::<Result<_, _>>()?
        };

        if counselors.len() != needed {
            return Err(AppError::Internal(anyhow::anyhow!(
                "roster has {} counselors, {mode:?} mode needs {needed}",
                counselors.len()
            )));
        }

        Ok(Cast {
            moderator,
            counselors,
        })
    }
}

#[allow(clippy::too_many_arguments)]
fn persona(
    id: &str,
    name: &str,
    role: PersonaRole,
    description: &str,
    style: &str,
    tone: &str,
    risk_tolerance: f32,
    principles: &[&str],
    biases: &[&str],
) -> Persona {
    Persona {
        id: id.to_string(),
        name: name.to_string(),
        role,
        description: description.to_string(),
        style: style.to_string(),
        tone: tone.to_string(),
        principles: principles.iter().map(|s| s.to_string()).collect(),
        biases: biases.iter().map(|s| s.to_string()).collect(),
        risk_tolerance,
        objectives: Vec::new(),
        instructions: Vec::new(),
    }
}

/// The built-in roster: one moderator and three counselors.
pub fn default_personas() -> Vec<Persona> {
    let mut moderator = persona(
        "moderator",
        "Helena",
        PersonaRole::Moderator,
        "Former operating partner who has chaired hundreds of board meetings.",
        "Socratic, structured, asks one sharp question at a time",
        "calm and direct",
        0.5,
        &[
            "The founder owns the decision",
            "Name the trade-off explicitly",
            "Time-box every discussion",
        ],
        &["Prefers reversible decisions"],
    );
    moderator.objectives = vec![
        "Get to a decision the founder can act on this week".to_string(),
        "Surface the strongest objection before the decision is locked".to_string(),
    ];

    vec![
        moderator,
        persona(
            "investor",
            "Rafael",
            PersonaRole::Counselor,
            "Seed investor who thinks in markets, timing and capital efficiency.",
            "numbers first, pattern matching from portfolio companies",
            "blunt",
            0.8,
            &["Speed beats perfection", "Default alive or default dead"],
            &["Overweights market size", "Impatient with slow validation"],
        ),
        persona(
            "operator",
            "Bea",
            PersonaRole::Counselor,
            "Two-time COO who has scaled teams from 5 to 200 people.",
            "concrete, operational, asks who does what by when",
            "warm but exacting",
            0.3,
            &["Execution eats strategy", "Protect the team's focus"],
            &["Underestimates upside of bold bets"],
        ),
        persona(
            "customer",
            "Otto",
            PersonaRole::Counselor,
            "Product lead obsessed with customer evidence over opinion.",
            "asks for evidence, quotes what users actually do",
            "curious and skeptical",
            0.5,
            &["Talk to users before building", "Evidence over intuition"],
            &["Discounts decisions that lack user data"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_roster_is_valid() {
        assert!(PersonaRegistry::new(default_personas()).is_ok());
    }

    #[test]
    fn test_roster_without_moderator_is_rejected() {
        let counselors: Vec<Persona> = default_personas()
            .into_iter()
            .filter(|p| p.role == PersonaRole::Counselor)
            .collect();
        assert!(PersonaRegistry::new(counselors).is_err());
    }

    #[test]
    fn test_system_instruction_mentions_profile() {
        let p = &default_personas()[1];
        let text = p.system_instruction();
        assert!(text.contains("COUNSELOR"));
        assert!(text.contains("Rafael"));
        assert!(text.contains("aggressive"));
        assert!(text.contains("- Speed beats perfection"));
    }

    #[tokio::test]
    async fn test_cast_defaults_pick_first_counselors() {
        let registry = PersonaRegistry::new(default_personas()).unwrap();
        let cast = registry.cast(Mode::Mesa, &[]).await.unwrap();
        assert_eq!(cast.moderator.id, "moderator");
        assert_eq!(cast.counselors.len(), 2);
        assert_eq!(cast.counselors[0].id, "investor");
    }

    #[tokio::test]
    async fn test_cast_rejects_wrong_counselor_count() {
        let registry = PersonaRegistry::new(default_personas()).unwrap();
        let err = registry
            .cast(Mode::Solo, &["investor".to_string(), "operator".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cast_rejects_moderator_as_counselor() {
        let registry = PersonaRegistry::new(default_personas()).unwrap();
        let err = registry
            .cast(Mode::Solo, &["moderator".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_cast_is_a_snapshot() {
        let registry = PersonaRegistry::new(default_personas()).unwrap();
        let cast = registry.cast(Mode::Solo, &[]).await.unwrap();

        let mut edited = registry.get("investor").await.unwrap();
        edited.tone = "gentle".to_string();
        registry.update("investor", edited).await.unwrap();

        assert_eq!(cast.counselors[0].tone, "blunt");
        assert_eq!(registry.get("investor").await.unwrap().tone, "gentle");
    }

    #[tokio::test]
    async fn test_update_rejects_out_of_range_risk() {
        let registry = PersonaRegistry::new(default_personas()).unwrap();
        let mut edited = registry.get("operator").await.unwrap();
        edited.risk_tolerance = 1.5;
        assert!(registry.update("operator", edited).await.is_err());
    }

    #[tokio::test]
    async fn test_update_rejects_role_change() {
        let registry = PersonaRegistry::new(default_personas()).unwrap();
        let mut edited = registry.get("operator").await.unwrap();
        edited.role = PersonaRole::Moderator;
        assert!(registry.update("operator", edited).await.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = serde_json::to_string(&default_personas()).unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let path = file.path().to_str().unwrap().to_string();
        assert!(PersonaRegistry::load(Some(&path)).is_ok());
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        assert!(PersonaRegistry::load(Some("/nonexistent/personas.json")).is_err());
    }
}
