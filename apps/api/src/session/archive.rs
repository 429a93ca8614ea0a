use aws_sdk_s3::primitives::ByteStream;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::session::models::{Role, Session};

pub fn archive_key(owner_id: Uuid, session_id: Uuid) -> String {
    format!("sessions/{owner_id}/{session_id}.md")
}

/// Uploads the rendered transcript of a closed session. Returns the S3 key.
pub async fn archive_transcript(
    s3: &aws_sdk_s3::Client,
    s3_bucket: &str,
    session: &Session,
) -> Result<String, AppError> {
    let key = archive_key(session.owner_id, session.id);
    let md = render_session_to_md(session);

    s3.put_object()
        .bucket(s3_bucket)
        .key(&key)
        .body(ByteStream::from(md.into_bytes()))
        .content_type("text/markdown")
        .send()
        .await
        .map_err(|e| AppError::S3(format!("upload of {key} failed: {e}")))?;

    info!("Archived session transcript to s3://{}/{}", s3_bucket, key);
    Ok(key)
}

/// Renders a session as a markdown meeting record.
pub fn render_session_to_md(session: &Session) -> String {
    let mut md = format!("# {} — Session {}\n\n", session.topic(), session.id);
    md.push_str(&format!("- **Mode:** {}\n", session.mode.as_str()));
    md.push_str(&format!("- **Board:** {}\n", session.cast.names().join(", ")));
    md.push_str(&format!("- **Opened:** {}\n", session.created_at.to_rfc3339()));
    if let Some(closure) = &session.closure {
        md.push_str(&format!(
            "- **Closed:** {} ({:?})\n",
            closure.closed_at.to_rfc3339(),
            closure.reason
        ));
    }
    md.push('\n');

    if let Some(ctx) = &session.h_context {
        md.push_str("## Context\n\n");
        if !ctx.stakes.is_empty() {
            md.push_str(&format!("- **Stakes:** {}\n", ctx.stakes));
        }
        for c in &ctx.constraints {
            md.push_str(&format!("- **Constraint:** {c}\n"));
        }
        for f in &ctx.facts {
            md.push_str(&format!("- **Fact:** {f}\n"));
        }
        md.push('\n');
    }

    let mut current_phase = None;
    for m in &session.messages {
        if current_phase != Some(m.phase) {
            md.push_str(&format!("## Phase {} — {}\n\n", m.phase, m.phase.label()));
            current_phase = Some(m.phase);
        }
        let who = match m.role {
            Role::User => "Founder".to_string(),
            Role::Assistant => m.speaker_name.clone(),
        };
        md.push_str(&format!("**{who}** ({})\n\n{}\n\n", m.timestamp.format("%H:%M"), m.content));
    }

    if let Some(d) = &session.captured {
        md.push_str("## Decision\n\n");
        md.push_str(&format!("- **Decision:** {}\n", d.decision_text));
        md.push_str(&format!("- **Status:** {:?}\n", d.status));
        if !d.reasoning.is_empty() {
            md.push_str(&format!("- **Reasoning:** {}\n", d.reasoning));
        }
    }
    if let Some(a) = &session.action {
        md.push_str(&format!("- **Action:** {}\n", a.action));
        md.push_str(&format!("- **Review on:** {}\n", a.review_date));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::machine::tests::{say, session_in_debate};
    use crate::session::models::Mode;
    use aws_sdk_s3::config::{retry::RetryConfig, BehaviorVersion, Credentials, Region};
    use chrono::Utc;

    #[test]
    fn test_archive_key_layout() {
        let id = Uuid::nil();
        assert_eq!(
            archive_key(id, id),
            "sessions/00000000-0000-0000-0000-000000000000/00000000-0000-0000-0000-000000000000.md"
        );
    }

    #[test]
    fn test_markdown_groups_messages_by_phase() {
        let mut s = session_in_debate(Mode::Solo, 1);
        say(&mut s, Some("investor"), "Raise while the market is hot");
        s.enforce_round_cap(Utc::now());
        s.defer(None, Utc::now()).unwrap();

        let md = render_session_to_md(&s);
        assert!(md.starts_with("# Raise seed now or later"));
        assert!(md.contains("## Phase H — Clarify"));
        assert!(md.contains("## Phase O — Debate"));
        assert!(md.contains("**Rafael**"));
        assert!(md.contains("- **Decision:** Deferred: Raise seed now or later"));
        assert!(md.contains("(Deferred)"));
    }

    #[tokio::test]
    async fn test_upload_failure_is_a_storage_error() {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url("http://127.0.0.1:1")
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .force_path_style(true)
            .build();
        let s3 = aws_sdk_s3::Client::from_conf(config);
        let s = session_in_debate(Mode::Solo, 1);

        let err = archive_transcript(&s3, "holdai-test", &s).await.unwrap_err();
        assert!(matches!(err, AppError::S3(msg) if msg.contains("sessions/")));
    }
}
