//! Live updates for an owner's collections, published on Redis pub/sub.
//!
//! Subscribers listen on `holdai:<owner>:<collection>`. Publishing is best
//! effort: a failed publish is logged and the write that caused it still succeeds.

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Projects,
    Decisions,
    NorthStar,
    Sessions,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Projects => "projects",
            Collection::Decisions => "decisions",
            Collection::NorthStar => "north_star",
            Collection::Sessions => "sessions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeEvent {
    pub collection: Collection,
    pub id: String,
    pub op: ChangeOp,
}

pub fn channel(owner_id: Uuid, collection: Collection) -> String {
    format!("holdai:{owner_id}:{}", collection.as_str())
}

#[derive(Clone)]
pub struct ChangeFeed {
    redis: redis::Client,
}

impl ChangeFeed {
    pub fn new(redis: redis::Client) -> Self {
        Self { redis }
    }

    pub async fn publish(
        &self,
        owner_id: Uuid,
        collection: Collection,
        id: impl ToString,
        op: ChangeOp,
    ) {
        let event = ChangeEvent {
            collection,
            id: id.to_string(),
            op,
        };
        let channel = channel(owner_id, collection);
        if let Err(e) = self.try_publish(&channel, &event).await {
            warn!("Failed to publish {op:?} on {channel}: {e}");
        }
    }

    async fn try_publish(&self, channel: &str, event: &ChangeEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event)?;
        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        debug!("Published {:?} {} on {channel} to {receivers} subscriber(s)", event.op, event.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_is_scoped_to_owner_and_collection() {
        let owner = Uuid::nil();
        assert_eq!(
            channel(owner, Collection::NorthStar),
            "holdai:00000000-0000-0000-0000-000000000000:north_star"
        );
    }

    #[test]
    fn test_event_payload_shape() {
        let event = ChangeEvent {
            collection: Collection::Decisions,
            id: "42".to_string(),
            op: ChangeOp::Deleted,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"collection": "decisions", "id": "42", "op": "deleted"})
        );
    }

    #[tokio::test]
    async fn test_publish_failure_is_swallowed() {
        // nothing listens on port 1
        let feed = ChangeFeed::new(redis::Client::open("redis://127.0.0.1:1/").unwrap());
        feed.publish(Uuid::new_v4(), Collection::Projects, "p1", ChangeOp::Created)
            .await;
    }
}
