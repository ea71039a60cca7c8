//! In-memory audit log for single-process deployments and tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{AuditEvent, AuditLog, AuditLogError, AuditLogFilter, AuditLogId};

/// Append-only in-memory audit log.
#[derive(Default)]
pub struct MemoryAuditLog {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(event: &AuditEvent, filter: &AuditLogFilter) -> bool {
    if let Some(actor) = &filter.actor_id {
        if event.actor_id != actor.0 {
            return false;
        }
    }
    if let Some(group) = &filter.group_id {
        if event.group_id != Some(group.0) {
            return false;
        }
    }
    if let Some(action) = &filter.action {
        if event.action != *action {
            return false;
        }
    }
    if let Some(from) = filter.from {
        if event.timestamp < from {
            return false;
        }
    }
    if let Some(to) = filter.to {
        if event.timestamp >= to {
            return false;
        }
    }
    true
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<(), AuditLogError> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn query(&self, filter: AuditLogFilter) -> Result<Vec<AuditEvent>, AuditLogError> {
        let events = self.events.read().await;
        let mut out: Vec<AuditEvent> = events.iter().filter(|e| matches(e, &filter)).cloned().collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = filter.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }

    async fn get(&self, id: AuditLogId) -> Result<AuditEvent, AuditLogError> {
        self.events
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(AuditLogError::NotFound(id))
    }

    async fn count(&self, filter: AuditLogFilter) -> Result<u64, AuditLogError> {
        let events = self.events.read().await;
        Ok(events.iter().filter(|e| matches(e, &filter)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditAction;
    use medcircle_storage::{GroupId, UserId};
    use uuid::Uuid;

    #[tokio::test]
    async fn record_and_get() {
        let log = MemoryAuditLog::new();
        let actor = UserId(Uuid::new_v4());
        let event = AuditEvent::builder(&actor, AuditAction::GroupCreate).build();
        let id = event.id;

        log.record(event).await.unwrap();

        let got = log.get(id).await.unwrap();
        assert_eq!(got.action, AuditAction::GroupCreate);
        assert_eq!(got.get_actor_id(), actor);
    }

    #[tokio::test]
    async fn get_missing_not_found() {
        let log = MemoryAuditLog::new();
        let err = log.get(AuditLogId::new()).await.unwrap_err();
        assert!(matches!(err, AuditLogError::NotFound(_)));
    }

    #[tokio::test]
    async fn query_filters_by_group_and_action() {
        let log = MemoryAuditLog::new();
        let actor = UserId(Uuid::new_v4());
        let group_a = GroupId(Uuid::new_v4());
        let group_b = GroupId(Uuid::new_v4());

        for (group, action) in [
            (&group_a, AuditAction::MemberJoin),
            (&group_a, AuditAction::MemberLeave),
            (&group_b, AuditAction::MemberJoin),
        ] {
            log.record(
                AuditEvent::builder(&actor, action)
                    .group_id(group)
                    .build(),
            )
            .await
            .unwrap();
        }

        let joins_a = log
            .query(
                AuditLogFilter::new()
                    .group_id(group_a.clone())
                    .action(AuditAction::MemberJoin),
            )
            .await
            .unwrap();
        assert_eq!(joins_a.len(), 1);

        let all_a = log
            .query(AuditLogFilter::new().group_id(group_a))
            .await
            .unwrap();
        assert_eq!(all_a.len(), 2);

        let total = log.count(AuditLogFilter::new()).await.unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn query_respects_limit() {
        let log = MemoryAuditLog::new();
        let actor = UserId(Uuid::new_v4());
        for _ in 0..5 {
            log.record(AuditEvent::builder(&actor, AuditAction::MemberJoin).build())
                .await
                .unwrap();
        }
        let limited = log
            .query(AuditLogFilter::new().limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}
