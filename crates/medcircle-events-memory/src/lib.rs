//! In-memory event bus implementation using tokio broadcast channels.
//!
//! This implementation is suitable for:
//! - Single server deployments
//! - Development and testing
//!
//! Events are only broadcast within a single process; with multiple server
//! replicas, use a shared-backend bus instead.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use medcircle_events::{EventBus, EventBusError, EventStream, RosterChangeEvent};
use medcircle_storage::GroupId;

const CHANNEL_CAPACITY: usize = 100;

/// In-memory event bus using one broadcast channel per group.
pub struct MemoryEventBus {
    channels: Arc<DashMap<GroupId, broadcast::Sender<RosterChangeEvent>>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
        }
    }

    fn get_or_create_channel(&self, group_id: &GroupId) -> broadcast::Sender<RosterChangeEvent> {
        self.channels
            .entry(group_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(
        &self,
        group_id: &GroupId,
        event: RosterChangeEvent,
    ) -> Result<(), EventBusError> {
        let tx = self.get_or_create_channel(group_id);

        // no receivers is fine
        let _ = tx.send(event);

        Ok(())
    }

    async fn subscribe(&self, group_id: &GroupId) -> Result<EventStream, EventBusError> {
        let tx = self.get_or_create_channel(group_id);
        let rx = tx.subscribe();

        // Drop lagged errors: a subscriber that fell behind should re-fetch
        // the group instead of replaying.
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use medcircle_events::RosterChangeKind;
    use uuid::Uuid;

    fn event(kind: RosterChangeKind, version: i64) -> RosterChangeEvent {
        RosterChangeEvent {
            kind,
            user_id: Some(Uuid::new_v4()),
            version,
            timestamp: version,
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe() {
        let bus = MemoryEventBus::new();
        let group_id = GroupId(Uuid::new_v4());

        let mut stream = bus.subscribe(&group_id).await.unwrap();

        bus.publish(&group_id, event(RosterChangeKind::MemberJoined, 2))
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(received.kind, RosterChangeKind::MemberJoined);
        assert_eq!(received.version, 2);
    }

    #[tokio::test]
    async fn multiple_subscribers() {
        let bus = MemoryEventBus::new();
        let group_id = GroupId(Uuid::new_v4());

        let mut stream1 = bus.subscribe(&group_id).await.unwrap();
        let mut stream2 = bus.subscribe(&group_id).await.unwrap();

        bus.publish(&group_id, event(RosterChangeKind::MemberLeft, 3))
            .await
            .unwrap();

        let recv1 = stream1.next().await.unwrap();
        let recv2 = stream2.next().await.unwrap();

        assert_eq!(recv1.version, 3);
        assert_eq!(recv2.version, 3);
    }

    #[tokio::test]
    async fn publish_before_subscribe_is_lost() {
        let bus = MemoryEventBus::new();
        let group_id = GroupId(Uuid::new_v4());

        bus.publish(&group_id, event(RosterChangeKind::GroupCreated, 1))
            .await
            .unwrap();

        let mut stream = bus.subscribe(&group_id).await.unwrap();

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), stream.next()).await;

        assert!(
            result.is_err(),
            "Should not receive event published before subscription"
        );
    }

    #[tokio::test]
    async fn cross_group_isolation() {
        let bus = MemoryEventBus::new();
        let group_a = GroupId(Uuid::new_v4());
        let group_b = GroupId(Uuid::new_v4());

        let mut stream_a = bus.subscribe(&group_a).await.unwrap();

        bus.publish(&group_b, event(RosterChangeKind::MemberJoined, 7))
            .await
            .unwrap();
        bus.publish(&group_a, event(RosterChangeKind::MemberPromoted, 4))
            .await
            .unwrap();

        let received = tokio::time::timeout(std::time::Duration::from_millis(100), stream_a.next())
            .await
            .expect("timeout")
            .expect("stream ended");

        assert_eq!(received.kind, RosterChangeKind::MemberPromoted);
        assert_eq!(received.version, 4);
    }

    #[tokio::test]
    async fn multiple_events_ordering() {
        let bus = MemoryEventBus::new();
        let group_id = GroupId(Uuid::new_v4());

        let mut stream = bus.subscribe(&group_id).await.unwrap();

        for version in 2i64..=4 {
            bus.publish(&group_id, event(RosterChangeKind::MemberJoined, version))
                .await
                .unwrap();
        }

        assert_eq!(stream.next().await.unwrap().version, 2);
        assert_eq!(stream.next().await.unwrap().version, 3);
        assert_eq!(stream.next().await.unwrap().version, 4);
    }

    #[test]
    fn memory_event_bus_default() {
        let bus = MemoryEventBus::default();
        assert!(bus.channels.is_empty());
    }
}
