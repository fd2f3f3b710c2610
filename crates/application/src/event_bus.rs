//! The C8 event-bus facade: an in-process broadcast of `DomainEvent`s
//! that the operator shell surface subscribes to. Write operations are
//! not exposed here — they go through `CommandEngine` and
//! `ChangesetCoordinator` directly; this is the read side of C8's
//! streaming subscription.

use async_trait::async_trait;
use domain::error::CoreError;
use domain::event::{DomainEvent, EventPublisher};
use tokio::sync::broadcast;

pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), CoreError> {
        // No subscribers is not an error: background workers publish
        // unconditionally whether or not the shell is attached.
        let _ = self.tx.send(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ids::{DeviceId, SiteId, TenantId};

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(DomainEvent::DeviceOnline {
            tenant: TenantId::new("acme-corp-network-001").unwrap(),
            site: SiteId::new("building-west-annex-9").unwrap(),
            device_id: DeviceId::new("router-core-floor2-07").unwrap(),
            at: 1,
        })
        .await
        .unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type(), "device_online");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_error() {
        let bus = EventBus::new(16);
        let result = bus
            .publish(DomainEvent::CommandStateChanged {
                command_id: "cmd-1".into(),
                status: domain::command::CommandStatus::Completed,
                at: 1,
            })
            .await;
        assert!(result.is_ok());
    }
}
