use super::DomainEvent;
use crate::error::CoreError;
use async_trait::async_trait;

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<(), CoreError>;

    async fn publish_batch(&self, events: Vec<DomainEvent>) -> Result<(), CoreError> {
        for event in events {
            self.publish(event).await?;
        }
        Ok(())
    }
}
