//! Persistence of conditional event descriptions and of the deployment index.

use async_trait::async_trait;
use event_common::model::{DeploymentIndex, EventDesc};

use crate::error::StoreError;

pub mod postgres;

pub use postgres::PgStore;

#[async_trait]
pub trait EventDescStore: Send + Sync {
    /// Insert or replace the description for its (deployment, event, device, service, import).
    async fn set(&self, desc: &EventDesc) -> Result<(), StoreError>;

    async fn remove_by_deployment(&self, deployment_id: &str) -> Result<(), StoreError>;

    async fn by_event(&self, event_id: &str) -> Result<Vec<EventDesc>, StoreError>;

    async fn by_device_group(&self, device_group_id: &str) -> Result<Vec<EventDesc>, StoreError>;

    async fn by_deployment(&self, deployment_id: &str) -> Result<Vec<EventDesc>, StoreError>;
}

#[async_trait]
pub trait DeploymentIndexStore: Send + Sync {
    async fn set(&self, index: &DeploymentIndex) -> Result<(), StoreError>;

    async fn remove(&self, deployment_id: &str) -> Result<(), StoreError>;

    /// Deployments with at least one conditional event on the group.
    async fn by_device_group(
        &self,
        device_group_id: &str,
    ) -> Result<Vec<DeploymentIndex>, StoreError>;
}
