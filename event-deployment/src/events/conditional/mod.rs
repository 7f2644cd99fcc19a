//! Script based events, persisted as event descriptions for the event worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use event_common::metrics::{DEPLOYED_CONDITIONAL_EVENTS, REMOVED_CONDITIONAL_EVENTS};
use event_common::model::{trim_id_params, Deployment, DeploymentIndex, DeviceGroup, EventDesc};
use reqwest::StatusCode;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::EventHandler;
use crate::auth::TokenProvider;
use crate::devices::Devices;
use crate::error::DeployError;
use crate::imports::Imports;
use crate::store::{DeploymentIndexStore, EventDescStore};

pub mod transformer;

pub use transformer::Transformer;

pub struct ConditionalHandler {
    // Serializes every store mutation of this handler.
    lock: Mutex<()>,
    descriptions: Arc<dyn EventDescStore>,
    index: Arc<dyn DeploymentIndexStore>,
    transformer: Transformer,
    auth: Arc<dyn TokenProvider>,
}

impl ConditionalHandler {
    pub fn new(
        descriptions: Arc<dyn EventDescStore>,
        index: Arc<dyn DeploymentIndexStore>,
        devices: Arc<dyn Devices>,
        imports: Arc<dyn Imports>,
        auth: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            lock: Mutex::new(()),
            descriptions,
            index,
            transformer: Transformer::new(devices, imports),
            auth,
        }
    }

    /// Must be called with the lock held.
    async fn remove_events(&self, deployment_id: &str) -> Result<(), DeployError> {
        let removed = self.descriptions.by_deployment(deployment_id).await?.len();
        self.descriptions.remove_by_deployment(deployment_id).await?;
        self.index.remove(deployment_id).await?;
        metrics::counter!(REMOVED_CONDITIONAL_EVENTS).increment(removed as u64);
        Ok(())
    }

    /// Must be called with the lock held.
    async fn deploy_events(&self, owner: &str, deployment: &Deployment) -> Result<(), DeployError> {
        // Fails for users that no longer exist.
        self.auth.user_token(owner).await?;

        let descriptions = self.transformer.transform(owner, deployment).await?;
        for mut desc in descriptions {
            desc.device_id = trim_id_params(&desc.device_id).to_owned();
            desc.service_id = trim_id_params(&desc.service_id).to_owned();
            self.descriptions.set(&desc).await?;
            metrics::counter!(DEPLOYED_CONDITIONAL_EVENTS).increment(1);
        }
        self.index
            .set(&DeploymentIndex::new(owner, deployment))
            .await?;
        info!(deployment_id = %deployment.id, owner, "deployed conditional events");
        Ok(())
    }
}

/// Owner recorded on any description of the deployment.
fn fallback_user<'a>(descriptions: &'a [EventDesc], deployment_id: &str) -> Option<&'a str> {
    descriptions
        .iter()
        .find(|d| d.deployment_id == deployment_id && !d.user_id.is_empty())
        .map(|d| d.user_id.as_str())
}

#[async_trait]
impl EventHandler for ConditionalHandler {
    fn name(&self) -> &'static str {
        "conditional"
    }

    async fn deploy(&self, owner: &str, deployment: &Deployment) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        self.remove_events(&deployment.id).await?;
        self.deploy_events(owner, deployment).await
    }

    async fn remove(&self, _owner: &str, deployment_id: &str) -> Result<(), DeployError> {
        let _guard = self.lock.lock().await;
        self.remove_events(deployment_id).await
    }

    /// Members are read from the device repository again, the group in the command
    /// only names the affected deployments.
    async fn update_device_group(
        &self,
        _owner: &str,
        group: &DeviceGroup,
    ) -> Result<(), DeployError> {
        if group.id.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let deployments = self.index.by_device_group(&group.id).await?;
        if deployments.is_empty() {
            return Ok(());
        }
        let descriptions = self.descriptions.by_device_group(&group.id).await?;

        for indexed in &deployments {
            self.remove_events(&indexed.id).await?;
            let owner = if indexed.user_id.is_empty() {
                fallback_user(&descriptions, &indexed.id).unwrap_or_default()
            } else {
                indexed.user_id.as_str()
            };
            if owner.is_empty() {
                warn!(
                    deployment_id = %indexed.id,
                    group_id = %group.id,
                    "no owner known for deployment, dropping it"
                );
                continue;
            }
            self.deploy_events(owner, &indexed.deployment).await?;
        }
        Ok(())
    }

    async fn check_event(&self, _token: &str, event_id: &str) -> StatusCode {
        match self.descriptions.by_event(event_id).await {
            Ok(descriptions) if descriptions.is_empty() => StatusCode::NOT_FOUND,
            Ok(_) => StatusCode::OK,
            Err(e) => {
                error!(event_id, "unable to look up event descriptions: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    async fn get_event_states(
        &self,
        _token: &str,
        event_ids: &[String],
    ) -> Result<HashMap<String, bool>, DeployError> {
        let mut states = HashMap::with_capacity(event_ids.len());
        for id in event_ids {
            let deployed = !self.descriptions.by_event(id).await?.is_empty();
            states.insert(id.clone(), deployed);
        }
        Ok(states)
    }
}
