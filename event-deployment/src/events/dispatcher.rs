use std::collections::HashMap;
use std::sync::Arc;

use event_common::kafka_messages::deployment::{
    CommandHeader, DeploymentCommand, DoneNotification, DELETE, PUT, RIGHTS,
};
use event_common::kafka_messages::device_group::DeviceGroupCommand;
use event_common::metrics::{DEPLOYED_PROCESSES, REMOVED_PROCESSES};
use event_common::model::{Deployment, DeviceGroup, CURRENT_VERSION};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::{DoneProducer, EventHandler};
use crate::error::DeployError;

/// Runs every command against all handlers in order. The first failing handler aborts
/// the command, so a retried command starts over from a clean remove.
pub struct Dispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
    done_producer: Option<Arc<dyn DoneProducer>>,
    done_handler: String,
    debug: bool,
}

impl Dispatcher {
    pub fn new(
        handlers: Vec<Arc<dyn EventHandler>>,
        done_producer: Option<Arc<dyn DoneProducer>>,
        done_handler: &str,
        debug: bool,
    ) -> Self {
        Self {
            handlers,
            done_producer,
            done_handler: done_handler.to_owned(),
            debug,
        }
    }

    pub fn handler_names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Handle one message of the deployment topic. Messages that can never succeed are
    /// logged and acknowledged by returning `Ok`.
    pub async fn handle_command(&self, message: &Value) -> Result<(), DeployError> {
        if self.debug {
            debug!(%message, "received deployment command");
        }
        let header = match CommandHeader::deserialize(message) {
            Ok(header) => header,
            Err(e) => {
                error!("invalid deployment command, ignoring it: {}", e);
                return Ok(());
            }
        };
        if header.version != CURRENT_VERSION {
            warn!(version = header.version, deployment_id = %header.id, "unexpected deployment version");
            if header.command == DELETE {
                info!(deployment_id = %header.id, "handling legacy delete");
                return self.remove(&header.owner, &header.id).await;
            }
            return Ok(());
        }

        let command = match DeploymentCommand::deserialize(message) {
            Ok(command) => command,
            Err(e) => {
                error!(deployment_id = %header.id, "invalid deployment command, ignoring it: {}", e);
                return Ok(());
            }
        };
        let result = match command.command.as_str() {
            RIGHTS => Ok(()),
            PUT => {
                if command.owner.is_empty() {
                    error!(deployment_id = %command.id, "deployment command without owner, ignoring it");
                    return Ok(());
                }
                match &command.deployment {
                    Some(deployment) => self.deploy(&command.owner, deployment).await,
                    None => {
                        warn!(deployment_id = %command.id, "deployment command without deployment, ignoring it");
                        Ok(())
                    }
                }
            }
            DELETE => {
                if command.owner.is_empty() {
                    error!(deployment_id = %command.id, "delete command without owner, ignoring it");
                    return Ok(());
                }
                self.remove(&command.owner, &command.id).await
            }
            other => return Err(DeployError::UnknownCommand(other.to_owned())),
        };
        demote_missing_user(result, &command.owner)
    }

    /// Handle one message of the device group topic.
    pub async fn handle_device_group_command(&self, message: &Value) -> Result<(), DeployError> {
        if self.debug {
            debug!(%message, "received device group command");
        }
        let command = match DeviceGroupCommand::deserialize(message) {
            Ok(command) => command,
            Err(e) => {
                error!("invalid device group command, ignoring it: {}", e);
                return Ok(());
            }
        };
        match command.command.as_str() {
            RIGHTS => Ok(()),
            PUT => {
                let result = self
                    .update_device_group(&command.owner, &command.device_group)
                    .await;
                demote_missing_user(result, &command.owner)
            }
            DELETE => {
                info!(group_id = %command.id, "ignoring device group delete");
                Ok(())
            }
            other => Err(DeployError::UnknownCommand(other.to_owned())),
        }
    }

    pub async fn deploy(&self, owner: &str, deployment: &Deployment) -> Result<(), DeployError> {
        for handler in &self.handlers {
            handler.deploy(owner, deployment).await.map_err(|e| {
                error!(handler = handler.name(), deployment_id = %deployment.id, "deploy failed: {}", e);
                e
            })?;
        }
        metrics::counter!(DEPLOYED_PROCESSES).increment(1);
        info!(deployment_id = %deployment.id, owner, "deployed process events");
        self.notify_done(&deployment.id).await;
        Ok(())
    }

    pub async fn remove(&self, owner: &str, deployment_id: &str) -> Result<(), DeployError> {
        for handler in &self.handlers {
            handler.remove(owner, deployment_id).await.map_err(|e| {
                error!(handler = handler.name(), deployment_id, "remove failed: {}", e);
                e
            })?;
        }
        metrics::counter!(REMOVED_PROCESSES).increment(1);
        info!(deployment_id, owner, "removed process events");
        Ok(())
    }

    pub async fn update_device_group(
        &self,
        owner: &str,
        group: &DeviceGroup,
    ) -> Result<(), DeployError> {
        for handler in &self.handlers {
            handler.update_device_group(owner, group).await?;
        }
        info!(group_id = %group.id, "updated device group events");
        Ok(())
    }

    /// The first handler answering 200, 400 or 500 decides.
    pub async fn check_event(&self, token: &str, event_id: &str) -> StatusCode {
        for handler in &self.handlers {
            let status = handler.check_event(token, event_id).await;
            if matches!(
                status,
                StatusCode::OK | StatusCode::BAD_REQUEST | StatusCode::INTERNAL_SERVER_ERROR
            ) {
                return status;
            }
        }
        StatusCode::NOT_FOUND
    }

    /// An event counts as deployed when any handler has deployed it.
    pub async fn get_event_states(
        &self,
        token: &str,
        event_ids: &[String],
    ) -> Result<HashMap<String, bool>, DeployError> {
        let mut states: HashMap<String, bool> = HashMap::new();
        for handler in &self.handlers {
            for (id, deployed) in handler.get_event_states(token, event_ids).await? {
                *states.entry(id).or_default() |= deployed;
            }
        }
        Ok(states)
    }

    async fn notify_done(&self, deployment_id: &str) {
        let Some(producer) = &self.done_producer else {
            return;
        };
        let notification = DoneNotification {
            command: PUT.to_owned(),
            id: deployment_id.to_owned(),
            handler: self.done_handler.clone(),
        };
        match producer.produce(deployment_id, &notification).await {
            Ok(()) => info!(deployment_id, "sent deployment done notification"),
            Err(e) => error!(deployment_id, "unable to send deployment done notification: {}", e),
        }
    }
}

/// Users that no longer exist will never become deployable, retrying is pointless.
fn demote_missing_user(result: Result<(), DeployError>, owner: &str) -> Result<(), DeployError> {
    match result {
        Err(e) if e.is_user_missing() => {
            warn!(owner, "user does not exist, ignoring command");
            Ok(())
        }
        other => other,
    }
}
