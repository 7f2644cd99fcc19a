use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::deployment::Deployment;
use super::devices::Service;

/// A script based condition evaluated by the event worker, one per
/// (deployment, device, service) or per (deployment, import).
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct EventDesc {
    pub user_id: String,
    pub deployment_id: String,
    pub device_group_id: String,
    pub device_id: String,
    pub service_id: String,
    pub import_id: String,
    pub script: String,
    pub value_variable: String,
    pub variables: HashMap<String, String>,
    pub qos: i32,
    pub event_id: String,
    pub characteristic_id: String,
    pub function_id: String,
    pub aspect_id: String,
    pub path: String,
    pub service_for_marshaller: Service,
}

/// Secondary index over conditional-event deployments referencing device groups.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DeploymentIndex {
    pub id: String,
    pub user_id: String,
    pub deployment: Deployment,
    pub device_groups: Vec<String>,
}

impl DeploymentIndex {
    pub fn new(user_id: &str, deployment: &Deployment) -> Self {
        let mut device_groups: Vec<String> = Vec::new();
        for event in deployment
            .elements
            .iter()
            .filter_map(|e| e.conditional_event.as_ref())
        {
            if let Some(group) = event.selection.selected_device_group_id.as_deref() {
                if !group.is_empty() && !device_groups.iter().any(|g| g == group) {
                    device_groups.push(group.to_owned());
                }
            }
        }
        Self {
            id: deployment.id.clone(),
            user_id: user_id.to_owned(),
            deployment: deployment.clone(),
            device_groups,
        }
    }
}
