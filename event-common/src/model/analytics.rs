use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::deployment::GenericEventSource;

pub const DEVICE_FILTER_TYPE: &str = "deviceId";
pub const IMPORT_FILTER_TYPE: &str = "ImportId";

/// Kafka topic the platform publishes a service's events on.
pub fn service_id_to_topic(service_id: &str) -> String {
    service_id.replace(['#', ':'], "_")
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PipelineRequest {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(rename = "flowId")]
    pub flow_id: String,
    pub name: String,
    pub description: String,
    #[serde(rename = "windowTime")]
    pub window_time: i64,
    pub nodes: Vec<PipelineNode>,
}

impl PipelineRequest {
    /// Value of a config entry of the first node, if present.
    pub fn config_value(&self, name: &str) -> Option<&str> {
        self.nodes
            .first()?
            .config
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PipelineNode {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub inputs: Vec<NodeInput>,
    pub config: Vec<NodeConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NodeInput {
    #[serde(rename = "filterIds")]
    pub filter_ids: String,
    #[serde(rename = "filterType")]
    pub filter_type: String,
    #[serde(rename = "topicName")]
    pub topic_name: String,
    pub values: Vec<NodeValue>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NodeValue {
    pub name: String,
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    pub name: String,
    pub value: String,
}

impl NodeConfig {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            value: value.into(),
        }
    }
}

/// A pipeline as returned by the flow engine and the pipeline repository.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Pipeline {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

/// One operator cell of a flow, as listed by the flow parser.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FlowModelCell {
    pub id: String,
    pub name: String,
    #[serde(rename = "deploymentType")]
    pub deployment_type: String,
    #[serde(rename = "operatorId")]
    pub operator_id: String,
}

/// Correlation record stored as json in `Pipeline::description`. Pipelines whose
/// description does not decode into this type were not created by this service.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct EventPipelineDescription {
    pub device_id: String,
    pub service_id: String,
    pub value_path: String,
    pub operator_value: String,
    pub event_id: String,
    pub deployment_id: String,
    pub device_group_id: String,
    pub function_id: String,
    pub aspect_id: String,
    pub characteristic_id: String,
    pub flow_id: String,
    pub import_id: String,
    pub generic_event_source: Option<GenericEventSource>,
    pub use_marshaller: bool,
}

impl EventPipelineDescription {
    /// Decode a pipeline description, `None` for pipelines owned by someone else.
    pub fn parse(description: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(description) {
            Ok(value @ serde_json::Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }
}
