use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Schema version of deployments this service understands.
pub const CURRENT_VERSION: i64 = 3;

/// Separator between an id and its modifier parameters, e.g. `device-1$service_group_selection=a`.
pub const ID_PARAMETER_SEPARATOR: char = '$';

/// Strip modifier parameters from an id.
pub fn trim_id_params(id: &str) -> &str {
    match id.split_once(ID_PARAMETER_SEPARATOR) {
        Some((pure, _)) => pure,
        None => id,
    }
}

/// A versioned process deployment. Only the parts relevant to events are typed,
/// everything else is carried through untouched so a stored deployment can be replayed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Deployment {
    pub version: i64,
    pub id: String,
    pub name: String,
    pub elements: Vec<Element>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A deployment as submitted over http, together with its owner.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct UserDeployment {
    #[serde(flatten)]
    pub deployment: Deployment,
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Element {
    pub bpmn_id: String,
    pub name: String,
    pub message_event: Option<MessageEvent>,
    pub conditional_event: Option<ConditionalEvent>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Analytics style event: a flow operator evaluates `value` against the selected source.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MessageEvent {
    pub value: String,
    pub flow_id: String,
    pub event_id: String,
    pub use_marshaller: bool,
    pub selection: Selection,
}

/// Script style event evaluated by the event worker.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConditionalEvent {
    pub script: String,
    pub value_variable: String,
    pub variables: HashMap<String, String>,
    pub qos: i32,
    pub event_id: String,
    pub selection: Selection,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Selection {
    pub filter_criteria: FilterCriteria,
    pub selected_device_id: Option<String>,
    pub selected_service_id: Option<String>,
    pub selected_device_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_import_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_generic_event_source: Option<GenericEventSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_path: Option<PathOption>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The kind of source a selection points at, in the order sources take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind<'a> {
    DeviceGroup(&'a str),
    DeviceWithService { device_id: &'a str, service_id: &'a str },
    DeviceWithoutService(&'a str),
    Import(&'a str),
    GenericSource(&'a GenericEventSource),
}

impl Selection {
    pub fn kind(&self) -> Option<SelectionKind<'_>> {
        fn non_empty(value: &Option<String>) -> Option<&str> {
            value.as_deref().filter(|v| !v.is_empty())
        }

        if let Some(group_id) = non_empty(&self.selected_device_group_id) {
            return Some(SelectionKind::DeviceGroup(group_id));
        }
        if let Some(device_id) = self.selected_device_id.as_deref() {
            return Some(match non_empty(&self.selected_service_id) {
                Some(service_id) => SelectionKind::DeviceWithService {
                    device_id,
                    service_id,
                },
                None => SelectionKind::DeviceWithoutService(device_id),
            });
        }
        if let Some(import_id) = self.selected_import_id.as_deref() {
            return Some(SelectionKind::Import(import_id));
        }
        self.selected_generic_event_source
            .as_ref()
            .map(SelectionKind::GenericSource)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct FilterCriteria {
    pub characteristic_id: Option<String>,
    pub function_id: Option<String>,
    pub device_class_id: Option<String>,
    pub aspect_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct GenericEventSource {
    pub filter_type: String,
    pub filter_ids: String,
    pub topic: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct PathOption {
    pub path: String,
    #[serde(rename = "characteristicId")]
    pub characteristic_id: String,
    #[serde(rename = "functionId")]
    pub function_id: String,
    #[serde(rename = "isVoid")]
    pub is_void: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
