use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Device {
    pub id: String,
    pub name: String,
    pub device_type_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceGroup {
    pub id: String,
    pub name: String,
    pub device_ids: Vec<String>,
}

/// Query element for device-type selectables.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceTypeCriteria {
    pub function_id: String,
    pub device_class_id: String,
    pub aspect_id: String,
}

/// The services of one device type matching a function/aspect query, together with
/// the json paths inside each service that carry the requested value.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DeviceTypeSelectable {
    pub device_type_id: String,
    pub services: Vec<Service>,
    pub service_path_options: HashMap<String, Vec<ServicePathOption>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ServicePathOption {
    pub service_id: String,
    pub path: String,
    pub characteristic_id: String,
    pub function_id: String,
    pub is_void: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub is_controlling_function: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Service {
    pub id: String,
    pub local_id: String,
    pub name: String,
    pub description: String,
    pub interaction: String,
    pub protocol_id: String,
    pub inputs: Vec<Content>,
    pub outputs: Vec<Content>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Content {
    pub id: String,
    pub content_variable: ContentVariable,
    pub serialization: String,
    pub protocol_segment_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ContentVariable {
    pub id: String,
    pub name: String,
    pub is_void: bool,
    #[serde(rename = "type")]
    pub variable_type: String,
    pub sub_content_variables: Vec<ContentVariable>,
    pub characteristic_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub function_id: String,
    pub aspect_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Function {
    pub id: String,
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub concept_id: String,
    pub rdf_type: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Concept {
    pub id: String,
    pub name: String,
    pub characteristic_ids: Vec<String>,
    pub base_characteristic_id: String,
    pub conversions: Vec<ConverterExtension>,
}

/// A conversion formula between two characteristics of the same concept, forwarded
/// to the converter so it can handle casts it has no built-in rule for.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConverterExtension {
    pub from: String,
    pub to: String,
    pub distance: i64,
    pub formula: String,
    pub placeholder_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct PathAndCharacteristic {
    pub json_path: String,
    pub characteristic_id: String,
}
