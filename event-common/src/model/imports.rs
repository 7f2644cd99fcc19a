use serde::{Deserialize, Serialize};

/// A running import instance; events read from its kafka topic.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Import {
    pub id: String,
    pub name: String,
    pub import_type_id: String,
    pub image: String,
    pub kafka_topic: String,
    pub restart: Option<bool>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ImportType {
    pub id: String,
    pub name: String,
    pub description: String,
    pub image: String,
    pub default_restart: bool,
    pub output: ImportContentVariable,
    pub owner: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ImportContentVariable {
    pub name: String,
    #[serde(rename = "type")]
    pub variable_type: String,
    pub characteristic_id: String,
    pub sub_content_variables: Vec<ImportContentVariable>,
    pub use_as_tag: bool,
    pub function_id: String,
    pub aspect_id: String,
}
