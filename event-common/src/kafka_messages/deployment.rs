use serde::{Deserialize, Serialize};

use crate::model::Deployment;

pub const PUT: &str = "PUT";
pub const DELETE: &str = "DELETE";
pub const RIGHTS: &str = "RIGHTS";

/// The fields of a deployment command that are stable across schema versions.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CommandHeader {
    pub command: String,
    pub id: String,
    pub version: i64,
    pub owner: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DeploymentCommand {
    pub command: String,
    pub id: String,
    pub version: i64,
    pub owner: String,
    pub deployment: Option<Deployment>,
}

/// Published once every handler has deployed a process.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DoneNotification {
    pub command: String,
    pub id: String,
    pub handler: String,
}
