use serde::{Deserialize, Serialize};

use crate::model::DeviceGroup;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct DeviceGroupCommand {
    pub command: String,
    pub id: String,
    pub owner: String,
    pub device_group: DeviceGroup,
}
