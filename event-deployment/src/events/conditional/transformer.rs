use std::collections::HashMap;
use std::sync::Arc;

use event_common::model::{
    trim_id_params, ConditionalEvent, Content, ContentVariable, Deployment, Device,
    DeviceTypeCriteria, DeviceTypeSelectable, EventDesc, ImportContentVariable, ImportType,
    SelectionKind, Service,
};
use tracing::warn;

use crate::devices::Devices;
use crate::error::{DeployError, RequestError};
use crate::imports::Imports;

/// Turns the conditional events of a deployment into event descriptions, one per
/// (device, service) pair or per import.
pub struct Transformer {
    devices: Arc<dyn Devices>,
    imports: Arc<dyn Imports>,
}

/// Collaborator failures other than internal errors mean the event cannot be
/// deployed as requested. They are logged and the event is skipped.
fn tolerate<T>(result: Result<T, RequestError>, what: &str) -> Result<Option<T>, DeployError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_internal() => Err(e.into()),
        Err(e) => {
            warn!(status = %e.status(), "unable to look up {}, ignoring event: {}", what, e);
            Ok(None)
        }
    }
}

impl Transformer {
    pub fn new(devices: Arc<dyn Devices>, imports: Arc<dyn Imports>) -> Self {
        Self { devices, imports }
    }

    pub async fn transform(
        &self,
        owner: &str,
        deployment: &Deployment,
    ) -> Result<Vec<EventDesc>, DeployError> {
        let mut result = Vec::new();
        for event in deployment
            .elements
            .iter()
            .filter_map(|e| e.conditional_event.as_ref())
        {
            result.extend(self.transform_event(owner, &deployment.id, event).await?);
        }
        Ok(result)
    }

    async fn transform_event(
        &self,
        owner: &str,
        deployment_id: &str,
        event: &ConditionalEvent,
    ) -> Result<Vec<EventDesc>, DeployError> {
        if event.selection.filter_criteria.characteristic_id.is_none() {
            return Ok(Vec::new());
        }
        let mut desc = base_description(owner, deployment_id, event);

        match event.selection.kind() {
            Some(SelectionKind::DeviceGroup(group_id)) => {
                desc.device_group_id = group_id.to_owned();
                let infos = self.devices.device_infos_of_group(group_id).await;
                let Some(infos) = tolerate(infos, "device group")? else {
                    return Ok(Vec::new());
                };
                self.per_device_and_service(desc, infos.devices).await
            }
            Some(SelectionKind::DeviceWithService {
                device_id,
                service_id,
            }) => {
                desc.device_id = trim_id_params(device_id).to_owned();
                desc.service_id = trim_id_params(service_id).to_owned();
                let service = self.devices.service(&desc.service_id).await;
                let Some(service) = tolerate(service, "service")? else {
                    return Ok(Vec::new());
                };
                desc.service_for_marshaller = service;
                Ok(vec![desc])
            }
            Some(SelectionKind::DeviceWithoutService(device_id)) => {
                let infos = self
                    .devices
                    .device_infos_of_devices(&[device_id.to_owned()])
                    .await;
                let Some(infos) = tolerate(infos, "device")? else {
                    return Ok(Vec::new());
                };
                self.per_device_and_service(desc, infos.devices).await
            }
            Some(SelectionKind::Import(import_id)) => {
                desc.import_id = import_id.to_owned();
                let instance = self.imports.import_instance(owner, import_id).await;
                let Some(instance) = tolerate(instance, "import")? else {
                    return Ok(Vec::new());
                };
                let import_type = self
                    .imports
                    .import_type(owner, &instance.import_type_id)
                    .await;
                let Some(import_type) = tolerate(import_type, "import type")? else {
                    return Ok(Vec::new());
                };
                desc.service_for_marshaller = import_service(&import_type);
                Ok(vec![desc])
            }
            Some(SelectionKind::GenericSource(_)) => {
                warn!(
                    event_id = %event.event_id,
                    "generic event sources are not supported for conditional events"
                );
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    /// One description per device and per service of its device type that offers the
    /// event's function/aspect pair.
    async fn per_device_and_service(
        &self,
        desc: EventDesc,
        devices: Vec<Device>,
    ) -> Result<Vec<EventDesc>, DeployError> {
        let selectables = self
            .devices
            .device_type_selectables(&[DeviceTypeCriteria {
                function_id: desc.function_id.clone(),
                aspect_id: desc.aspect_id.clone(),
                ..Default::default()
            }])
            .await;
        let Some(selectables) = tolerate(selectables, "device type selectables")? else {
            return Ok(Vec::new());
        };

        let mut device_types: HashMap<String, String> = devices
            .iter()
            .map(|d| (d.id.clone(), d.device_type_id.clone()))
            .collect();
        let mut result = Vec::new();
        for device in &devices {
            let Some(device_type_id) = self.device_type_of(&device.id, &mut device_types).await?
            else {
                continue;
            };
            for service in services_of(&selectables, &device_type_id) {
                let mut temp = desc.clone();
                temp.device_id = device.id.clone();
                temp.service_id = service.id.clone();
                temp.service_for_marshaller = service.clone();
                result.push(temp);
            }
        }
        Ok(result)
    }

    /// Device type of a device, looked up on its own when the listing left it empty.
    async fn device_type_of(
        &self,
        device_id: &str,
        known: &mut HashMap<String, String>,
    ) -> Result<Option<String>, DeployError> {
        if let Some(device_type_id) = known.get(device_id).filter(|id| !id.is_empty()) {
            return Ok(Some(device_type_id.clone()));
        }
        let infos = self
            .devices
            .device_infos_of_devices(&[device_id.to_owned()])
            .await;
        let Some(infos) = tolerate(infos, "device")? else {
            return Ok(None);
        };
        let Some(device) = infos.devices.into_iter().next() else {
            warn!(device_id, "device lookup returned nothing, skipping device");
            return Ok(None);
        };
        known.insert(device.id, device.device_type_id.clone());
        Ok(Some(device.device_type_id))
    }
}

fn base_description(owner: &str, deployment_id: &str, event: &ConditionalEvent) -> EventDesc {
    let criteria = &event.selection.filter_criteria;
    EventDesc {
        user_id: owner.to_owned(),
        deployment_id: deployment_id.to_owned(),
        script: event.script.clone(),
        value_variable: event.value_variable.clone(),
        variables: event.variables.clone(),
        qos: event.qos,
        event_id: event.event_id.clone(),
        characteristic_id: criteria.characteristic_id.clone().unwrap_or_default(),
        function_id: criteria.function_id.clone().unwrap_or_default(),
        aspect_id: criteria.aspect_id.clone().unwrap_or_default(),
        path: event
            .selection
            .selected_path
            .as_ref()
            .map(|p| p.path.clone())
            .unwrap_or_default(),
        ..Default::default()
    }
}

fn services_of<'a>(
    selectables: &'a [DeviceTypeSelectable],
    device_type_id: &'a str,
) -> impl Iterator<Item = &'a Service> {
    selectables
        .iter()
        .filter(move |s| s.device_type_id == device_type_id)
        .flat_map(|s| s.services.iter())
}

/// An import presented as an event service so the worker can marshal its values.
pub fn import_service(import_type: &ImportType) -> Service {
    Service {
        id: import_type.id.clone(),
        name: import_type.name.clone(),
        interaction: "event".to_owned(),
        outputs: vec![Content {
            id: import_type.id.clone(),
            content_variable: content_variable(&import_type.output),
            serialization: "json".to_owned(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn content_variable(variable: &ImportContentVariable) -> ContentVariable {
    ContentVariable {
        name: variable.name.clone(),
        variable_type: variable.variable_type.clone(),
        sub_content_variables: variable
            .sub_content_variables
            .iter()
            .map(content_variable)
            .collect(),
        characteristic_id: variable.characteristic_id.clone(),
        function_id: variable.function_id.clone(),
        aspect_id: variable.aspect_id.clone(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_output_becomes_service_output() {
        let import_type = ImportType {
            id: "it1".to_owned(),
            name: "weather".to_owned(),
            output: ImportContentVariable {
                name: "output".to_owned(),
                variable_type: "https://schema.org/StructuredValue".to_owned(),
                sub_content_variables: vec![ImportContentVariable {
                    name: "temperature".to_owned(),
                    variable_type: "https://schema.org/Float".to_owned(),
                    characteristic_id: "celsius".to_owned(),
                    function_id: "get-temperature".to_owned(),
                    aspect_id: "air".to_owned(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        };

        let service = import_service(&import_type);
        assert_eq!(service.id, "it1");
        assert_eq!(service.interaction, "event");
        assert_eq!(service.outputs.len(), 1);
        let output = &service.outputs[0];
        assert_eq!(output.serialization, "json");
        assert_eq!(output.content_variable.name, "output");
        let temperature = &output.content_variable.sub_content_variables[0];
        assert_eq!(temperature.characteristic_id, "celsius");
        assert_eq!(temperature.function_id, "get-temperature");
        assert_eq!(temperature.aspect_id, "air");
        assert!(temperature.sub_content_variables.is_empty());
    }
}
