//! Builders for the pipeline requests sent to the flow engine. Everything in here is
//! pure, the handler resolves flows, topics and casts before calling in.

use std::collections::BTreeMap;

use event_common::model::{
    service_id_to_topic, trim_id_params, ConverterExtension, EventPipelineDescription,
    GenericEventSource, NodeConfig, NodeInput, NodeValue, PathAndCharacteristic, PipelineNode,
    PipelineRequest, DEVICE_FILTER_TYPE, IMPORT_FILTER_TYPE,
};
use serde::Serialize;

use crate::auth::AuthToken;
use crate::config::Config;
use crate::error::DeployError;
use crate::expansion::ServiceExpansion;

/// The configuration values that end up inside pipeline requests.
#[derive(Debug, Clone, Default)]
pub struct RequestSettings {
    pub event_trigger_url: String,
    pub converter_url: String,
    pub extended_converter_url: String,
    pub marshaller_url: String,
    pub device_path_prefix: String,
    pub group_path_prefix: String,
    pub enable_multiple_paths: bool,
}

impl From<&Config> for RequestSettings {
    fn from(config: &Config) -> Self {
        Self {
            event_trigger_url: config.event_trigger_url.clone(),
            converter_url: config.converter_url.clone(),
            extended_converter_url: config.extended_converter_url.clone(),
            marshaller_url: config.marshaller_url.clone(),
            device_path_prefix: config.device_path_prefix.clone(),
            group_path_prefix: config.group_path_prefix.clone(),
            enable_multiple_paths: config.enable_multiple_paths,
        }
    }
}

/// One deployable event, whatever its source kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupEventDescription {
    pub device_group_id: String,
    /// Set instead of `device_group_id` for devices without a selected service,
    /// and when a group changed and its new members are already known.
    pub device_ids: Option<Vec<String>>,
    pub import_id: String,
    pub generic_event_source: Option<GenericEventSource>,
    pub event_id: String,
    pub deployment_id: String,
    pub function_id: String,
    pub aspect_id: String,
    pub characteristic_id: String,
    pub flow_id: String,
    pub operator_value: String,
    pub path: String,
    pub use_marshaller: bool,
}

impl GroupEventDescription {
    /// Rebuild the description of an existing group pipeline.
    pub fn from_pipeline(description: &EventPipelineDescription) -> Self {
        Self {
            device_group_id: description.device_group_id.clone(),
            event_id: description.event_id.clone(),
            deployment_id: description.deployment_id.clone(),
            function_id: description.function_id.clone(),
            aspect_id: description.aspect_id.clone(),
            characteristic_id: description.characteristic_id.clone(),
            flow_id: description.flow_id.clone(),
            operator_value: description.operator_value.clone(),
            use_marshaller: description.use_marshaller,
            ..Default::default()
        }
    }
}

/// An event on one service of one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceEvent {
    pub deployment_id: String,
    pub flow_id: String,
    pub event_id: String,
    pub device_id: String,
    pub service_id: String,
    pub operator_value: String,
    /// Full value path, or the raw selected path in marshaller mode.
    pub path: String,
    pub function_id: String,
    pub aspect_id: String,
    pub characteristic_id: String,
}

/// Characteristic conversion applied to the event value before comparison.
#[derive(Debug, Clone, Copy)]
pub struct Cast<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub extensions: &'a [ConverterExtension],
}

impl Cast<'_> {
    pub fn differs(&self) -> bool {
        self.from != self.to
    }

    /// Generic sources only convert when both ends are known.
    pub fn differs_and_known(&self) -> bool {
        self.differs() && !self.from.is_empty() && !self.to.is_empty()
    }
}

fn to_json<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Result<String, DeployError> {
    serde_json::to_string(value).map_err(|error| DeployError::Serialization { what, error })
}

fn value(path: String) -> NodeValue {
    NodeValue {
        name: "value".to_owned(),
        path,
    }
}

fn leading_config(settings: &RequestSettings, operator_value: &str, event_id: &str) -> Vec<NodeConfig> {
    vec![
        NodeConfig::new("value", operator_value),
        NodeConfig::new("url", settings.event_trigger_url.as_str()),
        NodeConfig::new("eventId", event_id),
    ]
}

/// The converter entries, all empty when the cast is inactive.
fn converter_config(
    settings: &RequestSettings,
    cast: &Cast<'_>,
    active: bool,
) -> Result<Vec<NodeConfig>, DeployError> {
    if !active {
        return Ok([
            "converterUrl",
            "extendedConverterUrl",
            "convertFrom",
            "convertTo",
            "castExtensions",
        ]
        .into_iter()
        .map(|name| NodeConfig::new(name, ""))
        .collect());
    }
    let extensions = if cast.extensions.is_empty() {
        String::new()
    } else {
        to_json("cast extensions", cast.extensions)?
    };
    Ok(vec![
        NodeConfig::new("converterUrl", settings.converter_url.as_str()),
        NodeConfig::new("extendedConverterUrl", settings.extended_converter_url.as_str()),
        NodeConfig::new("convertFrom", cast.from),
        NodeConfig::new("convertTo", cast.to),
        NodeConfig::new("castExtensions", extensions),
    ])
}

fn single_node_request(
    label: &str,
    flow_id: &str,
    description: &EventPipelineDescription,
    node_id: &str,
    inputs: Vec<NodeInput>,
    config: Vec<NodeConfig>,
) -> Result<PipelineRequest, DeployError> {
    Ok(PipelineRequest {
        id: String::new(),
        flow_id: flow_id.to_owned(),
        name: label.to_owned(),
        description: to_json("pipeline description", description)?,
        window_time: 0,
        nodes: vec![PipelineNode {
            node_id: node_id.to_owned(),
            inputs,
            config,
        }],
    })
}

fn device_description(event: &DeviceEvent, use_marshaller: bool) -> EventPipelineDescription {
    EventPipelineDescription {
        device_id: event.device_id.clone(),
        service_id: event.service_id.clone(),
        value_path: event.path.clone(),
        operator_value: event.operator_value.clone(),
        event_id: event.event_id.clone(),
        deployment_id: event.deployment_id.clone(),
        characteristic_id: event.characteristic_id.clone(),
        use_marshaller,
        ..Default::default()
    }
}

pub fn device_request(
    settings: &RequestSettings,
    token: &AuthToken,
    label: &str,
    node_id: &str,
    event: &DeviceEvent,
    cast: &Cast<'_>,
) -> Result<PipelineRequest, DeployError> {
    let input = NodeInput {
        filter_ids: event.device_id.clone(),
        filter_type: DEVICE_FILTER_TYPE.to_owned(),
        topic_name: service_id_to_topic(&event.service_id),
        values: vec![value(event.path.clone())],
    };

    let mut config = leading_config(settings, &event.operator_value, &event.event_id);
    config.extend(converter_config(settings, cast, cast.differs())?);
    config.push(NodeConfig::new("userToken", token.as_str()));

    single_node_request(
        label,
        &event.flow_id,
        &device_description(event, false),
        node_id,
        vec![input],
        config,
    )
}

/// Device event whose value is extracted by the marshaller instead of a fixed path.
pub fn device_marshaller_request(
    settings: &RequestSettings,
    token: &AuthToken,
    label: &str,
    node_id: &str,
    event: &DeviceEvent,
) -> Result<PipelineRequest, DeployError> {
    let input = NodeInput {
        filter_ids: event.device_id.clone(),
        filter_type: DEVICE_FILTER_TYPE.to_owned(),
        topic_name: service_id_to_topic(&event.service_id),
        values: vec![value(
            settings.device_path_prefix.trim_end_matches('.').to_owned(),
        )],
    };

    let mut config = leading_config(settings, &event.operator_value, &event.event_id);
    config.extend([
        NodeConfig::new("marshallerUrl", settings.marshaller_url.as_str()),
        NodeConfig::new("path", event.path.as_str()),
        NodeConfig::new("functionId", event.function_id.as_str()),
        NodeConfig::new("aspectNodeId", event.aspect_id.as_str()),
        NodeConfig::new("userToken", token.as_str()),
    ]);

    single_node_request(
        label,
        &event.flow_id,
        &device_description(event, true),
        node_id,
        vec![input],
        config,
    )
}

/// One input per expanded service. Services without devices or paths are skipped.
fn group_inputs(
    settings: &RequestSettings,
    expansion: &ServiceExpansion,
    use_marshaller: bool,
) -> Vec<NodeInput> {
    let mut inputs = Vec::new();
    for service_id in &expansion.service_ids {
        let device_ids: Vec<&str> = expansion
            .service_to_devices
            .get(service_id)
            .map(|ids| ids.iter().map(|id| trim_id_params(id)).collect())
            .unwrap_or_default();
        if device_ids.is_empty() {
            tracing::warn!(service_id = %service_id, "no devices for service, skipping it");
            continue;
        }
        let paths = expansion
            .service_to_paths
            .get(service_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if paths.is_empty() {
            tracing::warn!(service_id = %service_id, "no path for service, skipping it");
            continue;
        }

        let values = if use_marshaller {
            vec![value(
                settings.group_path_prefix.trim_end_matches('.').to_owned(),
            )]
        } else if settings.enable_multiple_paths {
            paths
                .iter()
                .map(|path| value(format!("{}{}", settings.group_path_prefix, path)))
                .collect()
        } else {
            vec![value(format!("{}{}", settings.group_path_prefix, paths[0]))]
        };

        inputs.push(NodeInput {
            filter_ids: device_ids.join(","),
            filter_type: DEVICE_FILTER_TYPE.to_owned(),
            topic_name: service_id_to_topic(service_id),
            values,
        });
    }
    inputs
}

pub fn group_request(
    settings: &RequestSettings,
    token: &AuthToken,
    label: &str,
    node_id: &str,
    desc: &GroupEventDescription,
    expansion: &ServiceExpansion,
    extensions: &[ConverterExtension],
) -> Result<PipelineRequest, DeployError> {
    let description = EventPipelineDescription {
        device_group_id: desc.device_group_id.clone(),
        function_id: desc.function_id.clone(),
        aspect_id: desc.aspect_id.clone(),
        characteristic_id: desc.characteristic_id.clone(),
        operator_value: desc.operator_value.clone(),
        event_id: desc.event_id.clone(),
        deployment_id: desc.deployment_id.clone(),
        flow_id: desc.flow_id.clone(),
        use_marshaller: desc.use_marshaller,
        ..Default::default()
    };
    let inputs = group_inputs(settings, expansion, desc.use_marshaller);

    let mut config = leading_config(settings, &desc.operator_value, &desc.event_id);
    if desc.use_marshaller {
        let topic_to_service_id: BTreeMap<String, &str> = expansion
            .service_ids
            .iter()
            .map(|id| (service_id_to_topic(id), id.as_str()))
            .collect();
        config.extend([
            NodeConfig::new("marshallerUrl", settings.marshaller_url.as_str()),
            NodeConfig::new("functionId", desc.function_id.as_str()),
            NodeConfig::new("aspectNodeId", desc.aspect_id.as_str()),
            NodeConfig::new("targetCharacteristicId", desc.characteristic_id.as_str()),
            NodeConfig::new(
                "topicToServiceId",
                to_json("topic to service mapping", &topic_to_service_id)?,
            ),
        ]);
    } else {
        let topic_to_path_and_characteristic: BTreeMap<String, &Vec<PathAndCharacteristic>> =
            expansion
                .service_to_path_and_characteristic
                .iter()
                .map(|(service_id, list)| (service_id_to_topic(service_id), list))
                .collect();
        let extensions = if extensions.is_empty() {
            String::new()
        } else {
            to_json("cast extensions", extensions)?
        };
        config.extend([
            NodeConfig::new("converterUrl", settings.converter_url.as_str()),
            NodeConfig::new("extendedConverterUrl", settings.extended_converter_url.as_str()),
            NodeConfig::new("convertFrom", ""),
            NodeConfig::new("convertTo", desc.characteristic_id.as_str()),
            NodeConfig::new("castExtensions", extensions),
            NodeConfig::new(
                "topicToPathAndCharacteristic",
                to_json("topic to path mapping", &topic_to_path_and_characteristic)?,
            ),
        ]);
    }
    config.push(NodeConfig::new("userToken", token.as_str()));

    single_node_request(label, &desc.flow_id, &description, node_id, inputs, config)
}

#[allow(clippy::too_many_arguments)]
pub fn import_request(
    settings: &RequestSettings,
    token: &AuthToken,
    label: &str,
    node_id: &str,
    desc: &GroupEventDescription,
    topic: &str,
    path: &str,
    cast: &Cast<'_>,
) -> Result<PipelineRequest, DeployError> {
    let description = EventPipelineDescription {
        import_id: desc.import_id.clone(),
        function_id: desc.function_id.clone(),
        aspect_id: desc.aspect_id.clone(),
        characteristic_id: desc.characteristic_id.clone(),
        operator_value: desc.operator_value.clone(),
        event_id: desc.event_id.clone(),
        deployment_id: desc.deployment_id.clone(),
        flow_id: desc.flow_id.clone(),
        ..Default::default()
    };
    let input = NodeInput {
        filter_ids: desc.import_id.clone(),
        filter_type: IMPORT_FILTER_TYPE.to_owned(),
        topic_name: topic.to_owned(),
        values: vec![value(path.to_owned())],
    };

    let mut config = leading_config(settings, &desc.operator_value, &desc.event_id);
    config.extend(converter_config(settings, cast, cast.differs())?);
    config.push(NodeConfig::new("userToken", token.as_str()));

    single_node_request(label, &desc.flow_id, &description, node_id, vec![input], config)
}

/// Generic sources are passed through verbatim, no device or import resolution.
#[allow(clippy::too_many_arguments)]
pub fn generic_request(
    settings: &RequestSettings,
    token: &AuthToken,
    label: &str,
    node_id: &str,
    desc: &GroupEventDescription,
    source: &GenericEventSource,
    path: &str,
    cast: &Cast<'_>,
) -> Result<PipelineRequest, DeployError> {
    let description = EventPipelineDescription {
        generic_event_source: Some(source.clone()),
        function_id: desc.function_id.clone(),
        aspect_id: desc.aspect_id.clone(),
        characteristic_id: desc.characteristic_id.clone(),
        operator_value: desc.operator_value.clone(),
        event_id: desc.event_id.clone(),
        deployment_id: desc.deployment_id.clone(),
        flow_id: desc.flow_id.clone(),
        ..Default::default()
    };
    let input = NodeInput {
        filter_ids: source.filter_ids.clone(),
        filter_type: source.filter_type.clone(),
        topic_name: source.topic.clone(),
        values: vec![value(path.to_owned())],
    };

    let mut config = leading_config(settings, &desc.operator_value, &desc.event_id);
    config.extend(converter_config(settings, cast, cast.differs_and_known())?);
    config.push(NodeConfig::new("userToken", token.as_str()));

    single_node_request(label, &desc.flow_id, &description, node_id, vec![input], config)
}
