use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use event_common::metrics::{DEPLOYED_ANALYTICS_EVENTS, REMOVED_ANALYTICS_EVENTS};
use event_common::model::{
    ConverterExtension, Deployment, DeviceGroup, Element, GenericEventSource, MessageEvent,
    PipelineRequest, SelectionKind,
};
use reqwest::StatusCode;
use tracing::{error, info, warn};

use super::EventHandler;
use crate::analytics::engine::{event_pipelines, AnalyticsEngine};
use crate::analytics::requests::{
    device_marshaller_request, device_request, generic_request, group_request, import_request,
    Cast, DeviceEvent, GroupEventDescription, RequestSettings,
};
use crate::auth::{AuthToken, Claims, TokenProvider};
use crate::config::Config;
use crate::devices::Devices;
use crate::error::DeployError;
use crate::expansion::{expand, DeviceSource};
use crate::imports::Imports;

/// Deploys message events as analytics pipelines. Holds no state of its own, the
/// pipeline descriptions are the only link between deployments and pipelines.
pub struct AnalyticsHandler {
    settings: RequestSettings,
    import_path_prefix: String,
    generic_source_path_prefix: String,
    groups_enabled: bool,
    engine: Arc<dyn AnalyticsEngine>,
    devices: Arc<dyn Devices>,
    imports: Arc<dyn Imports>,
    auth: Arc<dyn TokenProvider>,
}

/// The message event currently being deployed.
struct EventContext<'a> {
    token: &'a AuthToken,
    owner: &'a str,
    deployment_id: &'a str,
    label: &'a str,
    event: &'a MessageEvent,
    characteristic_id: &'a str,
}

impl EventContext<'_> {
    fn function_id(&self) -> Option<&str> {
        self.event.selection.filter_criteria.function_id.as_deref()
    }

    fn aspect_id(&self) -> Option<&str> {
        self.event.selection.filter_criteria.aspect_id.as_deref()
    }
}

impl AnalyticsHandler {
    pub fn new(
        config: &Config,
        engine: Arc<dyn AnalyticsEngine>,
        devices: Arc<dyn Devices>,
        imports: Arc<dyn Imports>,
        auth: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            settings: RequestSettings::from(config),
            import_path_prefix: config.import_path_prefix.clone(),
            generic_source_path_prefix: config.generic_source_path_prefix.clone(),
            groups_enabled: config.device_groups_and_imports_enabled(),
            engine,
            devices,
            imports,
            auth,
        }
    }

    fn groups_disabled(&self) -> bool {
        if !self.groups_enabled {
            warn!("group, import and generic source events need auth and permission search settings, ignoring event");
        }
        !self.groups_enabled
    }

    async fn deploy_element(
        &self,
        token: &AuthToken,
        owner: &str,
        deployment_id: &str,
        element: &Element,
    ) -> Result<(), DeployError> {
        let Some(event) = element.message_event.as_ref() else {
            return Ok(());
        };
        let Some(characteristic_id) = event.selection.filter_criteria.characteristic_id.as_deref()
        else {
            return Ok(());
        };
        let label = format!("{} ({})", element.name, event.event_id);
        let ctx = EventContext {
            token,
            owner,
            deployment_id,
            label: &label,
            event,
            characteristic_id,
        };

        match event.selection.kind() {
            Some(SelectionKind::DeviceGroup(group_id)) => self.deploy_group_event(&ctx, group_id).await,
            Some(SelectionKind::DeviceWithService {
                device_id,
                service_id,
            }) => self.deploy_device_event(&ctx, device_id, service_id).await,
            Some(SelectionKind::DeviceWithoutService(device_id)) => {
                self.deploy_device_without_service_event(&ctx, device_id)
                    .await
            }
            Some(SelectionKind::Import(import_id)) => self.deploy_import_event(&ctx, import_id).await,
            Some(SelectionKind::GenericSource(source)) => {
                self.deploy_generic_event(&ctx, source).await
            }
            None => Ok(()),
        }
    }

    /// Conversions of the function's concept. Unknown functions and concepts have none.
    async fn cast_extensions(
        &self,
        function_id: Option<&str>,
    ) -> Result<Vec<ConverterExtension>, DeployError> {
        let Some(function_id) = function_id else {
            return Ok(Vec::new());
        };
        let function = match self.devices.function(function_id).await {
            Ok(function) => function,
            Err(e) if e.is_not_found() => {
                warn!(function_id, "unknown function, no cast extensions: {}", e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        if function.concept_id.is_empty() {
            return Ok(Vec::new());
        }
        match self.devices.concept(&function.concept_id).await {
            Ok(concept) => Ok(concept.conversions),
            Err(e) if e.is_not_found() => {
                warn!(concept_id = %function.concept_id, "unknown concept, no cast extensions: {}", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Id of the single operator of the flow, `None` when the flow is gone or hidden.
    async fn operator_node(&self, owner: &str, flow_id: &str) -> Result<Option<String>, DeployError> {
        let cells = match self.engine.flow_inputs(owner, flow_id).await {
            Ok(cells) => cells,
            Err(e) if e.is_absent() => {
                warn!(flow_id, "flow not accessible, ignoring event: {}", e);
                return Ok(None);
            }
            Err(e) => {
                error!(flow_id, "unable to get flow inputs: {}", e);
                return Err(e.into());
            }
        };
        match cells.as_slice() {
            [cell] => Ok(Some(cell.id.clone())),
            _ => {
                error!(flow_id, operators = cells.len(), "flow does not have exactly one operator");
                Err(DeployError::FlowOperatorCount(cells.len()))
            }
        }
    }

    async fn create(
        &self,
        token: &AuthToken,
        owner: &str,
        request: &PipelineRequest,
    ) -> Result<(), DeployError> {
        let pipeline = self
            .engine
            .create_pipeline(token, owner, request)
            .await
            .map_err(|e| {
                error!(flow_id = %request.flow_id, "unable to deploy pipeline: {}", e);
                e
            })?;
        metrics::counter!(DEPLOYED_ANALYTICS_EVENTS).increment(1);
        info!(pipeline_id = %pipeline.id, name = %request.name, "deployed event pipeline");
        Ok(())
    }

    async fn deploy_device_event(
        &self,
        ctx: &EventContext<'_>,
        device_id: &str,
        service_id: &str,
    ) -> Result<(), DeployError> {
        let Some(selected) = ctx.event.selection.selected_path.as_ref() else {
            warn!(event_id = %ctx.event.event_id, "device event without selected path, ignoring it");
            return Ok(());
        };
        let Some(node_id) = self.operator_node(ctx.owner, &ctx.event.flow_id).await? else {
            return Ok(());
        };

        let mut event = DeviceEvent {
            deployment_id: ctx.deployment_id.to_owned(),
            flow_id: ctx.event.flow_id.clone(),
            event_id: ctx.event.event_id.clone(),
            device_id: device_id.to_owned(),
            service_id: service_id.to_owned(),
            operator_value: ctx.event.value.clone(),
            path: selected.path.clone(),
            function_id: ctx.function_id().unwrap_or_default().to_owned(),
            aspect_id: ctx.aspect_id().unwrap_or_default().to_owned(),
            characteristic_id: ctx.characteristic_id.to_owned(),
        };

        let request = if ctx.event.use_marshaller {
            device_marshaller_request(&self.settings, ctx.token, ctx.label, &node_id, &event)?
        } else {
            let extensions = self.cast_extensions(ctx.function_id()).await?;
            event.path = format!("{}{}", self.settings.device_path_prefix, selected.path);
            device_request(
                &self.settings,
                ctx.token,
                ctx.label,
                &node_id,
                &event,
                &Cast {
                    from: &selected.characteristic_id,
                    to: ctx.characteristic_id,
                    extensions: &extensions,
                },
            )?
        };
        self.create(ctx.token, ctx.owner, &request).await
    }

    /// Group description of the event, `None` when function or aspect are missing.
    fn group_description(&self, ctx: &EventContext<'_>) -> Option<GroupEventDescription> {
        let (Some(function_id), Some(aspect_id)) = (ctx.function_id(), ctx.aspect_id()) else {
            warn!(
                event_id = %ctx.event.event_id,
                deployment_id = ctx.deployment_id,
                "event without function or aspect, ignoring it"
            );
            return None;
        };
        Some(GroupEventDescription {
            event_id: ctx.event.event_id.clone(),
            deployment_id: ctx.deployment_id.to_owned(),
            characteristic_id: ctx.characteristic_id.to_owned(),
            function_id: function_id.to_owned(),
            aspect_id: aspect_id.to_owned(),
            flow_id: ctx.event.flow_id.clone(),
            operator_value: ctx.event.value.clone(),
            use_marshaller: ctx.event.use_marshaller,
            ..Default::default()
        })
    }

    async fn deploy_group_event(
        &self,
        ctx: &EventContext<'_>,
        group_id: &str,
    ) -> Result<(), DeployError> {
        if self.groups_disabled() {
            return Ok(());
        }
        let Some(mut desc) = self.group_description(ctx) else {
            return Ok(());
        };
        desc.device_group_id = group_id.to_owned();
        self.deploy_group(ctx.token, ctx.owner, ctx.label, &desc, None)
            .await
    }

    async fn deploy_device_without_service_event(
        &self,
        ctx: &EventContext<'_>,
        device_id: &str,
    ) -> Result<(), DeployError> {
        if self.groups_disabled() {
            return Ok(());
        }
        let Some(mut desc) = self.group_description(ctx) else {
            return Ok(());
        };
        desc.device_ids = Some(vec![device_id.to_owned()]);
        self.deploy_group(ctx.token, ctx.owner, ctx.label, &desc, None)
            .await
    }

    /// Create the pipeline of a group description, or replace `pipeline_id` with it.
    async fn deploy_group(
        &self,
        token: &AuthToken,
        owner: &str,
        label: &str,
        desc: &GroupEventDescription,
        pipeline_id: Option<&str>,
    ) -> Result<(), DeployError> {
        let source = match desc.device_ids.as_deref() {
            Some(ids) => DeviceSource::Devices(ids),
            None if !desc.device_group_id.is_empty() => DeviceSource::Group(&desc.device_group_id),
            None => return Err(DeployError::MissingField("device group id")),
        };
        if desc.function_id.is_empty() || desc.aspect_id.is_empty() || desc.deployment_id.is_empty() {
            warn!(
                event_id = %desc.event_id,
                "group event without function, aspect or deployment, ignoring it"
            );
            return Ok(());
        }

        let expansion = match expand(
            self.devices.as_ref(),
            source,
            &desc.function_id,
            &desc.aspect_id,
        )
        .await
        {
            Ok(expansion) => expansion,
            Err(e) if e.is_not_found() => {
                warn!(event_id = %desc.event_id, "devices of event not found, ignoring it: {}", e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let extensions = self.cast_extensions(Some(&desc.function_id)).await?;
        let Some(node_id) = self.operator_node(owner, &desc.flow_id).await? else {
            return Ok(());
        };

        let mut request = group_request(
            &self.settings,
            token,
            label,
            &node_id,
            desc,
            &expansion,
            &extensions,
        )?;
        match pipeline_id {
            None => self.create(token, owner, &request).await,
            Some(pipeline_id) => {
                request.id = pipeline_id.to_owned();
                self.engine
                    .update_pipeline(token, owner, &request)
                    .await
                    .map_err(|e| {
                        error!(pipeline_id, "unable to update pipeline: {}", e);
                        e
                    })?;
                info!(pipeline_id, "updated group event pipeline");
                Ok(())
            }
        }
    }

    async fn deploy_import_event(
        &self,
        ctx: &EventContext<'_>,
        import_id: &str,
    ) -> Result<(), DeployError> {
        if self.groups_disabled() {
            return Ok(());
        }
        let Some(mut desc) = self.group_description(ctx) else {
            return Ok(());
        };
        desc.import_id = import_id.to_owned();
        desc.use_marshaller = false;

        let (cast_from, path, extensions) = match ctx.event.selection.selected_path.as_ref() {
            Some(selected) => (
                selected.characteristic_id.as_str(),
                selected.path.as_str(),
                self.cast_extensions(ctx.function_id()).await?,
            ),
            None => ("", "", Vec::new()),
        };
        if path.is_empty() {
            return Err(DeployError::MissingField("path"));
        }

        let topic = self.imports.topic(ctx.owner, import_id).await?;
        let Some(node_id) = self.operator_node(ctx.owner, &desc.flow_id).await? else {
            return Ok(());
        };
        let request = import_request(
            &self.settings,
            ctx.token,
            ctx.label,
            &node_id,
            &desc,
            &topic,
            &format!("{}{}", self.import_path_prefix, path),
            &Cast {
                from: cast_from,
                to: ctx.characteristic_id,
                extensions: &extensions,
            },
        )?;
        self.create(ctx.token, ctx.owner, &request).await
    }

    async fn deploy_generic_event(
        &self,
        ctx: &EventContext<'_>,
        source: &GenericEventSource,
    ) -> Result<(), DeployError> {
        let path = ctx
            .event
            .selection
            .selected_path
            .as_ref()
            .filter(|selected| !selected.path.is_empty());
        let Some(selected) = path.filter(|_| {
            !source.filter_type.is_empty() && !source.filter_ids.is_empty() && !source.topic.is_empty()
        }) else {
            warn!(
                event_id = %ctx.event.event_id,
                "generic source event without filter, topic or path, ignoring it"
            );
            return Ok(());
        };
        if self.groups_disabled() {
            return Ok(());
        }

        let extensions = if selected.characteristic_id.is_empty() {
            Vec::new()
        } else {
            self.cast_extensions(ctx.function_id()).await?
        };
        let desc = GroupEventDescription {
            generic_event_source: Some(source.clone()),
            event_id: ctx.event.event_id.clone(),
            deployment_id: ctx.deployment_id.to_owned(),
            characteristic_id: ctx.characteristic_id.to_owned(),
            function_id: ctx.function_id().unwrap_or_default().to_owned(),
            aspect_id: ctx.aspect_id().unwrap_or_default().to_owned(),
            flow_id: ctx.event.flow_id.clone(),
            operator_value: ctx.event.value.clone(),
            path: selected.path.clone(),
            ..Default::default()
        };

        let Some(node_id) = self.operator_node(ctx.owner, &desc.flow_id).await? else {
            return Ok(());
        };
        let request = generic_request(
            &self.settings,
            ctx.token,
            ctx.label,
            &node_id,
            &desc,
            source,
            &format!("{}{}", self.generic_source_path_prefix, selected.path),
            &Cast {
                from: &selected.characteristic_id,
                to: ctx.characteristic_id,
                extensions: &extensions,
            },
        )?;
        self.create(ctx.token, ctx.owner, &request).await
    }
}

#[async_trait]
impl EventHandler for AnalyticsHandler {
    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn deploy(&self, owner: &str, deployment: &Deployment) -> Result<(), DeployError> {
        self.remove(owner, &deployment.id).await?;
        let token = self.auth.user_token(owner).await?;
        for element in &deployment.elements {
            self.deploy_element(&token, owner, &deployment.id, element)
                .await?;
        }
        Ok(())
    }

    async fn remove(&self, owner: &str, deployment_id: &str) -> Result<(), DeployError> {
        let pipelines = event_pipelines(self.engine.as_ref(), owner).await?;
        for pipeline in pipelines
            .iter()
            .filter(|p| p.description.deployment_id == deployment_id)
        {
            self.engine.remove_pipeline(owner, &pipeline.id).await?;
            metrics::counter!(REMOVED_ANALYTICS_EVENTS).increment(1);
            info!(pipeline_id = %pipeline.id, deployment_id, "removed event pipeline");
        }
        Ok(())
    }

    async fn update_device_group(
        &self,
        owner: &str,
        group: &DeviceGroup,
    ) -> Result<(), DeployError> {
        if !self.groups_enabled {
            return Ok(());
        }
        let pipelines: Vec<_> = event_pipelines(self.engine.as_ref(), owner)
            .await
            .map_err(|e| {
                error!(owner, group_id = %group.id, "unable to list pipelines for device group: {}", e);
                e
            })?
            .into_iter()
            .filter(|p| p.description.device_group_id == group.id)
            .collect();
        if pipelines.is_empty() {
            return Ok(());
        }

        let token = self.auth.user_token(owner).await?;
        for pipeline in &pipelines {
            let mut desc = GroupEventDescription::from_pipeline(&pipeline.description);
            desc.device_ids = Some(group.device_ids.clone());
            self.deploy_group(&token, owner, &pipeline.name, &desc, Some(&pipeline.id))
                .await?;
        }
        Ok(())
    }

    async fn check_event(&self, token: &str, event_id: &str) -> StatusCode {
        let claims = match Claims::parse(token) {
            Ok(claims) => claims,
            Err(e) => {
                error!("unable to read user from token: {}", e);
                return StatusCode::BAD_REQUEST;
            }
        };
        match event_pipelines(self.engine.as_ref(), &claims.sub).await {
            Ok(pipelines) if pipelines.iter().any(|p| p.description.event_id == event_id) => {
                StatusCode::OK
            }
            Ok(_) => StatusCode::NOT_FOUND,
            Err(e) => {
                error!(event_id, "unable to look up event pipeline: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    async fn get_event_states(
        &self,
        token: &str,
        event_ids: &[String],
    ) -> Result<HashMap<String, bool>, DeployError> {
        let claims = Claims::parse(token)?;
        if event_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let pipelines = event_pipelines(self.engine.as_ref(), &claims.sub).await?;
        let deployed: HashSet<&str> = pipelines
            .iter()
            .map(|p| p.description.event_id.as_str())
            .collect();
        Ok(event_ids
            .iter()
            .map(|id| (id.clone(), deployed.contains(id.as_str())))
            .collect())
    }
}
