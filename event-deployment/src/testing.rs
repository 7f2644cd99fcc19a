//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use envconfig::Envconfig;
use event_common::kafka_messages::deployment::DoneNotification;
use event_common::model::{
    Concept, Device, DeploymentIndex, DeviceTypeCriteria, DeviceTypeSelectable, EventDesc,
    FlowModelCell, Function, Import, ImportType, Pipeline, PipelineRequest, Service,
    ServicePathOption,
};
use reqwest::StatusCode;
use uuid::Uuid;

use crate::analytics::engine::AnalyticsEngine;
use crate::auth::{AuthToken, TokenProvider};
use crate::config::Config;
use crate::devices::{DeviceInfos, Devices};
use crate::error::{AuthError, DeployError, RequestError, StoreError};
use crate::events::DoneProducer;
use crate::imports::Imports;
use crate::store::{DeploymentIndexStore, EventDescStore};

/// Configuration from defaults plus `vars`.
pub fn config(vars: &[(&str, &str)]) -> Config {
    let env: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::init_from_hashmap(&env).unwrap()
}

/// Configuration with group, import and generic source events switched on.
pub fn full_config(vars: &[(&str, &str)]) -> Config {
    let mut all = vec![
        ("AUTH_ENDPOINT", "http://keycloak"),
        ("AUTH_CLIENT_ID", "event-deployment"),
        ("AUTH_CLIENT_SECRET", "secret"),
        ("PERM_SEARCH_URL", "http://permission-search"),
    ];
    all.extend_from_slice(vars);
    config(&all)
}

fn status_error(status: StatusCode) -> RequestError {
    RequestError::UnexpectedStatus {
        status,
        body: String::new(),
    }
}

fn not_found() -> RequestError {
    status_error(StatusCode::NOT_FOUND)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap()
}

/// A single selectable offering `paths` on one service of a device type.
pub fn selectable(
    device_type_id: &str,
    service_id: &str,
    paths: &[(&str, &str)],
) -> DeviceTypeSelectable {
    let options = paths
        .iter()
        .map(|(path, characteristic_id)| ServicePathOption {
            service_id: service_id.to_owned(),
            path: (*path).to_owned(),
            characteristic_id: (*characteristic_id).to_owned(),
            ..Default::default()
        })
        .collect();
    DeviceTypeSelectable {
        device_type_id: device_type_id.to_owned(),
        services: vec![Service {
            id: service_id.to_owned(),
            name: service_id.to_owned(),
            ..Default::default()
        }],
        service_path_options: HashMap::from([(service_id.to_owned(), options)]),
    }
}

/// Admin token is `Bearer admin`, user tokens are `Bearer user-<id>`.
#[derive(Default)]
pub struct StaticTokens {
    unknown_users: Mutex<HashSet<String>>,
}

impl StaticTokens {
    pub fn with_unknown_user(self, user_id: &str) -> Self {
        lock(&self.unknown_users).insert(user_id.to_owned());
        self
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn admin_token(&self) -> Result<AuthToken, AuthError> {
        Ok(AuthToken::bearer("admin"))
    }

    async fn user_token(&self, user_id: &str) -> Result<AuthToken, AuthError> {
        if lock(&self.unknown_users).contains(user_id) {
            return Err(AuthError::UserDoesNotExist);
        }
        Ok(AuthToken::bearer(&format!("user-{user_id}")))
    }
}

#[derive(Default)]
struct DeviceState {
    groups: HashMap<String, Vec<String>>,
    devices: HashMap<String, Device>,
    selectables: Vec<DeviceTypeSelectable>,
    functions: HashMap<String, Function>,
    concepts: HashMap<String, Concept>,
    services: HashMap<String, Service>,
    failures: HashMap<&'static str, StatusCode>,
    calls: HashMap<&'static str, usize>,
}

/// Device repository backed by maps. Unknown ids answer 404.
#[derive(Default)]
pub struct FakeDevices {
    state: Mutex<DeviceState>,
}

impl FakeDevices {
    pub fn add_group(&self, group_id: &str, device_ids: &[&str]) {
        lock(&self.state).groups.insert(
            group_id.to_owned(),
            device_ids.iter().map(|id| (*id).to_owned()).collect(),
        );
    }

    pub fn add_device(&self, device: Device) {
        lock(&self.state).devices.insert(device.id.clone(), device);
    }

    pub fn add_selectable(&self, selectable: DeviceTypeSelectable) {
        lock(&self.state).selectables.push(selectable);
    }

    /// Register a function together with its concept.
    pub fn add_function(&self, function_id: &str, concept: Concept) {
        let mut state = lock(&self.state);
        state.functions.insert(
            function_id.to_owned(),
            Function {
                id: function_id.to_owned(),
                concept_id: concept.id.clone(),
                ..Default::default()
            },
        );
        state.concepts.insert(concept.id.clone(), concept);
    }

    pub fn add_service(&self, service: Service) {
        lock(&self.state).services.insert(service.id.clone(), service);
    }

    /// Make every call of `operation` fail with `status`.
    pub fn fail(&self, operation: &'static str, status: StatusCode) {
        lock(&self.state).failures.insert(operation, status);
    }

    pub fn calls(&self, operation: &'static str) -> usize {
        lock(&self.state)
            .calls
            .get(operation)
            .copied()
            .unwrap_or_default()
    }

    fn enter(&self, operation: &'static str) -> Result<std::sync::MutexGuard<'_, DeviceState>, RequestError> {
        let mut state = lock(&self.state);
        *state.calls.entry(operation).or_default() += 1;
        match state.failures.get(operation) {
            Some(status) => Err(status_error(*status)),
            None => Ok(state),
        }
    }
}

fn infos_of(state: &DeviceState, ids: &[String]) -> DeviceInfos {
    DeviceInfos::new(
        ids.iter()
            .filter_map(|id| state.devices.get(id).cloned())
            .collect(),
    )
}

#[async_trait]
impl Devices for FakeDevices {
    async fn device_infos_of_group(&self, group_id: &str) -> Result<DeviceInfos, RequestError> {
        let state = self.enter("device_infos_of_group")?;
        Ok(state
            .groups
            .get(group_id)
            .map(|ids| infos_of(&state, ids))
            .unwrap_or_default())
    }

    async fn device_infos_of_devices(&self, ids: &[String]) -> Result<DeviceInfos, RequestError> {
        let state = self.enter("device_infos_of_devices")?;
        Ok(infos_of(&state, ids))
    }

    async fn device_type_selectables(
        &self,
        _criteria: &[DeviceTypeCriteria],
    ) -> Result<Vec<DeviceTypeSelectable>, RequestError> {
        let state = self.enter("device_type_selectables")?;
        Ok(state.selectables.clone())
    }

    async fn function(&self, id: &str) -> Result<Function, RequestError> {
        let state = self.enter("function")?;
        state.functions.get(id).cloned().ok_or_else(not_found)
    }

    async fn concept(&self, id: &str) -> Result<Concept, RequestError> {
        let state = self.enter("concept")?;
        state.concepts.get(id).cloned().ok_or_else(not_found)
    }

    async fn service(&self, id: &str) -> Result<Service, RequestError> {
        let state = self.enter("service")?;
        state.services.get(id).cloned().ok_or_else(not_found)
    }
}

#[derive(Default)]
pub struct FakeImports {
    instances: Mutex<HashMap<String, Import>>,
    types: Mutex<HashMap<String, ImportType>>,
}

impl FakeImports {
    pub fn add(&self, instance: Import, import_type: ImportType) {
        lock(&self.instances).insert(instance.id.clone(), instance);
        lock(&self.types).insert(import_type.id.clone(), import_type);
    }
}

#[async_trait]
impl Imports for FakeImports {
    async fn import_instance(
        &self,
        _user_id: &str,
        import_id: &str,
    ) -> Result<Import, RequestError> {
        lock(&self.instances)
            .get(import_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn import_type(&self, _user_id: &str, type_id: &str) -> Result<ImportType, RequestError> {
        lock(&self.types).get(type_id).cloned().ok_or_else(not_found)
    }
}

/// A pipeline held by the fake engine.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPipeline {
    pub owner: String,
    pub token: String,
    pub request: PipelineRequest,
}

/// Flow engine, parser and pipeline repository in one. Every flow has a single
/// operator unless configured otherwise.
#[derive(Default)]
pub struct FakeAnalyticsEngine {
    pipelines: Mutex<BTreeMap<Uuid, StoredPipeline>>,
    flows: Mutex<HashMap<String, Result<Vec<FlowModelCell>, StatusCode>>>,
}

impl FakeAnalyticsEngine {
    pub fn set_flow_cells(&self, flow_id: &str, count: usize) {
        let cells = (0..count)
            .map(|i| FlowModelCell {
                id: format!("{flow_id}-node-{i}"),
                name: "operator".to_owned(),
                ..Default::default()
            })
            .collect();
        lock(&self.flows).insert(flow_id.to_owned(), Ok(cells));
    }

    pub fn fail_flow(&self, flow_id: &str, status: StatusCode) {
        lock(&self.flows).insert(flow_id.to_owned(), Err(status));
    }

    /// Stored pipelines of an owner.
    pub fn pipelines(&self, owner: &str) -> Vec<StoredPipeline> {
        lock(&self.pipelines)
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect()
    }

    pub fn pipeline_ids(&self) -> Vec<String> {
        lock(&self.pipelines).keys().map(Uuid::to_string).collect()
    }
}

#[async_trait]
impl AnalyticsEngine for FakeAnalyticsEngine {
    async fn flow_inputs(
        &self,
        _user_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowModelCell>, RequestError> {
        match lock(&self.flows).get(flow_id) {
            Some(Ok(cells)) => Ok(cells.clone()),
            Some(Err(status)) => Err(status_error(*status)),
            None => Ok(vec![FlowModelCell {
                id: format!("{flow_id}-node"),
                name: "operator".to_owned(),
                ..Default::default()
            }]),
        }
    }

    async fn create_pipeline(
        &self,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError> {
        let id = Uuid::now_v7();
        lock(&self.pipelines).insert(
            id,
            StoredPipeline {
                owner: user_id.to_owned(),
                token: token.as_str().to_owned(),
                request: request.clone(),
            },
        );
        Ok(Pipeline {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
        })
    }

    async fn update_pipeline(
        &self,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError> {
        let id = Uuid::parse_str(&request.id).map_err(|_| not_found())?;
        let mut pipelines = lock(&self.pipelines);
        let stored = pipelines.get_mut(&id).ok_or_else(not_found)?;
        *stored = StoredPipeline {
            owner: user_id.to_owned(),
            token: token.as_str().to_owned(),
            request: request.clone(),
        };
        Ok(Pipeline {
            id,
            name: request.name.clone(),
            description: request.description.clone(),
        })
    }

    async fn remove_pipeline(&self, _user_id: &str, pipeline_id: &str) -> Result<(), RequestError> {
        let id = Uuid::parse_str(pipeline_id).map_err(|_| not_found())?;
        lock(&self.pipelines)
            .remove(&id)
            .map(|_| ())
            .ok_or_else(not_found)
    }

    async fn list_pipelines(&self, user_id: &str) -> Result<Vec<Pipeline>, RequestError> {
        Ok(lock(&self.pipelines)
            .iter()
            .filter(|(_, p)| p.owner == user_id)
            .map(|(id, p)| Pipeline {
                id: *id,
                name: p.request.name.clone(),
                description: p.request.description.clone(),
            })
            .collect())
    }
}

/// Both conditional stores in memory, with an optional injected failure.
#[derive(Default)]
pub struct MemoryStore {
    descriptions: Mutex<Vec<EventDesc>>,
    index: Mutex<BTreeMap<String, DeploymentIndex>>,
    broken: Mutex<bool>,
}

impl MemoryStore {
    pub fn descriptions(&self) -> Vec<EventDesc> {
        lock(&self.descriptions).clone()
    }

    pub fn index(&self) -> Vec<DeploymentIndex> {
        lock(&self.index).values().cloned().collect()
    }

    pub fn break_store(&self) {
        *lock(&self.broken) = true;
    }

    fn check(&self) -> Result<(), StoreError> {
        if *lock(&self.broken) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    fn filter_descriptions(
        &self,
        keep: impl Fn(&EventDesc) -> bool,
    ) -> Result<Vec<EventDesc>, StoreError> {
        self.check()?;
        Ok(lock(&self.descriptions)
            .iter()
            .filter(|d| keep(d))
            .cloned()
            .collect())
    }
}

fn same_key(a: &EventDesc, b: &EventDesc) -> bool {
    a.deployment_id == b.deployment_id
        && a.event_id == b.event_id
        && a.device_id == b.device_id
        && a.service_id == b.service_id
        && a.import_id == b.import_id
}

#[async_trait]
impl EventDescStore for MemoryStore {
    async fn set(&self, desc: &EventDesc) -> Result<(), StoreError> {
        self.check()?;
        let mut descriptions = lock(&self.descriptions);
        descriptions.retain(|d| !same_key(d, desc));
        descriptions.push(desc.clone());
        Ok(())
    }

    async fn remove_by_deployment(&self, deployment_id: &str) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.descriptions).retain(|d| d.deployment_id != deployment_id);
        Ok(())
    }

    async fn by_event(&self, event_id: &str) -> Result<Vec<EventDesc>, StoreError> {
        self.filter_descriptions(|d| d.event_id == event_id)
    }

    async fn by_device_group(&self, device_group_id: &str) -> Result<Vec<EventDesc>, StoreError> {
        self.filter_descriptions(|d| d.device_group_id == device_group_id)
    }

    async fn by_deployment(&self, deployment_id: &str) -> Result<Vec<EventDesc>, StoreError> {
        self.filter_descriptions(|d| d.deployment_id == deployment_id)
    }
}

#[async_trait]
impl DeploymentIndexStore for MemoryStore {
    async fn set(&self, index: &DeploymentIndex) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.index).insert(index.id.clone(), index.clone());
        Ok(())
    }

    async fn remove(&self, deployment_id: &str) -> Result<(), StoreError> {
        self.check()?;
        lock(&self.index).remove(deployment_id);
        Ok(())
    }

    async fn by_device_group(
        &self,
        device_group_id: &str,
    ) -> Result<Vec<DeploymentIndex>, StoreError> {
        self.check()?;
        Ok(lock(&self.index)
            .values()
            .filter(|i| i.device_groups.iter().any(|g| g == device_group_id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingProducer {
    sent: Mutex<Vec<(String, DoneNotification)>>,
}

impl RecordingProducer {
    pub fn sent(&self) -> Vec<(String, DoneNotification)> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl DoneProducer for RecordingProducer {
    async fn produce(&self, key: &str, notification: &DoneNotification) -> Result<(), DeployError> {
        lock(&self.sent).push((key.to_owned(), notification.clone()));
        Ok(())
    }
}
