use std::sync::Arc;

use async_trait::async_trait;
use event_common::model::{
    Concept, Device, DeviceGroup, DeviceTypeCriteria, DeviceTypeSelectable, Function, Service,
};
use reqwest::header;
use tracing::{debug, warn};

use crate::auth::TokenProvider;
use crate::client::{endpoint, read_json};
use crate::error::RequestError;

/// Devices together with the distinct ids of their device types, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfos {
    pub devices: Vec<Device>,
    pub device_type_ids: Vec<String>,
}

impl DeviceInfos {
    pub fn new(devices: Vec<Device>) -> Self {
        let mut device_type_ids: Vec<String> = Vec::new();
        for device in &devices {
            if !device_type_ids.contains(&device.device_type_id) {
                device_type_ids.push(device.device_type_id.clone());
            }
        }
        Self {
            devices,
            device_type_ids,
        }
    }
}

#[async_trait]
pub trait Devices: Send + Sync {
    /// Members of a group. A group we cannot see resolves to no devices.
    async fn device_infos_of_group(&self, group_id: &str) -> Result<DeviceInfos, RequestError>;

    async fn device_infos_of_devices(&self, ids: &[String]) -> Result<DeviceInfos, RequestError>;

    async fn device_type_selectables(
        &self,
        criteria: &[DeviceTypeCriteria],
    ) -> Result<Vec<DeviceTypeSelectable>, RequestError>;

    async fn function(&self, id: &str) -> Result<Function, RequestError>;

    async fn concept(&self, id: &str) -> Result<Concept, RequestError>;

    async fn service(&self, id: &str) -> Result<Service, RequestError>;
}

/// Client of the device repository. Every request carries the admin token.
pub struct DeviceRepository {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl DeviceRepository {
    pub fn new(client: reqwest::Client, base_url: &str, auth: Arc<dyn TokenProvider>) -> Self {
        Self {
            client,
            base_url: base_url.to_owned(),
            auth,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        segments: &[&str],
    ) -> Result<T, RequestError> {
        let token = self.auth.admin_token().await?;
        let url = endpoint(&self.base_url, segments)?;
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, token.as_str())
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl Devices for DeviceRepository {
    async fn device_infos_of_group(&self, group_id: &str) -> Result<DeviceInfos, RequestError> {
        let group: DeviceGroup = match self.get(&["device-groups", group_id]).await {
            Ok(group) => group,
            Err(e) if e.is_absent() => {
                warn!(group_id, "device group not accessible, treating it as empty: {}", e);
                return Ok(DeviceInfos::default());
            }
            Err(e) => return Err(e),
        };
        self.device_infos_of_devices(&group.device_ids).await
    }

    async fn device_infos_of_devices(&self, ids: &[String]) -> Result<DeviceInfos, RequestError> {
        if ids.is_empty() {
            return Ok(DeviceInfos::default());
        }
        let token = self.auth.admin_token().await?;
        let mut url = endpoint(&self.base_url, &["devices"])?;
        url.query_pairs_mut()
            .append_pair("ids", &ids.join(","))
            .append_pair("limit", &ids.len().to_string());

        debug!(count = ids.len(), "fetching devices");
        let response = self
            .client
            .get(url)
            .header(header::AUTHORIZATION, token.as_str())
            .send()
            .await?;
        let devices: Vec<Device> = read_json(response).await?;
        Ok(DeviceInfos::new(devices))
    }

    async fn device_type_selectables(
        &self,
        criteria: &[DeviceTypeCriteria],
    ) -> Result<Vec<DeviceTypeSelectable>, RequestError> {
        let token = self.auth.admin_token().await?;
        let mut url = endpoint(&self.base_url, &["query", "device-type-selectables"])?;
        url.query_pairs_mut()
            .append_pair("interactions-filter", "event")
            .append_pair("include_id_modified", "true");

        let response = self
            .client
            .post(url)
            .header(header::AUTHORIZATION, token.as_str())
            .json(criteria)
            .send()
            .await?;
        read_json(response).await
    }

    async fn function(&self, id: &str) -> Result<Function, RequestError> {
        self.get(&["functions", id]).await
    }

    async fn concept(&self, id: &str) -> Result<Concept, RequestError> {
        self.get(&["concepts", id]).await
    }

    async fn service(&self, id: &str) -> Result<Service, RequestError> {
        self.get(&["services", id]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::build_http_client;
    use crate::testing::StaticTokens;
    use httpmock::prelude::*;
    use reqwest::StatusCode;
    use std::time::Duration;

    fn repository(server: &MockServer) -> DeviceRepository {
        DeviceRepository::new(
            build_http_client(Duration::from_secs(5)),
            &server.base_url(),
            Arc::new(StaticTokens::default()),
        )
    }

    fn device(id: &str, device_type_id: &str) -> serde_json::Value {
        serde_json::json!({"id": id, "name": id, "device_type_id": device_type_id})
    }

    #[tokio::test]
    async fn group_members_are_resolved() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/device-groups/g1")
                    .header("Authorization", "Bearer admin");
                then.status(200).json_body(serde_json::json!({
                    "id": "g1",
                    "name": "lamps",
                    "device_ids": ["d1", "d2", "d3"]
                }));
            })
            .await;
        let devices = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/devices")
                    .query_param("ids", "d1,d2,d3");
                then.status(200).json_body(serde_json::json!([
                    device("d1", "t1"),
                    device("d2", "t1"),
                    device("d3", "t2"),
                ]));
            })
            .await;

        let infos = repository(&server).device_infos_of_group("g1").await.unwrap();
        devices.assert_async().await;
        assert_eq!(infos.devices.len(), 3);
        assert_eq!(infos.device_type_ids, vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn hidden_group_resolves_to_nothing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/device-groups/g1");
                then.status(403).body("forbidden");
            })
            .await;

        let infos = repository(&server).device_infos_of_group("g1").await.unwrap();
        assert_eq!(infos, DeviceInfos::default());
    }

    #[tokio::test]
    async fn group_lookup_failure_propagates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/device-groups/g1");
                then.status(502).body("bad gateway");
            })
            .await;

        let err = repository(&server)
            .device_infos_of_group("g1")
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn selectables_are_queried_for_events() {
        let server = MockServer::start_async().await;
        let query = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/query/device-type-selectables")
                    .query_param("interactions-filter", "event")
                    .query_param("include_id_modified", "true")
                    .json_body(serde_json::json!([
                        {"function_id": "f1", "device_class_id": "", "aspect_id": "a1"}
                    ]));
                then.status(200).json_body(serde_json::json!([{
                    "device_type_id": "t1",
                    "services": [{"id": "s1"}],
                    "service_path_options": {
                        "s1": [{"service_id": "s1", "path": "value.level", "characteristic_id": "c1"}]
                    }
                }]));
            })
            .await;

        let result = repository(&server)
            .device_type_selectables(&[DeviceTypeCriteria {
                function_id: "f1".to_owned(),
                aspect_id: "a1".to_owned(),
                ..Default::default()
            }])
            .await
            .unwrap();
        query.assert_async().await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].services[0].id, "s1");
        assert_eq!(result[0].service_path_options["s1"][0].path, "value.level");
    }

    #[tokio::test]
    async fn services_are_fetched_by_id() {
        let server = MockServer::start_async().await;
        let lookup = server
            .mock_async(|when, then| {
                when.method(GET).path_contains("/services/urn:service:1");
                then.status(200)
                    .json_body(serde_json::json!({"id": "urn:service:1#a", "name": "get"}));
            })
            .await;

        let service = repository(&server).service("urn:service:1#a").await.unwrap();
        lookup.assert_async().await;
        assert_eq!(service.name, "get");
    }
}
