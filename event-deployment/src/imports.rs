use async_trait::async_trait;
use event_common::model::{Import, ImportType};

use crate::client::{endpoint, read_json, USER_ID_HEADER};
use crate::error::RequestError;

#[async_trait]
pub trait Imports: Send + Sync {
    /// Kafka topic a running import publishes to.
    async fn topic(&self, user_id: &str, import_id: &str) -> Result<String, RequestError> {
        Ok(self.import_instance(user_id, import_id).await?.kafka_topic)
    }

    async fn import_instance(&self, user_id: &str, import_id: &str)
        -> Result<Import, RequestError>;

    async fn import_type(&self, user_id: &str, type_id: &str) -> Result<ImportType, RequestError>;
}

pub struct ImportClient {
    client: reqwest::Client,
    deploy_url: String,
    repository_url: String,
}

impl ImportClient {
    pub fn new(client: reqwest::Client, deploy_url: &str, repository_url: &str) -> Self {
        Self {
            client,
            deploy_url: deploy_url.to_owned(),
            repository_url: repository_url.to_owned(),
        }
    }
}

#[async_trait]
impl Imports for ImportClient {
    async fn import_instance(
        &self,
        user_id: &str,
        import_id: &str,
    ) -> Result<Import, RequestError> {
        let url = endpoint(&self.deploy_url, &["instances", import_id])?;
        let response = self
            .client
            .get(url)
            .header(USER_ID_HEADER, user_id)
            .send()
            .await?;
        read_json(response).await
    }

    async fn import_type(&self, user_id: &str, type_id: &str) -> Result<ImportType, RequestError> {
        let url = endpoint(&self.repository_url, &["import-types", type_id])?;
        let response = self
            .client
            .get(url)
            .header(USER_ID_HEADER, user_id)
            .send()
            .await?;
        read_json(response).await
    }
}
