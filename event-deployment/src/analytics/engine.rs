use async_trait::async_trait;
use event_common::model::{EventPipelineDescription, FlowModelCell, Pipeline, PipelineRequest};
use reqwest::header;
use tracing::debug;

use crate::auth::AuthToken;
use crate::client::{check_status, endpoint, read_json, USER_ID_HEADER};
use crate::error::RequestError;

const PAGE_SIZE: usize = 500;

/// The flow engine, the flow parser and the pipeline repository of the analytics platform.
#[async_trait]
pub trait AnalyticsEngine: Send + Sync {
    async fn flow_inputs(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowModelCell>, RequestError>;

    async fn create_pipeline(
        &self,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError>;

    /// Replace the pipeline `request.id`.
    async fn update_pipeline(
        &self,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError>;

    async fn remove_pipeline(&self, user_id: &str, pipeline_id: &str)
        -> Result<(), RequestError>;

    /// Every pipeline of the user, whoever created it.
    async fn list_pipelines(&self, user_id: &str) -> Result<Vec<Pipeline>, RequestError>;
}

/// A pipeline created by this service, with its decoded description.
#[derive(Debug, Clone, PartialEq)]
pub struct EventPipeline {
    pub id: String,
    pub name: String,
    pub description: EventPipelineDescription,
}

/// Pipelines of the user whose description was written by us.
pub async fn event_pipelines(
    engine: &dyn AnalyticsEngine,
    user_id: &str,
) -> Result<Vec<EventPipeline>, RequestError> {
    let pipelines = engine.list_pipelines(user_id).await?;
    Ok(pipelines
        .into_iter()
        .filter_map(|pipeline| {
            let description = EventPipelineDescription::parse(&pipeline.description)?;
            Some(EventPipeline {
                id: pipeline.id.to_string(),
                name: pipeline.name,
                description,
            })
        })
        .collect())
}

pub struct AnalyticsClient {
    client: reqwest::Client,
    flow_engine_url: String,
    flow_parser_url: String,
    pipeline_repo_url: String,
}

impl AnalyticsClient {
    pub fn new(
        client: reqwest::Client,
        flow_engine_url: &str,
        flow_parser_url: &str,
        pipeline_repo_url: &str,
    ) -> Self {
        Self {
            client,
            flow_engine_url: flow_engine_url.to_owned(),
            flow_parser_url: flow_parser_url.to_owned(),
            pipeline_repo_url: pipeline_repo_url.to_owned(),
        }
    }

    async fn send_pipeline(
        &self,
        method: reqwest::Method,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError> {
        let url = endpoint(&self.flow_engine_url, &["pipeline"])?;
        let response = self
            .client
            .request(method, url)
            .header(header::AUTHORIZATION, token.as_str())
            .header(USER_ID_HEADER, user_id)
            .json(request)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl AnalyticsEngine for AnalyticsClient {
    async fn flow_inputs(
        &self,
        user_id: &str,
        flow_id: &str,
    ) -> Result<Vec<FlowModelCell>, RequestError> {
        let url = endpoint(&self.flow_parser_url, &["flow", "getinputs", flow_id])?;
        let response = self
            .client
            .get(url)
            .header(USER_ID_HEADER, user_id)
            .send()
            .await?;
        read_json(response).await
    }

    async fn create_pipeline(
        &self,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError> {
        self.send_pipeline(reqwest::Method::POST, token, user_id, request)
            .await
    }

    async fn update_pipeline(
        &self,
        token: &AuthToken,
        user_id: &str,
        request: &PipelineRequest,
    ) -> Result<Pipeline, RequestError> {
        self.send_pipeline(reqwest::Method::PUT, token, user_id, request)
            .await
    }

    async fn remove_pipeline(
        &self,
        user_id: &str,
        pipeline_id: &str,
    ) -> Result<(), RequestError> {
        let url = endpoint(&self.flow_engine_url, &["pipeline", pipeline_id])?;
        let response = self
            .client
            .delete(url)
            .header(USER_ID_HEADER, user_id)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    async fn list_pipelines(&self, user_id: &str) -> Result<Vec<Pipeline>, RequestError> {
        let mut result = Vec::new();
        loop {
            let mut url = endpoint(&self.pipeline_repo_url, &["pipeline"])?;
            url.query_pairs_mut()
                .append_pair("limit", &PAGE_SIZE.to_string())
                .append_pair("offset", &result.len().to_string());

            let response = self
                .client
                .get(url)
                .header(USER_ID_HEADER, user_id)
                .send()
                .await?;
            let page: Vec<Pipeline> = read_json(response).await?;
            let last_page = page.len() < PAGE_SIZE;
            result.extend(page);
            if last_page {
                debug!(user_id, count = result.len(), "listed pipelines");
                return Ok(result);
            }
        }
    }
}
