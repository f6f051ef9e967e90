//! HTTP client for the knowledge index ingestion API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{IndexSyncClient, IndexSyncError, IngestionJob};

/// Starts ingestion passes through `POST /knowledgebases/{kb}/datasources/{ds}/ingestionjobs/`.
pub struct IngestionClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    knowledge_base_id: String,
    data_source_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartIngestionResponse {
    ingestion_job: IngestionJobBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IngestionJobBody {
    ingestion_job_id: String,
    #[serde(default)]
    status: String,
}

impl IngestionClient {
    /// Build a client for one knowledge base data source.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        knowledge_base_id: &str,
        data_source_id: &str,
        connect_timeout: Duration,
    ) -> Result<Self, IndexSyncError> {
        let http = Client::builder()
            .user_agent("doctoknow/ingestion")
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|error| IndexSyncError::Unavailable(error.to_string()))?;
        tracing::debug!(
            url = %base_url,
            knowledge_base_id,
            data_source_id,
            "Initialized ingestion client"
        );
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            knowledge_base_id: knowledge_base_id.to_string(),
            data_source_id: data_source_id.to_string(),
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.header("api-key", api_key);
        }
        request
    }
}

#[async_trait]
impl IndexSyncClient for IngestionClient {
    async fn start_ingestion(&self) -> Result<IngestionJob, IndexSyncError> {
        let path = format!(
            "knowledgebases/{}/datasources/{}/ingestionjobs/",
            self.knowledge_base_id, self.data_source_id
        );
        let response = self
            .request(Method::POST, &path)
            .json(&json!({}))
            .send()
            .await
            .map_err(|error| IndexSyncError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let header_code = response
                .headers()
                .get("x-amzn-errortype")
                .and_then(|value| value.to_str().ok())
                .map(|value| value.split(':').next().unwrap_or(value).to_string());
            let body = response.text().await.unwrap_or_default();
            return Err(rejection(status.as_u16(), header_code, &body));
        }

        let body: StartIngestionResponse = response.json().await.map_err(|error| {
            IndexSyncError::Unavailable(format!("failed to decode ingestion response: {error}"))
        })?;
        Ok(IngestionJob {
            ingestion_job_id: body.ingestion_job.ingestion_job_id,
            status: body.ingestion_job.status,
        })
    }
}

fn rejection(status: u16, header_code: Option<String>, body: &str) -> IndexSyncError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| parsed.get(*name).and_then(Value::as_str))
            .map(str::to_string)
    };
    let code = header_code
        .or_else(|| field(&["code", "__type"]))
        .unwrap_or_else(|| format!("HTTP{status}"));
    let message = field(&["message", "Message"]).unwrap_or_else(|| body.to_string());
    IndexSyncError::Rejected { code, message }
}
