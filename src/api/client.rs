use std::time::Duration;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Body, Client, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;
use crate::config::ApiConfig;
use crate::errors::{Result, UploadError};
use crate::progress::ProgressEmitter;
use crate::traits::{RemoteProcessor, StageRequester, TaskStatusChecker, TransferExecutor};
use crate::types::{ProcessingTask, StagedAsset, StatusReport};
use super::progress_stream::{chunked, ProgressStream};

#[derive(Serialize)]
struct ProcessRequest<'a> {
    key: &'a str,
    pipeline: &'a str,
}

#[derive(Serialize)]
struct StatusRequest<'a> {
    #[serde(rename = "taskId")]
    task_id: &'a str,
}

/// 处理流水线服务的 HTTP 客户端
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
    pipeline: String,
    chunk_size: usize,
}

impl HttpApi {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: &ApiConfig) -> Result<Self> {
        // 保证以 `/` 结尾，join 时不会丢掉最后一段路径
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');

        Ok(Self {
            client,
            base_url: Url::parse(&base)?,
            pipeline: config.pipeline.clone(),
            chunk_size: config.chunk_size,
        })
    }

    pub fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await?;

        let response = Self::check_status(response, path).await?;
        Ok(response.json::<T>().await?)
    }

    async fn check_status(response: Response, action: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        let message = if message.is_empty() {
            format!("{} failed", action)
        } else {
            message
        };

        Err(UploadError::server_error(status.as_u16(), message))
    }
}

#[async_trait]
impl StageRequester for HttpApi {
    async fn stage(&self) -> Result<StagedAsset> {
        self.post_json("assets/stage", &serde_json::json!({})).await
    }
}

#[async_trait]
impl TransferExecutor for HttpApi {
    async fn transfer(&self, url: &str, payload: Bytes, progress: ProgressEmitter) -> Result<()> {
        let total = payload.len() as u64;
        let stream = ProgressStream::new(chunked(payload, self.chunk_size), progress, total);

        let response = self.client
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, total)
            .body(Body::wrap_stream(stream))
            .send()
            .await?;

        Self::check_status(response, "upload").await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteProcessor for HttpApi {
    async fn start_processing(&self, key: &str) -> Result<ProcessingTask> {
        let request = ProcessRequest {
            key,
            pipeline: &self.pipeline,
        };

        self.post_json("assets/process", &request)
            .await
            .map_err(|err| UploadError::Processing(err.to_string()))
    }
}

#[async_trait]
impl TaskStatusChecker for HttpApi {
    async fn check_status(&self, task_id: &str) -> Result<StatusReport> {
        self.post_json("assets/status", &StatusRequest { task_id })
            .await
            .map_err(|err| UploadError::status_check_error(err.to_string()))
    }
}
