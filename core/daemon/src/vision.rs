//! Client for the external pose-estimation service.
//!
//! The service is a black box: it takes an encoded frame and answers with a
//! rep count, stage and joint angle. It also keeps its own per-session model
//! state, which `reset` clears.

use async_trait::async_trait;
use formcoach_protocol::RawAnalysis;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::error::UpstreamError;

#[async_trait]
pub trait VisionService: Send + Sync {
    async fn analyze(&self, image: &str) -> Result<RawAnalysis, UpstreamError>;

    async fn reset(&self) -> Result<(), UpstreamError>;
}

/// `VisionService` over HTTP (`POST /analyze`, `POST /reset`).
#[derive(Clone)]
pub struct HttpVisionService {
    client: Client,
    base_url: String,
}

impl HttpVisionService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| UpstreamError::Failed(format!("Failed to build HTTP client: {}", err)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

#[async_trait]
impl VisionService for HttpVisionService {
    async fn analyze(&self, image: &str) -> Result<RawAnalysis, UpstreamError> {
        let response = self
            .client
            .post(self.endpoint("analyze"))
            .json(&json!({ "image": image }))
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;

        response.json::<RawAnalysis>().await.map_err(classify)
    }

    async fn reset(&self) -> Result<(), UpstreamError> {
        self.client
            .post(self.endpoint("reset"))
            .send()
            .await
            .map_err(classify)?
            .error_for_status()
            .map_err(classify)?;
        Ok(())
    }
}

fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(err.to_string())
    } else if err.is_connect() {
        UpstreamError::Unreachable(err.to_string())
    } else {
        UpstreamError::Failed(err.to_string())
    }
}
