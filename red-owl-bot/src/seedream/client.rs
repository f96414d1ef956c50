use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{FalError, GenRequest};
use crate::config::SeedreamConfig;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(300);
const STATUS_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(180);
const MAX_ERROR_BODY: usize = 500;

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct FalImage {
    #[serde(default)]
    pub url: Option<String>,
}

/// Body of a submit or result response.
#[derive(Deserialize, Debug, Default)]
pub struct GenOutput {
    #[serde(default)]
    pub images: Vec<FalImage>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub request_id: Option<String>,
}

/// Body of a queue status response.
#[derive(Deserialize, Debug, Default)]
pub struct QueueStatus {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub failed: Option<bool>,
    #[serde(default, alias = "queue_position")]
    pub position: Option<i64>,
    #[serde(default)]
    pub eta: Option<f64>,
    #[serde(default)]
    pub response_url: Option<String>,
}

/// A downloaded image with the file extension matching its content type.
pub struct ImageFile {
    pub bytes: Vec<u8>,
    pub extension: &'static str,
}

pub struct FalClient {
    http: Client,
    key: String,
    config: SeedreamConfig,
}

impl FalClient {
    pub fn new(http: Client, key: String, config: SeedreamConfig) -> Self {
        Self { http, key, config }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    async fn check(resp: Response) -> Result<Response, FalError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(FalError::Api {
            status,
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        })
    }

    /// Submit a generation, or an edit when `image_urls` is not empty.
    pub async fn submit(&self, request: &GenRequest, image_urls: &[String]) -> Result<GenOutput, FalError> {
        let mut payload = json!({
            "prompt": request.prompt,
            "image_size": { "width": request.width, "height": request.height },
            "num_images": 1,
            "enable_safety_checker": false,
        });

        let url = if image_urls.is_empty() {
            &self.config.text_to_image_url
        } else {
            payload["image_urls"] = json!(image_urls);
            &self.config.edit_url
        };

        debug!("Submitting Seedream request to {url}");

        let resp = self
            .http
            .post(url)
            .header("Authorization", format!("Key {}", self.key))
            .json(&payload)
            .timeout(SUBMIT_TIMEOUT)
            .send()
            .await?;

        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn status(&self, request_id: &str) -> Result<QueueStatus, FalError> {
        let resp = self
            .http
            .get(format!("{}/{request_id}/status", self.config.requests_url))
            .header("Authorization", format!("Key {}", self.key))
            .timeout(STATUS_TIMEOUT)
            .send()
            .await?;

        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn result(&self, request_id: &str, response_url: Option<&str>) -> Result<GenOutput, FalError> {
        let url = response_url
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{}/{request_id}", self.config.requests_url));

        let resp = self
            .http
            .get(url)
            .header("Authorization", format!("Key {}", self.key))
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await?;

        Ok(Self::check(resp).await?.json().await?)
    }

    pub async fn download(&self, url: &str) -> Result<ImageFile, FalError> {
        let resp = self.http.get(url).timeout(DOWNLOAD_TIMEOUT).send().await?;
        let resp = Self::check(resp).await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_lowercase();
        let extension = if content_type.contains("png") { "png" } else { "jpg" };

        Ok(ImageFile {
            bytes: resp.bytes().await?.to_vec(),
            extension,
        })
    }
}
