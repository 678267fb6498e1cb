//! SiliconFlow embedding client.
//!
//! The retrieval gate only needs approximate similarity, so embedding
//! failures degrade to zero vectors instead of erroring: the gate treats
//! them as "no similarity information" and issues a fresh retrieval.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, warn};

const EMBED_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_ENDPOINT: &str = "https://api.siliconflow.cn/v1/embeddings";
const DEFAULT_MODEL: &str = "BAAI/bge-m3";

/// Text embedding service. Always returns one vector per input; a failed
/// backend yields `[0.0]` placeholders.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> Vec<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

pub struct SiliconFlowEmbeddings {
    client: Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl SiliconFlowEmbeddings {
    pub fn new(api_key: String) -> Self {
        Self::with_endpoint(api_key, DEFAULT_ENDPOINT.to_string())
    }

    pub fn with_endpoint(api_key: String, endpoint: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(EMBED_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            endpoint,
        }
    }

    async fn request_once(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, reqwest::Error> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: inputs,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: EmbeddingResponse = response.json().await?;
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl TextEmbedder for SiliconFlowEmbeddings {
    async fn embed(&self, inputs: &[String]) -> Vec<Vec<f32>> {
        if inputs.is_empty() {
            return Vec::new();
        }

        let mut attempt = 0;
        loop {
            match self.request_once(inputs).await {
                Ok(vectors) if vectors.len() == inputs.len() => return vectors,
                Ok(vectors) => {
                    error!(
                        "embedding endpoint returned {} vectors for {} inputs",
                        vectors.len(),
                        inputs.len()
                    );
                    break;
                }
                Err(e) if e.is_timeout() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!("embedding request timed out, retry {}/{}", attempt, MAX_RETRIES);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    error!("embedding request failed: {}", e);
                    break;
                }
            }
        }

        // Zero-vector fallback, one per input.
        warn!("returning {} placeholder vectors after embedding failure", inputs.len());
        inputs.iter().map(|_| vec![0.0]).collect()
    }
}
