//! Image handling: download with the platform's quirky TLS, raw-byte cache
//! keyed by the URL's `fileid` token, and a description cache keyed by the
//! MD5 of the image bytes so each picture is only ever described once.

use async_trait::async_trait;
use base64::Engine;
use md5::{Digest, Md5};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::provider::LlmError;
use crate::llm::vlm::{SiliconFlowVlm, VisionAnnotation};

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("vlm error: {0}")]
    Vlm(#[from] LlmError),
    #[error("description cache error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unrecognized image format")]
    UnknownFormat,
}

/// Seam for the adapter's message-part renderer; stubbed in tests.
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    async fn annotate_url(
        &self,
        url: &str,
        is_sticker: bool,
    ) -> Result<VisionAnnotation, ImageError>;
}

/// On-disk cached record, one per distinct image.
#[derive(Debug, Serialize, Deserialize)]
struct DescriptionRecord {
    description: String,
    emotion: String,
    is_sticker: bool,
}

pub struct ImageManager {
    vlm: SiliconFlowVlm,
    cache_dir: PathBuf,
    http: Client,
}

impl ImageManager {
    pub fn new(vlm: SiliconFlowVlm, cache_dir: PathBuf) -> Self {
        // The platform's image host serves certificates reqwest rejects by
        // default; downloads are opt-in permissive.
        let http = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            vlm,
            cache_dir,
            http,
        }
    }

    /// Fetch image bytes, going through the raw cache when the URL carries a
    /// `fileid` token.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImageError> {
        let raw_dir = self.cache_dir.join("raw");
        tokio::fs::create_dir_all(&raw_dir).await?;

        let key = extract_fileid(url);
        if let Some(key) = &key {
            let cached = raw_dir.join(key);
            if cached.exists() {
                debug!("raw image cache hit: {}", key);
                return Ok(tokio::fs::read(cached).await?);
            }
        } else {
            warn!("no fileid token in image url, skipping raw cache");
        }

        let bytes = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?
            .to_vec();

        if let Some(key) = key {
            tokio::fs::write(raw_dir.join(key), &bytes).await?;
        }
        Ok(bytes)
    }

    /// Describe image bytes, going through the MD5-keyed description cache.
    pub async fn annotate_bytes(
        &self,
        bytes: &[u8],
        is_sticker: bool,
    ) -> Result<VisionAnnotation, ImageError> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let digest = hex::encode(Md5::digest(bytes));
        let cache_path = self.cache_dir.join(format!("{}.json", digest));

        if cache_path.exists() {
            match serde_json::from_str::<DescriptionRecord>(
                &tokio::fs::read_to_string(&cache_path).await?,
            ) {
                Ok(mut record) => {
                    if record.is_sticker != is_sticker {
                        record.is_sticker = is_sticker;
                        tokio::fs::write(&cache_path, serde_json::to_string(&record)?).await?;
                    }
                    return Ok(VisionAnnotation {
                        description: record.description,
                        emotion: record.emotion,
                    });
                }
                Err(e) => {
                    warn!("corrupt description cache {}, regenerating: {}", digest, e);
                    let _ = tokio::fs::remove_file(&cache_path).await;
                }
            }
        }

        let format = sniff_format(bytes).ok_or(ImageError::UnknownFormat)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let annotation = self.vlm.annotate(&encoded, format, is_sticker).await?;

        let record = DescriptionRecord {
            description: annotation.description.clone(),
            emotion: annotation.emotion.clone(),
            is_sticker,
        };
        tokio::fs::write(&cache_path, serde_json::to_string(&record)?).await?;
        Ok(annotation)
    }
}

#[async_trait]
impl ImageDescriber for ImageManager {
    async fn annotate_url(
        &self,
        url: &str,
        is_sticker: bool,
    ) -> Result<VisionAnnotation, ImageError> {
        let bytes = self.fetch(url).await?;
        self.annotate_bytes(&bytes, is_sticker).await
    }
}

/// Pull the `fileid` query token out of a URL, if present.
fn extract_fileid(url: &str) -> Option<String> {
    for marker in ["?fileid=", "&fileid="] {
        if let Some(pos) = url.find(marker) {
            let token: String = url[pos + marker.len()..]
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
                .collect();
            if !token.is_empty() {
                return Some(token);
            }
        }
    }
    None
}

/// Minimal magic-number sniffing for the formats the platform actually sends.
fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.len() > 11 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else {
        None
    }
}
