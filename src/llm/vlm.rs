//! SiliconFlow vision-language describer.
//!
//! Turns an image into two short Chinese annotations: a content description
//! and an emotion triple. Both are produced by separate requests so either
//! prompt can evolve on its own.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::llm::openai::{ContentPart, ImageUrlDetail, Message, MessageContent};
use crate::llm::provider::LlmError;

const VLM_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_ENDPOINT: &str = "https://api.siliconflow.cn/v1";
const DEFAULT_MODEL: &str = "Pro/Qwen/Qwen2.5-VL-7B-Instruct";

const DESCRIPTION_PROMPT: &str =
    "请用中文描述这张图片的内容。如果有文字，请把文字都描述出来。并尝试猜测这个图片的含义。最多100个字";
const STICKER_DESCRIPTION_PROMPT: &str =
    "这是一个聊天表情包。请用中文描述它的画面内容和文字，并猜测使用它想表达什么。最多100个字";
const EMOTION_PROMPT: &str =
    "请分析这个表情包表达的情感，用中文给出'情感，类型，含义'的三元式描述，要求每个描述都是一个简单的词语";

/// The two annotations produced for one image.
#[derive(Debug, Clone)]
pub struct VisionAnnotation {
    pub description: String,
    pub emotion: String,
}

#[derive(Debug, Deserialize)]
struct VlmResponse {
    choices: Vec<VlmChoice>,
}

#[derive(Debug, Deserialize)]
struct VlmChoice {
    message: VlmMessage,
}

#[derive(Debug, Deserialize)]
struct VlmMessage {
    content: Option<String>,
}

pub struct SiliconFlowVlm {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl SiliconFlowVlm {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_ENDPOINT.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(VLM_TIMEOUT)
                .build()
                .unwrap_or_default(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            base_url,
        }
    }

    /// Describe one image: content first, then the emotion triple. Stickers
    /// get a prompt that asks for the intent behind the picture.
    pub async fn annotate(
        &self,
        image_base64: &str,
        image_format: &str,
        is_sticker: bool,
    ) -> Result<VisionAnnotation, LlmError> {
        let description_prompt = if is_sticker {
            STICKER_DESCRIPTION_PROMPT
        } else {
            DESCRIPTION_PROMPT
        };
        let description = self
            .request(description_prompt, image_base64, image_format)
            .await?;
        let emotion = self
            .request(EMOTION_PROMPT, image_base64, image_format)
            .await?;
        Ok(VisionAnnotation {
            description,
            emotion,
        })
    }

    async fn request(
        &self,
        prompt: &str,
        image_base64: &str,
        image_format: &str,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let message = Message {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: format!("data:image/{};base64,{}", image_format, image_base64),
                    },
                },
                ContentPart::Text {
                    text: prompt.to_string(),
                },
            ]),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [message],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status, body });
        }

        let body: VlmResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .ok_or(LlmError::EmptyCompletion)
    }
}
