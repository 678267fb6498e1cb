//! Chat-platform boundary.
//!
//! The platform delivers messages as tagged part lists; the agent consumes a
//! single rendered string per message. Rendering resolves `@` mentions to
//! display names, inlines VLM annotations for images and stickers, and drops
//! anything it does not understand.

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::image::ImageDescriber;

/// Placeholder inlined when an image cannot be fetched or described.
const IMAGE_FAILURE_PLACEHOLDER: &str = "\n[图片/表情，网卡了加载不出来]\n";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("platform error: {0}")]
    Platform(String),
}

/// One tagged segment of a platform message.
#[derive(Debug, Clone)]
pub enum MessagePart {
    Text(String),
    Image { url: String, sticker: bool },
    Emoji { url: String },
    At { target_id: String },
    Reply,
    Unknown(String),
}

/// One inbound platform event, already demultiplexed per group.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub group_id: i64,
    pub user_id: String,
    pub parts: Vec<MessagePart>,
    /// Set when the message was authored by the agent's own account.
    pub from_self: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GroupMember {
    pub card: Option<String>,
    pub nickname: Option<String>,
}

impl GroupMember {
    /// Group card wins over nickname; falls back to the raw id.
    pub fn display_name(&self, fallback: &str) -> String {
        self.card
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.nickname.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or(fallback)
            .to_string()
    }
}

/// What the agent needs from the platform: member lookup and group egress.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn group_member(&self, group_id: i64, user_id: &str)
        -> Result<GroupMember, AdapterError>;
    async fn send_to_group(&self, group_id: i64, text: &str) -> Result<(), AdapterError>;
}

/// Render a part list into the single string the pipeline consumes.
///
/// `agent_name` replaces mentions of `agent_id` — the persona name, not the
/// platform-side display name.
pub async fn render_parts(
    agent_name: &str,
    agent_id: &str,
    group_id: i64,
    parts: &[MessagePart],
    platform: &dyn ChatPlatform,
    images: &dyn ImageDescriber,
) -> String {
    let mut content = String::new();

    for part in parts {
        match part {
            MessagePart::Text(text) => content.push_str(text),
            MessagePart::Image { url, sticker } => {
                render_image(&mut content, images, url, *sticker).await;
            }
            MessagePart::Emoji { url } => {
                render_image(&mut content, images, url, true).await;
            }
            MessagePart::At { target_id } => {
                if target_id == agent_id {
                    content.push_str(&format!(" @{} ", agent_name));
                } else {
                    let name = match platform.group_member(group_id, target_id).await {
                        Ok(member) => member.display_name(target_id),
                        Err(e) => {
                            warn!("member lookup failed for {}: {}", target_id, e);
                            target_id.clone()
                        }
                    };
                    content.push_str(&format!(" @{} ", name));
                }
            }
            MessagePart::Reply => {}
            MessagePart::Unknown(kind) => warn!("unknown message part type: {}", kind),
        }
    }

    content.trim().to_string()
}

async fn render_image(content: &mut String, images: &dyn ImageDescriber, url: &str, sticker: bool) {
    match images.annotate_url(url, sticker).await {
        Ok(annotation) => {
            if sticker {
                content.push_str(&format!(
                    "\n[表情包] [情感:{}] [内容:{}]\n",
                    annotation.emotion, annotation.description
                ));
            } else {
                content.push_str(&format!("\n[图片] {}\n", annotation.description));
            }
        }
        Err(e) => {
            warn!("image annotation failed for {}: {}", url, e);
            content.push_str(IMAGE_FAILURE_PLACEHOLDER);
        }
    }
}
