//! Short-term memory: a bounded message buffer with background compression.
//!
//! The pipeline only ever sees the last [`VISIBLE_WINDOW`] messages plus a
//! compressed summary of everything that scrolled past. Compression runs as
//! a detached task so a slow LLM never blocks message processing; at most
//! one task is in flight and a newer one aborts the older at its await
//! point, dropping the stale result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::llm::provider::LlmProvider;

/// Messages exposed to the pipeline.
pub const VISIBLE_WINDOW: usize = 10;
/// The raw buffer holds this many times the visible window.
const BUFFER_FACTOR: usize = 5;
/// Model used for the summary compression call.
const COMPRESSION_MODEL: &str = "Qwen/Qwen3-8B";

/// One chat message, inbound or the agent's own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub time: DateTime<Utc>,
    pub user_name: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(user_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            user_name: user_name.into(),
            content: content.into(),
        }
    }
}

/// The window the reply phase actually sees.
#[derive(Debug, Clone)]
pub struct MemoryRecord {
    pub messages: Vec<ChatMessage>,
    pub compressed_history: String,
}

pub struct ShortTermMemory {
    length_limit: usize,
    messages: VecDeque<ChatMessage>,
    compressed: Arc<Mutex<String>>,
    compress_counter: usize,
    compress_task: Option<JoinHandle<()>>,
    llm: Arc<dyn LlmProvider>,
}

impl ShortTermMemory {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            length_limit: VISIBLE_WINDOW,
            messages: VecDeque::with_capacity(VISIBLE_WINDOW * BUFFER_FACTOR),
            compressed: Arc::new(Mutex::new(String::new())),
            compress_counter: 0,
            compress_task: None,
            llm,
        }
    }

    /// Last `VISIBLE_WINDOW` messages plus the current compressed summary.
    pub async fn access(&self) -> MemoryRecord {
        let start = self.messages.len().saturating_sub(self.length_limit);
        MemoryRecord {
            messages: self.messages.iter().skip(start).cloned().collect(),
            compressed_history: self.compressed.lock().await.clone(),
        }
    }

    /// Distinct user names present anywhere in the buffer.
    pub fn related_users(&self) -> Vec<String> {
        let mut users: Vec<String> = Vec::new();
        for message in &self.messages {
            if !users.contains(&message.user_name) {
                users.push(message.user_name.clone());
            }
        }
        users
    }

    /// Append a batch; every `VISIBLE_WINDOW` appended messages, (re)launch
    /// the compression task.
    pub async fn update(&mut self, batch: &[ChatMessage]) {
        for message in batch {
            if self.messages.len() == self.length_limit * BUFFER_FACTOR {
                self.messages.pop_front();
            }
            self.messages.push_back(message.clone());
        }

        self.compress_counter += batch.len();
        if self.compress_counter < self.length_limit {
            return;
        }
        self.compress_counter = 0;

        // A newer summary supersedes whatever the in-flight task would say.
        self.cancel_compress_task().await;

        let transcript: Vec<String> = self
            .messages
            .iter()
            .map(|m| format!("{}: {}", m.user_name, m.content))
            .collect();
        let compressed = Arc::clone(&self.compressed);
        let llm = Arc::clone(&self.llm);
        self.compress_task = Some(tokio::spawn(async move {
            let prompt = compression_prompt(&transcript);
            match llm.complete(&prompt, COMPRESSION_MODEL).await {
                Ok(summary) if !summary.trim().is_empty() => {
                    *compressed.lock().await = summary;
                    info!("compressed chat history ({} messages)", transcript.len());
                }
                Ok(_) => warn!("compression returned an empty summary, keeping the old one"),
                Err(e) => error!("chat history compression failed: {}", e),
            }
        }));
    }

    /// Drop buffer, summary and any in-flight compression.
    pub async fn clear(&mut self) {
        self.cancel_compress_task().await;
        self.messages.clear();
        self.compressed.lock().await.clear();
        self.compress_counter = 0;
    }

    pub async fn snapshot(&self) -> (Vec<ChatMessage>, String) {
        (
            self.messages.iter().cloned().collect(),
            self.compressed.lock().await.clone(),
        )
    }

    pub async fn restore(&mut self, messages: Vec<ChatMessage>, compressed: String) {
        self.cancel_compress_task().await;
        self.messages = messages.into_iter().collect();
        while self.messages.len() > self.length_limit * BUFFER_FACTOR {
            self.messages.pop_front();
        }
        *self.compressed.lock().await = compressed;
        self.compress_counter = 0;
    }

    async fn cancel_compress_task(&mut self) {
        if let Some(task) = self.compress_task.take() {
            if !task.is_finished() {
                task.abort();
            }
            let _ = task.await;
        }
    }
}

fn compression_prompt(transcript: &[String]) -> String {
    format!(
        "请将以下消息按参与的话题压缩，提取\n\n\
         - 话题简要内容\n\
         - 参与者和他们的发言总结\n\n\
         格式类似:\n\n\
         [话题: 话题简要内容]\n\
         参与者:\n\
         - a: a发言总结\n\n\
         以下是消息列表，按时间排序从老到新：\n\n{}",
        transcript.join("\n")
    )
}
