//! Per-group session: the aggregate root owning emotions, profiles, both
//! memory layers and the chat-state automaton.

pub mod persist;
pub mod pipeline;
pub mod prompts;
pub mod state;


use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use crate::emotion::EmotionState;
use crate::llm::provider::LlmProvider;
use crate::memory::long_term::LongTermMemory;
use crate::memory::short_term::{ChatMessage, ShortTermMemory};
use crate::presets::RolePreset;
use crate::profile::PersonProfile;
use crate::session::persist::{SessionSnapshot, ShortTermSnapshot};
use crate::session::state::ChatState;

pub const DEFAULT_NAME: &str = "terminus";
pub const DEFAULT_ROLE: &str = "一个男性人类";

pub struct Session {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) role: String,
    pub(crate) global_emotion: EmotionState,
    pub(crate) profiles: BTreeMap<String, PersonProfile>,
    pub(crate) chat_summary: String,
    pub(crate) chatting_state: ChatState,
    pub(crate) bubble_willing_sum: f64,
    pub(crate) short_term: ShortTermMemory,
    pub(crate) long_term: LongTermMemory,
    pub(crate) last_response: Vec<ChatMessage>,
    /// Messages waiting for the next worker tick.
    pub(crate) pending: Vec<ChatMessage>,
    pub(crate) llm: Arc<dyn LlmProvider>,
    pub(crate) chat_model: String,
    data_dir: PathBuf,
}

impl Session {
    /// Build a session, restoring the on-disk snapshot when one exists.
    pub async fn new(
        id: impl Into<String>,
        llm: Arc<dyn LlmProvider>,
        chat_model: impl Into<String>,
        long_term: LongTermMemory,
        data_dir: PathBuf,
    ) -> Self {
        let id = id.into();
        let mut session = Self {
            id: id.clone(),
            name: DEFAULT_NAME.to_string(),
            role: DEFAULT_ROLE.to_string(),
            global_emotion: EmotionState::default(),
            profiles: BTreeMap::new(),
            chat_summary: String::new(),
            chatting_state: ChatState::Idle,
            bubble_willing_sum: 0.0,
            short_term: ShortTermMemory::new(Arc::clone(&llm)),
            long_term,
            last_response: Vec::new(),
            pending: Vec::new(),
            llm,
            chat_model: chat_model.into(),
            data_dir,
        };
        if let Some(snapshot) = persist::load(&session.data_dir, &id) {
            session.restore(snapshot).await;
            info!("[Session {}] state restored from disk", session.id);
        }
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display form: `名字（设定）`.
    pub fn role_text(&self) -> String {
        format!("{}（{}）", self.name, self.role)
    }

    pub fn chatting_state(&self) -> ChatState {
        self.chatting_state
    }

    pub fn global_emotion(&self) -> &EmotionState {
        &self.global_emotion
    }

    /// Queue a message for the next worker tick. Never runs the pipeline.
    pub fn push_pending(&mut self, message: ChatMessage) {
        self.pending.push(message);
    }

    /// Replace the persona. Resets everything else first.
    pub async fn set_role(&mut self, name: impl Into<String>, role: impl Into<String>) {
        self.reset().await;
        self.name = name.into();
        self.role = role.into();
        self.save().await;
    }

    /// Zero all state back to construction defaults. The background worker
    /// (owned by the registry) stays alive.
    pub async fn reset(&mut self) {
        self.name = DEFAULT_NAME.to_string();
        self.role = DEFAULT_ROLE.to_string();
        self.global_emotion = EmotionState::default();
        self.profiles.clear();
        self.chat_summary.clear();
        self.chatting_state = ChatState::Idle;
        self.bubble_willing_sum = 0.0;
        self.short_term.clear().await;
        if let Err(e) = self.long_term.clear().await {
            error!("[Session {}] failed to clear long-term memory: {}", self.id, e);
        }
        self.last_response.clear();
        self.save().await;
    }

    /// Zero only the emotional state: mood and per-user impressions.
    pub async fn calm_down(&mut self) {
        self.global_emotion = EmotionState::default();
        self.profiles.clear();
        self.save().await;
    }

    /// Apply a preset: reset, take its persona, seed its knowledge into
    /// long-term memory.
    pub async fn apply_preset(&mut self, preset: &RolePreset) {
        self.reset().await;
        self.name = preset.name.clone();
        self.role = preset.role.clone();
        self.long_term.add_texts(preset.seed_texts());
        if let Err(e) = self.long_term.index().await {
            error!("[Session {}] failed to index preset knowledge: {}", self.id, e);
        }
        self.save().await;
    }

    /// Human-readable state report for the operator.
    pub async fn status(&self) -> String {
        let record = self.short_term.access().await;
        serde_json::json!({
            "name": self.name,
            "role": self.role,
            "chatting_state": self.chatting_state.code(),
            "global_emotion": self.global_emotion,
            "chat_summary": self.chat_summary,
            "compressed_history": record.compressed_history,
            "short_term": record
                .messages
                .iter()
                .map(|m| serde_json::json!({"user_name": m.user_name, "content": m.content}))
                .collect::<Vec<_>>(),
            "profiles": self
                .profiles
                .values()
                .map(|p| serde_json::json!({"user_name": p.user_id, "emotion": p.emotion}))
                .collect::<Vec<_>>(),
        })
        .to_string()
    }

    pub(crate) async fn save(&self) {
        let (messages, compressed_history) = self.short_term.snapshot().await;
        let snapshot = SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            short_term: ShortTermSnapshot {
                compressed_history,
                messages,
            },
            global_emotion: self.global_emotion,
            chat_summary: self.chat_summary.clone(),
            profiles: self.profiles.clone(),
            last_response: self.last_response.clone(),
            chatting_state: self.chatting_state,
        };
        persist::save(&self.data_dir, &snapshot);
    }

    async fn restore(&mut self, snapshot: SessionSnapshot) {
        self.name = snapshot.name;
        self.role = snapshot.role;
        self.global_emotion = snapshot.global_emotion;
        self.chat_summary = snapshot.chat_summary;
        self.profiles = snapshot.profiles;
        self.last_response = snapshot.last_response;
        self.chatting_state = snapshot.chatting_state;
        self.short_term
            .restore(
                snapshot.short_term.messages,
                snapshot.short_term.compressed_history,
            )
            .await;
    }
}
