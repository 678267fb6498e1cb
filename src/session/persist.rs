//! Session snapshots.
//!
//! Everything mutable except the long-term index (which persists itself in
//! its own directory) is written to one JSON file per group after every
//! pipeline run and operator mutation. Loading is forgiving: a missing or
//! corrupt file means a fresh session, never a crash.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, trace};

use crate::emotion::EmotionState;
use crate::memory::short_term::ChatMessage;
use crate::profile::PersonProfile;
use crate::session::state::ChatState;

const SESSION_DIR: &str = "yaturningtest_sessions";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortTermSnapshot {
    pub compressed_history: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub name: String,
    pub role: String,
    pub short_term: ShortTermSnapshot,
    pub global_emotion: EmotionState,
    pub chat_summary: String,
    pub profiles: BTreeMap<String, PersonProfile>,
    pub last_response: Vec<ChatMessage>,
    pub chatting_state: ChatState,
}

pub fn session_file_path(data_dir: &Path, id: &str) -> PathBuf {
    data_dir.join(SESSION_DIR).join(format!("session_{}.json", id))
}

/// Write the snapshot; disk failures are logged, in-memory state stays
/// authoritative.
pub fn save(data_dir: &Path, snapshot: &SessionSnapshot) {
    let path = session_file_path(data_dir, &snapshot.id);
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)
    })();
    match result {
        Ok(()) => trace!("[Session {}] snapshot saved", snapshot.id),
        Err(e) => error!("[Session {}] failed to save snapshot: {}", snapshot.id, e),
    }
}

/// Load a snapshot if one exists and parses; anything else yields `None`.
pub fn load(data_dir: &Path, id: &str) -> Option<SessionSnapshot> {
    let path = session_file_path(data_dir, id);
    if !path.exists() {
        trace!("[Session {}] no snapshot, starting fresh", id);
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => match serde_json::from_str::<SessionSnapshot>(&content) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                error!("[Session {}] corrupt snapshot, starting fresh: {}", id, e);
                None
            }
        },
        Err(e) => {
            error!("[Session {}] cannot read snapshot: {}", id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Impression;
    use chrono::Utc;

    fn sample_snapshot() -> SessionSnapshot {
        let mut profiles = BTreeMap::new();
        let mut profile = PersonProfile::new("alice");
        profile.push_interaction(Impression {
            timestamp: Utc::now(),
            delta: EmotionState::new(0.5, 0.2, -0.1),
        });
        profile.update_emotion_tends(Utc::now());
        profiles.insert("alice".to_string(), profile);

        SessionSnapshot {
            id: "g1".to_string(),
            name: "喵喵".to_string(),
            role: "猫娘".to_string(),
            short_term: ShortTermSnapshot {
                compressed_history: "[话题: 吃饭]".to_string(),
                messages: vec![ChatMessage::new("alice", "吃了吗")],
            },
            global_emotion: EmotionState::new(0.3, 0.4, 0.1),
            chat_summary: "大家在聊晚饭".to_string(),
            profiles,
            last_response: vec![ChatMessage::new("喵喵", "吃了")],
            chatting_state: ChatState::Bubble,
        }
    }

    #[test]
    fn snapshot_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let snapshot = sample_snapshot();
        save(tmp.path(), &snapshot);

        let loaded = load(tmp.path(), "g1").expect("snapshot loads");
        assert_eq!(loaded.name, "喵喵");
        assert_eq!(loaded.chatting_state, ChatState::Bubble);
        assert_eq!(loaded.global_emotion, snapshot.global_emotion);
        assert_eq!(loaded.short_term.messages.len(), 1);
        let alice = &loaded.profiles["alice"];
        assert_eq!(alice.interactions.len(), 1);
        assert_eq!(alice.emotion, snapshot.profiles["alice"].emotion);
    }

    #[test]
    fn missing_snapshot_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load(tmp.path(), "nope").is_none());
    }

    #[test]
    fn corrupt_snapshot_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        let path = session_file_path(tmp.path(), "g1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{broken").unwrap();
        assert!(load(tmp.path(), "g1").is_none());
    }

    #[test]
    fn file_layout_matches_contract() {
        let path = session_file_path(Path::new("/data"), "42");
        assert_eq!(
            path,
            Path::new("/data/yaturningtest_sessions/session_42.json")
        );
    }
}
