//! The cognitive pipeline: retrieve → feedback → reply.
//!
//! The feedback stage parses strictly and commits nothing until the whole
//! output validates — a malformed completion drops the batch and leaves the
//! session exactly as it was. The reply stage only runs outside Idle and its
//! output is appended to both memory layers before the next batch can be
//! drained.

use chrono::Utc;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::emotion::EmotionState;
use crate::llm::provider::LlmError;
use crate::llm::sanitize::normalize_completion;
use crate::memory::short_term::ChatMessage;
use crate::profile::{Impression, PersonProfile};
use crate::session::prompts::{self, FeedbackPromptInput, ReplyPromptInput};
use crate::session::state::{self, ChatState, Willingness};
use crate::session::Session;

/// Snippets requested per retrieval query.
const RETRIEVE_K: usize = 3;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("feedback output rejected: {0}")]
    InvalidFeedback(String),
    #[error("reply output rejected: {0}")]
    InvalidReply(String),
}

/// Validated result of the feedback stage.
#[derive(Debug)]
pub struct FeedbackOutcome {
    pub new_emotion: EmotionState,
    pub emotion_tends: Vec<EmotionState>,
    pub summary: String,
    pub analyze_result: Vec<String>,
    pub willing: Willingness,
}

#[derive(Debug, Deserialize)]
struct RawFeedback {
    new_emotion: EmotionState,
    emotion_tends: Vec<EmotionState>,
    summary: String,
    analyze_result: Vec<String>,
    willing: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
struct RawReply {
    reply: Vec<String>,
}

/// Parse and validate one feedback completion against the batch it scores.
pub fn parse_feedback(raw: &str, batch_len: usize) -> Result<FeedbackOutcome, PipelineError> {
    let normalized = normalize_completion(raw);
    let parsed: RawFeedback = serde_json::from_str(normalized).map_err(|e| {
        PipelineError::InvalidFeedback(format!("not valid JSON ({}): {:.200}", e, normalized))
    })?;

    if !parsed.new_emotion.in_range() {
        return Err(PipelineError::InvalidFeedback(format!(
            "new_emotion out of range: {:?}",
            parsed.new_emotion
        )));
    }
    if parsed.emotion_tends.len() != batch_len {
        return Err(PipelineError::InvalidFeedback(format!(
            "emotion_tends has {} entries for a batch of {}",
            parsed.emotion_tends.len(),
            batch_len
        )));
    }

    let willing = Willingness {
        idle: willing_value(&parsed.willing, "0")?,
        bubble: willing_value(&parsed.willing, "1")?,
        active: willing_value(&parsed.willing, "2")?,
    };

    Ok(FeedbackOutcome {
        new_emotion: parsed.new_emotion,
        emotion_tends: parsed.emotion_tends,
        summary: parsed.summary,
        analyze_result: parsed.analyze_result,
        willing,
    })
}

fn willing_value(map: &BTreeMap<String, f64>, key: &str) -> Result<f64, PipelineError> {
    let value = *map.get(key).ok_or_else(|| {
        PipelineError::InvalidFeedback(format!("willing map is missing key \"{}\"", key))
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(PipelineError::InvalidFeedback(format!(
            "willing[\"{}\"] = {} out of [0, 1]",
            key, value
        )));
    }
    Ok(value)
}

/// Parse one reply completion. An empty list means silence.
pub fn parse_reply(raw: &str) -> Result<Vec<String>, PipelineError> {
    let normalized = normalize_completion(raw);
    let parsed: RawReply = serde_json::from_str(normalized).map_err(|e| {
        PipelineError::InvalidReply(format!("not valid JSON ({}): {:.200}", e, normalized))
    })?;
    Ok(parsed
        .reply
        .into_iter()
        .filter(|r| !r.trim().is_empty())
        .collect())
}

impl Session {
    /// Run the full pipeline over one drained batch and return the replies
    /// to send, in order.
    pub async fn process_batch(
        &mut self,
        batch: &[ChatMessage],
    ) -> Result<Vec<String>, PipelineError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        // ── Stage 1: retrieve ──────────────────────────────
        let record = self.short_term.access().await;
        let mut queries: Vec<String> = record
            .messages
            .iter()
            .map(|m| format!("'{}':'{}'", m.user_name, m.content))
            .collect();
        if !record.compressed_history.is_empty() {
            queries.push(record.compressed_history.clone());
        }
        queries.extend(batch.iter().map(|m| m.content.clone()));
        if !self.chat_summary.is_empty() {
            queries.push(self.chat_summary.clone());
        }

        let mem_history = match self.long_term.retrieve(&queries, RETRIEVE_K).await {
            Ok(docs) => docs,
            Err(e) => {
                warn!("[Session {}] retrieval failed: {}", self.id, e);
                Vec::new()
            }
        };
        debug!("[Session {}] retrieved {} snippets", self.id, mem_history.len());

        // ── Stage 2: feedback ──────────────────────────────
        let tendencies = self.present_tendencies(&record.messages, batch);
        let prompt = prompts::feedback_prompt(&FeedbackPromptInput {
            name: &self.name,
            role: &self.role,
            state: self.chatting_state,
            compressed_history: &record.compressed_history,
            recent: &record.messages,
            batch,
            global_emotion: &self.global_emotion,
            tendencies: &tendencies,
            mem_history: &mem_history,
            chat_summary: &self.chat_summary,
        });
        let completion = self.llm.complete(&prompt, &self.chat_model).await?;
        let outcome = parse_feedback(&completion, batch.len())?;

        // Validation passed — commit, in order.
        self.global_emotion = outcome.new_emotion;
        let now = Utc::now();
        for (message, delta) in batch.iter().zip(&outcome.emotion_tends) {
            self.profiles
                .entry(message.user_name.clone())
                .or_insert_with(|| PersonProfile::new(message.user_name.clone()))
                .push_interaction(Impression {
                    timestamp: now,
                    delta: *delta,
                });
        }
        for profile in self.profiles.values_mut() {
            profile.update_emotion_tends(now);
            profile.merge_old_interactions(now);
        }
        self.chat_summary = outcome.summary;
        self.long_term.add_texts(outcome.analyze_result);
        self.long_term
            .add_texts(batch.iter().map(|m| format!("{}: '{}'", m.user_name, m.content)));

        let threshold = state::draw_threshold(&mut rand::thread_rng());
        let (next_state, next_sum) = state::advance(
            self.chatting_state,
            self.bubble_willing_sum,
            &outcome.willing,
            threshold,
        );
        if next_state != self.chatting_state {
            info!(
                "[Session {}] chat state {:?} → {:?} (threshold {:.2})",
                self.id, self.chatting_state, next_state, threshold
            );
        }
        self.chatting_state = next_state;
        self.bubble_willing_sum = next_sum;

        // ── Stage 3: reply ─────────────────────────────────
        let replies = if self.chatting_state == ChatState::Idle {
            Vec::new()
        } else {
            let prompt = prompts::reply_prompt(&ReplyPromptInput {
                name: &self.name,
                role: &self.role,
                state: self.chatting_state,
                compressed_history: &record.compressed_history,
                recent: &record.messages,
                batch,
                global_emotion: &self.global_emotion,
                tendencies: &tendencies,
                mem_history: &mem_history,
                chat_summary: &self.chat_summary,
                last_response: &self.last_response,
            });
            let completion = self.llm.complete(&prompt, &self.chat_model).await?;
            parse_reply(&completion)?
        };

        // Everything the agent said becomes part of both memories before
        // the next batch is drained.
        let reply_messages: Vec<ChatMessage> = replies
            .iter()
            .map(|content| ChatMessage::new(self.name.clone(), content.clone()))
            .collect();
        self.last_response = reply_messages.clone();
        self.long_term
            .add_texts(replies.iter().map(|r| format!("{}: '{}'", self.name, r)));

        let mut combined = batch.to_vec();
        combined.extend(reply_messages);
        self.short_term.update(&combined).await;

        if let Err(e) = self.long_term.index().await {
            error!("[Session {}] long-term indexing failed: {}", self.id, e);
        }
        self.save().await;

        Ok(replies)
    }

    /// Tendencies toward every user present in the window or the batch.
    fn present_tendencies(
        &self,
        recent: &[ChatMessage],
        batch: &[ChatMessage],
    ) -> Vec<(String, EmotionState)> {
        let mut present: Vec<&str> = Vec::new();
        for message in recent.iter().chain(batch) {
            if !present.contains(&message.user_name.as_str()) {
                present.push(&message.user_name);
            }
        }
        present
            .into_iter()
            .filter_map(|user| self.profiles.get(user).map(|p| (p.user_id.clone(), p.emotion)))
            .collect()
    }
}

#[cfg(test)]
mod parse_tests {
    use super::*;

    fn valid_feedback_json() -> String {
        serde_json::json!({
            "new_emotion": {"valence": 0.2, "arousal": 0.4, "dominance": 0.0},
            "emotion_tends": [{"valence": 0.1, "arousal": 0.3, "dominance": -0.1}],
            "summary": "聊晚饭",
            "analyze_result": ["alice 喜欢吃辣"],
            "willing": {"0": 0.2, "1": 0.6, "2": 0.1}
        })
        .to_string()
    }

    #[test]
    fn valid_feedback_parses() {
        let outcome = parse_feedback(&valid_feedback_json(), 1).unwrap();
        assert_eq!(outcome.summary, "聊晚饭");
        assert_eq!(outcome.emotion_tends.len(), 1);
        assert!((outcome.willing.bubble - 0.6).abs() < 1e-12);
    }

    #[test]
    fn fenced_and_think_wrapped_feedback_parses() {
        let wrapped = format!("<think>想想</think>\n```json\n{}\n```", valid_feedback_json());
        assert!(parse_feedback(&wrapped, 1).is_ok());
    }

    #[test]
    fn missing_summary_is_rejected() {
        let json = serde_json::json!({
            "new_emotion": {"valence": 0.0, "arousal": 0.0, "dominance": 0.0},
            "emotion_tends": [],
            "analyze_result": [],
            "willing": {"0": 0.0, "1": 0.0, "2": 0.0}
        })
        .to_string();
        assert!(matches!(
            parse_feedback(&json, 0),
            Err(PipelineError::InvalidFeedback(_))
        ));
    }

    #[test]
    fn wrong_tends_length_is_rejected() {
        let err = parse_feedback(&valid_feedback_json(), 2).unwrap_err();
        assert!(err.to_string().contains("emotion_tends"));
    }

    #[test]
    fn out_of_range_emotion_is_rejected() {
        let json = serde_json::json!({
            "new_emotion": {"valence": 1.5, "arousal": 0.0, "dominance": 0.0},
            "emotion_tends": [],
            "summary": "s",
            "analyze_result": [],
            "willing": {"0": 0.0, "1": 0.0, "2": 0.0}
        })
        .to_string();
        assert!(parse_feedback(&json, 0).is_err());
    }

    #[test]
    fn out_of_range_willing_is_rejected() {
        let json = serde_json::json!({
            "new_emotion": {"valence": 0.0, "arousal": 0.0, "dominance": 0.0},
            "emotion_tends": [],
            "summary": "s",
            "analyze_result": [],
            "willing": {"0": 0.0, "1": 1.2, "2": 0.0}
        })
        .to_string();
        assert!(parse_feedback(&json, 0).is_err());
    }

    #[test]
    fn missing_willing_key_is_rejected() {
        let json = serde_json::json!({
            "new_emotion": {"valence": 0.0, "arousal": 0.0, "dominance": 0.0},
            "emotion_tends": [],
            "summary": "s",
            "analyze_result": [],
            "willing": {"0": 0.0, "2": 0.0}
        })
        .to_string();
        let err = parse_feedback(&json, 0).unwrap_err();
        assert!(err.to_string().contains("\"1\""));
    }

    #[test]
    fn non_list_analyze_result_is_rejected() {
        let json = serde_json::json!({
            "new_emotion": {"valence": 0.0, "arousal": 0.0, "dominance": 0.0},
            "emotion_tends": [],
            "summary": "s",
            "analyze_result": "not a list",
            "willing": {"0": 0.0, "1": 0.0, "2": 0.0}
        })
        .to_string();
        assert!(parse_feedback(&json, 0).is_err());
    }

    #[test]
    fn reply_parses_and_filters_blanks() {
        let json = r#"{"reply": ["你好", "  ", ""]}"#;
        assert_eq!(parse_reply(json).unwrap(), vec!["你好".to_string()]);
    }

    #[test]
    fn empty_reply_list_is_silence() {
        assert!(parse_reply(r#"{"reply": []}"#).unwrap().is_empty());
    }

    #[test]
    fn garbage_reply_is_rejected() {
        assert!(matches!(
            parse_reply("既然你诚心诚意地发问了"),
            Err(PipelineError::InvalidReply(_))
        ));
    }
}
