//! Per-user impression journals.
//!
//! Every feedback pass attaches one [`Impression`] per observed message to
//! the sender's profile. The profile's aggregate tendency is recomputed from
//! the decayed journal: the strongest lingering positive and the strongest
//! lingering negative contribution per dimension both count, instead of
//! averaging each other away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::emotion::{decay_arousal, decay_dominance, decay_valence, EmotionState};

/// Impressions older than this many hours get collapsed into one.
const MERGE_AGE_HOURS: f64 = 5.0;

/// One interaction's contribution to the tendency toward a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Impression {
    pub timestamp: DateTime<Utc>,
    pub delta: EmotionState,
}

/// What the agent remembers feeling about one chat participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonProfile {
    pub user_id: String,
    /// Aggregate tendency, derived from `interactions`.
    pub emotion: EmotionState,
    /// Impression journal, newest first.
    pub interactions: VecDeque<Impression>,
}

impl PersonProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            emotion: EmotionState::default(),
            interactions: VecDeque::new(),
        }
    }

    pub fn push_interaction(&mut self, impression: Impression) {
        self.interactions.push_front(impression);
    }

    /// Recompute the aggregate tendency from the decayed journal.
    pub fn update_emotion_tends(&mut self, now: DateTime<Utc>) {
        self.emotion = aggregate_decayed(self.interactions.iter(), now);
    }

    /// Collapse impressions older than [`MERGE_AGE_HOURS`] into a single
    /// synthetic impression dated at the oldest merged timestamp. Bounds the
    /// journal without losing the lingering extremes.
    pub fn merge_old_interactions(&mut self, now: DateTime<Utc>) {
        let (old, recent): (Vec<Impression>, Vec<Impression>) = self
            .interactions
            .drain(..)
            .partition(|i| elapsed_hours(i.timestamp, now) > MERGE_AGE_HOURS);

        self.interactions = recent.into();
        if old.is_empty() {
            return;
        }

        let merged_delta = aggregate_decayed(old.iter(), now);
        let oldest = old
            .iter()
            .map(|i| i.timestamp)
            .min()
            .unwrap_or(now);
        // Oldest slot of the newest-first journal.
        self.interactions.push_back(Impression {
            timestamp: oldest,
            delta: merged_delta,
        });
    }
}

/// Max over positive decayed values plus min over negative decayed values,
/// per dimension.
fn aggregate_decayed<'a>(
    impressions: impl Iterator<Item = &'a Impression>,
    now: DateTime<Utc>,
) -> EmotionState {
    let mut pos = EmotionState::default();
    let mut neg = EmotionState::default();

    for impression in impressions {
        let hours = elapsed_hours(impression.timestamp, now);
        let v = decay_valence(impression.delta.valence, hours);
        let a = decay_arousal(impression.delta.arousal, hours);
        let d = decay_dominance(impression.delta.dominance, hours);

        if v > 0.0 {
            pos.valence = pos.valence.max(v);
        } else {
            neg.valence = neg.valence.min(v);
        }
        if a > 0.0 {
            pos.arousal = pos.arousal.max(a);
        } else {
            neg.arousal = neg.arousal.min(a);
        }
        if d > 0.0 {
            pos.dominance = pos.dominance.max(d);
        } else {
            neg.dominance = neg.dominance.min(d);
        }
    }

    EmotionState {
        valence: pos.valence + neg.valence,
        arousal: pos.arousal + neg.arousal,
        dominance: pos.dominance + neg.dominance,
    }
}

fn elapsed_hours(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - then).num_milliseconds() as f64 / 3_600_000.0).max(0.0)
}
