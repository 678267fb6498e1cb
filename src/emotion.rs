//! VAD emotion model.
//!
//! The agent's mood — and its tendency toward each user — is a point in the
//! valence/arousal/dominance space. Impressions fade over time with
//! asymmetric decay curves: pleasure fades fast, displeasure lingers,
//! arousal relaxes toward a mild resting level and dominance drifts slowly
//! toward neutral control.

use serde::{Deserialize, Serialize};

/// Decay rate per hour for positive valence. Joy is short-lived.
const VALENCE_DECAY_POSITIVE: f64 = 0.15;
/// Decay rate per hour for negative valence. Grudges are not.
const VALENCE_DECAY_NEGATIVE: f64 = 0.05;
/// Arousal relaxes toward this resting level.
const AROUSAL_TARGET: f64 = 0.3;
const AROUSAL_DECAY: f64 = 0.2;
/// Dominance drifts toward this neutral level, slowly.
const DOMINANCE_TARGET: f64 = 0.5;
const DOMINANCE_DECAY: f64 = 0.03;

/// A point in VAD space.
///
/// - `valence` ∈ [-1, 1]: pleasure–displeasure
/// - `arousal` ∈ [0, 1]: activation
/// - `dominance` ∈ [-1, 1]: sense of control
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionState {
    pub valence: f64,
    pub arousal: f64,
    pub dominance: f64,
}

impl EmotionState {
    pub fn new(valence: f64, arousal: f64, dominance: f64) -> Self {
        Self {
            valence,
            arousal,
            dominance,
        }
    }

    /// Whether all three dimensions are inside their legal ranges.
    /// LLM output violating this is rejected at the parser boundary.
    pub fn in_range(&self) -> bool {
        (-1.0..=1.0).contains(&self.valence)
            && (0.0..=1.0).contains(&self.arousal)
            && (-1.0..=1.0).contains(&self.dominance)
    }
}

/// Valence decay: positive moods fade quickly, negative moods linger,
/// zero is a fixed point.
pub fn decay_valence(valence: f64, elapsed_hours: f64) -> f64 {
    let rate = if valence > 0.0 {
        VALENCE_DECAY_POSITIVE
    } else if valence < 0.0 {
        VALENCE_DECAY_NEGATIVE
    } else {
        return 0.0;
    };
    valence * (-rate * elapsed_hours).exp()
}

/// Arousal relaxes exponentially toward `AROUSAL_TARGET`.
pub fn decay_arousal(arousal: f64, elapsed_hours: f64) -> f64 {
    let decay = (-AROUSAL_DECAY * elapsed_hours).exp();
    arousal * decay + AROUSAL_TARGET * (1.0 - decay)
}

/// Dominance relaxes exponentially toward `DOMINANCE_TARGET`.
pub fn decay_dominance(dominance: f64, elapsed_hours: f64) -> f64 {
    let decay = (-DOMINANCE_DECAY * elapsed_hours).exp();
    dominance * decay + DOMINANCE_TARGET * (1.0 - decay)
}
