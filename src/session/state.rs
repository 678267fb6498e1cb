//! Chat-state automaton: lurk, surface, engage.
//!
//! Transitions are driven by the willingness scores the feedback stage
//! extracts from the LLM, compared against a randomized threshold so the
//! agent never latches deterministically. Sustained low-grade interest
//! accumulates until it is enough to surface with a bubble.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Randomized threshold bounds for every transition check.
const THRESHOLD_MIN: f64 = 0.3;
const THRESHOLD_MAX: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChatState {
    /// Watching silently.
    #[default]
    Idle,
    /// Surfacing with a trivial acknowledgment.
    Bubble,
    /// Actively chatting.
    Active,
}

impl ChatState {
    pub fn code(self) -> u8 {
        match self {
            ChatState::Idle => 0,
            ChatState::Bubble => 1,
            ChatState::Active => 2,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            ChatState::Idle => "潜水观察",
            ChatState::Bubble => "冒泡",
            ChatState::Active => "活跃聊天",
        }
    }
}

/// Transition preferences produced by the feedback stage, one per target
/// state, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Willingness {
    pub idle: f64,
    pub bubble: f64,
    pub active: f64,
}

/// Draw the per-tick transition threshold.
pub fn draw_threshold<R: Rng>(rng: &mut R) -> f64 {
    rng.gen_range(THRESHOLD_MIN..THRESHOLD_MAX)
}

/// Apply one feedback result. Returns the next state and the new
/// bubble-willingness accumulator; the accumulator resets on every
/// transition.
pub fn advance(
    state: ChatState,
    bubble_willing_sum: f64,
    willing: &Willingness,
    threshold: f64,
) -> (ChatState, f64) {
    match state {
        ChatState::Idle => {
            if willing.active >= threshold {
                return (ChatState::Active, 0.0);
            }
            let sum = bubble_willing_sum + willing.bubble;
            if sum >= threshold {
                (ChatState::Bubble, 0.0)
            } else {
                (ChatState::Idle, sum)
            }
        }
        ChatState::Bubble => {
            if willing.active >= threshold {
                (ChatState::Active, 0.0)
            } else if willing.idle >= threshold {
                (ChatState::Idle, 0.0)
            } else {
                (ChatState::Bubble, bubble_willing_sum)
            }
        }
        ChatState::Active => {
            if willing.idle >= threshold {
                (ChatState::Idle, 0.0)
            } else {
                (ChatState::Active, bubble_willing_sum)
            }
        }
    }
}
