//! Confidence sources for offline verification.
//!
//! Offline mode samples its first-attempt confidence instead of asking a
//! model. The source is a trait object so production can use a seedable RNG
//! and tests can replay an exact sequence.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Lower bound of offline first-attempt confidences.
pub const OFFLINE_MIN_CONFIDENCE: f64 = 0.3;
/// Upper bound of offline first-attempt confidences.
pub const OFFLINE_MAX_CONFIDENCE: f64 = 1.0;

pub trait ConfidenceSource: Send {
    /// Next confidence value; implementations keep it within [0, 1].
    fn sample(&mut self) -> f64;
}

/// Uniform draws in `[OFFLINE_MIN_CONFIDENCE, OFFLINE_MAX_CONFIDENCE]`.
pub struct RandomConfidence {
    rng: StdRng,
}

impl RandomConfidence {
    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or_else(Self::from_entropy)
    }
}

impl ConfidenceSource for RandomConfidence {
    fn sample(&mut self) -> f64 {
        self.rng.gen_range(OFFLINE_MIN_CONFIDENCE..=OFFLINE_MAX_CONFIDENCE)
    }
}

/// Replays a fixed sequence, then repeats [`OFFLINE_MAX_CONFIDENCE`].
pub struct ScriptedConfidence {
    values: VecDeque<f64>,
}

impl ScriptedConfidence {
    pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
        Self { values: values.into_iter().collect() }
    }
}

impl ConfidenceSource for ScriptedConfidence {
    fn sample(&mut self) -> f64 {
        self.values.pop_front().unwrap_or(OFFLINE_MAX_CONFIDENCE).clamp(0.0, 1.0)
    }
}
