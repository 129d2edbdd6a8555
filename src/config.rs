//! Engine configuration.
//!
//! Every empirically chosen constant from the source model is kept
//! configurable here rather than hard-coded: the reinforcement/dampening
//! multipliers, the mastery/confidence thresholds, the remaining-practice
//! heuristic coefficients and the builder inference knobs.

use serde::{Deserialize, Serialize};

use crate::types::BeliefPrior;

const DEFAULT_REINFORCEMENT_FACTOR: f64 = 1.5;
const DEFAULT_DAMPENING_FACTOR: f64 = 0.5;
const DEFAULT_MASTERY_THRESHOLD: f64 = 0.8;
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;
const DEFAULT_GAP_THRESHOLD: f64 = 0.4;
const DEFAULT_MIN_RESPONSES: u32 = 3;
const DEFAULT_MIN_INFO_GAIN: f64 = 0.01;
const DEFAULT_PREREQUISITE_WEIGHT: f64 = 0.5;
const DEFAULT_RECENCY_WINDOW_HOURS: i64 = 24;
const DEFAULT_QUESTIONS_PER_UNIT_GAP: f64 = 40.0;
const DEFAULT_MIN_PRACTICE_FLOOR: u32 = 3;
const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.75;
const DEFAULT_MIN_DIFFICULTY_DELTA: f64 = 0.1;
const DEFAULT_HIERARCHY_STRENGTH: f64 = 0.95;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Prior used when a belief is created lazily.
    pub prior: BeliefPrior,
    /// Alpha-increment multiplier when an incorrect answer flips to correct.
    pub reinforcement_factor: f64,
    /// Beta-increment multiplier when an answer stays incorrect.
    pub dampening_factor: f64,
    /// Minimum mastery mean for a prerequisite to count as mastered.
    pub mastery_threshold: f64,
    /// Minimum confidence for a prerequisite to count as mastered.
    pub confidence_threshold: f64,
    /// Means below this classify as a knowledge gap.
    pub gap_threshold: f64,
    /// Minimum responses before a belief can count as mastered.
    pub min_responses: u32,
    /// Below this expected gain, max_info_gain falls back to max_uncertainty.
    pub min_info_gain: f64,
    /// Bonus weight of the prerequisite_first strategy.
    pub prerequisite_weight: f64,
    /// Questions answered within this window are filtered from the pool.
    pub recency_window_hours: i64,
    /// Remaining-practice heuristic: questions per unit of mastery gap.
    pub questions_per_unit_gap: f64,
    /// Remaining-practice heuristic: floor relative to min_responses.
    pub min_practice_floor: u32,
    /// Builder: minimum semantic similarity for a related edge.
    pub similarity_threshold: f64,
    /// Builder: minimum difficulty delta for a related edge.
    pub min_difficulty_delta: f64,
    /// Builder: strength assigned to hierarchy-inferred required edges.
    pub hierarchy_strength: f64,
    /// Builder: whether weakest-edge cycle repair is attempted.
    pub enable_cycle_repair: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prior: BeliefPrior::default(),
            reinforcement_factor: DEFAULT_REINFORCEMENT_FACTOR,
            dampening_factor: DEFAULT_DAMPENING_FACTOR,
            mastery_threshold: DEFAULT_MASTERY_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            gap_threshold: DEFAULT_GAP_THRESHOLD,
            min_responses: DEFAULT_MIN_RESPONSES,
            min_info_gain: DEFAULT_MIN_INFO_GAIN,
            prerequisite_weight: DEFAULT_PREREQUISITE_WEIGHT,
            recency_window_hours: DEFAULT_RECENCY_WINDOW_HOURS,
            questions_per_unit_gap: DEFAULT_QUESTIONS_PER_UNIT_GAP,
            min_practice_floor: DEFAULT_MIN_PRACTICE_FLOOR,
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            min_difficulty_delta: DEFAULT_MIN_DIFFICULTY_DELTA,
            hierarchy_strength: DEFAULT_HIERARCHY_STRENGTH,
            enable_cycle_repair: true,
        }
    }
}

impl EngineConfig {
    /// Build from `MASTERY_*` environment variables, falling back to the
    /// defaults field by field. Loads `.env` first when present.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();
        Self {
            prior: BeliefPrior {
                alpha: env_f64("MASTERY_PRIOR_ALPHA", defaults.prior.alpha),
                beta: env_f64("MASTERY_PRIOR_BETA", defaults.prior.beta),
            },
            reinforcement_factor: env_f64("MASTERY_REINFORCEMENT_FACTOR", defaults.reinforcement_factor),
            dampening_factor: env_f64("MASTERY_DAMPENING_FACTOR", defaults.dampening_factor),
            mastery_threshold: env_f64("MASTERY_THRESHOLD", defaults.mastery_threshold),
            confidence_threshold: env_f64("MASTERY_CONFIDENCE_THRESHOLD", defaults.confidence_threshold),
            gap_threshold: env_f64("MASTERY_GAP_THRESHOLD", defaults.gap_threshold),
            min_responses: env_u32("MASTERY_MIN_RESPONSES", defaults.min_responses),
            min_info_gain: env_f64("MASTERY_MIN_INFO_GAIN", defaults.min_info_gain),
            prerequisite_weight: env_f64("MASTERY_PREREQUISITE_WEIGHT", defaults.prerequisite_weight),
            recency_window_hours: env_i64("MASTERY_RECENCY_WINDOW_HOURS", defaults.recency_window_hours),
            questions_per_unit_gap: env_f64("MASTERY_QUESTIONS_PER_UNIT_GAP", defaults.questions_per_unit_gap),
            min_practice_floor: env_u32("MASTERY_MIN_PRACTICE_FLOOR", defaults.min_practice_floor),
            similarity_threshold: env_f64("MASTERY_SIMILARITY_THRESHOLD", defaults.similarity_threshold),
            min_difficulty_delta: env_f64("MASTERY_MIN_DIFFICULTY_DELTA", defaults.min_difficulty_delta),
            hierarchy_strength: env_f64("MASTERY_HIERARCHY_STRENGTH", defaults.hierarchy_strength),
            enable_cycle_repair: env_bool("MASTERY_ENABLE_CYCLE_REPAIR", defaults.enable_cycle_repair),
        }
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert!(config.reinforcement_factor > 1.0);
        assert!(config.dampening_factor < 1.0);
        assert!(config.mastery_threshold > config.gap_threshold);
        assert!((0.0..=1.0).contains(&config.similarity_threshold));
    }
}
