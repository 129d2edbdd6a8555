//! Slip/guess Bayesian update rule.
//!
//! For mastery probability p = a/(a+b) and a question with slip rate s
//! (P(incorrect | mastered)) and guess rate g (P(correct | not mastered)):
//!
//! - P(correct)   = (1-s)p + g(1-p)
//! - P(incorrect) = sp + (1-g)(1-p)
//! - posterior    = (1-s)p / P(correct)   on a correct answer
//! - posterior    = sp / P(incorrect)     on an incorrect answer
//!
//! A zero denominator falls back to the unchanged prior mean; that guard is
//! recovered locally and never surfaces as an error.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::types::BeliefState;

/// What the user previously did with this question, for the reinforcement
/// variant. Applies only to the single update at hand; nothing is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerHistory {
    /// First exposure, or no previous outcome on record.
    #[default]
    Fresh,
    /// The user previously missed this question.
    PreviouslyIncorrect,
}

/// P(correct) under the measurement model for mastery probability `p`.
pub fn predicted_correct_probability(p: f64, slip: f64, guess: f64) -> f64 {
    (1.0 - slip) * p + guess * (1.0 - p)
}

/// Posterior P(mastered) after observing one outcome.
pub fn posterior_mastery(alpha: f64, beta: f64, correct: bool, slip: f64, guess: f64) -> f64 {
    let p = alpha / (alpha + beta);
    if correct {
        let p_correct = predicted_correct_probability(p, slip, guess);
        if p_correct > 0.0 {
            (1.0 - slip) * p / p_correct
        } else {
            p
        }
    } else {
        let p_incorrect = slip * p + (1.0 - guess) * (1.0 - p);
        if p_incorrect > 0.0 {
            slip * p / p_incorrect
        } else {
            p
        }
    }
}

/// Simulated (alpha, beta) after one outcome, without touching any state.
/// Used by the information-gain calculator.
pub fn simulate_update(alpha: f64, beta: f64, correct: bool, slip: f64, guess: f64) -> (f64, f64) {
    let posterior = posterior_mastery(alpha, beta, correct, slip, guess);
    (alpha + posterior, beta + (1.0 - posterior))
}

/// Apply one observed outcome to a belief. Called once per concept the
/// question tests, independently.
pub fn apply_update(belief: &mut BeliefState, correct: bool, slip: f64, guess: f64, now: DateTime<Utc>) {
    apply_update_with_history(belief, correct, slip, guess, AnswerHistory::Fresh, now, &EngineConfig::default());
}

/// Reinforcement variant: when a previously missed question is now answered
/// correctly, the alpha increment is scaled by `reinforcement_factor`; when
/// it stays incorrect, the beta increment is scaled by `dampening_factor`.
pub fn apply_update_with_history(
    belief: &mut BeliefState,
    correct: bool,
    slip: f64,
    guess: f64,
    history: AnswerHistory,
    now: DateTime<Utc>,
    config: &EngineConfig,
) {
    let posterior = posterior_mastery(belief.alpha, belief.beta, correct, slip, guess);

    let mut alpha_increment = posterior;
    let mut beta_increment = 1.0 - posterior;
    if history == AnswerHistory::PreviouslyIncorrect {
        if correct {
            alpha_increment *= config.reinforcement_factor;
        } else {
            beta_increment *= config.dampening_factor;
        }
    }

    belief.alpha += alpha_increment;
    belief.beta += beta_increment;
    belief.response_count += 1;
    belief.last_response_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BeliefPrior;

    fn prior_belief() -> BeliefState {
        BeliefState::new("u1", "c1", BeliefPrior::default())
    }

    #[test]
    fn test_correct_answer_scenario() {
        // Beta(1,1), slip 0.10, guess 0.25, correct:
        // p = 0.5, P(correct) = 0.9*0.5 + 0.25*0.5 = 0.575
        // posterior = 0.45 / 0.575 = 0.78260...
        let mut b = prior_belief();
        apply_update(&mut b, true, 0.10, 0.25, Utc::now());
        assert!((b.alpha - 1.7826).abs() < 1e-3, "alpha = {}", b.alpha);
        assert!((b.beta - 1.2174).abs() < 1e-3, "beta = {}", b.beta);
        assert_eq!(b.response_count, 1);
        assert!(b.last_response_at.is_some());
    }

    #[test]
    fn test_incorrect_answer_lowers_mean() {
        let mut b = prior_belief();
        let before = b.mean();
        apply_update(&mut b, false, 0.10, 0.25, Utc::now());
        assert!(b.mean() < before);
    }

    #[test]
    fn test_zero_denominator_falls_back_to_prior() {
        // slip = 1, guess = 0 gives P(correct) = 0; posterior stays at p.
        let posterior = posterior_mastery(1.0, 1.0, true, 1.0, 0.0);
        assert!((posterior - 0.5).abs() < 1e-12);

        // slip = 0, guess = 1 gives P(incorrect) = 0 on a miss.
        let posterior = posterior_mastery(1.0, 1.0, false, 0.0, 1.0);
        assert!((posterior - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_parameters_stay_positive() {
        for &(s, g) in &[(0.0, 0.0), (1.0, 1.0), (0.0, 1.0), (1.0, 0.0), (0.3, 0.3)] {
            for &correct in &[true, false] {
                let mut b = prior_belief();
                apply_update(&mut b, correct, s, g, Utc::now());
                assert!(b.alpha > 0.0, "alpha <= 0 for s={s} g={g} correct={correct}");
                assert!(b.beta > 0.0, "beta <= 0 for s={s} g={g} correct={correct}");
            }
        }
    }

    #[test]
    fn test_reinforcement_boosts_alpha_increment() {
        let config = EngineConfig::default();
        let now = Utc::now();

        let mut fresh = prior_belief();
        apply_update_with_history(&mut fresh, true, 0.1, 0.25, AnswerHistory::Fresh, now, &config);

        let mut reinforced = prior_belief();
        apply_update_with_history(
            &mut reinforced,
            true,
            0.1,
            0.25,
            AnswerHistory::PreviouslyIncorrect,
            now,
            &config,
        );

        assert!(reinforced.alpha > fresh.alpha);
        assert!((reinforced.beta - fresh.beta).abs() < 1e-12);
    }

    #[test]
    fn test_dampening_softens_repeat_miss() {
        let config = EngineConfig::default();
        let now = Utc::now();

        let mut fresh = prior_belief();
        apply_update_with_history(&mut fresh, false, 0.1, 0.25, AnswerHistory::Fresh, now, &config);

        let mut dampened = prior_belief();
        apply_update_with_history(
            &mut dampened,
            false,
            0.1,
            0.25,
            AnswerHistory::PreviouslyIncorrect,
            now,
            &config,
        );

        assert!(dampened.beta < fresh.beta);
        assert!((dampened.alpha - fresh.alpha).abs() < 1e-12);
    }

    #[test]
    fn test_simulate_matches_apply() {
        let mut b = prior_belief();
        let (sim_alpha, sim_beta) = simulate_update(b.alpha, b.beta, true, 0.1, 0.25);
        apply_update(&mut b, true, 0.1, 0.25, Utc::now());
        assert!((b.alpha - sim_alpha).abs() < 1e-12);
        assert!((b.beta - sim_beta).abs() < 1e-12);
    }
}
