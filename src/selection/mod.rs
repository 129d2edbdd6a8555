//! Question selection policy.
//!
//! Stateless per call: given the caller-fetched beliefs, a candidate pool,
//! exclusion sets and a strategy, returns exactly one question plus its
//! score, or a [`SelectionError`] the caller can branch on. Performs no I/O
//! and is read-only over its inputs, so it runs fully in parallel across
//! requests.
//!
//! Filtering order, cheapest first: knowledge-area filter, recency window,
//! current-session exclusions. Ties keep the first candidate encountered in
//! input order, which makes selection deterministic for identical inputs.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::bayes::entropy::{average_uncertainty, expected_information_gain};
use crate::config::EngineConfig;
use crate::error::SelectionError;
use crate::types::{BeliefState, BeliefStatus, Question, QuestionResponse, SelectionStrategy};

/// Inputs to one selection call. Beliefs and response history are supplied
/// by the caller; the policy never touches storage.
#[derive(Debug)]
pub struct SelectionInput<'a> {
    /// Beliefs keyed by concept id, for one user.
    pub beliefs: &'a HashMap<String, BeliefState>,
    pub candidates: &'a [Question],
    /// Past responses, used by the recency filter.
    pub recent_responses: &'a [QuestionResponse],
    /// Question ids already answered in the current session.
    pub session_answered: &'a HashSet<String>,
    pub strategy: SelectionStrategy,
    pub knowledge_area: Option<&'a str>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedQuestion {
    pub question_id: String,
    pub score: f64,
    pub strategy: SelectionStrategy,
}

pub fn select(input: &SelectionInput<'_>, config: &EngineConfig) -> Result<SelectedQuestion, SelectionError> {
    let pool = apply_filters(input, config)?;

    let selected = match input.strategy {
        SelectionStrategy::MaxInfoGain | SelectionStrategy::Balanced => {
            select_by_info_gain(&pool, input.beliefs, config)
        }
        SelectionStrategy::MaxUncertainty => select_by_uncertainty(&pool, input.beliefs),
        SelectionStrategy::PrerequisiteFirst => {
            select_prerequisite_first(&pool, input.beliefs, config)
        }
    };

    let (question, score) = selected.ok_or(SelectionError::NoEligibleQuestions)?;
    debug!(
        question_id = %question.id,
        score,
        strategy = input.strategy.as_str(),
        pool_size = pool.len(),
        "question selected"
    );
    Ok(SelectedQuestion {
        question_id: question.id.clone(),
        score,
        strategy: input.strategy,
    })
}

/// Filtering pipeline. A pool emptied by the knowledge-area filter fails
/// with a distinguishable reason; scope is never silently widened.
fn apply_filters<'a>(
    input: &SelectionInput<'a>,
    config: &EngineConfig,
) -> Result<Vec<&'a Question>, SelectionError> {
    let mut pool: Vec<&Question> = input.candidates.iter().collect();

    if let Some(ka) = input.knowledge_area {
        pool.retain(|q| q.knowledge_area == ka);
        if pool.is_empty() {
            return Err(SelectionError::KnowledgeAreaExhausted(ka.to_string()));
        }
    }

    let window_start = input.now - Duration::hours(config.recency_window_hours);
    let recently_answered: HashSet<&str> = input
        .recent_responses
        .iter()
        .filter(|r| r.answered_at > window_start)
        .map(|r| r.question_id.as_str())
        .collect();
    pool.retain(|q| !recently_answered.contains(q.id.as_str()));

    pool.retain(|q| !input.session_answered.contains(&q.id));

    if pool.is_empty() {
        return Err(SelectionError::NoEligibleQuestions);
    }
    Ok(pool)
}

/// Beta parameters for each concept a question tests. A concept with no
/// belief yet is treated at the configured prior, exactly as its belief
/// would be created lazily on first exposure.
fn question_params(question: &Question, beliefs: &HashMap<String, BeliefState>, config: &EngineConfig) -> Vec<(f64, f64)> {
    question
        .concept_ids()
        .map(|cid| {
            beliefs
                .get(cid)
                .map(|b| (b.alpha, b.beta))
                .unwrap_or((config.prior.alpha, config.prior.beta))
        })
        .collect()
}

/// Parameters for the uncertainty metric: concepts without a belief are
/// skipped, which shrinks the divisor of the mean.
fn known_params(question: &Question, beliefs: &HashMap<String, BeliefState>) -> Vec<(f64, f64)> {
    question
        .concept_ids()
        .filter_map(|cid| beliefs.get(cid).map(|b| (b.alpha, b.beta)))
        .collect()
}

fn info_gain_score(question: &Question, beliefs: &HashMap<String, BeliefState>, config: &EngineConfig) -> f64 {
    let params = question_params(question, beliefs, config);
    expected_information_gain(&params, question.slip, question.guess)
}

/// Argmax by expected gain; below `min_info_gain` the call falls back to the
/// uncertainty metric.
fn select_by_info_gain<'a>(
    pool: &[&'a Question],
    beliefs: &HashMap<String, BeliefState>,
    config: &EngineConfig,
) -> Option<(&'a Question, f64)> {
    let best = argmax(pool, |q| info_gain_score(q, beliefs, config))?;
    if best.1 < config.min_info_gain {
        debug!(best_gain = best.1, "info gain below threshold, falling back to uncertainty");
        return select_by_uncertainty(pool, beliefs);
    }
    Some(best)
}

fn select_by_uncertainty<'a>(
    pool: &[&'a Question],
    beliefs: &HashMap<String, BeliefState>,
) -> Option<(&'a Question, f64)> {
    argmax(pool, |q| average_uncertainty(&known_params(q, beliefs)))
}

/// Info gain scaled by (1 + weight * uncertain_fraction), where the fraction
/// counts tested concepts whose belief classifies as uncertain. Shares the
/// low-gain fallback with [`select_by_info_gain`].
fn select_prerequisite_first<'a>(
    pool: &[&'a Question],
    beliefs: &HashMap<String, BeliefState>,
    config: &EngineConfig,
) -> Option<(&'a Question, f64)> {
    let best = argmax(pool, |q| {
        let gain = info_gain_score(q, beliefs, config);
        let uncertain = uncertain_fraction(q, beliefs, config);
        gain * (1.0 + config.prerequisite_weight * uncertain)
    })?;
    if best.1 < config.min_info_gain {
        debug!(best_score = best.1, "boosted gain below threshold, falling back to uncertainty");
        return select_by_uncertainty(pool, beliefs);
    }
    Some(best)
}

fn uncertain_fraction(question: &Question, beliefs: &HashMap<String, BeliefState>, config: &EngineConfig) -> f64 {
    if question.concepts.is_empty() {
        return 0.0;
    }
    let uncertain = question
        .concept_ids()
        .filter(|cid| match beliefs.get(*cid) {
            Some(b) => {
                b.status(config.mastery_threshold, config.confidence_threshold, config.gap_threshold)
                    == BeliefStatus::Uncertain
            }
            // No belief yet: nothing is known, so the concept is uncertain.
            None => true,
        })
        .count();
    uncertain as f64 / question.concepts.len() as f64
}

/// Strict-greater argmax: ties keep the first candidate in input order.
fn argmax<'a>(pool: &[&'a Question], mut score: impl FnMut(&Question) -> f64) -> Option<(&'a Question, f64)> {
    let mut best: Option<(&Question, f64)> = None;
    for question in pool {
        let s = score(question);
        match best {
            Some((_, best_score)) if s <= best_score => {}
            _ => best = Some((question, s)),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BeliefPrior, ConceptWeight};

    fn question(id: &str, ka: &str, concepts: &[&str]) -> Question {
        Question {
            id: id.into(),
            knowledge_area: ka.into(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_option: 0,
            concepts: concepts
                .iter()
                .map(|c| ConceptWeight { concept_id: (*c).into(), relevance: 1.0 })
                .collect(),
            discrimination: 1.0,
            slip: 0.1,
            guess: 0.25,
        }
    }

    fn belief(concept: &str, alpha: f64, beta: f64) -> (String, BeliefState) {
        let mut b = BeliefState::new("u1", concept, BeliefPrior::default());
        b.alpha = alpha;
        b.beta = beta;
        b.response_count = 5;
        (concept.to_string(), b)
    }

    fn input<'a>(
        beliefs: &'a HashMap<String, BeliefState>,
        candidates: &'a [Question],
        session: &'a HashSet<String>,
        strategy: SelectionStrategy,
        ka: Option<&'a str>,
    ) -> SelectionInput<'a> {
        SelectionInput {
            beliefs,
            candidates,
            recent_responses: &[],
            session_answered: session,
            strategy,
            knowledge_area: ka,
            now: Utc::now(),
        }
    }

    #[test]
    fn test_prefers_uncertain_concept() {
        let beliefs: HashMap<_, _> = [belief("settled", 40.0, 10.0), belief("fresh", 1.0, 1.0)].into();
        let candidates = vec![question("q_settled", "algebra", &["settled"]), question("q_fresh", "algebra", &["fresh"])];
        let session = HashSet::new();

        let picked = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::MaxInfoGain, None),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(picked.question_id, "q_fresh");
    }

    #[test]
    fn test_knowledge_area_exhausted_is_distinguishable() {
        let beliefs = HashMap::new();
        let candidates = vec![question("q1", "algebra", &["c1"])];
        let session = HashSet::new();

        let err = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::MaxInfoGain, Some("geometry")),
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, SelectionError::KnowledgeAreaExhausted("geometry".into()));
    }

    #[test]
    fn test_session_filter_exhaustion_is_generic() {
        let beliefs = HashMap::new();
        let candidates = vec![question("q1", "algebra", &["c1"])];
        let session: HashSet<String> = ["q1".to_string()].into();

        let err = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::MaxInfoGain, None),
            &EngineConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err, SelectionError::NoEligibleQuestions);
    }

    #[test]
    fn test_recency_window_filters_recent_answers() {
        let beliefs = HashMap::new();
        let candidates = vec![question("q1", "algebra", &["c1"]), question("q2", "algebra", &["c2"])];
        let session = HashSet::new();
        let now = Utc::now();
        let recent = vec![QuestionResponse { question_id: "q1".into(), answered_at: now - Duration::hours(1) }];

        let input = SelectionInput {
            beliefs: &beliefs,
            candidates: &candidates,
            recent_responses: &recent,
            session_answered: &session,
            strategy: SelectionStrategy::MaxInfoGain,
            knowledge_area: None,
            now,
        };
        let picked = select(&input, &EngineConfig::default()).unwrap();
        assert_eq!(picked.question_id, "q2");
    }

    #[test]
    fn test_old_answers_pass_recency_window() {
        let beliefs = HashMap::new();
        let candidates = vec![question("q1", "algebra", &["c1"])];
        let session = HashSet::new();
        let now = Utc::now();
        let recent = vec![QuestionResponse { question_id: "q1".into(), answered_at: now - Duration::hours(48) }];

        let input = SelectionInput {
            beliefs: &beliefs,
            candidates: &candidates,
            recent_responses: &recent,
            session_answered: &session,
            strategy: SelectionStrategy::MaxInfoGain,
            knowledge_area: None,
            now,
        };
        assert!(select(&input, &EngineConfig::default()).is_ok());
    }

    #[test]
    fn test_ties_keep_first_candidate() {
        // Identical questions score identically; the first wins.
        let beliefs = HashMap::new();
        let candidates = vec![question("first", "algebra", &["c1"]), question("second", "algebra", &["c1"])];
        let session = HashSet::new();

        for strategy in [
            SelectionStrategy::MaxInfoGain,
            SelectionStrategy::MaxUncertainty,
            SelectionStrategy::PrerequisiteFirst,
            SelectionStrategy::Balanced,
        ] {
            let picked = select(
                &input(&beliefs, &candidates, &session, strategy, None),
                &EngineConfig::default(),
            )
            .unwrap();
            assert_eq!(picked.question_id, "first", "strategy {strategy:?}");
        }
    }

    #[test]
    fn test_selection_is_deterministic() {
        let beliefs: HashMap<_, _> = [belief("c1", 3.0, 2.0), belief("c2", 1.5, 1.5)].into();
        let candidates = vec![
            question("q1", "algebra", &["c1"]),
            question("q2", "algebra", &["c2"]),
            question("q3", "algebra", &["c1", "c2"]),
        ];
        let session = HashSet::new();
        let config = EngineConfig::default();

        let first = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::MaxInfoGain, None),
            &config,
        )
        .unwrap();
        for _ in 0..10 {
            let again = select(
                &input(&beliefs, &candidates, &session, SelectionStrategy::MaxInfoGain, None),
                &config,
            )
            .unwrap();
            assert_eq!(again.question_id, first.question_id);
            assert_eq!(again.score, first.score);
        }
    }

    #[test]
    fn test_prerequisite_first_boosts_uncertain_concepts() {
        // Same gain profile, but q_uncertain tests a concept with no belief.
        let beliefs: HashMap<_, _> = [belief("known", 6.0, 2.0)].into();
        let candidates = vec![
            question("q_known", "algebra", &["known"]),
            question("q_uncertain", "algebra", &["unknown"]),
        ];
        let session = HashSet::new();

        let picked = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::PrerequisiteFirst, None),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(picked.question_id, "q_uncertain");
    }

    #[test]
    fn test_prerequisite_first_falls_back_when_pool_is_settled() {
        // Hundreds of observations each: every expected gain sits below the
        // floor, so the uncertainty metric decides the pick.
        let beliefs: HashMap<_, _> =
            [belief("narrow", 400.0, 100.0), belief("wide", 200.0, 200.0)].into();
        let candidates = vec![
            question("q_narrow", "algebra", &["narrow"]),
            question("q_wide", "algebra", &["wide"]),
        ];
        let session = HashSet::new();

        let picked = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::PrerequisiteFirst, None),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(picked.question_id, "q_wide");
        // A differential entropy, not a boosted gain: the fallback engaged.
        assert!(picked.score < 0.0, "score = {}", picked.score);
    }

    #[test]
    fn test_max_uncertainty_ignores_unknown_concepts() {
        // q_mixed tests one known uncertain-ish concept and one unknown one;
        // the unknown concept contributes zero and shrinks the divisor.
        let beliefs: HashMap<_, _> = [belief("fresh", 1.2, 1.2), belief("settled", 30.0, 10.0)].into();
        let candidates = vec![
            question("q_settled", "algebra", &["settled"]),
            question("q_fresh", "algebra", &["fresh", "unknown"]),
        ];
        let session = HashSet::new();

        let picked = select(
            &input(&beliefs, &candidates, &session, SelectionStrategy::MaxUncertainty, None),
            &EngineConfig::default(),
        )
        .unwrap();
        assert_eq!(picked.question_id, "q_fresh");
    }
}
