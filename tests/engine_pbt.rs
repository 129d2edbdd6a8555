//! Property-Based Tests for the Mastery Engine
//!
//! Tests the following invariants:
//! - Belief updates: posteriors stay in [0, 1], Beta parameters stay
//!   positive, each update adds exactly one observation
//! - Monotonicity: a correct answer never lowers the mean, an incorrect
//!   answer never raises it (for slip, guess <= 0.5)
//! - Entropy numerics: finite everywhere, maximal at the uniform prior
//! - Graph builder: output is acyclic for any input, even with adversarial
//!   cross-domain proposals; every concept gets a depth
//! - Selection: deterministic for identical inputs, picks from the pool

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};

use chrono::Utc;
use mastery_engine::bayes::entropy::{beta_entropy, expected_information_gain};
use mastery_engine::bayes::update::{apply_update, posterior_mastery, simulate_update};
use mastery_engine::config::EngineConfig;
use mastery_engine::graph::builder::{build, BuildInput, BuildOptions, CrossDomainProposer};
use mastery_engine::selection::{select, SelectionInput};
use mastery_engine::types::{
    BeliefPrior, BeliefState, Concept, ConceptWeight, EdgeSource, PrerequisiteEdge, Question,
    RelationshipKind, SelectionStrategy,
};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_unit() -> impl Strategy<Value = f64> {
    (0u64..=1000u64).prop_map(|v| v as f64 / 1000.0)
}

/// Slip and guess rates; kept at or below 0.5 as any sane item bank would.
fn arb_rate() -> impl Strategy<Value = f64> {
    (0u64..=500u64).prop_map(|v| v as f64 / 1000.0)
}

fn arb_beta_params() -> impl Strategy<Value = (f64, f64)> {
    ((1u64..=500u64), (1u64..=500u64)).prop_map(|(a, b)| (a as f64 / 10.0, b as f64 / 10.0))
}

fn arb_section() -> impl Strategy<Value = Option<String>> {
    proptest::option::of(prop::collection::vec(1u8..=3, 1..=3).prop_map(|parts| {
        parts.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(".")
    }))
}

fn arb_concepts() -> impl Strategy<Value = Vec<Concept>> {
    prop::collection::vec((arb_section(), arb_unit()), 2..=12).prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (section, difficulty))| Concept {
                id: format!("c{i}"),
                name: format!("Concept {i}"),
                knowledge_area: if i % 2 == 0 { "algebra".into() } else { "geometry".into() },
                difficulty,
                depth: 0,
                section,
            })
            .collect()
    })
}

/// (concept index, prerequisite index, strength) triples; indices are taken
/// modulo the concept count, so arbitrary values map to in-graph edges and
/// self-loops are possible on purpose.
fn arb_proposals() -> impl Strategy<Value = Vec<(usize, usize, f64)>> {
    prop::collection::vec((0usize..32, 0usize..32, arb_unit()), 0..=16)
}

fn arb_beliefs() -> impl Strategy<Value = HashMap<String, BeliefState>> {
    prop::collection::vec((0usize..5, arb_beta_params(), 0u32..=20), 0..=5).prop_map(|entries| {
        let mut beliefs = HashMap::new();
        for (idx, (alpha, beta), responses) in entries {
            let id = format!("c{idx}");
            let mut b = BeliefState::new("u1", &id, BeliefPrior::default());
            b.alpha = alpha;
            b.beta = beta;
            b.response_count = responses;
            beliefs.insert(id, b);
        }
        beliefs
    })
}

fn arb_questions() -> impl Strategy<Value = Vec<Question>> {
    prop::collection::vec(
        (prop::collection::hash_set(0usize..5, 1..=3), arb_rate(), arb_rate()),
        1..=6,
    )
    .prop_map(|entries| {
        entries
            .into_iter()
            .enumerate()
            .map(|(i, (concept_idxs, slip, guess))| Question {
                id: format!("q{i}"),
                knowledge_area: "algebra".into(),
                options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
                correct_option: 0,
                concepts: concept_idxs
                    .into_iter()
                    .map(|idx| ConceptWeight { concept_id: format!("c{idx}"), relevance: 1.0 })
                    .collect(),
                discrimination: 1.0,
                slip,
                guess,
            })
            .collect()
    })
}

fn arb_strategy() -> impl Strategy<Value = SelectionStrategy> {
    prop_oneof![
        Just(SelectionStrategy::MaxInfoGain),
        Just(SelectionStrategy::MaxUncertainty),
        Just(SelectionStrategy::PrerequisiteFirst),
        Just(SelectionStrategy::Balanced),
    ]
}

struct FixedProposer(Vec<PrerequisiteEdge>);

impl CrossDomainProposer for FixedProposer {
    fn propose(&self, _concepts: &[Concept]) -> Vec<PrerequisiteEdge> {
        self.0.clone()
    }
}

/// Kahn's algorithm, independent of the builder's own implementation.
fn is_acyclic(concepts: &[Concept], edges: &[PrerequisiteEdge]) -> bool {
    let mut in_degree: HashMap<&str, usize> = concepts.iter().map(|c| (c.id.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        *in_degree.entry(edge.concept_id.as_str()).or_insert(0) += 1;
        dependents.entry(edge.prerequisite_id.as_str()).or_default().push(edge.concept_id.as_str());
    }
    let mut queue: Vec<&str> = in_degree.iter().filter(|(_, d)| **d == 0).map(|(id, _)| *id).collect();
    let mut visited = 0usize;
    while let Some(node) = queue.pop() {
        visited += 1;
        for dep in dependents.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
            let degree = in_degree.get_mut(dep).unwrap();
            *degree -= 1;
            if *degree == 0 {
                queue.push(dep);
            }
        }
    }
    visited == in_degree.len()
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// PBT-1: the posterior is a probability for any parameter combination
    #[test]
    fn posterior_stays_in_unit_interval(
        (alpha, beta) in arb_beta_params(),
        slip in arb_unit(),
        guess in arb_unit(),
        correct in any::<bool>(),
    ) {
        let posterior = posterior_mastery(alpha, beta, correct, slip, guess);
        prop_assert!((0.0..=1.0).contains(&posterior), "posterior = {posterior}");
    }

    /// PBT-2: one update adds exactly one pseudo-observation
    #[test]
    fn update_adds_one_observation(
        (alpha, beta) in arb_beta_params(),
        slip in arb_rate(),
        guess in arb_rate(),
        correct in any::<bool>(),
    ) {
        let mut belief = BeliefState::new("u1", "c1", BeliefPrior::default());
        belief.alpha = alpha;
        belief.beta = beta;
        let total_before = belief.alpha + belief.beta;

        apply_update(&mut belief, correct, slip, guess, Utc::now());

        prop_assert!(belief.alpha > 0.0);
        prop_assert!(belief.beta > 0.0);
        prop_assert!((belief.alpha + belief.beta - total_before - 1.0).abs() < 1e-9);
        prop_assert_eq!(belief.response_count, 1);
    }

    /// PBT-3: a correct answer never lowers the mean when guess <= 1 - slip
    #[test]
    fn correct_answer_never_lowers_mean(
        (alpha, beta) in arb_beta_params(),
        slip in arb_rate(),
        guess in arb_rate(),
    ) {
        let before = alpha / (alpha + beta);
        let (new_alpha, new_beta) = simulate_update(alpha, beta, true, slip, guess);
        let after = new_alpha / (new_alpha + new_beta);
        prop_assert!(after >= before - 1e-9, "mean dropped from {before} to {after}");
    }

    /// PBT-4: an incorrect answer never raises the mean when slip <= 1 - guess
    #[test]
    fn incorrect_answer_never_raises_mean(
        (alpha, beta) in arb_beta_params(),
        slip in arb_rate(),
        guess in arb_rate(),
    ) {
        let before = alpha / (alpha + beta);
        let (new_alpha, new_beta) = simulate_update(alpha, beta, false, slip, guess);
        let after = new_alpha / (new_alpha + new_beta);
        prop_assert!(after <= before + 1e-9, "mean rose from {before} to {after}");
    }

    /// PBT-5: Beta entropy is finite and maximal at the uniform prior
    #[test]
    fn entropy_finite_and_maximal_at_uniform((alpha, beta) in arb_beta_params()) {
        let h = beta_entropy(alpha, beta);
        prop_assert!(h.is_finite(), "entropy({alpha}, {beta}) = {h}");
        if alpha >= 1.0 && beta >= 1.0 {
            prop_assert!(h <= beta_entropy(1.0, 1.0) + 1e-9);
        }
    }

    /// PBT-6: expected information gain is finite for any question profile
    #[test]
    fn information_gain_is_finite(
        params in prop::collection::vec(arb_beta_params(), 1..=4),
        slip in arb_rate(),
        guess in arb_rate(),
    ) {
        let gain = expected_information_gain(&params, slip, guess);
        prop_assert!(gain.is_finite(), "gain = {gain}");
    }

    /// PBT-7: the builder never publishes a cyclic graph, even when the
    /// cross-domain proposer suggests arbitrary (including cyclic) edges
    #[test]
    fn builder_output_is_acyclic(
        concepts in arb_concepts(),
        proposals in arb_proposals(),
    ) {
        let n = concepts.len();
        let proposed: Vec<PrerequisiteEdge> = proposals
            .into_iter()
            .map(|(c, p, strength)| PrerequisiteEdge {
                concept_id: format!("c{}", c % n),
                prerequisite_id: format!("c{}", p % n),
                strength,
                kind: RelationshipKind::Helpful,
                source: EdgeSource::CrossDomain,
            })
            .collect();
        let proposer = FixedProposer(proposed);
        let input = BuildInput {
            course_id: "course".into(),
            concepts: concepts.clone(),
            similarities: vec![],
        };
        let options = BuildOptions { enable_cycle_repair: true, cross_domain: Some(&proposer) };

        let graph = build(&input, &options, &EngineConfig::default()).unwrap();

        prop_assert!(is_acyclic(&graph.concepts, &graph.edges));
        for concept in &graph.concepts {
            let depth = graph.depths.get(&concept.id);
            prop_assert!(depth.is_some(), "no depth for {}", concept.id);
            prop_assert!((*depth.unwrap() as usize) < n, "depth exceeds node count");
        }
        prop_assert_eq!(graph.stats.node_count, n);
        prop_assert_eq!(graph.stats.edge_count, graph.edges.len());
    }

    /// PBT-8: selection is deterministic and picks from the candidate pool
    #[test]
    fn selection_is_deterministic(
        beliefs in arb_beliefs(),
        candidates in arb_questions(),
        strategy in arb_strategy(),
    ) {
        let session = HashSet::new();
        let now = Utc::now();
        let config = EngineConfig::default();
        let input = SelectionInput {
            beliefs: &beliefs,
            candidates: &candidates,
            recent_responses: &[],
            session_answered: &session,
            strategy,
            knowledge_area: None,
            now,
        };

        let first = select(&input, &config).unwrap();
        prop_assert!(candidates.iter().any(|q| q.id == first.question_id));
        for _ in 0..3 {
            let again = select(&input, &config).unwrap();
            prop_assert_eq!(&again.question_id, &first.question_id);
            prop_assert_eq!(again.score, first.score);
        }
    }
}

// ============================================================================
// Additional Unit Tests for Edge Cases
// ============================================================================

#[test]
fn repeated_correct_answers_converge_toward_mastery() {
    let mut belief = BeliefState::new("u1", "c1", BeliefPrior::default());
    for _ in 0..20 {
        apply_update(&mut belief, true, 0.05, 0.1, Utc::now());
    }
    assert!(belief.mean() > 0.9, "mean = {}", belief.mean());
    assert!(belief.confidence() > 0.9, "confidence = {}", belief.confidence());
}

#[test]
fn builder_rejects_cycle_when_repair_disabled() {
    let concepts: Vec<Concept> = (0..2)
        .map(|i| Concept {
            id: format!("c{i}"),
            name: format!("Concept {i}"),
            knowledge_area: "algebra".into(),
            difficulty: 0.5,
            depth: 0,
            section: None,
        })
        .collect();
    let proposer = FixedProposer(vec![
        PrerequisiteEdge {
            concept_id: "c0".into(),
            prerequisite_id: "c1".into(),
            strength: 0.6,
            kind: RelationshipKind::Helpful,
            source: EdgeSource::CrossDomain,
        },
        PrerequisiteEdge {
            concept_id: "c1".into(),
            prerequisite_id: "c0".into(),
            strength: 0.6,
            kind: RelationshipKind::Helpful,
            source: EdgeSource::CrossDomain,
        },
    ]);
    let input = BuildInput { course_id: "course".into(), concepts, similarities: vec![] };
    let options = BuildOptions { enable_cycle_repair: false, cross_domain: Some(&proposer) };

    let err = build(&input, &options, &EngineConfig::default());
    assert!(err.is_err());
}
