//! Mastery gating over the prerequisite graph.
//!
//! A concept is unlocked when every `required` prerequisite is mastered:
//! enough responses, mean at or above the mastery threshold, and confidence
//! at or above the confidence threshold. Helpful and related edges never
//! block. A prerequisite with no stored belief is evaluated at the
//! uninformative prior and therefore blocks.

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::GateError;
use crate::graph::cache::{GraphCache, PrerequisiteEntry};
use crate::repo::{BeliefRepository, UnlockEventRepository};
use crate::types::{BeliefState, RelationshipKind, UnlockEvent};

use serde::Serialize;
use std::collections::HashMap;

/// Evaluation of one required prerequisite.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteStatus {
    pub prerequisite_id: String,
    pub name: String,
    pub strength: f64,
    pub mastery: f64,
    pub confidence: f64,
    pub response_count: u32,
    pub mastered: bool,
    /// Fraction of the way to both thresholds, in [0, 1].
    pub progress: f64,
    /// Heuristic estimate of further practice questions needed.
    pub estimated_remaining: u32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GateResult {
    pub concept_id: String,
    pub unlocked: bool,
    /// Required prerequisites only, in snapshot order (strength descending).
    pub prerequisites: Vec<PrerequisiteStatus>,
    /// Mean progress over the required prerequisites, mastered ones counting
    /// as 1.0; a concept with none is fully progressed.
    pub mastery_progress: f64,
    /// The blocking prerequisite with the highest progress, if any.
    pub closest_to_unlock: Option<String>,
    /// Summed practice estimate over the blocking prerequisites.
    pub estimated_remaining_questions: u32,
}

/// Gate sweep over a whole snapshot for one user, concepts classified as
/// unlocked, locked, or having no required prerequisites at all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkGateResult {
    pub user_id: String,
    pub results: Vec<GateResult>,
    pub unlocked: Vec<String>,
    pub locked: Vec<String>,
    pub no_prerequisites: Vec<String>,
    pub unlocked_count: usize,
    pub locked_count: usize,
    pub no_prerequisite_count: usize,
}

/// Evaluate the gate for one concept against the loaded snapshot.
pub async fn check<B: BeliefRepository>(
    cache: &GraphCache,
    beliefs: &B,
    config: &EngineConfig,
    user_id: &str,
    concept_id: &str,
) -> Result<GateResult, GateError> {
    if !cache.is_loaded() {
        return Err(GateError::SnapshotNotLoaded);
    }
    if cache.get_concept(concept_id).is_none() {
        return Err(GateError::ConceptNotFound(concept_id.to_string()));
    }

    let required = required_prerequisites(cache, concept_id);
    let ids: Vec<String> = required.iter().map(|e| e.prerequisite_id.clone()).collect();
    let stored: HashMap<String, BeliefState> = beliefs
        .get_many(user_id, &ids)
        .await?
        .into_iter()
        .map(|b| (b.concept_id.clone(), b))
        .collect();

    let result = evaluate(cache, config, user_id, concept_id, required, &stored);
    debug!(
        user_id,
        concept_id,
        unlocked = result.unlocked,
        prerequisites = result.prerequisites.len(),
        "gate evaluated"
    );
    Ok(result)
}

/// Evaluate the gate for every concept in the loaded snapshot, fetching the
/// user's beliefs in a single round-trip. An optional knowledge-area filter
/// narrows the sweep.
pub async fn bulk_check<B: BeliefRepository>(
    cache: &GraphCache,
    beliefs: &B,
    config: &EngineConfig,
    user_id: &str,
    knowledge_area: Option<&str>,
) -> Result<BulkGateResult, GateError> {
    if !cache.is_loaded() {
        return Err(GateError::SnapshotNotLoaded);
    }

    let stored: HashMap<String, BeliefState> = beliefs
        .get_all(user_id)
        .await?
        .into_iter()
        .map(|b| (b.concept_id.clone(), b))
        .collect();

    let mut results = Vec::new();
    let mut unlocked = Vec::new();
    let mut locked = Vec::new();
    let mut no_prerequisites = Vec::new();
    for concept in cache.get_concepts() {
        if knowledge_area.is_some_and(|ka| concept.knowledge_area != ka) {
            continue;
        }
        let required = required_prerequisites(cache, &concept.id);
        let result = evaluate(cache, config, user_id, &concept.id, required, &stored);
        if result.prerequisites.is_empty() {
            no_prerequisites.push(concept.id);
        } else if result.unlocked {
            unlocked.push(concept.id);
        } else {
            locked.push(concept.id);
        }
        results.push(result);
    }

    debug!(
        user_id,
        total = results.len(),
        unlocked = unlocked.len(),
        locked = locked.len(),
        "bulk gate evaluated"
    );
    Ok(BulkGateResult {
        user_id: user_id.to_string(),
        unlocked_count: unlocked.len(),
        locked_count: locked.len(),
        no_prerequisite_count: no_prerequisites.len(),
        results,
        unlocked,
        locked,
        no_prerequisites,
    })
}

fn required_prerequisites(cache: &GraphCache, concept_id: &str) -> Vec<PrerequisiteEntry> {
    cache
        .get_prerequisites(concept_id)
        .into_iter()
        .filter(|e| e.kind == RelationshipKind::Required)
        .collect()
}

/// Shared evaluation core over already-fetched beliefs.
fn evaluate(
    cache: &GraphCache,
    config: &EngineConfig,
    user_id: &str,
    concept_id: &str,
    required: Vec<PrerequisiteEntry>,
    stored: &HashMap<String, BeliefState>,
) -> GateResult {
    let mut prerequisites = Vec::with_capacity(required.len());
    for entry in required {
        let (mean, confidence, count) = match stored.get(&entry.prerequisite_id) {
            Some(b) => (b.mean(), b.confidence(), b.response_count),
            // Lazily created beliefs sit at the prior until first response.
            None => {
                let prior = BeliefState::new(user_id, &entry.prerequisite_id, config.prior);
                (prior.mean(), prior.confidence(), 0)
            }
        };
        let name = cache
            .get_concept(&entry.prerequisite_id)
            .map(|c| c.name)
            .unwrap_or_else(|| entry.prerequisite_id.clone());
        prerequisites.push(PrerequisiteStatus {
            mastered: count >= config.min_responses
                && mean >= config.mastery_threshold
                && confidence >= config.confidence_threshold,
            progress: progress_toward(mean, confidence, config),
            estimated_remaining: estimated_remaining(mean, count, config),
            prerequisite_id: entry.prerequisite_id,
            name,
            strength: entry.strength,
            mastery: mean,
            confidence,
            response_count: count,
        });
    }

    let unlocked = prerequisites.iter().all(|p| p.mastered);
    let mastery_progress = if prerequisites.is_empty() {
        1.0
    } else {
        prerequisites
            .iter()
            .map(|p| if p.mastered { 1.0 } else { p.progress })
            .sum::<f64>()
            / prerequisites.len() as f64
    };
    // Strict-greater comparison: ties keep the first in snapshot order.
    let mut closest_to_unlock: Option<&PrerequisiteStatus> = None;
    for prereq in prerequisites.iter().filter(|p| !p.mastered) {
        match closest_to_unlock {
            Some(best) if prereq.progress <= best.progress => {}
            _ => closest_to_unlock = Some(prereq),
        }
    }
    let estimated_remaining_questions = prerequisites
        .iter()
        .filter(|p| !p.mastered)
        .map(|p| p.estimated_remaining)
        .sum();

    GateResult {
        concept_id: concept_id.to_string(),
        unlocked,
        mastery_progress,
        closest_to_unlock: closest_to_unlock.map(|p| p.prerequisite_id.clone()),
        estimated_remaining_questions,
        prerequisites,
    }
}

/// After a belief update on `updated_concept_id`, record an unlock event for
/// every dependent whose gate now passes. At most one event per
/// (user, concept): already-recorded unlocks are skipped, so replaying an
/// update never duplicates events. Returns the newly unlocked concept ids.
pub async fn record_unlocks<B, U>(
    cache: &GraphCache,
    beliefs: &B,
    events: &U,
    config: &EngineConfig,
    user_id: &str,
    updated_concept_id: &str,
) -> Result<Vec<String>, GateError>
where
    B: BeliefRepository,
    U: UnlockEventRepository,
{
    let mut newly_unlocked = Vec::new();
    for dependent in cache.get_dependents(updated_concept_id) {
        if events.exists(user_id, &dependent).await? {
            continue;
        }
        let result = check(cache, beliefs, config, user_id, &dependent).await?;
        if !result.unlocked {
            continue;
        }
        events
            .insert(&UnlockEvent {
                id: Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                concept_id: dependent.clone(),
                triggered_by: Some(updated_concept_id.to_string()),
                unlocked_at: Utc::now(),
            })
            .await?;
        info!(user_id, concept_id = %dependent, triggered_by = updated_concept_id, "concept unlocked");
        newly_unlocked.push(dependent);
    }
    Ok(newly_unlocked)
}

/// Average of the fractional distances to the mastery and confidence
/// thresholds, each capped at 1.
fn progress_toward(mean: f64, confidence: f64, config: &EngineConfig) -> f64 {
    let mastery_part = (mean / config.mastery_threshold).min(1.0);
    let confidence_part = (confidence / config.confidence_threshold).min(1.0);
    (mastery_part + confidence_part) / 2.0
}

/// Questions-remaining heuristic: linear in the mastery gap, floored by the
/// responses still missing toward the minimum count.
fn estimated_remaining(mean: f64, count: u32, config: &EngineConfig) -> u32 {
    let gap = (config.mastery_threshold - mean).max(0.0);
    let from_gap = (config.questions_per_unit_gap * gap).round() as u32;
    let from_count = config.min_practice_floor.saturating_sub(count);
    from_gap.max(from_count)
}
