//! Collaborator interfaces.
//!
//! Persistence lives outside this crate; the engine only depends on these
//! read/write contracts. The in-memory implementations back the test suites
//! and double as a reference for integrators.

#![allow(async_fn_in_trait)]

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::graph::builder::ValidatedGraph;
use crate::types::{BeliefState, PrerequisiteEdge, UnlockEvent};

#[derive(Debug, Clone, thiserror::Error)]
#[error("repository error: {0}")]
pub struct RepoError(pub String);

/// Beta parameters per (user, concept). Upsert must be atomic; the
/// persistence layer serializes concurrent updates to the same pair.
pub trait BeliefRepository {
    async fn get(&self, user_id: &str, concept_id: &str) -> Result<Option<BeliefState>, RepoError>;
    async fn get_all(&self, user_id: &str) -> Result<Vec<BeliefState>, RepoError>;
    async fn get_many(&self, user_id: &str, concept_ids: &[String]) -> Result<Vec<BeliefState>, RepoError>;
    async fn upsert(&self, belief: &BeliefState) -> Result<(), RepoError>;
}

/// Unlock events, at most one per (user, concept).
pub trait UnlockEventRepository {
    async fn exists(&self, user_id: &str, concept_id: &str) -> Result<bool, RepoError>;
    async fn insert(&self, event: &UnlockEvent) -> Result<(), RepoError>;
}

/// Persisted graph output of the builder. `replace_edges` is a bulk replace
/// per course, so when two builder runs race the later completion wins.
pub trait GraphStore {
    async fn replace_edges(&self, course_id: &str, edges: &[PrerequisiteEdge]) -> Result<(), RepoError>;
    async fn update_depths(&self, course_id: &str, depths: &HashMap<String, u32>) -> Result<(), RepoError>;
}

/// Source the graph cache loads snapshots from.
pub trait GraphSource {
    async fn load_graph(&self, course_id: &str) -> Result<ValidatedGraph, RepoError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryBeliefRepository {
    beliefs: Arc<RwLock<HashMap<(String, String), BeliefState>>>,
}

impl InMemoryBeliefRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BeliefRepository for InMemoryBeliefRepository {
    async fn get(&self, user_id: &str, concept_id: &str) -> Result<Option<BeliefState>, RepoError> {
        Ok(self
            .beliefs
            .read()
            .get(&(user_id.to_string(), concept_id.to_string()))
            .cloned())
    }

    async fn get_all(&self, user_id: &str) -> Result<Vec<BeliefState>, RepoError> {
        Ok(self
            .beliefs
            .read()
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_many(&self, user_id: &str, concept_ids: &[String]) -> Result<Vec<BeliefState>, RepoError> {
        let guard = self.beliefs.read();
        Ok(concept_ids
            .iter()
            .filter_map(|cid| guard.get(&(user_id.to_string(), cid.clone())).cloned())
            .collect())
    }

    async fn upsert(&self, belief: &BeliefState) -> Result<(), RepoError> {
        self.beliefs
            .write()
            .insert((belief.user_id.clone(), belief.concept_id.clone()), belief.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryUnlockEventRepository {
    events: Arc<RwLock<Vec<UnlockEvent>>>,
}

impl InMemoryUnlockEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<UnlockEvent> {
        self.events.read().clone()
    }
}

impl UnlockEventRepository for InMemoryUnlockEventRepository {
    async fn exists(&self, user_id: &str, concept_id: &str) -> Result<bool, RepoError> {
        Ok(self
            .events
            .read()
            .iter()
            .any(|e| e.user_id == user_id && e.concept_id == concept_id))
    }

    async fn insert(&self, event: &UnlockEvent) -> Result<(), RepoError> {
        self.events.write().push(event.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryGraphStore {
    edges: Arc<RwLock<HashMap<String, Vec<PrerequisiteEdge>>>>,
    depths: Arc<RwLock<HashMap<String, HashMap<String, u32>>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edges_for(&self, course_id: &str) -> Vec<PrerequisiteEdge> {
        self.edges.read().get(course_id).cloned().unwrap_or_default()
    }

    pub fn depths_for(&self, course_id: &str) -> HashMap<String, u32> {
        self.depths.read().get(course_id).cloned().unwrap_or_default()
    }
}

impl GraphStore for InMemoryGraphStore {
    async fn replace_edges(&self, course_id: &str, edges: &[PrerequisiteEdge]) -> Result<(), RepoError> {
        self.edges.write().insert(course_id.to_string(), edges.to_vec());
        Ok(())
    }

    async fn update_depths(&self, course_id: &str, depths: &HashMap<String, u32>) -> Result<(), RepoError> {
        self.depths.write().insert(course_id.to_string(), depths.clone());
        Ok(())
    }
}

/// Serves one pre-built graph; what the cache loads in tests.
#[derive(Debug, Clone)]
pub struct StaticGraphSource {
    graph: Arc<ValidatedGraph>,
}

impl StaticGraphSource {
    pub fn new(graph: ValidatedGraph) -> Self {
        Self { graph: Arc::new(graph) }
    }
}

impl GraphSource for StaticGraphSource {
    async fn load_graph(&self, course_id: &str) -> Result<ValidatedGraph, RepoError> {
        if self.graph.course_id != course_id {
            return Err(RepoError(format!("no graph for course {course_id}")));
        }
        Ok((*self.graph).clone())
    }
}
