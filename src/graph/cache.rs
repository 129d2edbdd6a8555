//! In-memory prerequisite graph cache.
//!
//! Holds exactly one immutable [`GraphSnapshot`] at a time. A load builds
//! the new snapshot off to the side and publishes it with a single pointer
//! swap, so in-flight readers keep the snapshot they started with and nobody
//! observes a half-built one. The first caller triggers construction while
//! concurrent callers await the same in-flight load.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::graph::builder::{GraphStatistics, ValidatedGraph};
use crate::repo::{GraphSource, RepoError};
use crate::types::{Concept, RelationshipKind};

/// One prerequisite of a concept, as returned by the query surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrerequisiteEntry {
    pub prerequisite_id: String,
    pub strength: f64,
    pub kind: RelationshipKind,
}

/// Immutable, wholesale-replaced view of one validated graph.
#[derive(Debug)]
pub struct GraphSnapshot {
    course_id: String,
    concepts: HashMap<String, Concept>,
    prerequisites: HashMap<String, Vec<PrerequisiteEntry>>,
    dependents: HashMap<String, Vec<String>>,
    depths: HashMap<String, u32>,
    roots: HashSet<String>,
    build_stats: GraphStatistics,
    loaded_at: DateTime<Utc>,
    load_duration_ms: u64,
}

impl GraphSnapshot {
    fn from_graph(graph: ValidatedGraph, load_duration_ms: u64) -> Self {
        let mut prerequisites: HashMap<String, Vec<PrerequisiteEntry>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for edge in &graph.edges {
            prerequisites
                .entry(edge.concept_id.clone())
                .or_default()
                .push(PrerequisiteEntry {
                    prerequisite_id: edge.prerequisite_id.clone(),
                    strength: edge.strength,
                    kind: edge.kind,
                });
            dependents
                .entry(edge.prerequisite_id.clone())
                .or_default()
                .push(edge.concept_id.clone());
        }
        for entries in prerequisites.values_mut() {
            entries.sort_by(|x, y| {
                y.strength
                    .partial_cmp(&x.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| x.prerequisite_id.cmp(&y.prerequisite_id))
            });
        }
        for deps in dependents.values_mut() {
            deps.sort_unstable();
        }

        let roots: HashSet<String> = graph
            .concepts
            .iter()
            .filter(|c| !prerequisites.contains_key(c.id.as_str()))
            .map(|c| c.id.clone())
            .collect();
        let concepts: HashMap<String, Concept> =
            graph.concepts.into_iter().map(|c| (c.id.clone(), c)).collect();

        Self {
            course_id: graph.course_id,
            concepts,
            prerequisites,
            dependents,
            depths: graph.depths,
            roots,
            build_stats: graph.stats,
            loaded_at: Utc::now(),
            load_duration_ms,
        }
    }

    /// Rough footprint of the id maps; good enough for the statistics view.
    fn estimated_memory_bytes(&self) -> usize {
        let concept_bytes: usize = self
            .concepts
            .values()
            .map(|c| c.id.len() + c.name.len() + c.knowledge_area.len() + std::mem::size_of::<Concept>())
            .sum();
        let edge_bytes: usize = self
            .prerequisites
            .values()
            .flatten()
            .map(|e| e.prerequisite_id.len() + std::mem::size_of::<PrerequisiteEntry>())
            .sum();
        let dependent_bytes: usize = self.dependents.values().flatten().map(|d| d.len()).sum();
        concept_bytes + edge_bytes + dependent_bytes
    }
}

/// Build-time statistics plus load metadata.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub course_id: String,
    #[serde(flatten)]
    pub build: GraphStatistics,
    pub loaded_at: DateTime<Utc>,
    pub load_duration_ms: u64,
    pub estimated_memory_bytes: usize,
}

/// Read-mostly cache handle. Construct once and pass by reference, or use
/// the process-wide [`global`] accessor.
#[derive(Debug, Default)]
pub struct GraphCache {
    snapshot: RwLock<Option<Arc<GraphSnapshot>>>,
    load_lock: tokio::sync::Mutex<()>,
}

impl GraphCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.snapshot.read().is_some()
    }

    /// Build a fresh snapshot from the source and swap it in atomically.
    /// Readers of the previous snapshot are unaffected.
    pub async fn load<S: GraphSource>(&self, source: &S, course_id: &str) -> Result<(), RepoError> {
        let _guard = self.load_lock.lock().await;
        self.load_locked(source, course_id).await
    }

    /// Load only if no snapshot is published yet. Concurrent first callers
    /// serialize on the load lock and reuse the winner's snapshot.
    pub async fn ensure_loaded<S: GraphSource>(&self, source: &S, course_id: &str) -> Result<(), RepoError> {
        if self.is_loaded() {
            return Ok(());
        }
        let _guard = self.load_lock.lock().await;
        if self.is_loaded() {
            return Ok(());
        }
        self.load_locked(source, course_id).await
    }

    async fn load_locked<S: GraphSource>(&self, source: &S, course_id: &str) -> Result<(), RepoError> {
        let started = Instant::now();
        let graph = source.load_graph(course_id).await?;
        let snapshot = GraphSnapshot::from_graph(graph, started.elapsed().as_millis() as u64);
        info!(
            course_id,
            nodes = snapshot.concepts.len(),
            load_ms = snapshot.load_duration_ms,
            "graph snapshot published"
        );
        *self.snapshot.write() = Some(Arc::new(snapshot));
        Ok(())
    }

    /// Drop the published snapshot. Used to isolate tests.
    pub fn reset(&self) {
        *self.snapshot.write() = None;
    }

    fn current(&self) -> Option<Arc<GraphSnapshot>> {
        self.snapshot.read().clone()
    }

    /// Prerequisites of a concept ordered by descending strength. Empty for
    /// unknown concepts.
    pub fn get_prerequisites(&self, concept_id: &str) -> Vec<PrerequisiteEntry> {
        self.current()
            .and_then(|s| s.prerequisites.get(concept_id).cloned())
            .unwrap_or_default()
    }

    pub fn get_prerequisite_ids(&self, concept_id: &str) -> Vec<String> {
        self.get_prerequisites(concept_id)
            .into_iter()
            .map(|e| e.prerequisite_id)
            .collect()
    }

    pub fn get_dependents(&self, concept_id: &str) -> Vec<String> {
        self.current()
            .and_then(|s| s.dependents.get(concept_id).cloned())
            .unwrap_or_default()
    }

    /// 0 for roots, unknown concepts, or an unloaded cache.
    pub fn get_prerequisite_depth(&self, concept_id: &str) -> u32 {
        self.current()
            .and_then(|s| s.depths.get(concept_id).copied())
            .unwrap_or(0)
    }

    pub fn get_root_concepts(&self) -> HashSet<String> {
        self.current().map(|s| s.roots.clone()).unwrap_or_default()
    }

    pub fn get_concept(&self, concept_id: &str) -> Option<Concept> {
        self.current()?.concepts.get(concept_id).cloned()
    }

    /// Every concept in the snapshot, ordered by id. Empty when unloaded.
    pub fn get_concepts(&self) -> Vec<Concept> {
        let Some(snapshot) = self.current() else {
            return Vec::new();
        };
        let mut concepts: Vec<Concept> = snapshot.concepts.values().cloned().collect();
        concepts.sort_by(|x, y| x.id.cmp(&y.id));
        concepts
    }

    /// Every concept reachable via prerequisite edges within `max_depth`
    /// hops, nearest first. Empty for roots and unknown concepts.
    pub fn get_prerequisite_chain(&self, concept_id: &str, max_depth: u32) -> Vec<String> {
        let Some(snapshot) = self.current() else {
            return Vec::new();
        };

        let mut chain = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(concept_id);
        let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
        queue.push_back((concept_id, 0));

        while let Some((node, distance)) = queue.pop_front() {
            if distance >= max_depth {
                continue;
            }
            let Some(entries) = snapshot.prerequisites.get(node) else {
                continue;
            };
            for entry in entries {
                if seen.insert(entry.prerequisite_id.as_str()) {
                    chain.push(entry.prerequisite_id.clone());
                    queue.push_back((entry.prerequisite_id.as_str(), distance + 1));
                }
            }
        }
        chain
    }

    pub fn get_statistics(&self) -> Option<CacheStatistics> {
        let snapshot = self.current()?;
        Some(CacheStatistics {
            course_id: snapshot.course_id.clone(),
            build: snapshot.build_stats.clone(),
            loaded_at: snapshot.loaded_at,
            load_duration_ms: snapshot.load_duration_ms,
            estimated_memory_bytes: snapshot.estimated_memory_bytes(),
        })
    }
}

static GLOBAL_CACHE: OnceLock<RwLock<Option<Arc<GraphCache>>>> = OnceLock::new();

fn global_cell() -> &'static RwLock<Option<Arc<GraphCache>>> {
    GLOBAL_CACHE.get_or_init(|| RwLock::new(None))
}

/// Process-wide cache handle, constructed on first use. Every caller gets
/// the same instance until [`reset_global`] clears it.
pub fn global() -> Arc<GraphCache> {
    if let Some(cache) = global_cell().read().as_ref() {
        return Arc::clone(cache);
    }
    let mut guard = global_cell().write();
    if let Some(cache) = guard.as_ref() {
        return Arc::clone(cache);
    }
    let cache = Arc::new(GraphCache::new());
    *guard = Some(Arc::clone(&cache));
    cache
}

/// Clear the process-wide handle. Used to isolate tests.
pub fn reset_global() {
    *global_cell().write() = None;
}
