//! Prerequisite graph builder.
//!
//! Batch pipeline over the concepts of one course:
//! hierarchy inference -> similarity inference -> optional cross-domain
//! proposals -> merge/dedupe -> DAG validation -> weakest-edge cycle repair
//! -> multi-source depth computation -> statistics.
//!
//! A cyclic prerequisite graph is never acceptable as an output: with repair
//! disabled a detected cycle fails the build, and no partial graph is
//! published.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::GraphBuildError;
use crate::repo::GraphStore;
use crate::types::{Concept, EdgeSource, PrerequisiteEdge, RelationshipKind};

/// Strength tiers by similarity band.
const SIMILARITY_STRENGTH_HIGH: f64 = 0.9;
const SIMILARITY_STRENGTH_MID: f64 = 0.7;
const SIMILARITY_STRENGTH_LOW: f64 = 0.5;

/// Cross-domain proposals outside this band are clamped into it.
const CROSS_DOMAIN_MIN_STRENGTH: f64 = 0.5;
const CROSS_DOMAIN_MAX_STRENGTH: f64 = 0.8;

/// Build-quality bands checked by the statistics pass.
const EXPECTED_PREREQS_MIN: f64 = 2.0;
const EXPECTED_PREREQS_MAX: f64 = 5.0;
const EXPECTED_MAX_DEPTH: u32 = 10;

/// Precomputed pairwise semantic similarity, supplied by the caller
/// (embedding generation is outside this crate).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityPair {
    pub a: String,
    pub b: String,
    pub score: f64,
}

/// Optional external reasoning step proposing helpful cross-domain edges.
/// The builder clamps strengths and forces the helpful kind on whatever it
/// returns.
pub trait CrossDomainProposer {
    fn propose(&self, concepts: &[Concept]) -> Vec<PrerequisiteEdge>;
}

#[derive(Debug, Clone)]
pub struct BuildInput {
    pub course_id: String,
    pub concepts: Vec<Concept>,
    pub similarities: Vec<SimilarityPair>,
}

pub struct BuildOptions<'a> {
    pub enable_cycle_repair: bool,
    pub cross_domain: Option<&'a dyn CrossDomainProposer>,
}

impl Default for BuildOptions<'_> {
    fn default() -> Self {
        Self { enable_cycle_repair: true, cross_domain: None }
    }
}

impl<'a> BuildOptions<'a> {
    /// Repair behavior taken from the engine config; no cross-domain
    /// proposer.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self { enable_cycle_repair: config.enable_cycle_repair, cross_domain: None }
    }

    pub fn with_cross_domain(mut self, proposer: &'a dyn CrossDomainProposer) -> Self {
        self.cross_domain = Some(proposer);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStatistics {
    pub node_count: usize,
    pub edge_count: usize,
    pub avg_prerequisites: f64,
    pub max_prerequisites: usize,
    pub avg_dependents: f64,
    pub max_dependents: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub orphan_count: usize,
    pub longest_path: u32,
    pub edges_by_source: HashMap<String, usize>,
    pub edges_by_kind: HashMap<String, usize>,
    pub warnings: Vec<String>,
}

/// Output of a successful build: acyclic by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedGraph {
    pub course_id: String,
    pub concepts: Vec<Concept>,
    pub edges: Vec<PrerequisiteEdge>,
    pub depths: HashMap<String, u32>,
    pub stats: GraphStatistics,
    pub built_at: DateTime<Utc>,
}

pub fn build(input: &BuildInput, options: &BuildOptions<'_>, config: &EngineConfig) -> Result<ValidatedGraph, GraphBuildError> {
    let known_ids: HashSet<&str> = input.concepts.iter().map(|c| c.id.as_str()).collect();

    let mut edges = infer_hierarchy_edges(&input.concepts, config);
    edges.extend(infer_similarity_edges(&input.concepts, &input.similarities, config));
    if let Some(proposer) = options.cross_domain {
        edges.extend(sanitize_cross_domain(proposer.propose(&input.concepts), &known_ids));
    }

    let mut edges = merge_edges(edges);
    debug!(course_id = %input.course_id, edges = edges.len(), "inference complete");

    if topological_order(&known_ids, &edges).is_none() {
        if !options.enable_cycle_repair {
            let cycle = find_cycle(&known_ids, &edges).unwrap_or_default();
            return Err(GraphBuildError::CycleDetected(cycle));
        }
        repair_cycles(&known_ids, &mut edges)?;
    }

    let order = topological_order(&known_ids, &edges)
        .ok_or_else(|| GraphBuildError::CycleDetected(find_cycle(&known_ids, &edges).unwrap_or_default()))?;

    let depths = compute_depths(&known_ids, &edges);
    let stats = compute_statistics(&input.concepts, &edges, &depths, &order);
    for warning in &stats.warnings {
        warn!(course_id = %input.course_id, "{warning}");
    }

    let mut concepts = input.concepts.clone();
    for concept in &mut concepts {
        concept.depth = depths.get(&concept.id).copied().unwrap_or(0);
    }

    info!(
        course_id = %input.course_id,
        nodes = stats.node_count,
        edges = stats.edge_count,
        roots = stats.root_count,
        longest_path = stats.longest_path,
        "prerequisite graph built"
    );

    Ok(ValidatedGraph {
        course_id: input.course_id.clone(),
        concepts,
        edges,
        depths,
        stats,
        built_at: Utc::now(),
    })
}

/// Build, then hand the result to the persistence layer in one bulk replace
/// plus one depth update. A later run for the same course overwrites.
pub async fn build_and_store<S: GraphStore>(
    store: &S,
    input: &BuildInput,
    options: &BuildOptions<'_>,
    config: &EngineConfig,
) -> Result<ValidatedGraph, GraphBuildError> {
    let graph = build(input, options, config)?;
    store.replace_edges(&graph.course_id, &graph.edges).await?;
    store.update_depths(&graph.course_id, &graph.depths).await?;
    Ok(graph)
}

/// Section "3.2.1" makes every concept of section "3.2" a required
/// prerequisite, at a fixed high strength, self-loops excluded.
fn infer_hierarchy_edges(concepts: &[Concept], config: &EngineConfig) -> Vec<PrerequisiteEdge> {
    let mut by_section: HashMap<&str, Vec<&Concept>> = HashMap::new();
    for concept in concepts {
        if let Some(section) = concept.section.as_deref() {
            by_section.entry(section).or_default().push(concept);
        }
    }

    let mut edges = Vec::new();
    for concept in concepts {
        let Some(section) = concept.section.as_deref() else { continue };
        let Some(parent) = parent_section(section) else { continue };
        let Some(parents) = by_section.get(parent) else { continue };
        for parent_concept in parents {
            if parent_concept.id == concept.id {
                continue;
            }
            edges.push(PrerequisiteEdge {
                concept_id: concept.id.clone(),
                prerequisite_id: parent_concept.id.clone(),
                strength: config.hierarchy_strength,
                kind: RelationshipKind::Required,
                source: EdgeSource::Hierarchy,
            });
        }
    }
    edges
}

fn parent_section(section: &str) -> Option<&str> {
    section.rfind('.').map(|idx| &section[..idx])
}

/// For similar pairs with a clear difficulty gap, the easier concept becomes
/// a related prerequisite of the harder one; strength is tiered by band.
fn infer_similarity_edges(
    concepts: &[Concept],
    similarities: &[SimilarityPair],
    config: &EngineConfig,
) -> Vec<PrerequisiteEdge> {
    let by_id: HashMap<&str, &Concept> = concepts.iter().map(|c| (c.id.as_str(), c)).collect();

    let mut edges = Vec::new();
    for pair in similarities {
        if pair.score < config.similarity_threshold {
            continue;
        }
        let (Some(a), Some(b)) = (by_id.get(pair.a.as_str()), by_id.get(pair.b.as_str())) else {
            continue;
        };
        if a.id == b.id {
            continue;
        }
        if (a.difficulty - b.difficulty).abs() <= config.min_difficulty_delta {
            continue;
        }
        let (easier, harder) = if a.difficulty < b.difficulty { (a, b) } else { (b, a) };
        edges.push(PrerequisiteEdge {
            concept_id: harder.id.clone(),
            prerequisite_id: easier.id.clone(),
            strength: similarity_strength(pair.score),
            kind: RelationshipKind::Related,
            source: EdgeSource::Similarity,
        });
    }
    edges
}

fn similarity_strength(score: f64) -> f64 {
    if score >= 0.9 {
        SIMILARITY_STRENGTH_HIGH
    } else if score >= 0.8 {
        SIMILARITY_STRENGTH_MID
    } else {
        SIMILARITY_STRENGTH_LOW
    }
}

fn sanitize_cross_domain(proposals: Vec<PrerequisiteEdge>, known_ids: &HashSet<&str>) -> Vec<PrerequisiteEdge> {
    proposals
        .into_iter()
        .filter(|e| {
            e.concept_id != e.prerequisite_id
                && known_ids.contains(e.concept_id.as_str())
                && known_ids.contains(e.prerequisite_id.as_str())
        })
        .map(|mut e| {
            e.kind = RelationshipKind::Helpful;
            e.source = EdgeSource::CrossDomain;
            e.strength = e.strength.clamp(CROSS_DOMAIN_MIN_STRENGTH, CROSS_DOMAIN_MAX_STRENGTH);
            e
        })
        .collect()
}

/// Duplicate (concept, prerequisite) pairs keep the strongest edge.
fn merge_edges(edges: Vec<PrerequisiteEdge>) -> Vec<PrerequisiteEdge> {
    let mut merged: HashMap<(String, String), PrerequisiteEdge> = HashMap::new();
    for edge in edges {
        let key = (edge.concept_id.clone(), edge.prerequisite_id.clone());
        match merged.get(&key) {
            Some(existing) if existing.strength >= edge.strength => {}
            _ => {
                merged.insert(key, edge);
            }
        }
    }
    let mut out: Vec<PrerequisiteEdge> = merged.into_values().collect();
    // Deterministic output independent of hash order.
    out.sort_by(|x, y| {
        x.concept_id
            .cmp(&y.concept_id)
            .then_with(|| x.prerequisite_id.cmp(&y.prerequisite_id))
    });
    out
}

/// Kahn's algorithm over the prerequisite -> dependent direction. `None`
/// means a cycle exists.
fn topological_order(nodes: &HashSet<&str>, edges: &[PrerequisiteEdge]) -> Option<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = nodes.iter().map(|&n| (n, 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        *in_degree.entry(edge.concept_id.as_str()).or_insert(0) += 1;
        dependents
            .entry(edge.prerequisite_id.as_str())
            .or_default()
            .push(edge.concept_id.as_str());
    }

    let mut queue: VecDeque<&str> = {
        let mut roots: Vec<&str> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&n, _)| n)
            .collect();
        roots.sort_unstable();
        roots.into_iter().collect()
    };

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(node) = queue.pop_front() {
        order.push(node.to_string());
        if let Some(deps) = dependents.get(node) {
            for &dep in deps {
                if let Some(degree) = in_degree.get_mut(dep) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dep);
                    }
                }
            }
        }
    }

    (order.len() == nodes.len()).then_some(order)
}

/// One cycle as an ordered node list, where each node's successor in the
/// list is one of its prerequisites (wrapping around).
fn find_cycle(nodes: &HashSet<&str>, edges: &[PrerequisiteEdge]) -> Option<Vec<String>> {
    let mut prereqs: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        prereqs
            .entry(edge.concept_id.as_str())
            .or_default()
            .push(edge.prerequisite_id.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit<'a>(
        node: &'a str,
        prereqs: &HashMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        colors.insert(node, Color::Gray);
        path.push(node);
        for &next in prereqs.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            match colors.get(next).copied().unwrap_or(Color::White) {
                Color::Gray => {
                    let start = path.iter().position(|&n| n == next).unwrap_or(0);
                    return Some(path[start..].iter().map(|n| n.to_string()).collect());
                }
                Color::White => {
                    if let Some(cycle) = visit(next, prereqs, colors, path) {
                        return Some(cycle);
                    }
                }
                Color::Black => {}
            }
        }
        path.pop();
        colors.insert(node, Color::Black);
        None
    }

    let mut colors: HashMap<&str, Color> = HashMap::new();
    let mut sorted: Vec<&str> = nodes.iter().copied().collect();
    sorted.sort_unstable();
    for node in sorted {
        if colors.get(node).copied().unwrap_or(Color::White) == Color::White {
            let mut path = Vec::new();
            if let Some(cycle) = visit(node, &prereqs, &mut colors, &mut path) {
                return Some(cycle);
            }
        }
    }
    None
}

/// Repeatedly remove the weakest edge of one found cycle. Terminates in at
/// most |edges| iterations; fails if a cycle somehow survives.
fn repair_cycles(nodes: &HashSet<&str>, edges: &mut Vec<PrerequisiteEdge>) -> Result<(), GraphBuildError> {
    let max_iterations = edges.len();
    for _ in 0..max_iterations {
        let Some(cycle) = find_cycle(nodes, edges) else {
            return Ok(());
        };

        let mut weakest: Option<usize> = None;
        for i in 0..cycle.len() {
            let concept = &cycle[i];
            let prerequisite = &cycle[(i + 1) % cycle.len()];
            if let Some(idx) = edges
                .iter()
                .position(|e| &e.concept_id == concept && &e.prerequisite_id == prerequisite)
            {
                let replace = match weakest {
                    Some(best) => edges[idx].strength < edges[best].strength,
                    None => true,
                };
                if replace {
                    weakest = Some(idx);
                }
            }
        }

        let Some(idx) = weakest else {
            return Err(GraphBuildError::CycleDetected(cycle));
        };
        let removed = edges.remove(idx);
        warn!(
            concept = %removed.concept_id,
            prerequisite = %removed.prerequisite_id,
            strength = removed.strength,
            "removed weakest edge to break prerequisite cycle"
        );
    }

    match find_cycle(nodes, edges) {
        None => Ok(()),
        Some(cycle) => Err(GraphBuildError::CycleDetected(cycle)),
    }
}

/// Roots are concepts with no prerequisites; each depth is the minimum BFS
/// distance from any root. Unreachable concepts default to 0.
fn compute_depths(nodes: &HashSet<&str>, edges: &[PrerequisiteEdge]) -> HashMap<String, u32> {
    let mut has_prereq: HashSet<&str> = HashSet::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        has_prereq.insert(edge.concept_id.as_str());
        dependents
            .entry(edge.prerequisite_id.as_str())
            .or_default()
            .push(edge.concept_id.as_str());
    }

    let mut depths: HashMap<String, u32> = HashMap::new();
    let mut queue: VecDeque<(&str, u32)> = VecDeque::new();
    for &node in nodes {
        if !has_prereq.contains(node) {
            depths.insert(node.to_string(), 0);
            queue.push_back((node, 0));
        }
    }

    while let Some((node, depth)) = queue.pop_front() {
        if let Some(deps) = dependents.get(node) {
            for &dep in deps {
                if !depths.contains_key(dep) {
                    depths.insert(dep.to_string(), depth + 1);
                    queue.push_back((dep, depth + 1));
                }
            }
        }
    }

    for &node in nodes {
        depths.entry(node.to_string()).or_insert(0);
    }
    depths
}

fn compute_statistics(
    concepts: &[Concept],
    edges: &[PrerequisiteEdge],
    depths: &HashMap<String, u32>,
    topo_order: &[String],
) -> GraphStatistics {
    let node_count = concepts.len();
    let edge_count = edges.len();

    let mut prereq_counts: HashMap<&str, usize> = HashMap::new();
    let mut dependent_counts: HashMap<&str, usize> = HashMap::new();
    let mut edges_by_source: HashMap<String, usize> = HashMap::new();
    let mut edges_by_kind: HashMap<String, usize> = HashMap::new();
    for edge in edges {
        *prereq_counts.entry(edge.concept_id.as_str()).or_insert(0) += 1;
        *dependent_counts.entry(edge.prerequisite_id.as_str()).or_insert(0) += 1;
        *edges_by_source.entry(edge.source.as_str().to_string()).or_insert(0) += 1;
        *edges_by_kind.entry(edge.kind.as_str().to_string()).or_insert(0) += 1;
    }

    let root_count = concepts.iter().filter(|c| !prereq_counts.contains_key(c.id.as_str())).count();
    let leaf_count = concepts.iter().filter(|c| !dependent_counts.contains_key(c.id.as_str())).count();
    let orphan_count = concepts
        .iter()
        .filter(|c| !prereq_counts.contains_key(c.id.as_str()) && !dependent_counts.contains_key(c.id.as_str()))
        .count();

    let avg_prerequisites = if node_count > 0 { edge_count as f64 / node_count as f64 } else { 0.0 };
    let max_prerequisites = prereq_counts.values().copied().max().unwrap_or(0);
    let avg_dependents = avg_prerequisites;
    let max_dependents = dependent_counts.values().copied().max().unwrap_or(0);

    let longest_path = longest_path_length(edges, topo_order);
    let max_depth = depths.values().copied().max().unwrap_or(0);

    let mut warnings = Vec::new();
    if node_count > 0 && !(EXPECTED_PREREQS_MIN..=EXPECTED_PREREQS_MAX).contains(&avg_prerequisites) {
        warnings.push(format!(
            "average prerequisites per concept {avg_prerequisites:.2} outside expected band {EXPECTED_PREREQS_MIN}-{EXPECTED_PREREQS_MAX}"
        ));
    }
    if max_depth > EXPECTED_MAX_DEPTH {
        warnings.push(format!("max prerequisite depth {max_depth} exceeds expected limit {EXPECTED_MAX_DEPTH}"));
    }

    GraphStatistics {
        node_count,
        edge_count,
        avg_prerequisites,
        max_prerequisites,
        avg_dependents,
        max_dependents,
        root_count,
        leaf_count,
        orphan_count,
        longest_path,
        edges_by_source,
        edges_by_kind,
        warnings,
    }
}

/// Longest chain (in edges) through the DAG, via DP in topological order.
fn longest_path_length(edges: &[PrerequisiteEdge], topo_order: &[String]) -> u32 {
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        dependents
            .entry(edge.prerequisite_id.as_str())
            .or_default()
            .push(edge.concept_id.as_str());
    }

    let mut dist: HashMap<&str, u32> = topo_order.iter().map(|n| (n.as_str(), 0)).collect();
    let mut longest = 0;
    for node in topo_order {
        let d = dist.get(node.as_str()).copied().unwrap_or(0);
        if let Some(deps) = dependents.get(node.as_str()) {
            for &dep in deps {
                let entry = dist.entry(dep).or_insert(0);
                if d + 1 > *entry {
                    *entry = d + 1;
                    longest = longest.max(d + 1);
                }
            }
        }
    }
    longest
}
