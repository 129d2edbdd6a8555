use crate::repo::RepoError;

/// Selection pool exhaustion. Callers routinely branch on the reason, so this
/// is returned as an error value rather than folded into a panic path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("no questions available for knowledge area {0}")]
    KnowledgeAreaExhausted(String),
    #[error("no eligible questions after filtering")]
    NoEligibleQuestions,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphBuildError {
    /// A cycle survived validation. Fatal: no partial graph is published.
    #[error("prerequisite cycle could not be resolved: {0:?}")]
    CycleDetected(Vec<String>),
    #[error("graph store error: {0}")]
    Store(#[from] RepoError),
}

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("concept not found in graph snapshot: {0}")]
    ConceptNotFound(String),
    #[error("graph cache has no loaded snapshot")]
    SnapshotNotLoaded,
    #[error("repository error: {0}")]
    Repo(#[from] RepoError),
}
