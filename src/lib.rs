//! Concept mastery engine.
//!
//! Tracks a learner's probabilistic mastery of discrete concepts as Beta
//! beliefs, selects the next question by expected information gain, and
//! maintains a validated prerequisite DAG consumed by both the selector and
//! the mastery gate.
//!
//! Persistence, HTTP and auth live in the calling service; this crate only
//! depends on the repository traits in [`repo`].

pub mod bayes;
pub mod config;
pub mod error;
pub mod gate;
pub mod graph;
pub mod logging;
pub mod repo;
pub mod selection;
pub mod types;

pub use config::EngineConfig;
pub use error::{GateError, GraphBuildError, SelectionError};
pub use gate::{BulkGateResult, GateResult, PrerequisiteStatus};
pub use graph::builder::{BuildInput, BuildOptions, ValidatedGraph};
pub use graph::cache::GraphCache;
pub use selection::{SelectedQuestion, SelectionInput};
pub use types::{BeliefState, Concept, PrerequisiteEdge, Question, SelectionStrategy};
