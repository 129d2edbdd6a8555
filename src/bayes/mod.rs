//! Bayesian belief machinery: the slip/guess update rule and the Beta
//! entropy / information-gain numerics. Everything here is pure and
//! allocation-light; safe to call from any number of concurrent requests.

pub mod entropy;
pub mod update;

pub use entropy::{average_uncertainty, beta_entropy, expected_information_gain};
pub use update::{apply_update, posterior_mastery, predicted_correct_probability, AnswerHistory};
