//! Beta-distribution entropy and expected information gain.
//!
//! H(a,b) = lnB(a,b) - (a-1)ψ(a) - (b-1)ψ(b) + (a+b-2)ψ(a+b)
//!
//! The digamma ψ is computed by applying the recurrence ψ(x) = ψ(x+1) - 1/x
//! until x >= 6, then the asymptotic expansion. Naive log approximations at
//! small (a,b) — the common case early in a user's history when a = b = 1 —
//! give materially wrong entropy and destabilize selection.

use super::update::{predicted_correct_probability, simulate_update};

/// ln(Γ(x)) via recurrence into the Stirling regime plus Bernoulli
/// corrections. Accurate to double precision for x > 0.
pub fn ln_gamma(x: f64) -> f64 {
    if x <= 0.0 {
        return f64::INFINITY;
    }

    let mut x = x;
    let mut result = 0.0;
    while x < 10.0 {
        result -= x.ln();
        x += 1.0;
    }

    let inv_x = 1.0 / x;
    let inv_x2 = inv_x * inv_x;
    let correction = inv_x * (1.0 / 12.0 - inv_x2 * (1.0 / 360.0 - inv_x2 / 1260.0));

    result + (x - 0.5) * x.ln() - x + 0.5 * (2.0 * std::f64::consts::PI).ln() + correction
}

/// ln(B(a,b)) = ln(Γ(a)) + ln(Γ(b)) - ln(Γ(a+b)).
pub fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

/// Digamma ψ(x): recurrence below 6, then the asymptotic expansion
/// ln(x) - 1/(2x) - 1/(12x²) + 1/(120x⁴) - 1/(252x⁶).
pub fn digamma(x: f64) -> f64 {
    if x <= 0.0 {
        return f64::NAN;
    }

    let mut result = 0.0;
    let mut x = x;
    while x < 6.0 {
        result -= 1.0 / x;
        x += 1.0;
    }

    let inv_x = 1.0 / x;
    let inv_x2 = inv_x * inv_x;

    result + x.ln() - 0.5 * inv_x - inv_x2 / 12.0 + inv_x2 * inv_x2 / 120.0
        - inv_x2 * inv_x2 * inv_x2 / 252.0
}

/// Differential entropy of Beta(a,b). Maximal at the uninformative
/// Beta(1,1), where it is exactly zero; every informative belief is below.
pub fn beta_entropy(alpha: f64, beta: f64) -> f64 {
    ln_beta(alpha, beta)
        - (alpha - 1.0) * digamma(alpha)
        - (beta - 1.0) * digamma(beta)
        + (alpha + beta - 2.0) * digamma(alpha + beta)
}

/// Expected reduction in summed belief entropy from asking a question that
/// tests the given (alpha, beta) pairs under measurement model (slip, guess).
///
/// The predicted P(correct) aggregates mastery by averaging the means across
/// the tested concepts; each concept's posterior is then simulated
/// independently under both outcomes.
pub fn expected_information_gain(params: &[(f64, f64)], slip: f64, guess: f64) -> f64 {
    if params.is_empty() {
        return 0.0;
    }

    let current_entropy: f64 = params.iter().map(|&(a, b)| beta_entropy(a, b)).sum();

    let mean_mastery: f64 =
        params.iter().map(|&(a, b)| a / (a + b)).sum::<f64>() / params.len() as f64;
    let p_correct = predicted_correct_probability(mean_mastery, slip, guess).clamp(0.0, 1.0);
    let p_incorrect = 1.0 - p_correct;

    let mut entropy_if_correct = 0.0;
    let mut entropy_if_incorrect = 0.0;
    for &(a, b) in params {
        let (ca, cb) = simulate_update(a, b, true, slip, guess);
        entropy_if_correct += beta_entropy(ca, cb);
        let (ia, ib) = simulate_update(a, b, false, slip, guess);
        entropy_if_incorrect += beta_entropy(ia, ib);
    }

    let expected_posterior_entropy = p_correct * entropy_if_correct + p_incorrect * entropy_if_incorrect;
    current_entropy - expected_posterior_entropy
}

/// Mean entropy over the concepts that have a belief. Concepts without one
/// contribute nothing and shrink the divisor; with no beliefs at all the
/// metric is zero.
pub fn average_uncertainty(params: &[(f64, f64)]) -> f64 {
    if params.is_empty() {
        return 0.0;
    }
    params.iter().map(|&(a, b)| beta_entropy(a, b)).sum::<f64>() / params.len() as f64
}
