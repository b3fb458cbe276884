//! Equilibrium price solver configuration and diagnostics.

use serde::{Deserialize, Serialize};

/// Configuration for the ζ-markup contraction that recovers equilibrium prices.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EquilibriumOptions {
    /// Tolerance applied to both the price step norm and the first-order-condition norm.
    pub tolerance: f64,
    /// Maximum number of iterations allowed before returning the last iterate.
    pub max_iterations: usize,
    /// Emit a progress line every `trace_interval` iterations.
    pub verbose: bool,
    /// Iteration spacing of verbose progress lines.
    pub trace_interval: usize,
    /// Turn a non-converged solve into an error instead of a best-effort result.
    pub require_convergence: bool,
}

impl Default for EquilibriumOptions {
    fn default() -> Self {
        Self {
            tolerance: f64::EPSILON.sqrt(),
            max_iterations: 10_000,
            verbose: false,
            trace_interval: 100,
            require_convergence: false,
        }
    }
}

impl EquilibriumOptions {
    /// Override the convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Override the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Enable or disable periodic progress logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Set how often verbose progress is logged.
    pub fn with_trace_interval(mut self, trace_interval: usize) -> Self {
        self.trace_interval = trace_interval.max(1);
        self
    }

    /// Fail with [`BlpError::EquilibriumDidNotConverge`](crate::error::BlpError::EquilibriumDidNotConverge)
    /// when the iteration cap is reached.
    pub fn with_required_convergence(mut self, require: bool) -> Self {
        self.require_convergence = require;
        self
    }
}

/// Diagnostics returned alongside solved prices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumSummary {
    /// Number of iterations performed.
    pub iterations: usize,
    /// `‖Λ (p − mc − ζ)‖` evaluated in the final iteration.
    pub focnorm: f64,
    /// `‖p − p_prev‖` of the final update.
    pub step_norm: f64,
    /// Whether both norms fell below the tolerance.
    pub converged: bool,
}
