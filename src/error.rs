use thiserror::Error;

/// Unified error type for `blpsim` operations.
#[derive(Debug, Error)]
pub enum BlpError {
    /// Raised when provided arrays or matrices have incompatible dimensions.
    #[error("dimension mismatch in {context}: expected {expected} but found {found}")]
    DimensionMismatch {
        /// Human-readable context describing the operation.
        context: &'static str,
        /// The required dimension, often the model-implied value.
        expected: usize,
        /// The dimension that was actually supplied.
        found: usize,
    },

    /// Raised when a scalar model parameter lies outside its admissible range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },

    /// Raised when linear algebra operations encounter a singular system.
    #[error("matrix in {context} is singular")]
    SingularMatrix { context: &'static str },

    /// Raised when numerical routines produce NaN or infinite values.
    #[error("encountered non-finite value during {context}")]
    NumericalError { context: &'static str },

    /// Raised when strict convergence was requested and the ζ-contraction hit its iteration cap.
    #[error(
        "equilibrium price contraction did not converge after {iterations} iterations \
         (focnorm {focnorm}, step {step_norm})"
    )]
    EquilibriumDidNotConverge {
        /// Number of iterations performed before termination.
        iterations: usize,
        /// Norm of the first-order-condition residual at the last iterate.
        focnorm: f64,
        /// Norm of the last price update.
        step_norm: f64,
    },

    /// Raised when truncated taste draws cannot satisfy the negative price coefficient restriction.
    #[error("could not draw a negative price coefficient after {attempts} attempts")]
    InfeasibleTasteDraws { attempts: usize },
}

impl BlpError {
    /// Helper to format a [`DimensionMismatch`](BlpError::DimensionMismatch) error.
    pub fn dimension_mismatch(context: &'static str, expected: usize, found: usize) -> Self {
        Self::DimensionMismatch {
            context,
            expected,
            found,
        }
    }

    /// Helper to raise when a matrix factorization fails due to singularity.
    pub fn singular(context: &'static str) -> Self {
        Self::SingularMatrix { context }
    }

    /// Helper for rejecting out-of-range parameters.
    pub fn invalid_parameter(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Type alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, BlpError>;
