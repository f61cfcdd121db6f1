//! Error types and validation functions for motion-primitive learning and control.
//!
//! Configuration problems (unset parameters, incompatible dimensions, unsupported cost
//! shapes) are reported immediately. Numerical failures that regularization cannot absorb
//! surface as [`ModelError::NumericalError`], and NaNs inside decoding are fatal
//! [`ModelError::InvariantViolation`]s. Non-convergence of EM is not an error; it is
//! reported through [`crate::results::EmReport`].

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Error types for HMM learning, decoding and LQR solving.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ModelError {
    /// Not enough observations for the requested operation.
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum required data points
        required: usize,
        /// Actual number of data points provided
        actual: usize,
    },

    /// Shapes of the model and the supplied data disagree.
    #[error("Dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Where the mismatch was detected
        context: String,
        /// Expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Invalid parameter value.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Numerical computation failed (factorization, NaN propagation, ...).
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },

    /// An invariant that decoding relies on was violated; the result would be meaningless.
    #[error("Invariant violated in {operation}: {reason}")]
    InvariantViolation {
        /// Operation that detected the violation
        operation: String,
        /// What went wrong
        reason: String,
    },

    /// A cost or target distribution has a shape the solver cannot use.
    #[error("Unsupported distribution for {role}: {reason}")]
    UnsupportedDistribution {
        /// Which distribution (state target, control cost, ...)
        role: String,
        /// Why it was rejected
        reason: String,
    },

    /// A required input was never set.
    #[error("Required input not set: {name}")]
    Unset {
        /// Name of the missing input
        name: String,
    },

    /// Feature not implemented.
    #[error("Feature not implemented: {feature}")]
    NotImplemented {
        /// Feature that is not implemented
        feature: String,
    },
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

impl ModelError {
    /// Shorthand for a [`ModelError::NumericalError`] tagged with its operation.
    pub fn numerical(reason: impl Into<String>, operation: &str) -> Self {
        ModelError::NumericalError {
            reason: reason.into(),
            operation: Some(operation.to_string()),
        }
    }

    /// Shorthand for a [`ModelError::DimensionMismatch`].
    pub fn dimension(context: &str, expected: usize, actual: usize) -> Self {
        ModelError::DimensionMismatch {
            context: context.to_string(),
            expected,
            actual,
        }
    }
}

/// Validates that a sequence has at least `min_required` time steps.
pub fn validate_data_length(len: usize, min_required: usize) -> ModelResult<()> {
    if len < min_required {
        Err(ModelError::InsufficientData {
            required: min_required,
            actual: len,
        })
    } else {
        Ok(())
    }
}

/// Validates that a parameter is within `[min, max]`.
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> ModelResult<()> {
    if value.is_nan() {
        return Err(ModelError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if value < min || value > max {
        Err(ModelError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that every entry of a matrix is finite.
///
/// Returns immediately on the first non-finite value, reporting its position.
pub fn validate_finite_matrix(m: &DMatrix<f64>, name: &str) -> ModelResult<()> {
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let value = m[(i, j)];
            if !value.is_finite() {
                return Err(ModelError::NumericalError {
                    reason: format!(
                        "{} contains non-finite value at [{},{}]: {}",
                        name, i, j, value
                    ),
                    operation: None,
                });
            }
        }
    }
    Ok(())
}

/// Validates that no entry of a matrix is NaN. Infinities are allowed.
pub fn validate_no_nan(m: &DMatrix<f64>, name: &str) -> ModelResult<()> {
    if let Some(pos) = m.iter().position(|v| v.is_nan()) {
        let (i, j) = (pos % m.nrows(), pos / m.nrows());
        return Err(ModelError::NumericalError {
            reason: format!("{} contains NaN at [{},{}]", name, i, j),
            operation: None,
        });
    }
    Ok(())
}

/// Validates that a vector is a probability distribution (non-negative, sums to 1).
pub fn validate_probability_vector(v: &DVector<f64>, tolerance: f64, name: &str) -> ModelResult<()> {
    if let Some(&bad) = v.iter().find(|&&p| !(p >= 0.0) || !p.is_finite()) {
        return Err(ModelError::InvalidParameter {
            parameter: name.to_string(),
            value: bad,
            constraint: "entries must be finite and non-negative".to_string(),
        });
    }
    let total = v.sum();
    if (total - 1.0).abs() > tolerance {
        return Err(ModelError::InvalidParameter {
            parameter: name.to_string(),
            value: total,
            constraint: "entries must sum to 1".to_string(),
        });
    }
    Ok(())
}

/// Validates that a matrix is square with side `n`.
pub fn validate_square(m: &DMatrix<f64>, n: usize, context: &str) -> ModelResult<()> {
    if m.nrows() != n {
        return Err(ModelError::dimension(context, n, m.nrows()));
    }
    if m.ncols() != n {
        return Err(ModelError::dimension(context, n, m.ncols()));
    }
    Ok(())
}
