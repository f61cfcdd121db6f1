//! # Learning Configuration
//!
//! Configuration structures controlling HMM training: covariance structure, transition
//! constraints, regularization and the convergence test of the EM loop.

use crate::errors::{validate_parameter, ModelError, ModelResult};
use nalgebra::DMatrix;
use std::ops::Range;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Shape of the per-state covariance matrices estimated by EM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CovarianceType {
    /// Full symmetric covariance
    #[default]
    Full,
    /// Off-diagonal entries forced to zero after every M-step
    Diag,
    /// Single shared variance per state. Not implemented.
    Spherical,
}

/// Structural constraint on the transition matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TransitionStructure {
    /// Any transition allowed
    #[default]
    Free,
    /// Only `i -> i` and `i -> i+1`
    LeftToRight,
    /// Left-to-right plus the wrap-around `last -> 0`
    Loop,
}

impl TransitionStructure {
    /// Binary mask of permitted transitions, or `None` when unconstrained.
    pub fn mask(&self, nb_states: usize) -> Option<DMatrix<f64>> {
        match self {
            TransitionStructure::Free => None,
            TransitionStructure::LeftToRight | TransitionStructure::Loop => {
                let mut mask = DMatrix::identity(nb_states, nb_states);
                for i in 0..nb_states.saturating_sub(1) {
                    mask[(i, i + 1)] = 1.0;
                }
                if *self == TransitionStructure::Loop && nb_states > 1 {
                    mask[(nb_states - 1, 0)] = 1.0;
                }
                Some(mask)
            }
        }
    }
}

/// Regularization added to each covariance before inversion.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Regularization {
    /// `reg * I`
    Scalar(f64),
    /// `diag(reg)`, one value per dimension
    PerDimension(Vec<f64>),
    /// Added as-is
    Matrix(DMatrix<f64>),
}

impl Default for Regularization {
    fn default() -> Self {
        Regularization::Scalar(1e-8)
    }
}

impl Regularization {
    /// Materializes the regularization as an `nb_dim x nb_dim` matrix.
    pub fn to_matrix(&self, nb_dim: usize) -> ModelResult<DMatrix<f64>> {
        match self {
            Regularization::Scalar(r) => Ok(DMatrix::identity(nb_dim, nb_dim) * *r),
            Regularization::PerDimension(v) => {
                if v.len() != nb_dim {
                    return Err(ModelError::dimension("per-dimension regularization", nb_dim, v.len()));
                }
                Ok(DMatrix::from_diagonal(&nalgebra::DVector::from_column_slice(v)))
            }
            Regularization::Matrix(m) => {
                if m.nrows() != nb_dim || m.ncols() != nb_dim {
                    return Err(ModelError::dimension("regularization matrix", nb_dim, m.nrows()));
                }
                Ok(m.clone())
            }
        }
    }
}

/// One block of mutually dependent dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DependencyBlock {
    /// Contiguous range of dimensions
    Range(Range<usize>),
    /// Explicit list of dimensions
    Indices(Vec<usize>),
}

impl DependencyBlock {
    /// Dimensions covered by this block, in order.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            DependencyBlock::Range(r) => r.clone().collect(),
            DependencyBlock::Indices(v) => v.clone(),
        }
    }
}

/// Binary `nb_dim x nb_dim` mask that is 1 inside each dependency block and 0 elsewhere.
///
/// Blocks must not overlap and must stay within `nb_dim`.
pub fn dependency_mask(dep: &[DependencyBlock], nb_dim: usize) -> ModelResult<DMatrix<f64>> {
    let mut seen = vec![false; nb_dim];
    let mut mask = DMatrix::zeros(nb_dim, nb_dim);
    for block in dep {
        let idx = block.indices();
        for &i in &idx {
            if i >= nb_dim {
                return Err(ModelError::InvalidParameter {
                    parameter: "dep".to_string(),
                    value: i as f64,
                    constraint: format!("dimension index < {}", nb_dim),
                });
            }
            if seen[i] {
                return Err(ModelError::InvalidParameter {
                    parameter: "dep".to_string(),
                    value: i as f64,
                    constraint: "dependency blocks must not overlap".to_string(),
                });
            }
            seen[i] = true;
        }
        for &i in &idx {
            for &j in &idx {
                mask[(i, j)] = 1.0;
            }
        }
    }
    Ok(mask)
}

/// Configuration of the Expectation-Maximization loop.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmConfig {
    /// Block-diagonal dependency structure of the covariances
    pub dep: Option<Vec<DependencyBlock>>,
    /// Explicit covariance mask, used when `dep` is not given
    pub dep_mask: Option<DMatrix<f64>>,
    /// Regularization added in the M-step
    pub reg: Regularization,
    /// Covariance shape
    pub cov_type: CovarianceType,
    /// Transition constraint
    pub structure: TransitionStructure,
    /// Self-transition probability used by the left-to-right initialization
    pub self_trans: f64,
    /// Additive smoothing of the transition matrix before renormalization
    pub trans_reg: Option<f64>,
    /// Freeze means and covariances; only priors and transitions are learned
    pub obs_fixed: bool,
    /// Recompute covariances without regularization once converged
    pub end_cov: bool,
    /// Regularization applied to the end-of-training covariances; implies `end_cov`
    pub reg_finish: Option<Regularization>,
    /// Iteration budget
    pub nb_max_steps: usize,
    /// Minimum number of iterations before the convergence test applies
    pub nb_min_steps: usize,
    /// Log-likelihood increase under which EM is considered converged
    pub max_diff_ll: f64,
    /// Run the per-demonstration E-step on the rayon pool
    pub parallel: bool,
    /// Seed for random initialization
    pub seed: u64,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            dep: None,
            dep_mask: None,
            reg: Regularization::default(),
            cov_type: CovarianceType::Full,
            structure: TransitionStructure::Free,
            self_trans: 0.9,
            trans_reg: None,
            obs_fixed: false,
            end_cov: false,
            reg_finish: None,
            nb_max_steps: 40,
            nb_min_steps: 2,
            max_diff_ll: 1e-4,
            parallel: true,
            seed: 42,
        }
    }
}

impl EmConfig {
    /// Left-to-right model with the given self-transition probability.
    pub fn left_to_right(self_trans: f64) -> Self {
        Self {
            structure: TransitionStructure::LeftToRight,
            self_trans,
            ..Self::default()
        }
    }

    /// Cyclic model: left-to-right plus the transition from the last state back to the first.
    pub fn looped() -> Self {
        Self {
            structure: TransitionStructure::Loop,
            ..Self::default()
        }
    }

    /// Sets the dependency blocks.
    pub fn with_dep(mut self, dep: Vec<DependencyBlock>) -> Self {
        self.dep = Some(dep);
        self
    }

    /// Sets the regularization.
    pub fn with_reg(mut self, reg: Regularization) -> Self {
        self.reg = reg;
        self
    }

    /// Sets the covariance shape.
    pub fn with_cov_type(mut self, cov_type: CovarianceType) -> Self {
        self.cov_type = cov_type;
        self
    }

    /// Sets the iteration budget.
    pub fn with_max_steps(mut self, nb_max_steps: usize) -> Self {
        self.nb_max_steps = nb_max_steps;
        self
    }

    /// Sets the transition smoothing.
    pub fn with_trans_reg(mut self, trans_reg: f64) -> Self {
        self.trans_reg = Some(trans_reg);
        self
    }

    /// Freezes the emission parameters.
    pub fn with_obs_fixed(mut self) -> Self {
        self.obs_fixed = true;
        self
    }

    /// Recomputes unregularized covariances at convergence, optionally adding `reg_finish`.
    pub fn with_end_cov(mut self, reg_finish: Option<Regularization>) -> Self {
        self.end_cov = true;
        self.reg_finish = reg_finish;
        self
    }

    /// Sets the random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Runs the E-step sequentially.
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Whether covariances are recomputed at convergence.
    pub fn recompute_end_covariance(&self) -> bool {
        self.end_cov || self.reg_finish.is_some()
    }

    /// Checks the configuration against the data dimensionality.
    pub fn validate(&self, nb_dim: usize) -> ModelResult<()> {
        if self.cov_type == CovarianceType::Spherical {
            return Err(ModelError::NotImplemented {
                feature: "spherical covariance".to_string(),
            });
        }
        validate_parameter(self.self_trans, 0.0, 1.0, "self_trans")?;
        if let Some(t) = self.trans_reg {
            validate_parameter(t, 0.0, f64::INFINITY, "trans_reg")?;
        }
        if self.nb_max_steps == 0 {
            return Err(ModelError::InvalidParameter {
                parameter: "nb_max_steps".to_string(),
                value: 0.0,
                constraint: "at least one iteration".to_string(),
            });
        }
        self.reg.to_matrix(nb_dim)?;
        if let Some(reg) = &self.reg_finish {
            reg.to_matrix(nb_dim)?;
        }
        if let Some(dep) = &self.dep {
            dependency_mask(dep, nb_dim)?;
        }
        if let Some(mask) = &self.dep_mask {
            if mask.nrows() != nb_dim || mask.ncols() != nb_dim {
                return Err(ModelError::dimension("dependency mask", nb_dim, mask.nrows()));
            }
        }
        Ok(())
    }

    /// Covariance mask resolved from `dep` or `dep_mask`.
    pub fn resolved_mask(&self, nb_dim: usize) -> ModelResult<Option<DMatrix<f64>>> {
        match (&self.dep, &self.dep_mask) {
            (Some(dep), _) => dependency_mask(dep, nb_dim).map(Some),
            (None, Some(mask)) => Ok(Some(mask.clone())),
            (None, None) => Ok(None),
        }
    }
}
