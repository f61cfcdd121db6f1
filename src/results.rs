//! # Result Structures
//!
//! Outputs of learning and control: the EM report, information criteria for choosing the
//! number of states, and LQR rollouts.

use crate::{config::CovarianceType, hmm_core::Hmm};
use nalgebra::DVector;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of an Expectation-Maximization run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmReport {
    /// Whether the log-likelihood increase fell under the threshold within the budget
    pub converged: bool,
    /// Number of iterations performed
    pub iterations: usize,
    /// Average log-likelihood per demonstration, one entry per iteration
    pub log_likelihoods: Vec<f64>,
    /// Last recorded average log-likelihood
    pub final_log_likelihood: f64,
}

/// Model selection criteria
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelCriteria {
    /// Akaike Information Criterion
    pub aic: f64,
    /// Bayesian Information Criterion
    pub bic: f64,
    /// Hannan-Quinn Information Criterion
    pub hqic: f64,
    /// Number of free parameters
    pub num_parameters: usize,
}

impl ModelCriteria {
    /// Criteria of a trained HMM given its total log-likelihood over `nb_samples` frames.
    pub fn from_log_likelihood(
        log_likelihood: f64,
        hmm: &Hmm,
        cov_type: CovarianceType,
        nb_samples: usize,
    ) -> Self {
        let num_params = free_parameters(hmm.nb_states(), hmm.nb_dim(), cov_type);
        let k = num_params as f64;
        let n = nb_samples.max(1) as f64;

        let aic = -2.0 * log_likelihood + 2.0 * k;
        let bic = -2.0 * log_likelihood + k * n.ln();
        let hqic = -2.0 * log_likelihood + 2.0 * k * n.ln().max(1.0).ln();

        Self {
            aic,
            bic,
            hqic,
            num_parameters: num_params,
        }
    }
}

/// Free parameters of an HMM: initial distribution, transitions, means and covariances.
pub fn free_parameters(nb_states: usize, nb_dim: usize, cov_type: CovarianceType) -> usize {
    let cov = match cov_type {
        CovarianceType::Full => nb_dim * (nb_dim + 1) / 2,
        CovarianceType::Diag => nb_dim,
        CovarianceType::Spherical => 1,
    };
    nb_states.saturating_sub(1) + nb_states * nb_states.saturating_sub(1) + nb_states * (nb_dim + cov)
}

/// Simulated closed-loop trajectory.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rollout {
    /// States `x_0 .. x_{horizon-1}`
    pub states: Vec<DVector<f64>>,
    /// Controls `u_0 .. u_{horizon-2}`
    pub controls: Vec<DVector<f64>>,
    /// Tracked points `d_t`, present for the target-tracking rollout
    pub targets: Option<Vec<DVector<f64>>>,
}

impl Rollout {
    /// Largest absolute control component over the whole trajectory.
    pub fn max_abs_control(&self) -> f64 {
        self.controls
            .iter()
            .flat_map(|u| u.iter())
            .fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }
}
