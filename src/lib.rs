//! # Motion Primitives
//!
//! Learning movements from demonstrations and reproducing them with optimal control.
//!
//! This crate provides two engines. The first is a Hidden Markov Model with Gaussian
//! emissions, trained by Expectation-Maximization on a set of recorded demonstrations and
//! decoded either offline (Viterbi) or online (forward filtering). The second is a
//! finite-horizon LQR that tracks a sequence of Gaussian targets, solved either with the
//! backward Riccati recursion or as a product of Gaussians over the lifted control sequence.
//!
//! ## Key Features
//!
//! - **Gaussian HMM**: scaled forward-backward, block-diagonal dependency structures,
//!   marginal sub-models and left-to-right or cyclic transition constraints
//! - **Initialization**: random, time segmentation, k-means++ and inherited mixtures
//! - **Decoding**: Viterbi paths, an online filter and HMM-weighted mixture regression
//! - **Riccati LQR**: feedback and target-tracking rollouts
//! - **Lifted LQR**: dense or sparse solves with lazily cached results
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use motion_primitives::{EmConfig, Hmm};
//! use nalgebra::DMatrix;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let demos: Vec<DMatrix<f64>> = (0..3)
//!         .map(|k| DMatrix::from_fn(50, 2, |t, j| (t as f64 * 0.1 + k as f64 * 0.01) * (j + 1) as f64))
//!         .collect();
//!
//!     let mut hmm = Hmm::new(4, 2);
//!     let report = hmm.em(&demos, &EmConfig::left_to_right(0.9))?;
//!     println!("converged: {} after {} iterations", report.converged, report.iterations);
//!
//!     let path = hmm.viterbi(&demos[0], true)?;
//!     println!("state path: {:?}", path);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`Hmm`] owns its emission parameters as a [`GaussianMixture`]; learning, decoding and
//! regression are implemented on it in separate modules. Control problems are described
//! by a [`LinearSystem`] and per-step [`CostDistribution`]s, solved by [`RiccatiSolver`] or
//! [`PogLqr`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod linear_algebra;
pub mod math_utils;
pub mod results;

// Probabilistic models
pub mod decoding;
pub mod emission_models;
pub mod gaussian;
pub mod hmm_core;
pub mod learning;
pub mod mixture;
pub mod regression;

// Optimal control
pub mod lqr;
pub mod pog_lqr;
pub mod transfer;

// Re-exports for convenience - main public API
pub use config::{
    dependency_mask, CovarianceType, DependencyBlock, EmConfig, Regularization, TransitionStructure,
};
pub use errors::{ModelError, ModelResult};
pub use results::{EmReport, ModelCriteria, Rollout};

// Model exports
pub use decoding::OnlineFilter;
pub use emission_models::EmissionModel;
pub use gaussian::{Gaussian, GaussianPrecision, InformationForm};
pub use hmm_core::{Demonstration, Hmm, Messages, Observations};
pub use mixture::GaussianMixture;
pub use regression::VelocityPredictor;

// Control exports
pub use lqr::{ControlCost, CostDistribution, LinearSystem, RiccatiSolution, RiccatiSolver, TargetDistribution};
pub use pog_lqr::{Backend, LiftedCost, PogLqr};
pub use transfer::{lifted_transfer_matrix, lifted_transfer_matrix_sparse};
