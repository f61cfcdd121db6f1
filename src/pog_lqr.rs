//! LQR as a product of Gaussians over the lifted control sequence.
//!
//! The state target over the whole horizon is pulled back through the lifted transfer
//! matrices onto the control sequence and fused with the control cost. Every derived
//! artifact is computed on first read and kept until a setter changes one of its inputs.

use crate::{
    errors::{ModelError, ModelResult},
    gaussian::{Gaussian, GaussianPrecision},
    linear_algebra::split_vector,
    lqr::{CostDistribution, LinearSystem},
    transfer::{dense_to_csr, lifted_transfer_matrix, lifted_transfer_matrix_sparse},
};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{factorization::CscCholesky, CscMatrix, CsrMatrix};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Linear algebra used for the lifted solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Backend {
    /// Dense matrices and a dense Cholesky
    #[default]
    Dense,
    /// CSR products and a sparse Cholesky
    Sparse,
}

/// Cost over a whole stacked sequence.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LiftedCost {
    /// Joint Gaussian over the stacked sequence
    Joint(GaussianPrecision),
    /// Per-step Gaussians, lifted block-diagonally for the current horizon
    PerStep(CostDistribution),
}

impl From<GaussianPrecision> for LiftedCost {
    fn from(g: GaussianPrecision) -> Self {
        LiftedCost::Joint(g)
    }
}

impl From<CostDistribution> for LiftedCost {
    fn from(d: CostDistribution) -> Self {
        LiftedCost::PerStep(d)
    }
}

impl LiftedCost {
    fn materialize(&self, horizon: usize, dim: usize, role: &str) -> ModelResult<GaussianPrecision> {
        match self {
            LiftedCost::Joint(g) => {
                if g.dim() != horizon * dim {
                    return Err(ModelError::dimension(role, horizon * dim, g.dim()));
                }
                Ok(g.clone())
            }
            LiftedCost::PerStep(d) => d.lift(horizon, dim),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Cache {
    transfer: Option<(DMatrix<f64>, DMatrix<f64>)>,
    transfer_sparse: Option<(CsrMatrix<f64>, CsrMatrix<f64>)>,
    control_distribution: Option<Gaussian>,
    state_distribution: Option<Gaussian>,
    state_sequence: Option<Vec<DVector<f64>>>,
    control_sequence: Option<Vec<DVector<f64>>>,
    gains: Option<Vec<DMatrix<f64>>>,
}

impl Cache {
    fn clear_solution(&mut self) {
        self.control_distribution = None;
        self.state_distribution = None;
        self.state_sequence = None;
        self.control_sequence = None;
        self.gains = None;
    }

    fn clear_all(&mut self) {
        self.transfer = None;
        self.transfer_sparse = None;
        self.clear_solution();
    }
}

/// Lifted LQR solver with lazily computed results.
#[derive(Debug, Clone)]
pub struct PogLqr {
    system: LinearSystem,
    horizon: usize,
    x0: Option<DVector<f64>>,
    target: Option<LiftedCost>,
    control: Option<LiftedCost>,
    backend: Backend,
    generation: u64,
    cache: Cache,
}

impl PogLqr {
    /// Solver for `system` over `horizon` steps. Initial state and costs are set separately.
    pub fn new(system: LinearSystem, horizon: usize) -> ModelResult<Self> {
        check_horizon(horizon)?;
        Ok(Self {
            system,
            horizon,
            x0: None,
            target: None,
            control: None,
            backend: Backend::Dense,
            generation: 0,
            cache: Cache::default(),
        })
    }

    /// Same solver using the given backend.
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Number of steps.
    pub fn horizon(&self) -> usize {
        self.horizon
    }

    /// Dynamics.
    pub fn system(&self) -> &LinearSystem {
        &self.system
    }

    /// Backend in use.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Counter bumped by every setter; cached results belong to the current value.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the dynamics; everything is recomputed.
    ///
    /// The initial state is kept and re-checked against the new state dimension on the
    /// next read.
    pub fn set_system(&mut self, system: LinearSystem) {
        self.system = system;
        self.touch();
        self.cache.clear_all();
    }

    /// Changes the horizon; everything is recomputed.
    pub fn set_horizon(&mut self, horizon: usize) -> ModelResult<()> {
        check_horizon(horizon)?;
        self.horizon = horizon;
        self.touch();
        self.cache.clear_all();
        Ok(())
    }

    /// Sets the initial state.
    pub fn set_x0(&mut self, x0: DVector<f64>) -> ModelResult<()> {
        if x0.len() != self.system.state_dim() {
            return Err(ModelError::dimension("initial state", self.system.state_dim(), x0.len()));
        }
        self.x0 = Some(x0);
        self.touch();
        self.cache.clear_solution();
        Ok(())
    }

    /// Sets the state target, either joint over `n·horizon` or per step.
    pub fn set_target(&mut self, target: impl Into<LiftedCost>) {
        self.target = Some(target.into());
        self.touch();
        self.cache.clear_solution();
    }

    /// Sets the control cost, either joint over `m·horizon` or per step.
    pub fn set_control_cost(&mut self, control: impl Into<LiftedCost>) {
        self.control = Some(control.into());
        self.touch();
        self.cache.clear_solution();
    }

    /// Isotropic zero-mean control cost with precision `10^exponent · I`.
    pub fn set_control_exponent(&mut self, exponent: f64) {
        let m = self.system.control_dim();
        self.set_control_cost(CostDistribution::isotropic(exponent, m));
    }

    /// Switches the backend; the solution is recomputed.
    pub fn set_backend(&mut self, backend: Backend) {
        self.backend = backend;
        self.touch();
        self.cache.clear_solution();
    }

    /// Dense lifted transfer matrices `(S_xi, S_u)`.
    pub fn transfer_matrices(&mut self) -> ModelResult<(&DMatrix<f64>, &DMatrix<f64>)> {
        if self.cache.transfer.is_none() {
            self.cache.transfer = Some(lifted_transfer_matrix(&self.system, self.horizon)?);
        }
        match &self.cache.transfer {
            Some((s_xi, s_u)) => Ok((s_xi, s_u)),
            None => Err(unset("transfer matrices")),
        }
    }

    /// Sparse lifted transfer matrices `(S_xi, S_u)`.
    pub fn transfer_matrices_sparse(&mut self) -> ModelResult<(&CsrMatrix<f64>, &CsrMatrix<f64>)> {
        if self.cache.transfer_sparse.is_none() {
            self.cache.transfer_sparse = Some(lifted_transfer_matrix_sparse(&self.system, self.horizon)?);
        }
        match &self.cache.transfer_sparse {
            Some((s_xi, s_u)) => Ok((s_xi, s_u)),
            None => Err(unset("sparse transfer matrices")),
        }
    }

    /// Posterior over the stacked control sequence (`m·horizon`).
    pub fn control_distribution(&mut self) -> ModelResult<&Gaussian> {
        if self.cache.control_distribution.is_none() {
            let solution = self.solve_controls()?;
            self.cache.control_distribution = Some(solution);
        }
        self.cache
            .control_distribution
            .as_ref()
            .ok_or_else(|| unset("control distribution"))
    }

    /// Implied distribution of the stacked state sequence (`n·horizon`).
    pub fn state_distribution(&mut self) -> ModelResult<&Gaussian> {
        if self.cache.state_distribution.is_none() {
            let x0 = self.initial_state()?;
            let controls = self.control_distribution()?.clone();
            let states = match self.backend {
                Backend::Dense => {
                    let (s_xi, s_u) = self.transfer_matrices()?;
                    controls.transform(s_u, &(s_xi * &x0))?
                }
                Backend::Sparse => {
                    let (s_xi, s_u) = self.transfer_matrices_sparse()?;
                    let mean = s_xi * &x0 + s_u * &controls.mean;
                    let su_sigma = s_u * &controls.covariance;
                    let covariance = s_u * &su_sigma.transpose();
                    Gaussian::new(mean, covariance)?
                }
            };
            self.cache.state_distribution = Some(states);
        }
        self.cache
            .state_distribution
            .as_ref()
            .ok_or_else(|| unset("state distribution"))
    }

    /// Mean state trajectory, `horizon` vectors of dimension `n`.
    pub fn state_sequence(&mut self) -> ModelResult<&[DVector<f64>]> {
        if self.cache.state_sequence.is_none() {
            let n = self.system.state_dim();
            let seq = split_vector(&self.state_distribution()?.mean, n);
            self.cache.state_sequence = Some(seq);
        }
        self.cache
            .state_sequence
            .as_deref()
            .ok_or_else(|| unset("state sequence"))
    }

    /// Mean control trajectory, `horizon` vectors of dimension `m`.
    pub fn control_sequence(&mut self) -> ModelResult<&[DVector<f64>]> {
        if self.cache.control_sequence.is_none() {
            let m = self.system.control_dim();
            let seq = split_vector(&self.control_distribution()?.mean, m);
            self.cache.control_sequence = Some(seq);
        }
        self.cache
            .control_sequence
            .as_deref()
            .ok_or_else(|| unset("control sequence"))
    }

    /// Gain tensor `Σ_u S_uᵀ Λ_ξ S_xi`, split into `horizon` blocks of shape `m × n`.
    pub fn gains(&mut self) -> ModelResult<&[DMatrix<f64>]> {
        if self.cache.gains.is_none() {
            let n = self.system.state_dim();
            let m = self.system.control_dim();
            let target = self.lifted_target()?;
            let sigma_u = self.control_distribution()?.covariance.clone();

            let projected = match self.backend {
                Backend::Dense => {
                    let (s_xi, s_u) = self.transfer_matrices()?;
                    s_u.transpose() * &target.precision * s_xi
                }
                Backend::Sparse => {
                    let (s_xi, s_u) = self.transfer_matrices_sparse()?;
                    let weighted = &s_u.transpose() * &dense_to_csr(&target.precision);
                    &weighted * &DMatrix::from(s_xi)
                }
            };
            let k = sigma_u * projected;
            let blocks = (0..self.horizon)
                .map(|t| k.view((t * m, 0), (m, n)).into_owned())
                .collect();
            self.cache.gains = Some(blocks);
        }
        self.cache.gains.as_deref().ok_or_else(|| unset("gains"))
    }

    fn touch(&mut self) {
        self.generation += 1;
    }

    fn initial_state(&self) -> ModelResult<DVector<f64>> {
        let x0 = self.x0.clone().ok_or_else(|| unset("initial state"))?;
        if x0.len() != self.system.state_dim() {
            return Err(ModelError::dimension("initial state", self.system.state_dim(), x0.len()));
        }
        Ok(x0)
    }

    fn lifted_target(&self) -> ModelResult<GaussianPrecision> {
        self.target
            .as_ref()
            .ok_or_else(|| unset("state target"))?
            .materialize(self.horizon, self.system.state_dim(), "lifted state target")
    }

    fn lifted_control(&self) -> ModelResult<GaussianPrecision> {
        self.control
            .as_ref()
            .ok_or_else(|| unset("control cost"))?
            .materialize(self.horizon, self.system.control_dim(), "lifted control cost")
    }

    fn solve_controls(&mut self) -> ModelResult<Gaussian> {
        let x0 = self.initial_state()?;
        let target = self.lifted_target()?;
        let control = self.lifted_control()?;

        match self.backend {
            Backend::Dense => {
                let (s_xi, s_u) = self.transfer_matrices()?;
                let likelihood = target.pull_back(s_u, &(s_xi * &x0))?;
                (&likelihood * &control.to_information())?.to_gaussian()
            }
            Backend::Sparse => {
                let (s_xi, s_u) = self.transfer_matrices_sparse()?;
                solve_sparse(s_xi, s_u, &x0, &target, &control)
            }
        }
    }
}

/// `Λ_u = S_uᵀ Λ S_u + R`, `η = S_uᵀ Λ (μ - S_xi x0) + R μ_R`, solved with a sparse Cholesky.
fn solve_sparse(
    s_xi: &CsrMatrix<f64>,
    s_u: &CsrMatrix<f64>,
    x0: &DVector<f64>,
    target: &GaussianPrecision,
    control: &GaussianPrecision,
) -> ModelResult<Gaussian> {
    let lambda = dense_to_csr(&target.precision);
    let r = dense_to_csr(&control.precision);

    let weighted = &s_u.transpose() * &lambda;
    let lambda_u = &(&weighted * s_u) + &r;
    let offset = &target.mean - s_xi * x0;
    let eta: DVector<f64> = &weighted * &offset + &r * &control.mean;

    let chol = CscCholesky::factor(&CscMatrix::from(&lambda_u)).map_err(|e| {
        ModelError::numerical(format!("sparse Cholesky failed: {:?}", e), "pog_lqr_sparse")
    })?;
    let dim = eta.len();
    let rhs = DMatrix::from_column_slice(dim, 1, eta.as_slice());
    let identity = DMatrix::identity(dim, dim);
    let mean = chol.solve(&rhs).column(0).into_owned();
    let covariance = chol.solve(&identity);
    Gaussian::new(mean, covariance)
}

fn unset(name: &str) -> ModelError {
    ModelError::Unset { name: name.to_string() }
}

fn check_horizon(horizon: usize) -> ModelResult<()> {
    if horizon < 2 {
        return Err(ModelError::InvalidParameter {
            parameter: "horizon".to_string(),
            value: horizon as f64,
            constraint: "at least 2 steps".to_string(),
        });
    }
    Ok(())
}
