//! Finite-horizon discrete LQR tracking of Gaussian targets.
//!
//! The state cost at every step is a Gaussian in precision form (target `z_t`, precision
//! `Q_t`) and the control cost a zero-mean Gaussian with precision `R_t`. The backward
//! Riccati recursion yields feedback gains that are rolled out from an initial state.

use crate::{
    errors::{ModelError, ModelResult},
    gaussian::GaussianPrecision,
    linear_algebra::{block_diagonal, cholesky_with_jitter, concat_vectors, general_solve},
    results::Rollout,
};
use nalgebra::{DMatrix, DVector};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Discrete linear dynamics `x_{t+1} = A x_t + B u_t`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LinearSystem {
    /// State matrix `[n, n]`
    pub a: DMatrix<f64>,
    /// Input matrix `[n, m]`
    pub b: DMatrix<f64>,
    /// Sampling period
    pub dt: f64,
}

impl LinearSystem {
    /// System from explicit matrices.
    pub fn new(a: DMatrix<f64>, b: DMatrix<f64>, dt: f64) -> ModelResult<Self> {
        if a.nrows() != a.ncols() {
            return Err(ModelError::dimension("state matrix", a.nrows(), a.ncols()));
        }
        if b.nrows() != a.nrows() {
            return Err(ModelError::dimension("input matrix rows", a.nrows(), b.nrows()));
        }
        Ok(Self { a, b, dt })
    }

    /// Double integrator per dimension, state ordered positions first then velocities.
    ///
    /// Built as `A = A1 ⊗ I`, `B = B1 ⊗ I` with `A1 = [[1, dt], [0, 1]]`, `B1 = [0, dt]ᵀ`.
    pub fn double_integrator(nb_dim: usize, dt: f64) -> Self {
        let a1 = DMatrix::from_row_slice(2, 2, &[1.0, dt, 0.0, 1.0]);
        let b1 = DMatrix::from_row_slice(2, 1, &[0.0, dt]);
        let eye = DMatrix::identity(nb_dim, nb_dim);
        Self {
            a: a1.kronecker(&eye),
            b: b1.kronecker(&eye),
            dt,
        }
    }

    /// State dimension `n`.
    pub fn state_dim(&self) -> usize {
        self.a.nrows()
    }

    /// Control dimension `m`.
    pub fn control_dim(&self) -> usize {
        self.b.ncols()
    }

    /// One step of the dynamics.
    pub fn step(&self, x: &DVector<f64>, u: &DVector<f64>) -> DVector<f64> {
        &self.a * x + &self.b * u
    }
}

/// Per-step quadratic cost expressed as Gaussians in precision form.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CostDistribution {
    /// Same Gaussian at every step
    Stationary(GaussianPrecision),
    /// One Gaussian per step
    Sequence(Vec<GaussianPrecision>),
    /// Step `t` uses `components[schedule[t]]`
    Scheduled {
        /// Available Gaussians
        components: Vec<GaussianPrecision>,
        /// Component index per step
        schedule: Vec<usize>,
    },
}

/// Distribution the state should track.
pub type TargetDistribution = CostDistribution;

/// Distribution penalizing the control input.
pub type ControlCost = CostDistribution;

impl CostDistribution {
    /// Zero-mean stationary cost with precision `10^exponent · I` over `dim` dimensions.
    pub fn isotropic(exponent: f64, dim: usize) -> Self {
        CostDistribution::Stationary(GaussianPrecision::isotropic(dim, exponent))
    }

    /// Gaussian used at step `t`.
    pub fn at(&self, t: usize) -> Option<&GaussianPrecision> {
        match self {
            CostDistribution::Stationary(g) => Some(g),
            CostDistribution::Sequence(seq) => seq.get(t),
            CostDistribution::Scheduled { components, schedule } => {
                schedule.get(t).and_then(|&k| components.get(k))
            }
        }
    }

    /// Resolves the Gaussian of every step `0..horizon`, checking coverage and dimension.
    pub fn resolve(&self, horizon: usize, dim: usize, role: &str) -> ModelResult<Vec<&GaussianPrecision>> {
        (0..horizon)
            .map(|t| {
                let g = self.at(t).ok_or_else(|| ModelError::UnsupportedDistribution {
                    role: role.to_string(),
                    reason: format!("no distribution defined for step {} of {}", t, horizon),
                })?;
                if g.dim() != dim {
                    return Err(ModelError::dimension(role, dim, g.dim()));
                }
                Ok(g)
            })
            .collect()
    }

    /// Block-diagonal lifted Gaussian over the stacked sequence (`dim · horizon`).
    pub fn lift(&self, horizon: usize, dim: usize) -> ModelResult<GaussianPrecision> {
        let steps = self.resolve(horizon, dim, "lifted distribution")?;
        let means: Vec<DVector<f64>> = steps.iter().map(|g| g.mean.clone()).collect();
        let precisions: Vec<DMatrix<f64>> = steps.iter().map(|g| g.precision.clone()).collect();
        GaussianPrecision::new(concat_vectors(&means), block_diagonal(&precisions))
    }
}

/// Backward Riccati recursion.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiccatiSolver;

impl RiccatiSolver {
    /// Solves the tracking problem over `horizon` steps.
    pub fn solve(
        system: &LinearSystem,
        horizon: usize,
        target: &TargetDistribution,
        control: &ControlCost,
    ) -> ModelResult<RiccatiSolution> {
        if horizon < 2 {
            return Err(ModelError::InvalidParameter {
                parameter: "horizon".to_string(),
                value: horizon as f64,
                constraint: "at least 2 steps".to_string(),
            });
        }
        let n = system.state_dim();
        let m = system.control_dim();
        let q = target.resolve(horizon, n, "state target")?;
        let r = control.resolve(horizon - 1, m, "control cost")?;

        let a = &system.a;
        let b = &system.b;
        let bt = b.transpose();

        let mut s = vec![DMatrix::zeros(n, n); horizon];
        let mut v = vec![DVector::zeros(n); horizon];
        let mut k = vec![DMatrix::zeros(m, n); horizon - 1];
        let mut kv = vec![DMatrix::zeros(m, n); horizon - 1];

        s[horizon - 1] = q[horizon - 1].precision.clone();
        v[horizon - 1] = q[horizon - 1].information();

        for t in (0..horizon - 1).rev() {
            let gram = &r[t].precision + &bt * &s[t + 1] * b;
            let chol = cholesky_with_jitter(&gram, "riccati_gain")?;
            kv[t] = chol.solve(&bt);
            k[t] = &kv[t] * &s[t + 1] * a;

            let a_cl = a - b * &k[t];
            s[t] = a.transpose() * &s[t + 1] * &a_cl + &q[t].precision;
            v[t] = a_cl.transpose() * &v[t + 1] + q[t].information();
        }

        Ok(RiccatiSolution {
            system: system.clone(),
            s,
            v,
            k,
            kv,
        })
    }
}

/// Value function and gains of a solved Riccati recursion.
#[derive(Debug, Clone)]
pub struct RiccatiSolution {
    system: LinearSystem,
    /// Value matrices `S_t`, `horizon` entries
    pub s: Vec<DMatrix<f64>>,
    /// Value vectors `v_t`, `horizon` entries
    pub v: Vec<DVector<f64>>,
    /// Feedback gains `K_t`, `horizon - 1` entries
    pub k: Vec<DMatrix<f64>>,
    /// Feedforward gains `Kv_t`, `horizon - 1` entries
    pub kv: Vec<DMatrix<f64>>,
}

impl RiccatiSolution {
    /// Number of steps.
    pub fn horizon(&self) -> usize {
        self.s.len()
    }

    /// Optimal control at step `t` from state `x`.
    pub fn control(&self, t: usize, x: &DVector<f64>) -> DVector<f64> {
        &self.kv[t] * &self.v[t + 1] - &self.k[t] * x
    }

    /// Closed-loop rollout with `u_t = -K_t x_t + Kv_t v_{t+1}`.
    ///
    /// `Kv_t` was derived against the next-step value vector, so `u_0` also uses `v_1`
    /// rather than `v_0`. With this indexing the rollout is the exact minimizer of the
    /// tracking cost and coincides with the lifted [`PogLqr`](crate::PogLqr) solution.
    pub fn rollout(&self, x0: &DVector<f64>) -> ModelResult<Rollout> {
        self.check_initial_state(x0)?;
        let horizon = self.horizon();
        let mut states = Vec::with_capacity(horizon);
        let mut controls = Vec::with_capacity(horizon - 1);
        states.push(x0.clone());

        for t in 0..horizon - 1 {
            let u = self.control(t, &states[t]);
            states.push(self.system.step(&states[t], &u));
            controls.push(u);
        }
        Ok(Rollout {
            states,
            controls,
            targets: None,
        })
    }

    /// Rollout tracking the points `d_t = (S_t A)⁻¹ v_t` with `u_t = K_t (d_t - x_t)`.
    ///
    /// The first control uses the feedback form. Fails if some `S_t A` is singular.
    pub fn rollout_with_targets(&self, x0: &DVector<f64>) -> ModelResult<Rollout> {
        self.check_initial_state(x0)?;
        let horizon = self.horizon();
        let mut states = Vec::with_capacity(horizon);
        let mut controls = Vec::with_capacity(horizon - 1);
        let mut targets = Vec::with_capacity(horizon - 2);
        states.push(x0.clone());

        for t in 0..horizon - 1 {
            let u = if t == 0 {
                self.control(0, x0)
            } else {
                let sa = &self.s[t] * &self.system.a;
                let d = general_solve(&sa, &self.v[t], "riccati_target")?;
                let u = &self.k[t] * (&d - &states[t]);
                targets.push(d);
                u
            };
            states.push(self.system.step(&states[t], &u));
            controls.push(u);
        }
        Ok(Rollout {
            states,
            controls,
            targets: Some(targets),
        })
    }

    fn check_initial_state(&self, x0: &DVector<f64>) -> ModelResult<()> {
        if x0.len() != self.system.state_dim() {
            return Err(ModelError::dimension("initial state", self.system.state_dim(), x0.len()));
        }
        Ok(())
    }
}
