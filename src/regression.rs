//! Regression on top of a trained HMM: mixture regression weighted by forward messages and
//! a step-by-step velocity/position predictor.

use crate::{
    decoding::OnlineFilter,
    errors::{ModelError, ModelResult},
    gaussian::Gaussian,
    hmm_core::Hmm,
};
use nalgebra::{DMatrix, DVector};

impl Hmm {
    /// Predicts `dim_out` from `data_in` (`[T, |dim_in|]`), weighting each state's
    /// conditional mean by the forward message computed on the `dim_in` marginal.
    ///
    /// `dim_in` must be a contiguous range of dimensions.
    pub fn condition(
        &self,
        data_in: &DMatrix<f64>,
        dim_in: std::ops::Range<usize>,
        dim_out: &[usize],
    ) -> ModelResult<DMatrix<f64>> {
        let messages = self.compute_messages(data_in, None, Some(dim_in.clone()))?;
        let dim_in: Vec<usize> = dim_in.collect();
        self.params()
            .condition_with_weights(data_in, &dim_in, dim_out, &messages.alpha)
    }
}

/// Predicts velocities from positions (and back) over a model of `[q; q̇]` trained on
/// joint data, reusing the state weights of each time step.
#[derive(Debug, Clone)]
pub struct VelocityPredictor {
    q_dim: usize,
    filter: OnlineFilter,
    history: DMatrix<f64>,
    components: Vec<Gaussian>,
}

impl VelocityPredictor {
    /// Predictor for a model whose first `q_dim` dimensions are positions and the rest
    /// velocities, storing state weights for up to `capacity` steps.
    pub fn new(hmm: &Hmm, q_dim: usize, capacity: usize) -> ModelResult<Self> {
        if q_dim == 0 || q_dim >= hmm.nb_dim() {
            return Err(ModelError::InvalidParameter {
                parameter: "q_dim".to_string(),
                value: q_dim as f64,
                constraint: format!("between 1 and {}", hmm.nb_dim().saturating_sub(1)),
            });
        }
        let components = (0..hmm.nb_states())
            .map(|i| hmm.params().component(i))
            .collect::<ModelResult<_>>()?;
        Ok(Self {
            q_dim,
            filter: OnlineFilter::new(),
            history: DMatrix::zeros(hmm.nb_states(), capacity),
            components,
        })
    }

    /// Stored state weights `[nb_states, capacity]`.
    pub fn history(&self) -> &DMatrix<f64> {
        &self.history
    }

    /// Velocity at step `t` given position `q`. Step 0 restarts the filter.
    pub fn predict_velocity(&mut self, hmm: &Hmm, q: &DVector<f64>, t: usize) -> ModelResult<DVector<f64>> {
        self.check_step(t)?;
        if q.len() != self.q_dim {
            return Err(ModelError::dimension("position", self.q_dim, q.len()));
        }
        let h = self.filter.step(hmm, q, Some(0..self.q_dim), t == 0)?.clone();
        self.history.set_column(t, &h);

        let (pos, vel) = self.split();
        self.blend(&h, q, &pos, &vel)
    }

    /// Position at step `t` given velocity `qdot`, reusing the weights stored at `t`.
    pub fn predict_position(&self, qdot: &DVector<f64>, t: usize) -> ModelResult<DVector<f64>> {
        self.check_step(t)?;
        let (pos, vel) = self.split();
        if qdot.len() != vel.len() {
            return Err(ModelError::dimension("velocity", vel.len(), qdot.len()));
        }
        let h = self.history.column(t).into_owned();
        self.blend(&h, qdot, &vel, &pos)
    }

    fn blend(
        &self,
        h: &DVector<f64>,
        x_in: &DVector<f64>,
        dim_in: &[usize],
        dim_out: &[usize],
    ) -> ModelResult<DVector<f64>> {
        let mut out = DVector::zeros(dim_out.len());
        for (w, comp) in h.iter().zip(&self.components) {
            out += comp.conditional_mean(x_in, dim_in, dim_out)? * *w;
        }
        Ok(out)
    }

    fn split(&self) -> (Vec<usize>, Vec<usize>) {
        let nb_dim = self.components.first().map(|c| c.dim()).unwrap_or(self.q_dim);
        ((0..self.q_dim).collect(), (self.q_dim..nb_dim).collect())
    }

    fn check_step(&self, t: usize) -> ModelResult<()> {
        if t >= self.history.ncols() {
            return Err(ModelError::InvalidParameter {
                parameter: "t".to_string(),
                value: t as f64,
                constraint: format!("below history capacity {}", self.history.ncols()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn linear_model() -> Hmm {
        // Within each state, q̇ = 0.5 (q - μ_q) + μ_q̇
        let sigma = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        Hmm::from_parameters(
            DVector::from_vec(vec![1.0, 0.0]),
            DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.0, 1.0]),
            vec![DVector::from_vec(vec![0.0, 1.0]), DVector::from_vec(vec![10.0, -1.0])],
            vec![sigma.clone(), sigma],
        )
        .unwrap()
    }

    #[test]
    fn test_condition_uses_first_state_at_start() {
        let hmm = linear_model();
        let data_in = DMatrix::from_column_slice(1, 1, &[0.4]);
        let out = hmm.condition(&data_in, 0..1, &[1]).unwrap();
        assert_approx_eq!(out[(0, 0)], 1.2, 1e-9);
    }

    #[test]
    fn test_velocity_then_position_round_trip() {
        let hmm = linear_model();
        let mut predictor = VelocityPredictor::new(&hmm, 1, 4).unwrap();
        let q = DVector::from_vec(vec![0.4]);
        let qdot = predictor.predict_velocity(&hmm, &q, 0).unwrap();
        assert_approx_eq!(qdot[0], 1.2, 1e-9);
        assert_approx_eq!(predictor.history().column(0).sum(), 1.0, 1e-12);

        let q_back = predictor.predict_position(&qdot, 0).unwrap();
        assert_approx_eq!(q_back[0], 0.1, 1e-9);
    }

    #[test]
    fn test_step_beyond_capacity_is_rejected() {
        let hmm = linear_model();
        let mut predictor = VelocityPredictor::new(&hmm, 1, 2).unwrap();
        let q = DVector::from_vec(vec![0.0]);
        assert!(matches!(
            predictor.predict_velocity(&hmm, &q, 2),
            Err(ModelError::InvalidParameter { .. })
        ));
        assert!(predictor.predict_position(&q, 5).is_err());
    }

    #[test]
    fn test_invalid_split_is_rejected() {
        let hmm = linear_model();
        assert!(VelocityPredictor::new(&hmm, 2, 3).is_err());
    }
}
