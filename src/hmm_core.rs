//! Core Hidden Markov Model implementation for motion primitives.
//!
//! This module contains the HMM structure, its initialization strategies and the scaled
//! forward-backward message passing. Learning lives in [`crate::learning`], decoding in
//! [`crate::decoding`].

use crate::{
    config::{DependencyBlock, Regularization},
    emission_models::EmissionModel,
    errors::{validate_data_length, validate_parameter, ModelError, ModelResult},
    linear_algebra::cholesky_with_jitter,
    math_utils::{column_mean, constants, normalize_rows, sample_covariance},
    mixture::GaussianMixture,
};
use nalgebra::{DMatrix, DVector};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;
use std::borrow::Cow;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

/// Anything that exposes an ordered `[T, nb_dim]` observation matrix.
pub trait Observations {
    /// The observation sequence, one row per time step.
    fn observations(&self) -> &DMatrix<f64>;
}

impl Observations for DMatrix<f64> {
    fn observations(&self) -> &DMatrix<f64> {
        self
    }
}

/// A recorded demonstration: the observed trajectory plus any auxiliary named signals.
#[derive(Debug, Clone)]
pub struct Demonstration {
    /// Observation sequence `[T, nb_dim]`
    pub x: DMatrix<f64>,
    /// Auxiliary signals keyed by name
    pub extra: HashMap<String, DMatrix<f64>>,
}

impl Observations for Demonstration {
    fn observations(&self) -> &DMatrix<f64> {
        &self.x
    }
}

/// Scaled forward-backward messages of one demonstration.
#[derive(Debug, Clone)]
pub struct Messages {
    /// Rescaled forward variables `[nb_states, T]`
    pub alpha: DMatrix<f64>,
    /// Rescaled backward variables `[nb_states, T]`
    pub beta: DMatrix<f64>,
    /// Smoothed node marginals `[nb_states, T]`
    pub gamma: DMatrix<f64>,
    /// Smoothed edge marginals, `T-1` matrices `[nb_states, nb_states]`
    pub zeta: Vec<DMatrix<f64>>,
    /// Scaling factors `[T]`
    pub scaling: DVector<f64>,
}

impl Messages {
    /// Sequence log-likelihood, `-Σ ln c[t]`.
    pub fn log_likelihood(&self) -> f64 {
        -self.scaling.iter().map(|c| c.ln()).sum::<f64>()
    }

    /// Number of time steps.
    pub fn len(&self) -> usize {
        self.gamma.ncols()
    }

    /// Whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.gamma.ncols() == 0
    }
}

#[derive(Debug, Default)]
struct DefaultFlag(AtomicBool);

impl Clone for DefaultFlag {
    fn clone(&self) -> Self {
        DefaultFlag(AtomicBool::new(self.0.load(Ordering::Relaxed)))
    }
}

/// Hidden Markov Model with Gaussian emissions.
#[derive(Debug, Clone)]
pub struct Hmm {
    params: GaussianMixture,
    init_priors: Option<DVector<f64>>,
    trans: Option<DMatrix<f64>>,
    /// Regularization added to covariances
    pub reg: Regularization,
    has_finish_state: bool,
    defaulted: DefaultFlag,
    pub(crate) gammas: Vec<DMatrix<f64>>,
}

impl Hmm {
    /// Creates an empty HMM; parameters are set by one of the `init_*` strategies or by EM.
    pub fn new(nb_states: usize, nb_dim: usize) -> Self {
        Self {
            params: GaussianMixture::new(nb_states, nb_dim),
            init_priors: None,
            trans: None,
            reg: Regularization::default(),
            has_finish_state: false,
            defaulted: DefaultFlag::default(),
            gammas: Vec::new(),
        }
    }

    /// Creates an HMM from fully specified parameters.
    pub fn from_parameters(
        init_priors: DVector<f64>,
        trans: DMatrix<f64>,
        mu: Vec<DVector<f64>>,
        sigma: Vec<DMatrix<f64>>,
    ) -> ModelResult<Self> {
        let nb_states = init_priors.len();
        let nb_dim = mu.first().map(|m| m.len()).unwrap_or(0);
        let mut hmm = Self::new(nb_states, nb_dim);
        hmm.params.set_components(mu, sigma)?;
        hmm.set_init_priors(init_priors)?;
        hmm.set_trans(trans)?;
        Ok(hmm)
    }

    /// Number of hidden states.
    pub fn nb_states(&self) -> usize {
        self.params.nb_states()
    }

    /// Observation dimensionality.
    pub fn nb_dim(&self) -> usize {
        self.params.nb_dim()
    }

    /// Emission parameters.
    pub fn params(&self) -> &GaussianMixture {
        &self.params
    }

    /// Mutable emission parameters.
    pub fn params_mut(&mut self) -> &mut GaussianMixture {
        &mut self.params
    }

    /// Per-state means.
    pub fn mu(&self) -> &[DVector<f64>] {
        &self.params.mu
    }

    /// Per-state covariances.
    pub fn sigma(&self) -> &[DMatrix<f64>] {
        &self.params.sigma
    }

    /// Whether a terminal state was appended with [`Hmm::make_finish_state`].
    pub fn has_finish_state(&self) -> bool {
        self.has_finish_state
    }

    /// Whether any read substituted the uniform default for unset priors or transitions.
    pub fn used_default_parameters(&self) -> bool {
        self.defaulted.0.load(Ordering::Relaxed)
    }

    /// Responsibilities of every demonstration from the last EM iteration.
    pub fn responsibilities(&self) -> &[DMatrix<f64>] {
        &self.gammas
    }

    /// Initial-state distribution. Uniform (with a warning) when unset.
    pub fn init_priors(&self) -> Cow<'_, DVector<f64>> {
        match &self.init_priors {
            Some(p) => Cow::Borrowed(p),
            None => {
                log::warn!("HMM init priors not defined, initializing to uniform");
                self.defaulted.0.store(true, Ordering::Relaxed);
                let n = self.nb_states();
                Cow::Owned(DVector::from_element(n, 1.0 / n as f64))
            }
        }
    }

    /// Transition matrix. Uniform (with a warning) when unset.
    pub fn trans(&self) -> Cow<'_, DMatrix<f64>> {
        match &self.trans {
            Some(t) => Cow::Borrowed(t),
            None => {
                log::warn!("HMM transition matrix not defined, initializing to uniform");
                self.defaulted.0.store(true, Ordering::Relaxed);
                let n = self.nb_states();
                Cow::Owned(DMatrix::from_element(n, n, 1.0 / n as f64))
            }
        }
    }

    /// Sets the initial-state distribution.
    pub fn set_init_priors(&mut self, priors: DVector<f64>) -> ModelResult<()> {
        if priors.len() != self.nb_states() {
            return Err(ModelError::dimension("init priors", self.nb_states(), priors.len()));
        }
        self.init_priors = Some(priors);
        Ok(())
    }

    /// Sets the transition matrix.
    pub fn set_trans(&mut self, trans: DMatrix<f64>) -> ModelResult<()> {
        let n = self.nb_states();
        if trans.nrows() != n || trans.ncols() != n {
            return Err(ModelError::dimension("transition matrix", n, trans.nrows()));
        }
        self.trans = Some(trans);
        Ok(())
    }

    /// Stores the uniform defaults for any unset priors or transitions.
    pub(crate) fn materialize_defaults(&mut self) {
        if self.init_priors.is_none() {
            let p = self.init_priors().into_owned();
            self.init_priors = Some(p);
        }
        if self.trans.is_none() {
            let t = self.trans().into_owned();
            self.trans = Some(t);
        }
    }

    // ------------------------------------------------------------------------
    // Initialization strategies
    // ------------------------------------------------------------------------

    /// Random initialization from pooled data `[n_samples, nb_dim]`.
    ///
    /// Every state gets the pooled covariance. Means are drawn from the pooled Gaussian, or
    /// all set to the pooled mean when `left_to_right`. Transitions are either a causal band
    /// with `self_trans` on the diagonal, or `self_trans` on the diagonal with the rest
    /// spread uniformly.
    pub fn init_params_random(
        &mut self,
        data: &DMatrix<f64>,
        left_to_right: bool,
        self_trans: f64,
        seed: u64,
    ) -> ModelResult<()> {
        validate_data_length(data.nrows(), 1)?;
        validate_parameter(self_trans, 0.0, 1.0, "self_trans")?;
        let n = self.nb_states();
        let d = self.nb_dim();
        if data.ncols() != d {
            return Err(ModelError::dimension("initialization data", d, data.ncols()));
        }

        let reg = self.reg.to_matrix(d)?;
        let mean = column_mean(data);
        let cov = sample_covariance(data, &mean).unwrap_or_else(|| DMatrix::zeros(d, d));

        let mu = if left_to_right {
            vec![mean.clone(); n]
        } else {
            let chol = cholesky_with_jitter(&(&cov + &reg), "init_params_random")?;
            let l = chol.l();
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            (0..n)
                .map(|_| {
                    let z = DVector::from_fn(d, |_, _| rng.sample::<f64, _>(StandardNormal));
                    &mean + &l * z
                })
                .collect()
        };
        self.params.set_components(mu, vec![&cov + &reg; n])?;
        self.params.priors = DVector::from_element(n, 1.0 / n as f64);

        if left_to_right {
            let mut trans = DMatrix::zeros(n, n);
            for i in 0..n {
                if i + 1 < n {
                    trans[(i, i)] = self_trans;
                    trans[(i, i + 1)] = 1.0 - self_trans;
                } else {
                    trans[(i, i)] = 1.0;
                }
            }
            self.trans = Some(trans);
            self.init_priors = Some(first_state_prior(n));
        } else {
            let trans = if n == 1 {
                DMatrix::identity(1, 1)
            } else {
                let off = (1.0 - self_trans) / (n - 1) as f64;
                DMatrix::from_fn(n, n, |i, j| if i == j { self_trans } else { off })
            };
            self.trans = Some(trans);
            self.init_priors = Some(DVector::from_element(n, 1.0 / n as f64));
        }
        Ok(())
    }

    /// Cyclic initialization: identical pooled statistics for every state, ring transitions.
    pub fn init_loop<D: Observations>(&mut self, demos: &[D]) -> ModelResult<()> {
        let data = self.pool(demos)?;
        let n = self.nb_states();
        let d = self.nb_dim();

        let mut trans = DMatrix::identity(n, n) * 0.98;
        for i in 0..n.saturating_sub(1) {
            trans[(i, i + 1)] = 0.02;
        }
        trans[(n - 1, 0)] += 0.02;

        let mean = column_mean(&data);
        let reg = self.reg.to_matrix(d)?;
        let cov = sample_covariance(&data, &mean).unwrap_or(reg);
        self.params.set_components(vec![mean; n], vec![cov; n])?;
        self.trans = Some(trans);
        self.init_priors = Some(first_state_prior(n));
        Ok(())
    }

    /// Hard responsibilities `[total_T, nb_states]` that cut every demonstration into
    /// `nb_states` bins of equal duration.
    pub fn split_kbins<D: Observations>(&self, demos: &[D]) -> DMatrix<f64> {
        let n = self.nb_states();
        let total: usize = demos.iter().map(|d| d.observations().nrows()).sum();
        let mut resp = DMatrix::zeros(total, n);
        let mut offset = 0;
        for demo in demos {
            let len = demo.observations().nrows();
            let seps: Vec<usize> = (0..=n)
                .map(|i| (i as f64 * len as f64 / n as f64).round() as usize)
                .collect();
            for i in 0..n {
                for t in seps[i]..seps[i + 1] {
                    resp[(offset + t, i)] = 1.0;
                }
            }
            offset += len;
        }
        resp
    }

    /// Time-segmentation initialization: state `i` gets the statistics of the `i`-th time bin.
    pub fn init_kbins<D: Observations>(&mut self, demos: &[D]) -> ModelResult<()> {
        let data = self.pool(demos)?;
        let resp = self.split_kbins(demos);
        let n = self.nb_states();
        let d = self.nb_dim();
        let reg = self.reg.to_matrix(d)?;

        let mut mu = Vec::with_capacity(n);
        let mut sigma = Vec::with_capacity(n);
        for i in 0..n {
            let rows: Vec<usize> = (0..data.nrows()).filter(|&t| resp[(t, i)] > 0.0).collect();
            if rows.is_empty() {
                return Err(ModelError::InsufficientData {
                    required: n,
                    actual: data.nrows(),
                });
            }
            let bin = data.select_rows(rows.iter());
            let mean = column_mean(&bin);
            let cov = sample_covariance(&bin, &mean)
                .map(|c| c + &reg)
                .unwrap_or_else(|| reg.clone());
            mu.push(mean);
            sigma.push(cov);
        }
        self.params.set_components(mu, sigma)?;
        self.params.priors = DVector::from_element(n, 1.0 / n as f64);
        self.init_priors = Some(DVector::from_element(n, 1.0 / n as f64));
        self.trans = Some(DMatrix::from_element(n, n, 1.0 / n as f64));
        Ok(())
    }

    /// Clustering initialization: k-means++ seeding followed by Lloyd iterations on the
    /// pooled observations; each cluster provides one state's mean and covariance.
    pub fn init_kmeans<D: Observations>(&mut self, demos: &[D], seed: u64) -> ModelResult<()> {
        let data = self.pool(demos)?;
        let n = self.nb_states();
        let d = self.nb_dim();
        validate_data_length(data.nrows(), n)?;
        let reg = self.reg.to_matrix(d)?;

        let points: Vec<DVector<f64>> = data.row_iter().map(|r| r.transpose()).collect();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let mut centroids = initialize_centroids_plus_plus(&points, n, &mut rng);

        let max_iterations = 100;
        let tolerance = 1e-6;
        let mut assignments = vec![0; points.len()];

        for _iteration in 0..max_iterations {
            for (a, p) in assignments.iter_mut().zip(&points) {
                *a = nearest(p, &centroids);
            }

            let mut new_centroids = vec![DVector::zeros(d); n];
            let mut counts = vec![0usize; n];
            for (p, &c) in points.iter().zip(&assignments) {
                new_centroids[c] += p;
                counts[c] += 1;
            }

            let mut max_change = 0.0f64;
            for i in 0..n {
                if counts[i] > 0 {
                    new_centroids[i] /= counts[i] as f64;
                    max_change = max_change.max((&new_centroids[i] - &centroids[i]).norm());
                } else {
                    // Empty cluster keeps its previous centroid
                    new_centroids[i] = centroids[i].clone();
                }
            }
            centroids = new_centroids;

            if max_change < tolerance {
                break;
            }
        }

        for (a, p) in assignments.iter_mut().zip(&points) {
            *a = nearest(p, &centroids);
        }
        let sigma = (0..n)
            .map(|i| {
                let rows: Vec<usize> = (0..points.len()).filter(|&t| assignments[t] == i).collect();
                let cluster = data.select_rows(rows.iter());
                sample_covariance(&cluster, &centroids[i])
                    .map(|c| c + &reg)
                    .unwrap_or_else(|| reg.clone())
            })
            .collect();

        self.params.set_components(centroids, sigma)?;
        self.params.priors = DVector::from_element(n, 1.0 / n as f64);
        self.init_priors = Some(DVector::from_element(n, 1.0 / n as f64));
        self.trans = Some(DMatrix::from_element(n, n, 1.0 / n as f64));
        Ok(())
    }

    /// Inherits emission parameters from a trained mixture; priors and transitions uniform.
    pub fn init_from_mixture(&mut self, gmm: &GaussianMixture) -> ModelResult<()> {
        if gmm.nb_states() != self.nb_states() {
            return Err(ModelError::dimension("inherited mixture states", self.nb_states(), gmm.nb_states()));
        }
        if gmm.nb_dim() != self.nb_dim() {
            return Err(ModelError::dimension("inherited mixture dimensions", self.nb_dim(), gmm.nb_dim()));
        }
        self.params = gmm.clone();
        let n = self.nb_states();
        self.init_priors = Some(DVector::from_element(n, 1.0 / n as f64));
        self.trans = Some(DMatrix::from_element(n, n, 1.0 / n as f64));
        Ok(())
    }

    /// Appends an absorbing terminal state built from the last 3 frames of every demonstration.
    ///
    /// The new state has zero initial and mixture prior. The former last state keeps its
    /// outgoing distribution; the new state only transitions to itself.
    pub fn make_finish_state<D: Observations>(
        &mut self,
        demos: &[D],
        dep_mask: Option<&DMatrix<f64>>,
    ) -> ModelResult<()> {
        validate_data_length(demos.len(), 1)?;
        let d = self.nb_dim();
        let rows: Vec<DMatrix<f64>> = demos
            .iter()
            .map(|demo| {
                let x = demo.observations();
                let take = x.nrows().min(3);
                x.rows(x.nrows() - take, take).into_owned()
            })
            .collect();
        let tail = stack_rows(&rows, d)?;
        validate_data_length(tail.nrows(), 1)?;

        let reg = self.reg.to_matrix(d)?;
        let mean = column_mean(&tail);
        let mut sigma = sample_covariance(&tail, &mean)
            .map(|c| c + &reg)
            .unwrap_or(reg);
        if let Some(mask) = dep_mask {
            sigma.component_mul_assign(mask);
        }

        let init = self.init_priors().into_owned();
        let old_trans = self.trans().into_owned();
        let n = self.nb_states();

        self.params.push_component(0.0, mean, sigma)?;
        self.init_priors = Some(init.push(0.0));

        let mut trans = DMatrix::zeros(n + 1, n + 1);
        trans.view_mut((0, 0), (n, n)).copy_from(&old_trans);
        trans[(n, n)] = 1.0;
        self.trans = Some(trans);
        self.has_finish_state = true;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Message passing
    // ------------------------------------------------------------------------

    /// Emission model bound to this HMM's parameters.
    pub fn emission_model(&self) -> EmissionModel<'_> {
        EmissionModel::new(&self.params)
    }

    /// Emission likelihood and log-likelihood `[nb_states, T]` of a demonstration.
    pub fn obs_likelihood(
        &self,
        demo: &DMatrix<f64>,
        dep: Option<&[DependencyBlock]>,
        marginal: Option<Range<usize>>,
    ) -> ModelResult<(DMatrix<f64>, DMatrix<f64>)> {
        self.emission_model()
            .with_dep(dep)
            .with_marginal(marginal)
            .likelihood(demo)
    }

    /// Scaled forward-backward pass over one demonstration.
    pub fn compute_messages(
        &self,
        demo: &DMatrix<f64>,
        dep: Option<&[DependencyBlock]>,
        marginal: Option<Range<usize>>,
    ) -> ModelResult<Messages> {
        let (b, _) = self.obs_likelihood(demo, dep, marginal)?;
        self.messages_from_likelihood(&b)
    }

    /// Forward-backward from a precomputed likelihood matrix `B[state, t]`.
    pub fn messages_from_likelihood(&self, b: &DMatrix<f64>) -> ModelResult<Messages> {
        let n = self.nb_states();
        let nb_data = b.ncols();
        validate_data_length(nb_data, 1)?;
        if b.nrows() != n {
            return Err(ModelError::dimension("likelihood rows", n, b.nrows()));
        }

        let init_priors = self.init_priors();
        let trans = self.trans();
        let trans_t = trans.transpose();

        // Forward variable alpha (rescaled)
        let mut alpha = DMatrix::zeros(n, nb_data);
        let mut c = DVector::zeros(nb_data);

        let a0 = init_priors.component_mul(&b.column(0));
        c[0] = 1.0 / (a0.sum() + n as f64 * constants::REALMIN);
        alpha.set_column(0, &(a0 * c[0]));

        for t in 1..nb_data {
            let at = (&trans_t * alpha.column(t - 1)).component_mul(&b.column(t));
            c[t] = 1.0 / (at.sum() + n as f64 * constants::REALMIN);
            alpha.set_column(t, &(at * c[t]));
        }

        // Backward variable beta (rescaled)
        let mut beta = DMatrix::zeros(n, nb_data);
        beta.set_column(nb_data - 1, &DVector::from_element(n, c[nb_data - 1]));
        for t in (0..nb_data - 1).rev() {
            let weighted = beta.column(t + 1).component_mul(&b.column(t + 1));
            let bt = (&*trans * weighted * c[t]).map(|v| v.min(constants::REALMAX));
            beta.set_column(t, &bt);
        }

        // Smoothed node marginals
        let mut gamma = alpha.component_mul(&beta);
        for mut col in gamma.column_iter_mut() {
            let total = col.sum() + constants::REALMIN;
            col /= total;
        }

        // Smoothed edge marginals, using the scaled variables directly
        let zeta = (0..nb_data - 1)
            .map(|t| {
                let next = b.column(t + 1).component_mul(&beta.column(t + 1));
                DMatrix::from_fn(n, n, |i, j| trans[(i, j)] * alpha[(i, t)] * next[j])
            })
            .collect();

        Ok(Messages {
            alpha,
            beta,
            gamma,
            zeta,
            scaling: c,
        })
    }

    /// Per-demonstration `Σ ln c[t]`, i.e. the negative log-likelihood of each sequence.
    pub fn score<D: Observations>(&self, demos: &[D]) -> ModelResult<Vec<f64>> {
        demos
            .iter()
            .map(|demo| {
                let m = self.compute_messages(demo.observations(), None, None)?;
                Ok(m.scaling.iter().map(|c| c.ln()).sum())
            })
            .collect()
    }

    /// Log-likelihood of one sequence under the model.
    pub fn log_likelihood(&self, demo: &DMatrix<f64>) -> ModelResult<f64> {
        Ok(self.compute_messages(demo, None, None)?.log_likelihood())
    }

    /// Concatenates demonstrations into one `[total_T, nb_dim]` matrix.
    pub(crate) fn pool<D: Observations>(&self, demos: &[D]) -> ModelResult<DMatrix<f64>> {
        validate_data_length(demos.len(), 1)?;
        let parts: Vec<DMatrix<f64>> = demos.iter().map(|d| d.observations().clone()).collect();
        stack_rows(&parts, self.nb_dim())
    }

    /// Renormalizes transition rows in place.
    pub(crate) fn renormalize_trans(&mut self) {
        if let Some(t) = self.trans.as_mut() {
            normalize_rows(t);
        }
    }

    pub(crate) fn trans_mut(&mut self) -> Option<&mut DMatrix<f64>> {
        self.trans.as_mut()
    }
}

fn first_state_prior(n: usize) -> DVector<f64> {
    let mut p = DVector::zeros(n);
    p[0] = 1.0;
    p
}

/// Stacks `[T_k, dim]` matrices vertically.
pub(crate) fn stack_rows(parts: &[DMatrix<f64>], dim: usize) -> ModelResult<DMatrix<f64>> {
    let total: usize = parts.iter().map(|p| p.nrows()).sum();
    let mut out = DMatrix::zeros(total, dim);
    let mut offset = 0;
    for part in parts {
        if part.ncols() != dim {
            return Err(ModelError::dimension("demonstration", dim, part.ncols()));
        }
        out.view_mut((offset, 0), (part.nrows(), dim)).copy_from(part);
        offset += part.nrows();
    }
    Ok(out)
}

fn nearest(p: &DVector<f64>, centroids: &[DVector<f64>]) -> usize {
    let mut min_dist = f64::INFINITY;
    let mut best_cluster = 0;
    for (j, centroid) in centroids.iter().enumerate() {
        let dist = (p - centroid).norm_squared();
        if dist < min_dist {
            min_dist = dist;
            best_cluster = j;
        }
    }
    best_cluster
}

/// k-means++ seeding: each new centroid is drawn with probability proportional to the
/// squared distance to the nearest existing one.
fn initialize_centroids_plus_plus(
    points: &[DVector<f64>],
    k: usize,
    rng: &mut ChaCha20Rng,
) -> Vec<DVector<f64>> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())].clone());

    for _ in 1..k {
        let distances: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| (p - c).norm_squared())
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total_dist: f64 = distances.iter().sum();

        let target = rng.gen::<f64>() * total_dist;
        let mut cumulative = 0.0;
        let mut chosen_idx = points.len() - 1;
        for (i, &dist) in distances.iter().enumerate() {
            cumulative += dist;
            if cumulative >= target && dist > 0.0 {
                chosen_idx = i;
                break;
            }
        }
        centroids.push(points[chosen_idx].clone());
    }
    centroids
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    pub(crate) fn two_state_1d() -> Hmm {
        Hmm::from_parameters(
            DVector::from_vec(vec![0.6, 0.4]),
            DMatrix::from_row_slice(2, 2, &[0.8, 0.2, 0.3, 0.7]),
            vec![DVector::from_vec(vec![0.0]), DVector::from_vec(vec![4.0])],
            vec![DMatrix::from_element(1, 1, 1.0), DMatrix::from_element(1, 1, 1.5)],
        )
        .unwrap()
    }

    fn sequence() -> DMatrix<f64> {
        DMatrix::from_column_slice(8, 1, &[0.1, -0.4, 0.3, 3.5, 4.2, 3.9, 0.2, 4.4])
    }

    #[test]
    fn test_hmm_creation_is_empty() {
        let hmm = Hmm::new(3, 2);
        assert_eq!(hmm.nb_states(), 3);
        assert_eq!(hmm.nb_dim(), 2);
        assert!(!hmm.params().is_initialized());
        assert!(!hmm.used_default_parameters());
    }

    #[test]
    fn test_unset_parameters_default_to_uniform_observably() {
        let hmm = Hmm::new(4, 1);
        let p = hmm.init_priors();
        assert_approx_eq!(p.sum(), 1.0);
        assert_approx_eq!(p[2], 0.25);
        let t = hmm.trans();
        for row in t.row_iter() {
            assert_approx_eq!(row.sum(), 1.0);
        }
        assert!(hmm.used_default_parameters());
    }

    #[test]
    fn test_gamma_columns_sum_to_one() {
        let hmm = two_state_1d();
        let m = hmm.compute_messages(&sequence(), None, None).unwrap();
        for col in m.gamma.column_iter() {
            assert_approx_eq!(col.sum(), 1.0, 1e-10);
        }
    }

    #[test]
    fn test_zeta_consistent_with_gamma() {
        let hmm = two_state_1d();
        let m = hmm.compute_messages(&sequence(), None, None).unwrap();
        assert_eq!(m.zeta.len(), m.len() - 1);
        for (t, z) in m.zeta.iter().enumerate() {
            assert_approx_eq!(z.sum(), m.gamma.column(t).sum(), 1e-8);
            // Row sums of zeta are the node marginals at t
            for i in 0..2 {
                assert_approx_eq!(z.row(i).sum(), m.gamma[(i, t)], 1e-8);
            }
        }
    }

    #[test]
    fn test_log_likelihood_matches_brute_force() {
        let hmm = two_state_1d();
        let x = DMatrix::from_column_slice(3, 1, &[0.0, 3.0, 4.0]);
        let (b, _) = hmm.obs_likelihood(&x, None, None).unwrap();
        let p = hmm.init_priors();
        let a = hmm.trans();

        let mut total = 0.0;
        for s0 in 0..2 {
            for s1 in 0..2 {
                for s2 in 0..2 {
                    total += p[s0] * b[(s0, 0)] * a[(s0, s1)] * b[(s1, 1)] * a[(s1, s2)] * b[(s2, 2)];
                }
            }
        }
        let ll = hmm.log_likelihood(&x).unwrap();
        assert_approx_eq!(ll, total.ln(), 1e-9);

        let score = hmm.score(&[x]).unwrap();
        assert_approx_eq!(score[0], -total.ln(), 1e-9);
    }

    #[test]
    fn test_single_frame_messages() {
        let hmm = two_state_1d();
        let x = DMatrix::from_element(1, 1, 0.0);
        let m = hmm.compute_messages(&x, None, None).unwrap();
        assert!(m.zeta.is_empty());
        assert_approx_eq!(m.gamma.column(0).sum(), 1.0, 1e-12);
    }

    #[test]
    fn test_empty_sequence_is_rejected() {
        let hmm = two_state_1d();
        let x = DMatrix::zeros(0, 1);
        assert!(matches!(
            hmm.compute_messages(&x, None, None),
            Err(ModelError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_split_kbins_partitions_time() {
        let hmm = Hmm::new(2, 1);
        let demo = DMatrix::from_column_slice(4, 1, &[0.0, 1.0, 2.0, 3.0]);
        let resp = hmm.split_kbins(&[demo]);
        assert_eq!(resp.column(0).sum(), 2.0);
        assert_eq!(resp[(3, 1)], 1.0);
        for row in resp.row_iter() {
            assert_eq!(row.sum(), 1.0);
        }
    }

    #[test]
    fn test_init_random_left_to_right() {
        let mut hmm = Hmm::new(3, 1);
        let data = DMatrix::from_fn(10, 1, |i, _| i as f64);
        hmm.init_params_random(&data, true, 0.9, 7).unwrap();
        let t = hmm.trans();
        assert_eq!(t[(0, 2)], 0.0);
        assert_eq!(t[(1, 0)], 0.0);
        assert_eq!(t[(2, 2)], 1.0);
        assert_eq!(hmm.init_priors()[0], 1.0);
        assert_eq!(hmm.mu()[0], hmm.mu()[2]);
    }

    #[test]
    fn test_init_random_is_reproducible() {
        let data = DMatrix::from_fn(20, 2, |i, j| (i * (j + 1)) as f64 * 0.1);
        let mut a = Hmm::new(3, 2);
        let mut b = Hmm::new(3, 2);
        a.init_params_random(&data, false, 0.7, 11).unwrap();
        b.init_params_random(&data, false, 0.7, 11).unwrap();
        assert_eq!(a.mu(), b.mu());
        for row in a.trans().row_iter() {
            assert_approx_eq!(row.sum(), 1.0, 1e-12);
        }
    }

    #[test]
    fn test_init_loop_ring() {
        let mut hmm = Hmm::new(3, 1);
        let demo = DMatrix::from_fn(12, 1, |i, _| (i as f64).sin());
        hmm.init_loop(&[demo]).unwrap();
        let t = hmm.trans();
        assert_approx_eq!(t[(2, 0)], 0.02);
        assert_approx_eq!(t[(0, 0)], 0.98);
        for row in t.row_iter() {
            assert_approx_eq!(row.sum(), 1.0, 1e-12);
        }
    }

    #[test]
    fn test_init_kmeans_separates_clusters() {
        let mut hmm = Hmm::new(2, 1);
        let demo = DMatrix::from_column_slice(8, 1, &[0.0, 0.1, -0.1, 0.05, 10.0, 10.1, 9.9, 10.05]);
        hmm.init_kmeans(&[demo], 3).unwrap();
        let mut means: Vec<f64> = hmm.mu().iter().map(|m| m[0]).collect();
        means.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_approx_eq!(means[0], 0.0125, 1e-9);
        assert_approx_eq!(means[1], 10.0125, 1e-9);
    }

    #[test]
    fn test_make_finish_state_grows_model() {
        let mut hmm = two_state_1d();
        let demo = DMatrix::from_column_slice(5, 1, &[0.0, 1.0, 2.0, 3.0, 4.0]);
        hmm.make_finish_state(&[demo], None).unwrap();
        assert_eq!(hmm.nb_states(), 3);
        assert!(hmm.has_finish_state());
        assert_approx_eq!(hmm.mu()[2][0], 3.0);
        assert_eq!(hmm.init_priors()[2], 0.0);
        let t = hmm.trans();
        assert_eq!(t.shape(), (3, 3));
        assert_eq!(t[(2, 2)], 1.0);
    }

    #[test]
    fn test_make_finish_state_single_sample_uses_reg() {
        let mut hmm = two_state_1d();
        hmm.reg = Regularization::Scalar(0.5);
        let demo = DMatrix::from_element(1, 1, 2.0);
        hmm.make_finish_state(&[demo], None).unwrap();
        assert_approx_eq!(hmm.sigma()[2][(0, 0)], 0.5);
    }
}
