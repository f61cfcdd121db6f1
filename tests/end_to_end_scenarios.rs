//! End-to-end scenarios covering learning, decoding and control together.

use assert_approx_eq::assert_approx_eq;
use motion_primitives::{
    CostDistribution, EmConfig, GaussianPrecision, Hmm, LinearSystem, OnlineFilter, RiccatiSolver,
};
use nalgebra::{DMatrix, DVector};

/// A two-state left-to-right model trained on a ramp splits it into an early and a late
/// segment, and the decoded path never moves backwards.
#[test]
fn test_left_to_right_model_segments_a_ramp() {
    let demo = DMatrix::from_fn(20, 1, |t, _| t as f64);
    let mut hmm = Hmm::new(2, 1);

    let report = hmm
        .em(std::slice::from_ref(&demo), &EmConfig::left_to_right(0.9))
        .expect("EM should run on a clean ramp");
    assert!(report.converged, "EM stopped after {} iterations", report.iterations);
    assert!(!report.log_likelihoods.is_empty());

    assert!(hmm.mu()[0][0] < hmm.mu()[1][0], "states should be ordered in time");
    assert_eq!(hmm.trans()[(1, 0)], 0.0);
    assert_approx_eq!(hmm.init_priors()[0], 1.0, 1e-9);

    let path = hmm.viterbi(&demo, false).expect("Viterbi should decode");
    assert_eq!(path.len(), 20);
    assert_eq!(path[0], 0);
    assert_eq!(path[19], 1);
    assert!(path.windows(2).all(|w| w[0] <= w[1]), "path went backwards: {:?}", path);
}

/// Feeding observations that sit on one state's mean drives the filter towards it.
#[test]
fn test_online_filter_locks_onto_observed_state() {
    let hmm = Hmm::from_parameters(
        DVector::from_vec(vec![0.5, 0.5]),
        DMatrix::from_row_slice(2, 2, &[0.9, 0.1, 0.1, 0.9]),
        vec![DVector::from_vec(vec![0.0]), DVector::from_vec(vec![5.0])],
        vec![DMatrix::identity(1, 1), DMatrix::identity(1, 1)],
    )
    .expect("valid parameters");

    let mut filter = OnlineFilter::new();
    let x = DVector::from_vec(vec![0.0]);
    let mut weights = Vec::new();
    for t in 0..5 {
        let h = filter.step(&hmm, &x, None, t == 0).expect("filter step");
        assert_approx_eq!(h.sum(), 1.0, 1e-12);
        assert!(h[0] > h[1]);
        weights.push(h[0]);
    }
    assert!(weights.windows(2).all(|w| w[1] >= w[0] - 1e-12));
    assert!(weights[4] > 0.99);
}

/// Raising the control precision makes control effort more expensive, so the controls
/// needed to reach the same target shrink.
#[test]
fn test_control_precision_trades_effort_for_tracking() {
    let system = LinearSystem::double_integrator(1, 0.1);
    let target = CostDistribution::Stationary(
        GaussianPrecision::new(DVector::from_vec(vec![1.0, 0.0]), DMatrix::identity(2, 2))
            .expect("valid target"),
    );
    let x0 = DVector::zeros(2);

    let effort = |exponent: f64| {
        let control = CostDistribution::isotropic(exponent, 1);
        RiccatiSolver::solve(&system, 50, &target, &control)
            .and_then(|sol| sol.rollout(&x0))
            .map(|r| r.max_abs_control())
            .expect("Riccati solve")
    };

    let cheap = effort(-2.0);
    let expensive = effort(2.0);
    assert!(
        expensive < cheap,
        "precision 1e2 should yield smaller controls ({}) than 1e-2 ({})",
        expensive,
        cheap
    );
}

/// Identity dynamics driven by a single input, pulled towards the origin: the expensive
/// control cost yields smaller controls than the cheap one.
#[test]
fn test_control_precision_on_identity_dynamics() {
    let system = LinearSystem::new(
        DMatrix::identity(2, 2),
        DMatrix::from_column_slice(2, 1, &[1.0, 1.0]),
        1.0,
    )
    .expect("valid system");
    let target = CostDistribution::Stationary(
        GaussianPrecision::new(DVector::zeros(2), DMatrix::identity(2, 2)).expect("valid target"),
    );
    let x0 = DVector::from_vec(vec![1.0, 1.0]);

    let effort = |exponent: f64| {
        RiccatiSolver::solve(&system, 10, &target, &CostDistribution::isotropic(exponent, 1))
            .and_then(|sol| sol.rollout(&x0))
            .map(|r| r.max_abs_control())
            .expect("Riccati solve")
    };

    let cheap = effort(-2.0);
    let expensive = effort(2.0);
    assert!(cheap > 0.0);
    assert!(expensive < cheap, "{} should be below {}", expensive, cheap);
}
