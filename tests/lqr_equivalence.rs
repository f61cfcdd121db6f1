//! The Riccati recursion and the lifted product-of-Gaussians solve minimize the same cost,
//! so their rollouts must coincide.

use motion_primitives::{
    Backend, CostDistribution, GaussianPrecision, LinearSystem, PogLqr, RiccatiSolver,
};
use nalgebra::{DMatrix, DVector};

const HORIZON: usize = 20;

fn via_points() -> CostDistribution {
    let precision = DMatrix::from_diagonal(&DVector::from_vec(vec![5.0, 5.0, 0.5, 0.5]));
    CostDistribution::Sequence(
        (0..HORIZON)
            .map(|t| {
                let s = t as f64 / HORIZON as f64;
                GaussianPrecision::new(
                    DVector::from_vec(vec![s.cos(), s.sin(), 0.0, 0.0]),
                    precision.clone(),
                )
                .expect("valid via-point")
            })
            .collect(),
    )
}

fn assert_close(a: &DVector<f64>, b: &DVector<f64>, tol: f64) {
    let err = (a - b).amax();
    assert!(err < tol, "{} vs {} differ by {}", a, b, err);
}

fn check_backend(backend: Backend) {
    let system = LinearSystem::double_integrator(2, 0.1);
    let target = via_points();
    let control = CostDistribution::isotropic(-1.0, 2);
    let x0 = DVector::from_vec(vec![0.2, -0.3, 0.0, 0.1]);

    let riccati = RiccatiSolver::solve(&system, HORIZON, &target, &control)
        .and_then(|sol| sol.rollout(&x0))
        .expect("Riccati solve");

    let mut lifted = PogLqr::new(system, HORIZON).expect("lifted solver").with_backend(backend);
    lifted.set_x0(x0).expect("initial state");
    lifted.set_target(target);
    lifted.set_control_cost(control);

    let states = lifted.state_sequence().expect("state sequence").to_vec();
    let controls = lifted.control_sequence().expect("control sequence").to_vec();

    assert_eq!(states.len(), riccati.states.len());
    for (a, b) in states.iter().zip(&riccati.states) {
        assert_close(a, b, 1e-6);
    }
    assert_eq!(controls.len(), riccati.controls.len() + 1);
    for (a, b) in controls.iter().zip(&riccati.controls) {
        assert_close(a, b, 1e-6);
    }
    // The last control never influences a state, so only its own cost applies
    assert_close(&controls[HORIZON - 1], &DVector::zeros(2), 1e-9);
}

#[test]
fn test_dense_lifted_solution_matches_riccati() {
    check_backend(Backend::Dense);
}

#[test]
fn test_sparse_lifted_solution_matches_riccati() {
    check_backend(Backend::Sparse);
}

#[test]
fn test_scheduled_targets_match_explicit_sequence() {
    let system = LinearSystem::double_integrator(1, 0.05);
    let near = GaussianPrecision::new(DVector::from_vec(vec![0.0, 0.0]), DMatrix::identity(2, 2)).unwrap();
    let far = GaussianPrecision::new(DVector::from_vec(vec![1.0, 0.0]), DMatrix::identity(2, 2) * 10.0).unwrap();
    let schedule: Vec<usize> = (0..10).map(|t| usize::from(t >= 5)).collect();

    let scheduled = CostDistribution::Scheduled {
        components: vec![near.clone(), far.clone()],
        schedule: schedule.clone(),
    };
    let explicit = CostDistribution::Sequence(
        schedule.iter().map(|&k| if k == 0 { near.clone() } else { far.clone() }).collect(),
    );
    let control = CostDistribution::isotropic(-2.0, 1);
    let x0 = DVector::zeros(2);

    let a = RiccatiSolver::solve(&system, 10, &scheduled, &control)
        .and_then(|s| s.rollout(&x0))
        .unwrap();
    let b = RiccatiSolver::solve(&system, 10, &explicit, &control)
        .and_then(|s| s.rollout(&x0))
        .unwrap();
    assert_eq!(a, b);
}
