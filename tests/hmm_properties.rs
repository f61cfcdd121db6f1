//! Structural properties of the HMM engine checked on trained models.

use assert_approx_eq::assert_approx_eq;
use motion_primitives::{
    CovarianceType, Demonstration, DependencyBlock, EmConfig, Hmm, ModelCriteria, ModelError,
};
use nalgebra::DMatrix;
use std::collections::HashMap;

fn demonstrations() -> Vec<Demonstration> {
    (0..4)
        .map(|k| {
            let phase = 0.1 * k as f64;
            let x = DMatrix::from_fn(40, 3, |t, j| {
                let s = t as f64 / 40.0;
                match j {
                    0 => s + 0.01 * phase,
                    1 => (3.0 * s + phase).sin(),
                    _ => (2.0 * s).cos() + 0.02 * (t % 3) as f64,
                }
            });
            let mut extra = HashMap::new();
            extra.insert("time".to_string(), DMatrix::from_fn(40, 1, |t, _| t as f64));
            Demonstration { x, extra }
        })
        .collect()
}

#[test]
fn test_trained_model_is_a_valid_markov_chain() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(4, 3);
    hmm.init_kbins(&demos).expect("k-bins init");
    let report = hmm.em(&demos, &EmConfig::default()).expect("EM");

    assert_approx_eq!(hmm.init_priors().sum(), 1.0, 1e-8);
    for row in hmm.trans().row_iter() {
        assert_approx_eq!(row.sum(), 1.0, 1e-8);
    }
    for w in report.log_likelihoods.windows(2) {
        assert!(w[1] >= w[0] - 1e-6);
    }
    assert!(!hmm.used_default_parameters());
}

#[test]
fn test_messages_are_consistent() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(3, 3);
    hmm.init_kmeans(&demos, 7).expect("k-means init");

    let m = hmm.compute_messages(&demos[1].x, None, None).expect("messages");
    assert_eq!(m.zeta.len(), 39);
    for t in 0..m.len() {
        assert_approx_eq!(m.gamma.column(t).sum(), 1.0, 1e-9);
    }
    for (t, z) in m.zeta.iter().enumerate() {
        assert_approx_eq!(z.sum(), m.gamma.column(t).sum(), 1e-8);
    }
    assert_approx_eq!(m.log_likelihood(), hmm.log_likelihood(&demos[1].x).unwrap(), 1e-12);
}

#[test]
fn test_time_only_messages_follow_the_transition_model() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(3, 3);
    hmm.init_params_random(&demos[0].x, true, 0.8, 1).expect("init");

    // No observed dimensions: every frame is equally likely under every state
    let m = hmm.compute_messages(&demos[0].x, None, Some(0..0)).expect("messages");
    assert_approx_eq!(m.alpha[(0, 0)], 1.0, 1e-12);
    assert_approx_eq!(m.alpha[(0, 1)], 0.8, 1e-12);
}

#[test]
fn test_dependency_structure_trains_block_diagonal_covariances() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(2, 3);
    let config = EmConfig::default()
        .with_dep(vec![DependencyBlock::Range(0..2), DependencyBlock::Indices(vec![2])])
        .with_max_steps(8);
    hmm.em(&demos, &config).expect("EM");
    for s in hmm.sigma() {
        assert_eq!(s[(0, 2)], 0.0);
        assert_eq!(s[(2, 1)], 0.0);
        assert!(s[(0, 1)].abs() > 0.0);
    }
}

#[test]
fn test_finish_state_is_absorbing_and_trainable() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(3, 3);
    hmm.init_params_random(&demos[0].x, true, 0.9, 3).unwrap();
    hmm.make_finish_state(&demos, None).unwrap();
    assert_eq!(hmm.nb_states(), 4);

    hmm.em(&demos, &EmConfig::left_to_right(0.9).with_max_steps(5)).unwrap();
    let trans = hmm.trans();
    assert_approx_eq!(trans[(3, 3)], 1.0, 1e-9);
    assert_eq!(hmm.viterbi(&demos[0].x, true).unwrap().len(), 40);
}

#[test]
fn test_viterbi_indices_are_valid() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(5, 3);
    hmm.em(&demos, &EmConfig::default().with_max_steps(6)).unwrap();
    for demo in &demos {
        let path = hmm.viterbi(&demo.x, true).unwrap();
        assert_eq!(path.len(), demo.x.nrows());
        assert!(path.iter().all(|&s| s < 5));
    }
}

#[test]
fn test_model_criteria_prefer_fewer_states_on_equal_fit() {
    let demos = demonstrations();
    let mut hmm = Hmm::new(2, 3);
    hmm.em(&demos, &EmConfig::default().with_max_steps(5)).unwrap();
    let ll: f64 = demos.iter().map(|d| hmm.log_likelihood(&d.x).unwrap()).sum();
    let small = ModelCriteria::from_log_likelihood(ll, &hmm, CovarianceType::Full, 160);
    let large = ModelCriteria::from_log_likelihood(ll, &Hmm::new(6, 3), CovarianceType::Full, 160);
    assert!(small.bic < large.bic);
    assert!(small.aic < large.aic);
}

#[test]
fn test_empty_demonstration_set_is_rejected() {
    let mut hmm = Hmm::new(2, 3);
    let demos: Vec<Demonstration> = Vec::new();
    assert!(matches!(
        hmm.em(&demos, &EmConfig::default()),
        Err(ModelError::InsufficientData { .. })
    ));
}
