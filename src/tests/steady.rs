//! End-to-end scenarios on steady models: greedy construction, the
//! reproduction property, certified bounds, residual identity, dual output
//! correction, and the alternative greedy drivers.

use crate::config::ErrorEstimationKind;
use crate::crb::Crb;
use crate::driver::Driver;
use crate::model::TruthModel;
use crate::parameter::{Parameter, Sampling, SamplingMode};
use crate::scm::MinThetaCoercivity;
use crate::tests::models::{AdvectionDiffusion1d, ThermalBlock1d};
use crate::{CrbConfig, E, OfflineHooks, OfflineStatus};
use faer::rand::SeedableRng;
use faer::rand::rngs::StdRng;
use rstest::rstest;
use rstest_reuse::{apply, template};

#[template]
#[rstest]
pub fn residual_strategies(
    #[values(ErrorEstimationKind::Residual, ErrorEstimationKind::ResidualScm)]
    kind: ErrorEstimationKind,
) {
}

#[apply(residual_strategies)]
fn greedy_terminates_under_each_residual_strategy(kind: ErrorEstimationKind) {
    let mut config = thermal_config();
    config.error_type = kind;
    config.dimension_max = 4;
    config.error_max = 1e-14;
    let (crb, status) = build_thermal_engine(config);
    assert_eq!(status, OfflineStatus::DimensionLimit);
    assert_eq!(crb.n(), 4);
    assert_eq!(crb.convergence().len(), 4);
}

fn thermal_config() -> CrbConfig {
    let mut config = CrbConfig::default();
    config.dimension_max = 20;
    config.error_max = 1e-6;
    config.error_type = ErrorEstimationKind::ResidualScm;
    config.sampling_size = 40;
    config.solve_dual_problem = true;
    config.compute_conditioning = true;
    config
}

fn thermal_coercivity() -> MinThetaCoercivity {
    MinThetaCoercivity::new(
        Parameter::new(vec![1.0]),
        ThermalBlock1d::beta_a_flat,
        ThermalBlock1d::beta_m_flat,
    )
}

fn build_thermal_engine(config: CrbConfig) -> (Crb<ThermalBlock1d>, OfflineStatus) {
    crate::tests::init_tracing();
    let model = ThermalBlock1d::steady(32);
    let mut crb = Crb::new(model, config)
        .unwrap()
        .with_coercivity(thermal_coercivity().into());
    let status = crb.offline(&mut OfflineHooks::default(), None).unwrap();
    (crb, status)
}

#[test]
fn greedy_converges_and_reproduces_the_selected_parameters() {
    let (crb, status) = build_thermal_engine(thermal_config());
    assert_eq!(status, OfflineStatus::Converged);
    assert!(crb.n() <= 20, "N = {} exceeds the expected budget", crb.n());

    for idx in 0..crb.selected_sampling().len() {
        let mu = crb.selected_sampling().at(idx).clone();
        let output = crb.run(&mu, None).unwrap();
        let truth = crb.model().solve(&mu).unwrap();
        let truth_output = crb.truth_output(&mu, &truth).unwrap();
        assert!(
            (output.output - truth_output).abs() < 1e-9,
            "reproduction fails at {}: reduced {} truth {}",
            mu,
            output.output,
            truth_output
        );
    }
}

#[test]
fn basis_is_orthonormal_after_three_gram_schmidt_passes() {
    let (crb, _) = build_thermal_engine(thermal_config());
    let deviation = crate::basis::gram_deviation(crb.model(), crb.primal_basis());
    assert!(deviation < 1e-8, "||G - I|| = {:e}", deviation);
}

#[test]
fn certified_bound_dominates_the_true_error() {
    let mut config = thermal_config();
    config.dimension_max = 4;
    config.error_max = 1e-14;
    let (crb, status) = build_thermal_engine(config);
    assert_eq!(status, OfflineStatus::DimensionLimit);

    let mut rng = StdRng::seed_from_u64(42);
    let space = crb.model().parameter_space().clone();
    for _ in 0..200 {
        let mu = space.random_element(&mut rng);
        let output = crb.run(&mu, None).unwrap();
        let truth = crb.model().solve(&mu).unwrap();
        let truth_output = crb.truth_output(&mu, &truth).unwrap();
        let error = (truth_output - output.output).abs();
        assert!(
            error <= output.bound * (1.0 + 1e-8) + 1e-12,
            "bound violated at {}: error {:e} > bound {:e}",
            mu,
            error,
            output.bound
        );
    }
}

#[test]
fn residual_tables_match_the_direct_dual_norm() {
    let (crb, _) = build_thermal_engine(thermal_config());
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..10 {
        let mu = crb.model().parameter_space().random_element(&mut rng);

        // At a small dimension the residual is large and the comparison is
        // meaningful in relative terms.
        let (from_tables, direct) = crb.check_residual(2, &mu).unwrap();
        assert!(
            (from_tables - direct).abs() / direct.abs().max(1e-30) < 1e-8,
            "residual mismatch at {} (N = 2): tables {:e} direct {:e}",
            mu,
            from_tables,
            direct
        );

        // At full dimension both evaluations sit in round-off; they must
        // still agree in absolute terms.
        let (from_tables, direct) = crb.check_residual(crb.n(), &mu).unwrap();
        assert!(
            (from_tables - direct).abs() < 1e-10,
            "residual mismatch at {} (N = {}): tables {:e} direct {:e}",
            mu,
            crb.n(),
            from_tables,
            direct
        );
    }
}

#[test]
fn conditioning_is_reported_and_moderate() {
    let (crb, _) = build_thermal_engine(thermal_config());
    let mu = Parameter::new(vec![3.0]);
    let output = crb.run(&mu, None).unwrap();
    let kappa = output.condition_number.expect("conditioning requested");
    assert!(kappa >= 1.0);
    assert!(kappa < 1e8, "kappa = {:e}", kappa);
}

#[test]
fn operator_tables_agree_with_the_truth_forms() {
    let (crb, _) = build_thermal_engine(thermal_config());
    let n = crb.n();
    let model = crb.model();
    for q in 0..2 {
        for i in 0..n {
            for j in 0..n {
                let stored = crb.aqm_pr.at(q, 0)[(i, j)];
                let direct = model.bilinear_a(
                    q,
                    0,
                    crb.primal_basis().at(i),
                    crb.primal_basis().at(j),
                    false,
                );
                assert!(
                    (stored - direct).abs() < 1e-10,
                    "A[{}][{},{}] drifted: {} vs {}",
                    q,
                    i,
                    j,
                    stored,
                    direct
                );
            }
        }
    }
}

#[test]
fn enrichment_preserves_existing_basis_vectors_and_blocks() {
    let mut config = thermal_config();
    config.dimension_max = 3;
    config.error_max = 1e-14;
    let (crb_small, _) = build_thermal_engine(config.clone());

    config.dimension_max = 6;
    let (crb_large, _) = build_thermal_engine(config);

    // The greedy is deterministic, so the first three steps coincide and the
    // leading blocks of the tables must be identical.
    for i in 0..crb_small.n() {
        let small = crb_small.primal_basis().at(i);
        let large = crb_large.primal_basis().at(i);
        let mut diff: E = 0.0;
        for k in 0..small.nrows() {
            diff = diff.max((small[k] - large[k]).abs());
        }
        assert!(diff < 1e-12, "basis vector {} changed by {:e}", i, diff);
    }
    for i in 0..crb_small.n() {
        for j in 0..crb_small.n() {
            assert!(
                (crb_small.aqm_pr.at(1, 0)[(i, j)] - crb_large.aqm_pr.at(1, 0)[(i, j)]).abs()
                    < 1e-12
            );
        }
    }
}

#[test]
fn no_residual_mode_walks_random_parameters() {
    crate::tests::init_tracing();
    let mut config = CrbConfig::default();
    config.dimension_max = 5;
    config.error_type = ErrorEstimationKind::NoResidual;
    config.sampling_size = 20;
    let model = ThermalBlock1d::steady(24);
    let mut crb = Crb::new(model, config).unwrap();
    let status = crb.offline(&mut OfflineHooks::default(), None).unwrap();
    assert_eq!(status, OfflineStatus::DimensionLimit);
    assert_eq!(crb.n(), 5);
    assert_eq!(crb.selected_sampling().len(), 5);

    // All selected parameters are distinct.
    for i in 0..5 {
        for j in (i + 1)..5 {
            assert_ne!(crb.selected_sampling().at(i), crb.selected_sampling().at(j));
        }
    }

    for idx in 0..5 {
        let mu = crb.selected_sampling().at(idx).clone();
        let output = crb.run(&mu, None).unwrap();
        assert_eq!(output.bound, -1.0);
        let truth = crb.model().solve(&mu).unwrap();
        let truth_output = crb.truth_output(&mu, &truth).unwrap();
        assert!((output.output - truth_output).abs() < 1e-9);
    }
}

#[test]
fn empirical_mode_runs_to_the_dimension_limit() {
    crate::tests::init_tracing();
    let mut config = CrbConfig::default();
    config.dimension_max = 6;
    config.error_type = ErrorEstimationKind::Empirical;
    config.factor = -1;
    config.sampling_size = 30;
    let model = ThermalBlock1d::steady(24);
    let mut crb = Crb::new(model, config).unwrap();
    let status = crb.offline(&mut OfflineHooks::default(), None).unwrap();
    assert_eq!(status, OfflineStatus::DimensionLimit);
    assert_eq!(crb.n(), 6);
    assert_eq!(crb.convergence().len(), 6);
    for record in crb.convergence().values() {
        assert!(record.max_error.is_finite());
    }

    // The empirical indicator has shrunk by the time the basis is rich.
    let mu = Parameter::new(vec![2.5]);
    let indicator = crb.empirical_error(crb.n(), &mu).unwrap();
    assert!(indicator < 1e-2, "empirical indicator {:e}", indicator);
}

#[test]
fn dual_correction_reproduces_a_non_compliant_output() {
    crate::tests::init_tracing();
    let mut config = CrbConfig::default();
    config.dimension_max = 6;
    config.error_max = 1e-11;
    config.error_type = ErrorEstimationKind::Residual;
    config.sampling_size = 30;
    config.solve_dual_problem = true;
    config.output_index = 1;
    config.use_symmetric_matrix = false;
    let model = AdvectionDiffusion1d::new(28);
    let mut crb = Crb::new(model, config).unwrap();
    crb.offline(&mut OfflineHooks::default(), None).unwrap();

    for idx in 0..crb.selected_sampling().len() {
        let mu = crb.selected_sampling().at(idx).clone();
        let output = crb.run(&mu, None).unwrap();
        let truth = crb.model().solve(&mu).unwrap();
        let truth_output = crb.truth_output(&mu, &truth).unwrap();
        assert!(
            (output.output - truth_output).abs() < 1e-9,
            "corrected output fails at {}: {} vs {}",
            mu,
            output.output,
            truth_output
        );
    }
}

#[test]
fn predefined_log_equidistributed_sampling_drives_the_greedy() {
    crate::tests::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("SamplingWNmu");

    let mut config = CrbConfig::default();
    config.error_type = ErrorEstimationKind::Residual;
    config.use_log_equidistributed_wnmu = 8;
    config.predefined_wnmu_file = file.to_string_lossy().into_owned();
    config.sampling_size = 10;
    let model = ThermalBlock1d::steady(24);
    let mut crb = Crb::new(model, config).unwrap();
    let status = crb.offline(&mut OfflineHooks::default(), None).unwrap();

    assert_eq!(status, OfflineStatus::SamplingExhausted);
    assert_eq!(crb.n(), 8);

    let from_file = Sampling::read_from_file(&file).unwrap();
    for idx in 0..8 {
        assert_eq!(crb.selected_sampling().at(idx), from_file.at(idx));
    }
}

#[test]
fn driver_verification_sweep_reports_statistics() {
    crate::tests::init_tracing();
    let model = ThermalBlock1d::steady(24);
    let mut config = thermal_config();
    config.dimension_max = 5;
    config.error_max = 1e-14;
    let mut driver = Driver::new(model, config, None)
        .unwrap()
        .with_coercivity(thermal_coercivity().into());
    let mut hooks = driver.standard_hooks();
    driver.offline(&mut hooks).unwrap();

    let sampling = driver.test_sampling(25).unwrap();
    let report = driver.verify(&sampling).unwrap();
    assert_eq!(report.rows.len(), 25);
    assert!(report.max_error >= report.mean_error);
    assert!(report.mean_error >= report.min_error);
    for row in &report.rows {
        let error = row.error.unwrap();
        assert!(error <= row.bound * (1.0 + 1e-8) + 1e-12);
    }

    let study = driver.convergence_study(&sampling).unwrap();
    assert_eq!(study.len(), driver.engine().n());
    // The worst error shrinks as the dimension grows.
    assert!(study.last().unwrap().max_error <= study.first().unwrap().max_error);
}

#[test]
fn variance_output_uses_the_phi_tables() {
    crate::tests::init_tracing();
    let mut config = CrbConfig::default();
    config.dimension_max = 3;
    config.error_max = 1e-14;
    config.error_type = ErrorEstimationKind::Residual;
    config.sampling_size = 15;
    config.save_information_for_variance = true;
    config.compute_variance = true;
    let model = ThermalBlock1d::steady(20);
    let mut crb = Crb::new(model, config).unwrap();
    crb.offline(&mut OfflineHooks::default(), None).unwrap();

    let mu = Parameter::new(vec![1.5]);
    let solution = crb.online_solve(crb.n(), &mu, None).unwrap();
    // A variance is a centred second moment: non-negative.
    assert!(solution.outputs[0] >= -1e-14);
    assert!(crb.variance_phi.is_some());
}

#[test]
fn variance_request_without_tables_is_rejected() {
    let mut config = CrbConfig::default();
    config.compute_variance = true;
    config.save_information_for_variance = false;
    assert!(config.validate().is_err());
}

#[test]
fn timing_statistics_cover_the_requested_evaluations() {
    crate::tests::init_tracing();
    let model = ThermalBlock1d::steady(16);
    let mut config = CrbConfig::default();
    config.dimension_max = 3;
    config.error_max = 1e-14;
    config.error_type = ErrorEstimationKind::Residual;
    config.sampling_size = 10;
    config.computational_time_neval = 4;
    let neval = config.computational_time_neval;
    let mut driver = Driver::new(model, config, None).unwrap();
    driver.offline(&mut OfflineHooks::default()).unwrap();

    let stats = driver.timing_statistics(neval).unwrap();
    assert_eq!(stats.evaluations, 4);
    assert!(stats.min_seconds <= stats.mean_seconds);
    assert!(stats.mean_seconds <= stats.max_seconds);
}

#[test]
fn equidistributed_test_sampling_is_honoured() {
    crate::tests::init_tracing();
    let model = ThermalBlock1d::steady(16);
    let mut config = CrbConfig::default();
    config.sampling_mode = SamplingMode::Equidistributed;
    config.dimension_max = 2;
    config.error_max = 1e-14;
    config.error_type = ErrorEstimationKind::Residual;
    config.sampling_size = 9;
    let mut crb = Crb::new(model, config).unwrap();
    crb.offline(&mut OfflineHooks::default(), None).unwrap();
    assert_eq!(crb.training_sampling().len(), 9);
    assert_eq!(
        crb.training_sampling().at(0),
        crb.model().parameter_space().min()
    );
}
