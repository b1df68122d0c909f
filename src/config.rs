//! Runtime configuration of the engine.
//!
//! Each field mirrors one `crb.*` runtime option; the serde names use the
//! option suffix in kebab-case, so a TOML table like
//!
//! ```toml
//! dimension-max = 30
//! error-max = 1e-6
//! error-type = "residual-scm"
//! ```
//!
//! maps onto `crb.dimension-max`, `crb.error-max`, `crb.error-type`.
//! Contradictory settings are rejected by [`CrbConfig::validate`] with a
//! configuration error naming the offending option.

use problemo::{Problem, ProblemResult};
use serde::{Deserialize, Serialize};

use crate::error::CrbError;
use crate::parameter::SamplingMode;
use crate::{E, I};

/// How the offline greedy estimates the error of a candidate parameter
/// (`crb.error-type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorEstimationKind {
    /// Residual dual norm without a certified coercivity bound; the reported
    /// quantity is a relative indicator.
    Residual,
    /// Residual dual norm divided by the SCM coercivity lower bound; the
    /// reported quantity is a certified bound.
    ResidualScm,
    /// No estimation; the greedy walks random parameters.
    #[serde(rename = "none")]
    NoResidual,
    /// Empirical estimation by `|s_N - s_N'|` at a smaller dimension.
    Empirical,
}

impl ErrorEstimationKind {
    pub fn uses_residual(&self) -> bool {
        matches!(self, Self::Residual | Self::ResidualScm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrbConfig {
    /// `crb.dimension-max`: maximum reduced dimension `N_max`.
    pub dimension_max: I,
    /// `crb.error-max`: offline tolerance on the estimated error.
    pub error_max: E,
    /// `crb.error-type`.
    pub error_type: ErrorEstimationKind,
    /// `crb.factor`: dimension divisor for the empirical estimator. The
    /// comparison dimension is `N/factor` when positive, `N+factor` when
    /// negative and `N > -factor`, and 1 otherwise.
    pub factor: i64,
    /// `crb.output-index`: which output functional the surrogate certifies.
    pub output_index: I,
    /// `crb.rebuild-database`: wipe any persisted state and restart at N=0.
    pub rebuild_database: bool,
    /// `crb.orthonormalize-primal`.
    pub orthonormalize_primal: bool,
    /// `crb.orthonormalize-dual`.
    pub orthonormalize_dual: bool,
    /// `crb.solve-dual-problem`: enable the dual pipeline (output correction
    /// and dual error contributions).
    pub solve_dual_problem: bool,
    /// `crb.use-newton`: Newton instead of fixed point for nonlinear solves.
    pub use_newton: bool,
    /// `crb.Nm`: POD modes appended per greedy step (transient problems).
    #[serde(rename = "Nm")]
    pub nm: I,
    /// `crb.seek-mu-in-complement`: restrict the greedy argmax to
    /// `Xi \ M_N`.
    pub seek_mu_in_complement: bool,
    /// `crb.use-predefined-WNmu`: drive the greedy from a sampling file.
    #[serde(rename = "use-predefined-WNmu")]
    pub use_predefined_wnmu: bool,
    /// `crb.use-logEquidistributed-WNmu`: generate the predefined sampling
    /// file with this many log-spaced parameters (0 disables).
    #[serde(rename = "use-logEquidistributed-WNmu")]
    pub use_log_equidistributed_wnmu: I,
    /// `crb.use-equidistributed-WNmu`: as above with uniform spacing.
    #[serde(rename = "use-equidistributed-WNmu")]
    pub use_equidistributed_wnmu: I,
    /// File name of the predefined sampling.
    pub predefined_wnmu_file: String,
    /// `crb.sampling-size`: size of the training sampling `Xi`.
    pub sampling_size: I,
    /// Generation mode of the training sampling.
    pub sampling_mode: SamplingMode,
    /// Seed of the sampling generator; offline runs are deterministic.
    pub sampling_seed: u64,
    /// `crb.reuse-prec`: hint forwarded to truth-model implementations that
    /// cache preconditioners between fixed-point iterations.
    pub reuse_preconditioner: bool,
    /// `crb.max-fixedpoint-iterations`.
    pub max_fixedpoint_iterations: I,
    /// `crb.increment-fixedpoint-tol`: convergence tolerance on the iterate
    /// increment.
    pub increment_fixedpoint_tol: E,
    /// `crb.output-fixedpoint-tol`: alternative tolerance on the output
    /// increment.
    pub output_fixedpoint_tol: E,
    /// `crb.fixedpoint-critical-value`: increment above which the fixed
    /// point is declared divergent (fatal).
    pub fixedpoint_critical_value: E,
    /// Print one line per fixed-point iteration.
    pub fixedpoint_verbose: bool,
    /// Newton tolerance (nonlinear online solves).
    pub newton_tolerance: E,
    /// Newton iteration cap.
    pub newton_max_iterations: I,
    /// `crb.compute-variance`: report the variance output instead of the
    /// functional value.
    pub compute_variance: bool,
    /// `crb.save-information-for-variance`: build and persist the variance
    /// tables during the offline stage.
    pub save_information_for_variance: bool,
    /// `crb.use-symmetric-matrix`: skip assembling the explicit transpose in
    /// the dual residual tables.
    pub use_symmetric_matrix: bool,
    /// `crb.compute-conditioning`: report the condition number of the
    /// reduced matrix.
    pub compute_conditioning: bool,
    /// `crb.save-output-behavior`: dump the transient output trajectory to a
    /// per-parameter file.
    pub save_output_behavior: bool,
    /// `crb.check.rb`: after each enrichment, re-solve at every selected
    /// parameter and compare with the truth output.
    pub check_rb: bool,
    /// `crb.check.residual`: compare the table-based residual against a
    /// direct truth-space evaluation.
    pub check_residual: bool,
    /// `crb.check.gs`: verify `||G - I||` after orthonormalisation.
    pub check_gs: bool,
    /// `crb.computational-time-neval`: sample size for online timing
    /// statistics.
    pub computational_time_neval: I,
    /// Wall-clock budget of the offline stage in seconds, enforced by
    /// [`crate::terminators::TimeBudgetTerminator`]; 0 disables.
    pub offline_time_budget_secs: u64,
    /// `crb.results-repo-name`: stem of the persisted database files.
    pub results_repo_name: String,
    /// `crb.run-on-WNmu`: verification sweep over the selected sampling.
    #[serde(rename = "run-on-WNmu")]
    pub run_on_wnmu: bool,
    /// `crb.run-on-scm-parameters`: verification sweep over the SCM
    /// parameter set.
    pub run_on_scm_parameters: bool,
    /// `crb.script-mode`: machine-readable driver output.
    pub script_mode: bool,
    /// `crb.use-predefined-test-sampling`: read the verification sampling
    /// from a file instead of generating it.
    pub use_predefined_test_sampling: bool,
    /// File name of the predefined test sampling.
    pub predefined_test_sampling_file: String,
    /// `crb.print-error-during-rb-construction`.
    pub print_error_during_rb_construction: bool,
    /// `crb.show-mu-selection`: print the selected parameters at the end of
    /// the offline stage.
    pub show_mu_selection: bool,
    /// `crb.cvg-study`: gather per-N convergence tables during verification.
    pub cvg_study: bool,
    /// `crb.online-tolerance`: target tolerance of online queries issued by
    /// the driver.
    pub online_tolerance: E,
    /// `crb.stock-matrices`: keep the assembled truth operators cached by
    /// the model between offline steps.
    pub stock_matrices: bool,
}

impl Default for CrbConfig {
    fn default() -> Self {
        Self {
            dimension_max: 10,
            error_max: 1e-6,
            error_type: ErrorEstimationKind::Residual,
            factor: -1,
            output_index: 0,
            rebuild_database: false,
            orthonormalize_primal: true,
            orthonormalize_dual: true,
            solve_dual_problem: false,
            use_newton: false,
            nm: 1,
            seek_mu_in_complement: true,
            use_predefined_wnmu: false,
            use_log_equidistributed_wnmu: 0,
            use_equidistributed_wnmu: 0,
            predefined_wnmu_file: "SamplingWNmu".to_string(),
            sampling_size: 100,
            sampling_mode: SamplingMode::Random,
            sampling_seed: 0,
            reuse_preconditioner: false,
            max_fixedpoint_iterations: 20,
            increment_fixedpoint_tol: 1e-10,
            output_fixedpoint_tol: 1e-10,
            fixedpoint_critical_value: 1e3,
            fixedpoint_verbose: false,
            newton_tolerance: 1e-12,
            newton_max_iterations: 100,
            compute_variance: false,
            save_information_for_variance: false,
            use_symmetric_matrix: true,
            compute_conditioning: false,
            save_output_behavior: false,
            check_rb: false,
            check_residual: false,
            check_gs: false,
            computational_time_neval: 0,
            offline_time_budget_secs: 0,
            results_repo_name: "crb".to_string(),
            run_on_wnmu: false,
            run_on_scm_parameters: false,
            script_mode: false,
            use_predefined_test_sampling: false,
            predefined_test_sampling_file: "SamplingForTest".to_string(),
            print_error_during_rb_construction: false,
            show_mu_selection: false,
            cvg_study: false,
            online_tolerance: 1e-2,
            stock_matrices: true,
        }
    }
}

impl CrbConfig {
    /// Parses a TOML fragment; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, Problem> {
        let config: CrbConfig =
            toml::from_str(text).via(CrbError::database("cannot parse configuration"))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects contradictory option combinations.
    pub fn validate(&self) -> Result<(), Problem> {
        if self.check_residual && !self.error_type.uses_residual() {
            return Err(Problem::from(CrbError::configuration(
                "crb.check.residual",
                "residual checking requires a residual error type",
            )));
        }
        if self.compute_variance && !self.save_information_for_variance {
            return Err(Problem::from(CrbError::configuration(
                "crb.compute-variance",
                "variance output requires crb.save-information-for-variance",
            )));
        }
        if self.error_type == ErrorEstimationKind::Empirical && self.factor == 0 {
            return Err(Problem::from(CrbError::configuration(
                "crb.factor",
                "the empirical estimator needs a non-zero factor",
            )));
        }
        if self.nm == 0 {
            return Err(Problem::from(CrbError::configuration(
                "crb.Nm",
                "at least one POD mode per step is required",
            )));
        }
        Ok(())
    }

    /// Whether a predefined sampling drives the greedy, either explicitly or
    /// through a generation request.
    pub fn predefined_wnmu_requested(&self) -> bool {
        self.use_predefined_wnmu
            || self.use_log_equidistributed_wnmu > 0
            || self.use_equidistributed_wnmu > 0
    }

    /// Comparison dimension of the empirical estimator for a basis of
    /// dimension `n`.
    pub fn empirical_comparison_dimension(&self, n: I) -> I {
        if self.factor > 0 {
            (n / self.factor as I).max(1)
        } else if self.factor < 0 && n > (-self.factor) as I {
            n - (-self.factor) as I
        } else {
            1
        }
    }
}
