//! Engine state shared by the offline and online phases.
//!
//! [`Crb`] owns the truth model, the reduced bases, every reduced operator
//! table, the residual precomputations and the greedy bookkeeping. The
//! offline loop lives in [`crate::greedy`], the reduced solvers and the error
//! estimator in [`crate::online`], persistence in [`crate::db`].

use std::collections::BTreeMap;

use faer::rand::SeedableRng;
use faer::rand::rngs::StdRng;
use faer::{Col, ColRef, Mat};
use problemo::Problem;

use crate::affine::{OperatorTable, VectorTable};
use crate::basis::ReducedBasis;
use crate::config::CrbConfig;
use crate::error::CrbError;
use crate::model::TruthModel;
use crate::parameter::{Parameter, Sampling};
use crate::residual::ResidualTables;
use crate::scm::CoercivityProvider;
use crate::{E, I};

/// One row of the offline convergence history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceRecord {
    pub max_error: E,
    pub delta_pr: E,
    pub delta_du: E,
}

/// The certified reduced-basis engine.
pub struct Crb<M: TruthModel> {
    pub(crate) model: M,
    pub(crate) config: CrbConfig,
    pub(crate) coercivity: Option<CoercivityProvider>,
    pub(crate) rng: StdRng,

    /// Current reduced dimension `N`.
    pub(crate) n: I,
    pub(crate) basis_pr: ReducedBasis,
    pub(crate) basis_du: ReducedBasis,

    /// Training sampling `Xi`.
    pub(crate) xi: Sampling,
    /// Selected parameters `M_N`, in enrichment order.
    pub(crate) wnmu: Sampling,
    /// For each greedy step, the index of the selected parameter in `Xi`.
    pub(crate) selection_indices: Vec<I>,
    /// Multiplicity of the currently selected parameter (transient POD).
    pub(crate) mode_number: I,

    pub(crate) aqm_pr: OperatorTable,
    pub(crate) aqm_du: OperatorTable,
    pub(crate) aqm_pr_du: OperatorTable,
    pub(crate) mqm_pr: OperatorTable,
    pub(crate) mqm_du: OperatorTable,
    pub(crate) mqm_pr_du: OperatorTable,
    pub(crate) jqm_pr: OperatorTable,
    pub(crate) fqm_pr: VectorTable,
    pub(crate) fqm_du: VectorTable,
    pub(crate) lqm_pr: VectorTable,
    pub(crate) lqm_du: VectorTable,
    pub(crate) rqm_pr: VectorTable,
    pub(crate) initial_guess_pr: VectorTable,

    /// Gram matrix of the primal basis in the truth scalar product, kept for
    /// the online initial-guess projection when the basis is not orthonormal.
    pub(crate) gram_pr: Mat<E>,

    /// Projection coefficients of the initial condition, primal and dual.
    pub(crate) coeff_pr_ini: Vec<E>,
    pub(crate) coeff_du_ini: Vec<E>,

    pub(crate) residual: ResidualTables,

    /// Variance matrix `Phi` (built when requested).
    pub(crate) variance_phi: Option<Mat<E>>,

    pub(crate) convergence: BTreeMap<I, ConvergenceRecord>,
    pub(crate) max_error: E,
    pub(crate) current_mu: Option<Parameter>,
}

impl<M: TruthModel> Crb<M> {
    pub fn new(model: M, config: CrbConfig) -> Result<Self, Problem> {
        config.validate()?;
        if config.output_index >= model.n_outputs() {
            return Err(Problem::from(CrbError::configuration(
                "crb.output-index",
                format!(
                    "output {} requested but the model has {} outputs",
                    config.output_index,
                    model.n_outputs()
                ),
            )));
        }

        let output = config.output_index;
        let residual = ResidualTables::new(&model, output);

        let aqm = || OperatorTable::new(model.qa(), |q| model.m_max_a(q));
        let mqm = || OperatorTable::new(model.qm(), |q| model.m_max_m(q));

        let rng = StdRng::seed_from_u64(config.sampling_seed);

        Ok(Self {
            aqm_pr: aqm(),
            aqm_du: aqm(),
            aqm_pr_du: aqm(),
            mqm_pr: mqm(),
            mqm_du: mqm(),
            mqm_pr_du: mqm(),
            jqm_pr: aqm(),
            fqm_pr: VectorTable::new(model.ql(0), |q| model.m_max_f(0, q)),
            fqm_du: VectorTable::new(model.ql(0), |q| model.m_max_f(0, q)),
            lqm_pr: VectorTable::new(model.ql(output), |q| model.m_max_f(output, q)),
            lqm_du: VectorTable::new(model.ql(output), |q| model.m_max_f(output, q)),
            rqm_pr: VectorTable::new(model.ql(0), |q| model.m_max_f(0, q)),
            initial_guess_pr: VectorTable::new(model.q_initial_guess(), |q| {
                model.m_max_initial_guess(q)
            }),
            gram_pr: Mat::zeros(0, 0),
            coeff_pr_ini: Vec::new(),
            coeff_du_ini: Vec::new(),
            residual,
            variance_phi: None,
            convergence: BTreeMap::new(),
            max_error: E::INFINITY,
            current_mu: None,
            n: 0,
            basis_pr: ReducedBasis::new(),
            basis_du: ReducedBasis::new(),
            xi: Sampling::empty(),
            wnmu: Sampling::empty(),
            selection_indices: Vec::new(),
            mode_number: 1,
            model,
            config,
            coercivity: None,
            rng,
        })
    }

    /// Installs the coercivity-bound provider (SCM collaborator or one of the
    /// in-crate bounds).
    pub fn with_coercivity(mut self, provider: CoercivityProvider) -> Self {
        self.coercivity = Some(provider);
        self
    }

    pub fn n(&self) -> I {
        self.n
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &CrbConfig {
        &self.config
    }

    pub fn convergence(&self) -> &BTreeMap<I, ConvergenceRecord> {
        &self.convergence
    }

    pub fn training_sampling(&self) -> &Sampling {
        &self.xi
    }

    pub fn selected_sampling(&self) -> &Sampling {
        &self.wnmu
    }

    pub fn primal_basis(&self) -> &ReducedBasis {
        &self.basis_pr
    }

    pub fn dual_basis(&self) -> &ReducedBasis {
        &self.basis_du
    }

    pub fn max_error(&self) -> E {
        self.max_error
    }

    pub(crate) fn is_transient(&self) -> bool {
        !self.model.is_steady()
    }

    /// Truth-space expansion of a primal coefficient vector.
    pub fn expansion_pr(&self, coeff: ColRef<'_, E>, n: I) -> Col<E> {
        self.basis_pr.expansion(coeff, n)
    }

    /// Clamps a requested online dimension to the available basis.
    pub(crate) fn clamp_dimension(&self, n: I) -> Result<I, Problem> {
        if self.n == 0 {
            return Err(Problem::from(CrbError::configuration(
                "crb.dimension-max",
                "no reduced basis has been built yet",
            )));
        }
        Ok(n.min(self.n).max(1))
    }
}
