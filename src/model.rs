//! Capability interface of the truth-model collaborator.
//!
//! The engine never assembles finite-element operators itself. Everything it
//! needs from the high-fidelity side goes through [`TruthModel`]: the affine
//! decomposition cardinalities, the beta coefficients, the action of the
//! mu-independent operators, the energy scalar product and its inverse Riesz
//! map, and the truth solves that produce snapshots.
//!
//! Truth-space elements are dense [`faer::Col`] columns. A distributed
//! implementation is free to hide its layout behind this trait; the engine
//! only ever combines elements through the operations below.

use faer::{Col, ColRef};
use problemo::Problem;

use crate::error::CrbError;
use crate::linalg::dot;
use crate::parameter::{Parameter, ParameterSpace};
use crate::{E, I};

/// Beta coefficients of the affine decomposition at one parameter (and,
/// optionally, one state and time): `theta(mu)` layers for the mass form,
/// the bilinear form and the output functionals.
///
/// Layout mirrors the decomposition: `m[q][m]`, `a[q][m]`, `f[output][q][m]`.
/// In Newton mode the `a` layer carries the Jacobian coefficients and the
/// `f[0]` layer the residual coefficients.
#[derive(Debug, Clone)]
pub struct BetaQm {
    pub m: Vec<Vec<E>>,
    pub a: Vec<Vec<E>>,
    pub f: Vec<Vec<Vec<E>>>,
}

/// Contract between the reduced-basis engine and the truth model.
pub trait TruthModel {
    /// Number of degrees of freedom of the truth discretisation.
    fn dimension(&self) -> I;

    /// The parameter domain `D`.
    fn parameter_space(&self) -> &ParameterSpace;

    /// Reference parameter `mu_bar` (energy scalar product, min-theta bound).
    fn reference_parameter(&self) -> Parameter;

    /// Number of output functionals (`f` layer count); index 0 is the
    /// right-hand side.
    fn n_outputs(&self) -> I;

    /// Number of terms of the bilinear-form decomposition.
    fn qa(&self) -> I;

    /// Number of sub-terms of the `q`-th bilinear term.
    fn m_max_a(&self, q: I) -> I;

    /// Number of terms of the mass-form decomposition (0 for steady models).
    fn qm(&self) -> I;

    fn m_max_m(&self, q: I) -> I;

    /// Number of terms of the `output`-th functional decomposition.
    fn ql(&self, output: I) -> I;

    fn m_max_f(&self, output: I, q: I) -> I;

    /// Beta coefficients at `mu` and time `t`.
    fn compute_beta(&self, mu: &Parameter, time: E) -> Result<BetaQm, Problem>;

    /// Beta coefficients at `mu`, time `t` and state `u` (truth expansion of
    /// the current reduced iterate). Models whose coefficients do not depend
    /// on the state fall back to [`TruthModel::compute_beta`].
    fn compute_beta_with_state(
        &self,
        _u: ColRef<'_, E>,
        mu: &Parameter,
        time: E,
    ) -> Result<BetaQm, Problem> {
        self.compute_beta(mu, time)
    }

    /// Action of the mu-independent bilinear term: `A_{q,m} x`, or
    /// `A_{q,m}^T x` when `transpose` is set.
    fn apply_a(&self, q: I, m: I, x: ColRef<'_, E>, transpose: bool) -> Col<E>;

    /// Action of the mu-independent mass term `M_{q,m} x`.
    fn apply_m(&self, q: I, m: I, x: ColRef<'_, E>) -> Col<E>;

    /// Action of the mu-independent Jacobian term (Newton mode). Defaults to
    /// the bilinear action for models whose Jacobian shares the decomposition.
    fn apply_jacobian(&self, q: I, m: I, x: ColRef<'_, E>) -> Col<E> {
        self.apply_a(q, m, x, false)
    }

    /// The mu-independent functional vector `F_{q,m}` of layer `output`.
    fn f_vector(&self, output: I, q: I, m: I) -> Col<E>;

    /// Bilinear evaluation `v^T A_{q,m} w` (i.e. `a_{q,m}(w, v)`), with the
    /// transpose variant used by the dual tables.
    fn bilinear_a(&self, q: I, m: I, v: ColRef<'_, E>, w: ColRef<'_, E>, transpose: bool) -> E {
        dot(v, self.apply_a(q, m, w, transpose).as_ref())
    }

    /// Mass evaluation `v^T M_{q,m} w`.
    fn bilinear_m(&self, q: I, m: I, v: ColRef<'_, E>, w: ColRef<'_, E>, transpose: bool) -> E {
        if transpose {
            dot(w, self.apply_m(q, m, v).as_ref())
        } else {
            dot(v, self.apply_m(q, m, w).as_ref())
        }
    }

    /// Jacobian evaluation `v^T J_{q,m} w` (Newton mode).
    fn bilinear_jacobian(&self, q: I, m: I, v: ColRef<'_, E>, w: ColRef<'_, E>) -> E {
        dot(v, self.apply_jacobian(q, m, w).as_ref())
    }

    /// Functional evaluation `F_{q,m}^T v`.
    fn functional(&self, output: I, q: I, m: I, v: ColRef<'_, E>) -> E {
        dot(self.f_vector(output, q, m).as_ref(), v)
    }

    /// Energy scalar product `(u, v)_X` of the truth space.
    fn scalar_product(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E;

    /// Riesz map: solves `(x, v)_X = (b, v)` for `x` (applies `X^{-1}`).
    fn l2_solve(&self, b: ColRef<'_, E>) -> Result<Col<E>, Problem>;

    /// `L2` norm of the difference `u - v`, used for fixed-point increments.
    fn compute_norm_l2(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E;

    /// `L2` inner product over the domain, used for the variance tables.
    fn domain_l2_inner(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E;

    /// Measure of the computational domain.
    fn domain_measure(&self) -> E;

    fn is_steady(&self) -> bool {
        true
    }

    fn time_initial(&self) -> E {
        0.0
    }

    fn time_step(&self) -> E {
        E::INFINITY
    }

    fn time_final(&self) -> E {
        E::INFINITY
    }

    /// Order of the BDF time-stepping scheme.
    fn time_order(&self) -> I {
        1
    }

    /// Truth primal solve at `mu` (steady). Transient models return the
    /// solution at the final time through [`TruthModel::solve_trajectory`].
    fn solve(&self, mu: &Parameter) -> Result<Col<E>, Problem>;

    /// Truth dual solve `A(mu)^T psi = -L(mu)` (steady).
    fn solve_dual(&self, _mu: &Parameter, _output: I) -> Result<Col<E>, Problem> {
        Err(Problem::from(CrbError::truth_model(
            "this truth model does not implement the dual solve",
        )))
    }

    /// Truth primal trajectory `u(t_1), ..., u(t_K)` for transient models.
    fn solve_trajectory(&self, _mu: &Parameter) -> Result<Vec<Col<E>>, Problem> {
        Err(Problem::from(CrbError::truth_model(
            "this truth model does not implement the transient solve",
        )))
    }

    /// Truth dual trajectory, backward in time, for transient models.
    fn solve_dual_trajectory(&self, _mu: &Parameter, _output: I) -> Result<Vec<Col<E>>, Problem> {
        Err(Problem::from(CrbError::truth_model(
            "this truth model does not implement the transient dual solve",
        )))
    }

    /// Initial condition `u_0(mu)` of a transient model.
    fn initialization_field(&self, _mu: &Parameter) -> Col<E> {
        Col::zeros(self.dimension())
    }

    /// Dual initial condition at `t_f`: mass-matrix projection of the output
    /// functional.
    fn dual_initial_field(&self, _mu: &Parameter, _output: I) -> Result<Col<E>, Problem> {
        Ok(Col::zeros(self.dimension()))
    }

    /// Assembled initial guess for nonlinear solves.
    fn assemble_initial_guess(&self, mu: &Parameter) -> Col<E> {
        self.initialization_field(mu)
    }

    /// Affine decomposition of the initial guess (projection onto the basis).
    fn q_initial_guess(&self) -> I {
        0
    }

    fn m_max_initial_guess(&self, _q: I) -> I {
        0
    }

    /// The mu-independent part of the initial-guess functional.
    fn initial_guess_vector(&self, _q: I, _m: I) -> Col<E> {
        Col::zeros(self.dimension())
    }

    /// Beta coefficients of the initial-guess decomposition.
    fn beta_initial_guess(&self, _mu: &Parameter) -> Result<Vec<Vec<E>>, Problem> {
        Ok(Vec::new())
    }
}
