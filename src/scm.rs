//! Coercivity lower bounds for the error estimator.
//!
//! The estimator divides the residual dual norm by a lower bound of the
//! coercivity (or inf-sup) constant of the truth bilinear form, and of the
//! mass form for transient problems. The bound is usually delivered by an
//! external Successive Constraint Method collaborator; this module defines
//! that contract and ships two in-crate providers: the classical min-theta
//! bound for parametrically coercive forms, and a fixed constant.

use enum_dispatch::enum_dispatch;
use problemo::Problem;

use crate::parameter::Parameter;
use crate::{E, I};

/// Which operator a bound is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundTarget {
    /// The stiffness / bilinear form `a`.
    Stiffness,
    /// The mass form `m` (transient estimators).
    Mass,
}

/// Provider of coercivity bounds. `lower_bound`/`upper_bound` return the
/// bound together with the index of the latest sub-time interval it is valid
/// for (0 for time-independent bounds).
#[enum_dispatch]
pub trait CoercivityBound {
    fn lower_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem>;

    fn upper_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem> {
        self.lower_bound(mu, target)
    }
}

/// Min-theta bound for parametrically coercive forms: when every
/// `beta_q(mu)` is positive and the scalar product is the energy product at
/// the reference parameter, `alpha(mu) >= min_q beta_q(mu) / beta_q(mu_ref)`.
#[derive(Debug, Clone)]
pub struct MinThetaCoercivity {
    reference: Parameter,
    /// `beta_a(mu)` flattened over `(q, m)`.
    beta_a: fn(&Parameter) -> Vec<E>,
    /// `beta_m(mu)` flattened over `(q, m)`; empty for steady models.
    beta_m: fn(&Parameter) -> Vec<E>,
}

impl MinThetaCoercivity {
    pub fn new(
        reference: Parameter,
        beta_a: fn(&Parameter) -> Vec<E>,
        beta_m: fn(&Parameter) -> Vec<E>,
    ) -> Self {
        Self {
            reference,
            beta_a,
            beta_m,
        }
    }

    fn min_theta(&self, mu: &Parameter, beta: fn(&Parameter) -> Vec<E>) -> E {
        let at_mu = beta(mu);
        let at_ref = beta(&self.reference);
        at_mu
            .iter()
            .zip(at_ref.iter())
            .map(|(b, b_ref)| b / b_ref)
            .fold(E::INFINITY, E::min)
    }
}

impl CoercivityBound for MinThetaCoercivity {
    fn lower_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem> {
        let bound = match target {
            BoundTarget::Stiffness => self.min_theta(mu, self.beta_a),
            BoundTarget::Mass => self.min_theta(mu, self.beta_m),
        };
        Ok((bound, 0))
    }

    fn upper_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem> {
        let bound = match target {
            BoundTarget::Stiffness => {
                let at_mu = (self.beta_a)(mu);
                let at_ref = (self.beta_a)(&self.reference);
                at_mu
                    .iter()
                    .zip(at_ref.iter())
                    .map(|(b, b_ref)| b / b_ref)
                    .fold(E::NEG_INFINITY, E::max)
            }
            BoundTarget::Mass => {
                let at_mu = (self.beta_m)(mu);
                let at_ref = (self.beta_m)(&self.reference);
                at_mu
                    .iter()
                    .zip(at_ref.iter())
                    .map(|(b, b_ref)| b / b_ref)
                    .fold(E::NEG_INFINITY, E::max)
            }
        };
        Ok((bound, 0))
    }
}

/// Fixed coercivity constants, for problems where the constant is known
/// analytically or estimation is deliberately skipped.
#[derive(Debug, Clone)]
pub struct FixedCoercivity {
    stiffness: E,
    mass: E,
}

impl FixedCoercivity {
    pub fn new(stiffness: E, mass: E) -> Self {
        Self { stiffness, mass }
    }
}

impl CoercivityBound for FixedCoercivity {
    fn lower_bound(&self, _mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem> {
        let bound = match target {
            BoundTarget::Stiffness => self.stiffness,
            BoundTarget::Mass => self.mass,
        };
        Ok((bound, 0))
    }
}

/// Adapter around an external SCM collaborator.
pub struct ExternalScm {
    client: Box<dyn ScmClient>,
}

impl ExternalScm {
    pub fn new(client: Box<dyn ScmClient>) -> Self {
        Self { client }
    }
}

/// The narrow interface an SCM implementation must provide.
pub trait ScmClient {
    /// Lower bound `alpha_LB(mu)` with the latest-time-index indicator.
    fn lb(&self, mu: &Parameter, for_mass_matrix: bool) -> Result<(E, I), Problem>;

    /// Upper bound `alpha_UB(mu)` with the latest-time-index indicator.
    fn ub(&self, mu: &Parameter, for_mass_matrix: bool) -> Result<(E, I), Problem>;
}

impl CoercivityBound for ExternalScm {
    fn lower_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem> {
        self.client.lb(mu, target == BoundTarget::Mass)
    }

    fn upper_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<(E, I), Problem> {
        self.client.ub(mu, target == BoundTarget::Mass)
    }
}

/// The provider the engine holds; built-in variants dispatch statically.
#[enum_dispatch(CoercivityBound)]
pub enum CoercivityProvider {
    MinTheta(MinThetaCoercivity),
    Fixed(FixedCoercivity),
    External(ExternalScm),
}
