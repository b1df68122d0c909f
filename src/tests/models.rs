//! Small dense truth models used by the end-to-end tests.
//!
//! All models discretise one-dimensional problems on `[0, 1]` with P1 finite
//! elements and homogeneous Dirichlet conditions; the matrices are assembled
//! densely, the truth solves run through the same dense LU kernel the engine
//! uses, and the energy scalar product is the bilinear form at the reference
//! parameter.

use faer::{Col, ColRef, Mat};
use problemo::Problem;

use crate::bdf::BdfScheme;
use crate::linalg::{dot, lu_solve};
use crate::model::{BetaQm, TruthModel};
use crate::parameter::{Parameter, ParameterSpace};
use crate::{E, I};

/// P1 stiffness matrices of the left and right halves of `[0, 1]` on `n`
/// interior nodes.
fn stiffness_halves(n: I) -> (Mat<E>, Mat<E>) {
    let h = 1.0 / (n as E + 1.0);
    let mut left = Mat::<E>::zeros(n, n);
    let mut right = Mat::<E>::zeros(n, n);
    // Element e spans nodes e-1 and e (boundary nodes are eliminated).
    for e in 0..=n {
        let midpoint = (e as E + 0.5) * h;
        let target = if midpoint < 0.5 { &mut left } else { &mut right };
        let (i, j) = (e as isize - 1, e as isize);
        if i >= 0 {
            target[(i as I, i as I)] += 1.0 / h;
        }
        if (j as I) < n {
            target[(j as I, j as I)] += 1.0 / h;
        }
        if i >= 0 && (j as I) < n {
            target[(i as I, j as I)] -= 1.0 / h;
            target[(j as I, i as I)] -= 1.0 / h;
        }
    }
    (left, right)
}

/// P1 mass matrix on `n` interior nodes.
fn mass_matrix(n: I) -> Mat<E> {
    let h = 1.0 / (n as E + 1.0);
    let mut mass = Mat::<E>::zeros(n, n);
    for i in 0..n {
        mass[(i, i)] = 2.0 * h / 3.0;
        if i + 1 < n {
            mass[(i, i + 1)] = h / 6.0;
            mass[(i + 1, i)] = h / 6.0;
        }
    }
    mass
}

/// Central-difference convection matrix (antisymmetric).
fn convection_matrix(n: I) -> Mat<E> {
    let mut c = Mat::<E>::zeros(n, n);
    for i in 0..n {
        if i + 1 < n {
            c[(i, i + 1)] = 0.5;
            c[(i + 1, i)] = -0.5;
        }
    }
    c
}

/// Load vector of the unit source, `F[i] = h`.
fn unit_load(n: I) -> Col<E> {
    let h = 1.0 / (n as E + 1.0);
    Col::from_fn(n, |_| h)
}

/// A steady or transient thermal block on `[0, 1]`: two conductivity zones
/// with `beta^A = (1, mu_0)`, unit load, mean-value output.
pub struct ThermalBlock1d {
    n: I,
    a0: Mat<E>,
    a1: Mat<E>,
    x: Mat<E>,
    mass: Mat<E>,
    f: Col<E>,
    ell: Col<E>,
    space: ParameterSpace,
    steady: bool,
    dt: E,
    tf: E,
    order: I,
    nonzero_initial: bool,
}

impl ThermalBlock1d {
    pub fn steady(n: I) -> Self {
        let (a0, a1) = stiffness_halves(n);
        let x = &a0 + &a1;
        Self {
            n,
            a0,
            a1,
            x,
            mass: mass_matrix(n),
            f: unit_load(n),
            ell: unit_load(n),
            space: ParameterSpace::new(vec![0.1], vec![10.0]),
            steady: true,
            dt: E::INFINITY,
            tf: E::INFINITY,
            order: 1,
            nonzero_initial: false,
        }
    }

    pub fn transient(n: I, dt: E, tf: E, order: I, nonzero_initial: bool) -> Self {
        let mut model = Self::steady(n);
        model.steady = false;
        model.dt = dt;
        model.tf = tf;
        model.order = order;
        model.nonzero_initial = nonzero_initial;
        model
    }

    fn stiffness(&self, mu: &Parameter) -> Mat<E> {
        let scaled = mu[0] * &self.a1;
        &self.a0 + &scaled
    }

    /// `beta^A` flattened over `(q, m)`, for the min-theta bound.
    pub fn beta_a_flat(mu: &Parameter) -> Vec<E> {
        vec![1.0, mu[0]]
    }

    /// `beta^M` flattened over `(q, m)`.
    pub fn beta_m_flat(_mu: &Parameter) -> Vec<E> {
        vec![1.0]
    }
}

impl TruthModel for ThermalBlock1d {
    fn dimension(&self) -> I {
        self.n
    }

    fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    fn reference_parameter(&self) -> Parameter {
        Parameter::new(vec![1.0])
    }

    fn n_outputs(&self) -> I {
        2
    }

    fn qa(&self) -> I {
        2
    }

    fn m_max_a(&self, _q: I) -> I {
        1
    }

    fn qm(&self) -> I {
        if self.steady { 0 } else { 1 }
    }

    fn m_max_m(&self, _q: I) -> I {
        1
    }

    fn ql(&self, _output: I) -> I {
        1
    }

    fn m_max_f(&self, _output: I, _q: I) -> I {
        1
    }

    fn compute_beta(&self, mu: &Parameter, _time: E) -> Result<BetaQm, Problem> {
        let m = if self.steady {
            Vec::new()
        } else {
            vec![vec![1.0]]
        };
        Ok(BetaQm {
            m,
            a: vec![vec![1.0], vec![mu[0]]],
            f: vec![vec![vec![1.0]], vec![vec![1.0]]],
        })
    }

    fn apply_a(&self, q: I, _m: I, v: ColRef<'_, E>, transpose: bool) -> Col<E> {
        let a = if q == 0 { &self.a0 } else { &self.a1 };
        if transpose {
            a.transpose() * v
        } else {
            a.as_ref() * v
        }
    }

    fn apply_m(&self, _q: I, _m: I, v: ColRef<'_, E>) -> Col<E> {
        self.mass.as_ref() * v
    }

    fn f_vector(&self, output: I, _q: I, _m: I) -> Col<E> {
        if output == 0 {
            self.f.clone()
        } else {
            self.ell.clone()
        }
    }

    fn scalar_product(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.x.as_ref() * v).as_ref())
    }

    fn l2_solve(&self, b: ColRef<'_, E>) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.x.as_ref(), b))
    }

    fn compute_norm_l2(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        let diff = u - v;
        dot(diff.as_ref(), (self.mass.as_ref() * diff.as_ref()).as_ref()).sqrt()
    }

    fn domain_l2_inner(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.mass.as_ref() * v).as_ref())
    }

    fn domain_measure(&self) -> E {
        1.0
    }

    fn is_steady(&self) -> bool {
        self.steady
    }

    fn time_initial(&self) -> E {
        0.0
    }

    fn time_step(&self) -> E {
        self.dt
    }

    fn time_final(&self) -> E {
        self.tf
    }

    fn time_order(&self) -> I {
        self.order
    }

    fn solve(&self, mu: &Parameter) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.stiffness(mu).as_ref(), self.f.as_ref()))
    }

    fn solve_dual(&self, mu: &Parameter, _output: I) -> Result<Col<E>, Problem> {
        let rhs = -1.0 * &self.ell;
        Ok(lu_solve(
            self.stiffness(mu).transpose(),
            rhs.as_ref(),
        ))
    }

    fn initialization_field(&self, _mu: &Parameter) -> Col<E> {
        if self.nonzero_initial {
            let h = 1.0 / (self.n as E + 1.0);
            Col::from_fn(self.n, |i| {
                let x = (i as E + 1.0) * h;
                x * (1.0 - x)
            })
        } else {
            Col::zeros(self.n)
        }
    }

    fn solve_trajectory(&self, mu: &Parameter) -> Result<Vec<Col<E>>, Problem> {
        let steps = (self.tf / self.dt).round() as I;
        let scheme = BdfScheme::new(self.order);
        let a = self.stiffness(mu);
        let mut history = vec![self.initialization_field(mu)];
        let mut trajectory = Vec::with_capacity(steps);
        for step in 1..=steps {
            let alpha0 = scheme.alpha0(step);
            let weights = scheme.history_weights(step);
            let mut history_term = Col::<E>::zeros(self.n);
            for (j, w) in weights.iter().enumerate() {
                history_term += *w * &history[j];
            }
            let scaled_mass = (alpha0 / self.dt) * &self.mass;
            let lhs = &a + &scaled_mass;
            let mass_history = (1.0 / self.dt) * (self.mass.as_ref() * history_term.as_ref());
            let rhs = &self.f + &mass_history;
            let u = lu_solve(lhs.as_ref(), rhs.as_ref());
            trajectory.push(u.clone());
            history.insert(0, u);
            history.truncate(crate::bdf::MAX_ORDER);
        }
        Ok(trajectory)
    }
}

/// Steady advection-diffusion with an asymmetric bilinear form,
/// `a(u, v; mu) = mu_0 (u', v') + (u', v)`, unit load and a mean-value
/// output; exercises the dual pipeline and the output correction.
pub struct AdvectionDiffusion1d {
    n: I,
    stiffness: Mat<E>,
    convection: Mat<E>,
    x: Mat<E>,
    mass: Mat<E>,
    f: Col<E>,
    ell: Col<E>,
    space: ParameterSpace,
}

impl AdvectionDiffusion1d {
    pub fn new(n: I) -> Self {
        let (left, right) = stiffness_halves(n);
        let stiffness = &left + &right;
        let x = stiffness.clone();
        let h = 1.0 / (n as E + 1.0);
        Self {
            n,
            stiffness,
            convection: convection_matrix(n),
            x,
            mass: mass_matrix(n),
            f: unit_load(n),
            ell: Col::from_fn(n, |i| if i < n / 2 { 2.0 * h } else { 0.0 }),
            space: ParameterSpace::new(vec![0.5], vec![5.0]),
        }
    }

    fn operator(&self, mu: &Parameter) -> Mat<E> {
        let scaled = mu[0] * &self.stiffness;
        &scaled + &self.convection
    }
}

impl TruthModel for AdvectionDiffusion1d {
    fn dimension(&self) -> I {
        self.n
    }

    fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    fn reference_parameter(&self) -> Parameter {
        Parameter::new(vec![1.0])
    }

    fn n_outputs(&self) -> I {
        2
    }

    fn qa(&self) -> I {
        2
    }

    fn m_max_a(&self, _q: I) -> I {
        1
    }

    fn qm(&self) -> I {
        0
    }

    fn m_max_m(&self, _q: I) -> I {
        1
    }

    fn ql(&self, _output: I) -> I {
        1
    }

    fn m_max_f(&self, _output: I, _q: I) -> I {
        1
    }

    fn compute_beta(&self, mu: &Parameter, _time: E) -> Result<BetaQm, Problem> {
        Ok(BetaQm {
            m: Vec::new(),
            a: vec![vec![mu[0]], vec![1.0]],
            f: vec![vec![vec![1.0]], vec![vec![1.0]]],
        })
    }

    fn apply_a(&self, q: I, _m: I, v: ColRef<'_, E>, transpose: bool) -> Col<E> {
        let a = if q == 0 {
            &self.stiffness
        } else {
            &self.convection
        };
        if transpose {
            a.transpose() * v
        } else {
            a.as_ref() * v
        }
    }

    fn apply_m(&self, _q: I, _m: I, v: ColRef<'_, E>) -> Col<E> {
        self.mass.as_ref() * v
    }

    fn f_vector(&self, output: I, _q: I, _m: I) -> Col<E> {
        if output == 0 {
            self.f.clone()
        } else {
            self.ell.clone()
        }
    }

    fn scalar_product(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.x.as_ref() * v).as_ref())
    }

    fn l2_solve(&self, b: ColRef<'_, E>) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.x.as_ref(), b))
    }

    fn compute_norm_l2(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        let diff = u - v;
        dot(diff.as_ref(), (self.mass.as_ref() * diff.as_ref()).as_ref()).sqrt()
    }

    fn domain_l2_inner(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.mass.as_ref() * v).as_ref())
    }

    fn domain_measure(&self) -> E {
        1.0
    }

    fn solve(&self, mu: &Parameter) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.operator(mu).as_ref(), self.f.as_ref()))
    }

    fn solve_dual(&self, mu: &Parameter, _output: I) -> Result<Col<E>, Problem> {
        let rhs = -1.0 * &self.ell;
        Ok(lu_solve(self.operator(mu).transpose(), rhs.as_ref()))
    }
}

/// A linear diffusion problem posed in Newton form: the Jacobian carries the
/// genuine affine decomposition and the residual decomposition expands on
/// the canonical basis, with state-dependent coefficients
/// `beta^R_q(u; mu) = (A(mu) u - f)_q`.
pub struct NewtonDiffusion2p {
    n: I,
    a0: Mat<E>,
    a1: Mat<E>,
    x: Mat<E>,
    mass: Mat<E>,
    f: Col<E>,
    ell: Col<E>,
    space: ParameterSpace,
}

impl NewtonDiffusion2p {
    pub fn new(n: I) -> Self {
        let (a0, a1) = stiffness_halves(n);
        let x = &a0 + &a1;
        let h = 1.0 / (n as E + 1.0);
        Self {
            n,
            a0,
            a1,
            x,
            mass: mass_matrix(n),
            f: unit_load(n),
            ell: Col::from_fn(n, |_| h),
            space: ParameterSpace::new(vec![0.1, 0.1], vec![1.0, 1.0]),
        }
    }

    fn operator(&self, mu: &Parameter) -> Mat<E> {
        let left = mu[0] * &self.a0;
        let right = mu[1] * &self.a1;
        &left + &right
    }

    fn residual_betas(&self, u: Option<ColRef<'_, E>>, mu: &Parameter) -> Vec<Vec<E>> {
        let r = match u {
            Some(u) => {
                let applied = self.operator(mu).as_ref() * u;
                &applied - &self.f
            }
            None => -1.0 * &self.f,
        };
        (0..self.n).map(|q| vec![r[q]]).collect()
    }
}

impl TruthModel for NewtonDiffusion2p {
    fn dimension(&self) -> I {
        self.n
    }

    fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    fn reference_parameter(&self) -> Parameter {
        Parameter::new(vec![1.0, 1.0])
    }

    fn n_outputs(&self) -> I {
        2
    }

    fn qa(&self) -> I {
        2
    }

    fn m_max_a(&self, _q: I) -> I {
        1
    }

    fn qm(&self) -> I {
        0
    }

    fn m_max_m(&self, _q: I) -> I {
        1
    }

    fn ql(&self, output: I) -> I {
        if output == 0 { self.n } else { 1 }
    }

    fn m_max_f(&self, _output: I, _q: I) -> I {
        1
    }

    fn compute_beta(&self, mu: &Parameter, _time: E) -> Result<BetaQm, Problem> {
        Ok(BetaQm {
            m: Vec::new(),
            a: vec![vec![mu[0]], vec![mu[1]]],
            f: vec![self.residual_betas(None, mu), vec![vec![1.0]]],
        })
    }

    fn compute_beta_with_state(
        &self,
        u: ColRef<'_, E>,
        mu: &Parameter,
        _time: E,
    ) -> Result<BetaQm, Problem> {
        Ok(BetaQm {
            m: Vec::new(),
            a: vec![vec![mu[0]], vec![mu[1]]],
            f: vec![self.residual_betas(Some(u), mu), vec![vec![1.0]]],
        })
    }

    fn apply_a(&self, q: I, _m: I, v: ColRef<'_, E>, transpose: bool) -> Col<E> {
        let a = if q == 0 { &self.a0 } else { &self.a1 };
        if transpose {
            a.transpose() * v
        } else {
            a.as_ref() * v
        }
    }

    fn apply_m(&self, _q: I, _m: I, v: ColRef<'_, E>) -> Col<E> {
        self.mass.as_ref() * v
    }

    fn f_vector(&self, output: I, q: I, _m: I) -> Col<E> {
        if output == 0 {
            Col::from_fn(self.n, |i| if i == q { 1.0 } else { 0.0 })
        } else {
            self.ell.clone()
        }
    }

    fn scalar_product(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.x.as_ref() * v).as_ref())
    }

    fn l2_solve(&self, b: ColRef<'_, E>) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.x.as_ref(), b))
    }

    fn compute_norm_l2(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        let diff = u - v;
        dot(diff.as_ref(), (self.mass.as_ref() * diff.as_ref()).as_ref()).sqrt()
    }

    fn domain_l2_inner(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.mass.as_ref() * v).as_ref())
    }

    fn domain_measure(&self) -> E {
        1.0
    }

    fn solve(&self, mu: &Parameter) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.operator(mu).as_ref(), self.f.as_ref()))
    }
}

/// Mildly nonlinear diffusion: the second conductivity scales with the mean
/// of the current state, `beta^A = (1, mu_0 (1 + mean(u)^2))`. The truth
/// solve runs its own fixed point.
pub struct FixedPointDiffusion {
    n: I,
    a0: Mat<E>,
    a1: Mat<E>,
    x: Mat<E>,
    mass: Mat<E>,
    f: Col<E>,
    ell: Col<E>,
    space: ParameterSpace,
}

impl FixedPointDiffusion {
    pub fn new(n: I) -> Self {
        let (a0, a1) = stiffness_halves(n);
        let x = &a0 + &a1;
        Self {
            n,
            a0,
            a1,
            x,
            mass: mass_matrix(n),
            f: unit_load(n),
            ell: unit_load(n),
            space: ParameterSpace::new(vec![0.1], vec![1.0]),
        }
    }

    fn state_coefficient(&self, u: Option<ColRef<'_, E>>, mu: &Parameter) -> E {
        let mean = match u {
            Some(u) => (0..u.nrows()).map(|i| u[i]).sum::<E>() / u.nrows() as E,
            None => 0.0,
        };
        mu[0] * (1.0 + mean * mean)
    }
}

impl TruthModel for FixedPointDiffusion {
    fn dimension(&self) -> I {
        self.n
    }

    fn parameter_space(&self) -> &ParameterSpace {
        &self.space
    }

    fn reference_parameter(&self) -> Parameter {
        Parameter::new(vec![1.0])
    }

    fn n_outputs(&self) -> I {
        2
    }

    fn qa(&self) -> I {
        2
    }

    fn m_max_a(&self, _q: I) -> I {
        1
    }

    fn qm(&self) -> I {
        0
    }

    fn m_max_m(&self, _q: I) -> I {
        1
    }

    fn ql(&self, _output: I) -> I {
        1
    }

    fn m_max_f(&self, _output: I, _q: I) -> I {
        1
    }

    fn compute_beta(&self, mu: &Parameter, _time: E) -> Result<BetaQm, Problem> {
        Ok(BetaQm {
            m: Vec::new(),
            a: vec![vec![1.0], vec![self.state_coefficient(None, mu)]],
            f: vec![vec![vec![1.0]], vec![vec![1.0]]],
        })
    }

    fn compute_beta_with_state(
        &self,
        u: ColRef<'_, E>,
        mu: &Parameter,
        _time: E,
    ) -> Result<BetaQm, Problem> {
        Ok(BetaQm {
            m: Vec::new(),
            a: vec![vec![1.0], vec![self.state_coefficient(Some(u), mu)]],
            f: vec![vec![vec![1.0]], vec![vec![1.0]]],
        })
    }

    fn apply_a(&self, q: I, _m: I, v: ColRef<'_, E>, transpose: bool) -> Col<E> {
        let a = if q == 0 { &self.a0 } else { &self.a1 };
        if transpose {
            a.transpose() * v
        } else {
            a.as_ref() * v
        }
    }

    fn apply_m(&self, _q: I, _m: I, v: ColRef<'_, E>) -> Col<E> {
        self.mass.as_ref() * v
    }

    fn f_vector(&self, output: I, _q: I, _m: I) -> Col<E> {
        if output == 0 {
            self.f.clone()
        } else {
            self.ell.clone()
        }
    }

    fn scalar_product(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.x.as_ref() * v).as_ref())
    }

    fn l2_solve(&self, b: ColRef<'_, E>) -> Result<Col<E>, Problem> {
        Ok(lu_solve(self.x.as_ref(), b))
    }

    fn compute_norm_l2(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        let diff = u - v;
        dot(diff.as_ref(), (self.mass.as_ref() * diff.as_ref()).as_ref()).sqrt()
    }

    fn domain_l2_inner(&self, u: ColRef<'_, E>, v: ColRef<'_, E>) -> E {
        dot(u, (self.mass.as_ref() * v).as_ref())
    }

    fn domain_measure(&self) -> E {
        1.0
    }

    fn solve(&self, mu: &Parameter) -> Result<Col<E>, Problem> {
        let mut u = Col::<E>::zeros(self.n);
        for _ in 0..100 {
            let coefficient = self.state_coefficient(Some(u.as_ref()), mu);
            let scaled = coefficient * &self.a1;
            let a = &self.a0 + &scaled;
            let next = lu_solve(a.as_ref(), self.f.as_ref());
            let increment = (&next - &u).norm_l2();
            u = next;
            if increment < 1e-14 {
                break;
            }
        }
        Ok(u)
    }
}
