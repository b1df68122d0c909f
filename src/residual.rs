//! Residual-based error estimation.
//!
//! The dual norm of the PDE residual in the truth scalar product reduces,
//! thanks to the affine decomposition, to a quadratic form in the beta
//! coefficients and the reduced coordinates. The coefficient tables of that
//! quadratic form are precomputed offline from Riesz representers:
//!
//! ```text
//! ||r_pr(mu; u_N)||^2_{X'} = sum beta^F beta^F C0
//!                          + sum beta^A beta^F (Lambda . u)
//!                          + sum beta^A beta^A (u . Gamma u)
//! ```
//!
//! with three more families (`Cmf`, `Cma`, `Cmm`) coupling the mass operator
//! for transient problems, scaled by `1/dt` and `1/dt^2` online. Dual tables
//! mirror the primal ones with the output functional in place of the
//! right-hand side and the transposed bilinear form.
//!
//! Every table is a 4-index array over `(q1, m1, q2, m2)` stored as a flat
//! buffer with a computed offset, the inner extents coming from the `mMax`
//! cardinalities of the decomposition.

use faer::{Col, ColRef, Mat};
use problemo::Problem;
use tracing::warn;

use crate::basis::ReducedBasis;
use crate::linalg::dot;
use crate::model::{BetaQm, TruthModel};
use crate::{E, I};

/// Flattened index layout of one `(q, m)` axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermLayout {
    offsets: Vec<I>,
    total: I,
}

impl TermLayout {
    pub fn new(q_terms: I, m_max: impl Fn(I) -> I) -> Self {
        let mut offsets = Vec::with_capacity(q_terms + 1);
        let mut total = 0;
        for q in 0..q_terms {
            offsets.push(total);
            total += m_max(q);
        }
        offsets.push(total);
        Self { offsets, total }
    }

    pub fn q_terms(&self) -> I {
        self.offsets.len() - 1
    }

    pub fn m_max(&self, q: I) -> I {
        self.offsets[q + 1] - self.offsets[q]
    }

    pub fn total(&self) -> I {
        self.total
    }

    #[inline]
    pub fn flat(&self, q: I, m: I) -> I {
        debug_assert!(m < self.m_max(q));
        self.offsets[q] + m
    }

    pub(crate) fn offsets(&self) -> &[I] {
        &self.offsets
    }

    pub(crate) fn from_offsets(offsets: Vec<I>) -> Self {
        let total = *offsets.last().unwrap_or(&0);
        Self { offsets, total }
    }
}

/// A ragged 4-index table over `(q1, m1, q2, m2)` backed by a flat buffer.
#[derive(Debug, Clone)]
pub struct CouplingTable<T> {
    pub(crate) rows: TermLayout,
    pub(crate) cols: TermLayout,
    pub(crate) entries: Vec<T>,
}

impl<T: Clone> CouplingTable<T> {
    pub fn new(rows: TermLayout, cols: TermLayout, init: T) -> Self {
        let len = rows.total() * cols.total();
        Self {
            rows,
            cols,
            entries: vec![init; len],
        }
    }

    #[inline]
    fn flat(&self, q1: I, m1: I, q2: I, m2: I) -> I {
        self.rows.flat(q1, m1) * self.cols.total() + self.cols.flat(q2, m2)
    }

    #[inline]
    pub fn at(&self, q1: I, m1: I, q2: I, m2: I) -> &T {
        &self.entries[self.flat(q1, m1, q2, m2)]
    }

    #[inline]
    pub fn at_mut(&mut self, q1: I, m1: I, q2: I, m2: I) -> &mut T {
        let idx = self.flat(q1, m1, q2, m2);
        &mut self.entries[idx]
    }

    pub(crate) fn from_parts(rows: TermLayout, cols: TermLayout, entries: Vec<T>) -> Self {
        assert_eq!(entries.len(), rows.total() * cols.total());
        Self {
            rows,
            cols,
            entries,
        }
    }
}

impl CouplingTable<Col<E>> {
    fn resize_dim(&mut self, n: I) {
        for entry in &mut self.entries {
            entry.resize_with(n, |_| 0.0);
        }
    }
}

impl CouplingTable<Mat<E>> {
    fn resize_dim(&mut self, n: I) {
        for entry in &mut self.entries {
            entry.resize_with(n, n, |_, _| 0.0);
        }
    }
}

/// Value of one residual evaluation: the absolute combined sum and the
/// individual contributions, in the order
/// `[c0, lambda, gamma, cmf, cma, cmm]` (steady evaluations carry three).
#[derive(Debug, Clone)]
pub struct ResidualValue {
    pub value: E,
    pub parts: Vec<E>,
}

impl ResidualValue {
    fn finish(parts: Vec<E>, mu_display: &str, what: &str) -> Self {
        let value = parts.iter().sum::<E>().abs();
        if !value.is_finite() {
            warn!(
                target: "certrb::residual",
                "{} residual is not finite at mu = {}: parts = {:?}",
                what, mu_display, parts
            );
        }
        Self { value, parts }
    }
}

/// All precomputed coupling tables, primal and dual.
#[derive(Debug, Clone)]
pub struct ResidualTables {
    pub c0_pr: CouplingTable<E>,
    pub c0_du: CouplingTable<E>,
    pub lambda_pr: CouplingTable<Col<E>>,
    pub lambda_du: CouplingTable<Col<E>>,
    pub gamma_pr: CouplingTable<Mat<E>>,
    pub gamma_du: CouplingTable<Mat<E>>,
    pub cmf_pr: CouplingTable<Col<E>>,
    pub cmf_du: CouplingTable<Col<E>>,
    pub cma_pr: CouplingTable<Mat<E>>,
    pub cma_du: CouplingTable<Mat<E>>,
    pub cmm_pr: CouplingTable<Mat<E>>,
    pub cmm_du: CouplingTable<Mat<E>>,
}

impl ResidualTables {
    /// Allocates the table layouts from the decomposition cardinalities.
    pub fn new<M: TruthModel>(model: &M, output_index: I) -> Self {
        let layout_a = TermLayout::new(model.qa(), |q| model.m_max_a(q));
        let layout_m = TermLayout::new(model.qm(), |q| model.m_max_m(q));
        let layout_f0 = TermLayout::new(model.ql(0), |q| model.m_max_f(0, q));
        let layout_fout =
            TermLayout::new(model.ql(output_index), |q| model.m_max_f(output_index, q));

        Self {
            c0_pr: CouplingTable::new(layout_f0.clone(), layout_f0.clone(), 0.0),
            c0_du: CouplingTable::new(layout_fout.clone(), layout_fout.clone(), 0.0),
            lambda_pr: CouplingTable::new(layout_a.clone(), layout_f0.clone(), Col::zeros(0)),
            lambda_du: CouplingTable::new(layout_a.clone(), layout_fout.clone(), Col::zeros(0)),
            gamma_pr: CouplingTable::new(layout_a.clone(), layout_a.clone(), Mat::zeros(0, 0)),
            gamma_du: CouplingTable::new(layout_a.clone(), layout_a.clone(), Mat::zeros(0, 0)),
            cmf_pr: CouplingTable::new(layout_m.clone(), layout_f0, Col::zeros(0)),
            cmf_du: CouplingTable::new(layout_m.clone(), layout_fout, Col::zeros(0)),
            cma_pr: CouplingTable::new(layout_m.clone(), layout_a.clone(), Mat::zeros(0, 0)),
            cma_du: CouplingTable::new(layout_m.clone(), layout_a, Mat::zeros(0, 0)),
            cmm_pr: CouplingTable::new(layout_m.clone(), layout_m.clone(), Mat::zeros(0, 0)),
            cmm_du: CouplingTable::new(layout_m.clone(), layout_m, Mat::zeros(0, 0)),
        }
    }

    /// Updates the tables after a greedy extension from `n - added` to `n`.
    ///
    /// Only the rows and columns of the newly added basis vectors are
    /// assembled; the `C0` tables are computed once, at the first call. The
    /// Riesz problems are solved in the truth space through the model's
    /// `l2_solve`.
    #[allow(clippy::too_many_arguments)]
    pub fn offline_update<M: TruthModel>(
        &mut self,
        model: &M,
        basis_pr: &ReducedBasis,
        basis_du: &ReducedBasis,
        n: I,
        added: I,
        output_index: I,
        solve_dual: bool,
        transient: bool,
        use_symmetric_matrix: bool,
    ) -> Result<(), Problem> {
        let first = n == added;

        // Riesz representers of the rhs and output functionals.
        let rf = self.functional_representers(model, 0, 1.0)?;
        let rl = if solve_dual || first {
            self.functional_representers(model, output_index, -1.0)?
        } else {
            Vec::new()
        };

        if first {
            let pr_cols = self.c0_pr.cols.total();
            for i1 in 0..self.c0_pr.rows.total() {
                for i2 in 0..pr_cols {
                    self.c0_pr.entries[i1 * pr_cols + i2] =
                        model.scalar_product(rf[i1].as_ref(), rf[i2].as_ref());
                }
            }
            let du_cols = self.c0_du.cols.total();
            for i1 in 0..self.c0_du.rows.total() {
                for i2 in 0..du_cols {
                    self.c0_du.entries[i1 * du_cols + i2] =
                        model.scalar_product(rl[i1].as_ref(), rl[i2].as_ref());
                }
            }
        }

        // Riesz representers of -A_{q,m} w_i over the whole primal basis.
        let za = self.operator_representers(model, basis_pr, n, OperatorKind::Stiffness, false)?;

        self.lambda_pr.resize_dim(n);
        self.gamma_pr.resize_dim(n);
        let qa = model.qa();
        let qf = model.ql(0);
        for q1 in 0..qa {
            for m1 in 0..model.m_max_a(q1) {
                let row = self.lambda_pr.rows.flat(q1, m1);
                for elem in (n - added)..n {
                    for q2 in 0..qf {
                        for m2 in 0..model.m_max_f(0, q2) {
                            let col = self.lambda_pr.cols.flat(q2, m2);
                            self.lambda_pr.at_mut(q1, m1, q2, m2)[elem] =
                                2.0 * model.scalar_product(za[row][elem].as_ref(), rf[col].as_ref());
                        }
                    }
                }
            }
        }
        fill_matrix_table(&mut self.gamma_pr, &za, &za, n, added, |z1, z2| {
            model.scalar_product(z1, z2)
        });

        if transient {
            let zm = self.operator_representers(model, basis_pr, n, OperatorKind::Mass, false)?;
            self.cmf_pr.resize_dim(n);
            self.cma_pr.resize_dim(n);
            self.cmm_pr.resize_dim(n);
            let qm = model.qm();
            for q1 in 0..qm {
                for m1 in 0..model.m_max_m(q1) {
                    let row = self.cmf_pr.rows.flat(q1, m1);
                    for elem in (n - added)..n {
                        for q2 in 0..qf {
                            for m2 in 0..model.m_max_f(0, q2) {
                                let col = self.cmf_pr.cols.flat(q2, m2);
                                self.cmf_pr.at_mut(q1, m1, q2, m2)[elem] = 2.0
                                    * model.scalar_product(zm[row][elem].as_ref(), rf[col].as_ref());
                            }
                        }
                    }
                }
            }
            fill_matrix_table(&mut self.cma_pr, &zm, &za, n, added, |z1, z2| {
                2.0 * model.scalar_product(z1, z2)
            });
            fill_matrix_table(&mut self.cmm_pr, &zm, &zm, n, added, |z1, z2| {
                model.scalar_product(z1, z2)
            });
        }

        if solve_dual {
            let zat = self.operator_representers(
                model,
                basis_du,
                n,
                OperatorKind::Stiffness,
                !use_symmetric_matrix,
            )?;

            self.lambda_du.resize_dim(n);
            self.gamma_du.resize_dim(n);
            let qout = model.ql(output_index);
            for q1 in 0..qa {
                for m1 in 0..model.m_max_a(q1) {
                    let row = self.lambda_du.rows.flat(q1, m1);
                    for elem in (n - added)..n {
                        for q2 in 0..qout {
                            for m2 in 0..model.m_max_f(output_index, q2) {
                                let col = self.lambda_du.cols.flat(q2, m2);
                                self.lambda_du.at_mut(q1, m1, q2, m2)[elem] = 2.0
                                    * model
                                        .scalar_product(rl[col].as_ref(), zat[row][elem].as_ref());
                            }
                        }
                    }
                }
            }
            fill_matrix_table(&mut self.gamma_du, &zat, &zat, n, added, |z1, z2| {
                model.scalar_product(z1, z2)
            });

            if transient {
                let zmdu =
                    self.operator_representers(model, basis_du, n, OperatorKind::Mass, false)?;
                self.cmf_du.resize_dim(n);
                self.cma_du.resize_dim(n);
                self.cmm_du.resize_dim(n);
                let qm = model.qm();
                for q1 in 0..qm {
                    for m1 in 0..model.m_max_m(q1) {
                        let row = self.cmf_du.rows.flat(q1, m1);
                        for elem in (n - added)..n {
                            for q2 in 0..qout {
                                for m2 in 0..model.m_max_f(output_index, q2) {
                                    let col = self.cmf_du.cols.flat(q2, m2);
                                    self.cmf_du.at_mut(q1, m1, q2, m2)[elem] = 2.0
                                        * model.scalar_product(
                                            zmdu[row][elem].as_ref(),
                                            rl[col].as_ref(),
                                        );
                                }
                            }
                        }
                    }
                }
                fill_matrix_table(&mut self.cma_du, &zmdu, &zat, n, added, |z1, z2| {
                    2.0 * model.scalar_product(z1, z2)
                });
                fill_matrix_table(&mut self.cmm_du, &zmdu, &zmdu, n, added, |z1, z2| {
                    model.scalar_product(z1, z2)
                });
            }
        }

        Ok(())
    }

    /// Riesz representers of the functional layer `output`, scaled by `sign`.
    fn functional_representers<M: TruthModel>(
        &self,
        model: &M,
        output: I,
        sign: E,
    ) -> Result<Vec<Col<E>>, Problem> {
        let mut out = Vec::new();
        for q in 0..model.ql(output) {
            for m in 0..model.m_max_f(output, q) {
                let f = model.f_vector(output, q, m);
                let scaled = sign * &f;
                out.push(model.l2_solve(scaled.as_ref())?);
            }
        }
        Ok(out)
    }

    /// Riesz representers `X^{-1} (-T_{q,m} w_i)` for every term and every
    /// basis vector up to `n`.
    fn operator_representers<M: TruthModel>(
        &self,
        model: &M,
        basis: &ReducedBasis,
        n: I,
        kind: OperatorKind,
        transpose: bool,
    ) -> Result<Vec<Vec<Col<E>>>, Problem> {
        let (q_terms, m_max): (I, Box<dyn Fn(I) -> I + '_>) = match kind {
            OperatorKind::Stiffness => (model.qa(), Box::new(|q| model.m_max_a(q))),
            OperatorKind::Mass => (model.qm(), Box::new(|q| model.m_max_m(q))),
        };
        let mut out = Vec::new();
        for q in 0..q_terms {
            for m in 0..m_max(q) {
                let mut per_basis = Vec::with_capacity(n);
                for i in 0..n {
                    let applied = match kind {
                        OperatorKind::Stiffness => model.apply_a(q, m, basis.at(i), transpose),
                        OperatorKind::Mass => model.apply_m(q, m, basis.at(i)),
                    };
                    let negated = -1.0 * &applied;
                    per_basis.push(model.l2_solve(negated.as_ref())?);
                }
                out.push(per_basis);
            }
        }
        Ok(out)
    }

    /// Steady primal residual `||f - A u_N||^2_{X'}` (absolute combined sum).
    pub fn steady_primal(&self, n: I, beta: &BetaQm, u: ColRef<'_, E>, mu: &str) -> ResidualValue {
        let mut c0 = 0.0;
        for (q1, betas1) in beta.f[0].iter().enumerate() {
            for (m1, b1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta.f[0].iter().enumerate() {
                    for (m2, b2) in betas2.iter().enumerate() {
                        c0 += b1 * b2 * self.c0_pr.at(q1, m1, q2, m2);
                    }
                }
            }
        }

        let mut lambda = 0.0;
        let mut gamma = 0.0;
        for (q1, betas1) in beta.a.iter().enumerate() {
            for (m1, a1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta.f[0].iter().enumerate() {
                    for (m2, f2) in betas2.iter().enumerate() {
                        lambda +=
                            a1 * f2 * dot(self.lambda_pr.at(q1, m1, q2, m2).as_ref().subrows(0, n), u);
                    }
                }
                for (q2, betas2) in beta.a.iter().enumerate() {
                    for (m2, a2) in betas2.iter().enumerate() {
                        let block = self.gamma_pr.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        gamma += a1 * a2 * dot(u, (block * u).as_ref());
                    }
                }
            }
        }

        ResidualValue::finish(vec![c0, lambda, gamma], mu, "steady primal")
    }

    /// Transient primal residual at one time step; adds the mass couplings
    /// with their `1/dt` and `1/dt^2` scalings to the steady contribution.
    pub fn transient_primal(
        &self,
        n: I,
        beta: &BetaQm,
        u: ColRef<'_, E>,
        u_old: ColRef<'_, E>,
        dt: E,
        mu: &str,
    ) -> ResidualValue {
        let steady = self.steady_primal(n, beta, u, mu);

        let mut cmf = 0.0;
        let mut cma = 0.0;
        let mut cmm = 0.0;
        for (q1, betas1) in beta.m.iter().enumerate() {
            for (m1, b_m1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta.f[0].iter().enumerate() {
                    for (m2, b_f2) in betas2.iter().enumerate() {
                        let head = self.cmf_pr.at(q1, m1, q2, m2).as_ref().subrows(0, n);
                        cmf += 1.0 / dt * b_m1 * b_f2 * dot(head, u);
                        cmf -= 1.0 / dt * b_m1 * b_f2 * dot(head, u_old);
                    }
                }
                for (q2, betas2) in beta.a.iter().enumerate() {
                    for (m2, b_a2) in betas2.iter().enumerate() {
                        let block = self.cma_pr.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        let applied = block * u;
                        cma += 1.0 / dt * b_m1 * b_a2 * dot(u, applied.as_ref());
                        cma -= 1.0 / dt * b_m1 * b_a2 * dot(u_old, applied.as_ref());
                    }
                }
                for (q2, betas2) in beta.m.iter().enumerate() {
                    for (m2, b_m2) in betas2.iter().enumerate() {
                        let block = self.cmm_pr.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        let m_u = block * u;
                        let m_uold = block * u_old;
                        let scale = 1.0 / (dt * dt) * b_m1 * b_m2;
                        cmm += scale * dot(u, m_u.as_ref());
                        cmm -= scale * dot(u, m_uold.as_ref());
                        cmm -= scale * dot(u_old, m_u.as_ref());
                        cmm += scale * dot(u_old, m_uold.as_ref());
                    }
                }
            }
        }

        let mut parts = steady.parts;
        parts.push(cmf);
        parts.push(cma);
        parts.push(cmm);
        ResidualValue::finish(parts, mu, "transient primal")
    }

    /// Steady dual residual `||-L - A^T psi_N||^2_{X'}`.
    pub fn steady_dual(
        &self,
        n: I,
        beta: &BetaQm,
        output_index: I,
        u_du: ColRef<'_, E>,
        mu: &str,
    ) -> ResidualValue {
        let beta_out = &beta.f[output_index];

        let mut c0 = 0.0;
        for (q1, betas1) in beta_out.iter().enumerate() {
            for (m1, b1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta_out.iter().enumerate() {
                    for (m2, b2) in betas2.iter().enumerate() {
                        c0 += b1 * b2 * self.c0_du.at(q1, m1, q2, m2);
                    }
                }
            }
        }

        let mut lambda = 0.0;
        let mut gamma = 0.0;
        for (q1, betas1) in beta.a.iter().enumerate() {
            for (m1, a1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta_out.iter().enumerate() {
                    for (m2, f2) in betas2.iter().enumerate() {
                        lambda +=
                            a1 * f2 * dot(self.lambda_du.at(q1, m1, q2, m2).as_ref().subrows(0, n), u_du);
                    }
                }
                for (q2, betas2) in beta.a.iter().enumerate() {
                    for (m2, a2) in betas2.iter().enumerate() {
                        let block = self.gamma_du.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        gamma += a1 * a2 * dot(u_du, (block * u_du).as_ref());
                    }
                }
            }
        }

        ResidualValue::finish(vec![c0, lambda, gamma], mu, "steady dual")
    }

    /// Transient dual residual at one time step. The combined value keeps
    /// only the contributions that survive in the backward recursion
    /// (`gamma`, `cma`, `cmm`); all six parts are reported.
    #[allow(clippy::too_many_arguments)]
    pub fn transient_dual(
        &self,
        n: I,
        beta: &BetaQm,
        output_index: I,
        u_du: ColRef<'_, E>,
        u_du_old: ColRef<'_, E>,
        dt: E,
        mu: &str,
    ) -> ResidualValue {
        let steady = self.steady_dual(n, beta, output_index, u_du, mu);

        let mut cma = 0.0;
        let mut cmm = 0.0;
        for (q1, betas1) in beta.m.iter().enumerate() {
            for (m1, b_m1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta.a.iter().enumerate() {
                    for (m2, b_a2) in betas2.iter().enumerate() {
                        let block = self.cma_du.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        let applied = block * u_du;
                        cma += 1.0 / dt * b_m1 * b_a2 * dot(u_du, applied.as_ref());
                        cma -= 1.0 / dt * b_m1 * b_a2 * dot(u_du_old, applied.as_ref());
                    }
                }
                for (q2, betas2) in beta.m.iter().enumerate() {
                    for (m2, b_m2) in betas2.iter().enumerate() {
                        let block = self.cmm_du.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        let m_u = block * u_du;
                        let m_uold = block * u_du_old;
                        let scale = 1.0 / (dt * dt) * b_m1 * b_m2;
                        cmm += scale * dot(u_du, m_u.as_ref());
                        cmm -= scale * dot(u_du, m_uold.as_ref());
                        cmm -= scale * dot(u_du_old, m_u.as_ref());
                        cmm += scale * dot(u_du_old, m_uold.as_ref());
                    }
                }
            }
        }

        let gamma = steady.parts[2];
        let value = (gamma + cma + cmm).abs();
        let mut parts = steady.parts;
        parts.push(0.0);
        parts.push(cma);
        parts.push(cmm);
        if !value.is_finite() {
            warn!(
                target: "certrb::residual",
                "transient dual residual is not finite at mu = {}: parts = {:?}",
                mu, parts
            );
        }
        ResidualValue { value, parts }
    }

    /// Dual residual of the final-time initial condition,
    /// `||L + M psi_N(t_f)||^2_{X'}`.
    pub fn initial_dual(
        &self,
        n: I,
        beta: &BetaQm,
        output_index: I,
        u_du_ini: ColRef<'_, E>,
    ) -> E {
        let beta_out = &beta.f[output_index];

        let mut c0 = 0.0;
        for (q1, betas1) in beta_out.iter().enumerate() {
            for (m1, b1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta_out.iter().enumerate() {
                    for (m2, b2) in betas2.iter().enumerate() {
                        c0 += b1 * b2 * self.c0_du.at(q1, m1, q2, m2);
                    }
                }
            }
        }

        let mut cmf = 0.0;
        let mut cmm = 0.0;
        for (q1, betas1) in beta.m.iter().enumerate() {
            for (m1, b_m1) in betas1.iter().enumerate() {
                for (q2, betas2) in beta_out.iter().enumerate() {
                    for (m2, b_f2) in betas2.iter().enumerate() {
                        cmf += b_m1
                            * b_f2
                            * dot(self.cmf_du.at(q1, m1, q2, m2).as_ref().subrows(0, n), u_du_ini);
                    }
                }
                for (q2, betas2) in beta.m.iter().enumerate() {
                    for (m2, b_m2) in betas2.iter().enumerate() {
                        let block = self.cmm_du.at(q1, m1, q2, m2).as_ref().submatrix(0, 0, n, n);
                        cmm += b_m1 * b_m2 * dot(u_du_ini, (block * u_du_ini).as_ref());
                    }
                }
            }
        }

        (c0 + cmf + cmm).abs()
    }
}

#[derive(Clone, Copy)]
enum OperatorKind {
    Stiffness,
    Mass,
}

/// Fills the new rows and columns of a matrix-valued table from two
/// representer families.
fn fill_matrix_table(
    table: &mut CouplingTable<Mat<E>>,
    rows: &[Vec<Col<E>>],
    cols: &[Vec<Col<E>>],
    n: I,
    added: I,
    inner: impl Fn(ColRef<'_, E>, ColRef<'_, E>) -> E,
) {
    let row_terms = table.rows.total();
    let col_terms = table.cols.total();
    for r in 0..row_terms {
        for c in 0..col_terms {
            let entry = &mut table.entries[r * col_terms + c];
            for elem in (n - added)..n {
                for l in 0..n {
                    entry[(elem, l)] = inner(rows[r][elem].as_ref(), cols[c][l].as_ref());
                }
            }
            for j in 0..n {
                for elem in (n - added)..n {
                    entry[(j, elem)] = inner(rows[r][j].as_ref(), cols[c][elem].as_ref());
                }
            }
        }
    }
}


/// Direct truth-space evaluation of the steady primal residual dual norm,
/// used by the `crb.check.residual` diagnostic and by tests.
pub fn direct_steady_primal_residual<M: TruthModel>(
    model: &M,
    beta: &BetaQm,
    expansion: ColRef<'_, E>,
) -> Result<E, Problem> {
    let dim = model.dimension();
    let mut residual = Col::<E>::zeros(dim);
    for (q, betas) in beta.f[0].iter().enumerate() {
        for (m, b) in betas.iter().enumerate() {
            residual += *b * &model.f_vector(0, q, m);
        }
    }
    for (q, betas) in beta.a.iter().enumerate() {
        for (m, b) in betas.iter().enumerate() {
            residual -= *b * &model.apply_a(q, m, expansion, false);
        }
    }
    let riesz = model.l2_solve(residual.as_ref())?;
    Ok(model.scalar_product(riesz.as_ref(), riesz.as_ref()))
}

/// Direct truth-space evaluation of the transient primal residual dual norm
/// at one time step, `||f - A u - M (u - u_old) / dt||^2_{X'}`.
pub fn direct_transient_primal_residual<M: TruthModel>(
    model: &M,
    beta: &BetaQm,
    expansion: ColRef<'_, E>,
    expansion_old: ColRef<'_, E>,
    dt: E,
) -> Result<E, Problem> {
    let dim = model.dimension();
    let mut residual = Col::<E>::zeros(dim);
    for (q, betas) in beta.f[0].iter().enumerate() {
        for (m, b) in betas.iter().enumerate() {
            residual += *b * &model.f_vector(0, q, m);
        }
    }
    for (q, betas) in beta.a.iter().enumerate() {
        for (m, b) in betas.iter().enumerate() {
            residual -= *b * &model.apply_a(q, m, expansion, false);
        }
    }
    let step = expansion - expansion_old;
    for (q, betas) in beta.m.iter().enumerate() {
        for (m, b) in betas.iter().enumerate() {
            residual -= (*b / dt) * &model.apply_m(q, m, step.as_ref());
        }
    }
    let riesz = model.l2_solve(residual.as_ref())?;
    Ok(model.scalar_product(riesz.as_ref(), riesz.as_ref()))
}
