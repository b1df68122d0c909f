//! Online reduced solvers and error estimation.
//!
//! Every solve here works on small dense `N x N` systems assembled from the
//! affine tables; the truth model is only consulted for beta coefficients
//! (which may depend on the reduced state through its truth expansion). The
//! solver flavour is selected once at the driver boundary: steady problems
//! run a direct solve wrapped in a fixed point (which converges in one
//! iteration for state-independent coefficients) or a Newton loop, transient
//! problems run BDF time stepping with the fixed point nested inside each
//! step.

use std::fs::File;
use std::io::{BufWriter, Write as _};

use faer::{Col, Mat};
use problemo::{Problem, ProblemResult};
use tracing::{debug, warn};

use crate::bdf::BdfScheme;
use crate::config::ErrorEstimationKind;
use crate::crb::Crb;
use crate::error::CrbError;
use crate::linalg::{condition_number, dot, lu_solve};
use crate::model::TruthModel;
use crate::parameter::Parameter;
use crate::scm::{BoundTarget, CoercivityBound};
use crate::{E, I};

/// Reduced solution of one online query. Steady problems carry a single
/// entry per field; transient problems carry one entry per time step, with
/// `u_old[k]` the previous-step solution used by the residual evaluator and
/// the dual trajectories indexed forward in time.
#[derive(Debug, Clone)]
pub struct OnlineSolution {
    pub u: Vec<Col<E>>,
    pub u_old: Vec<Col<E>>,
    pub u_du: Vec<Col<E>>,
    pub u_du_old: Vec<Col<E>>,
    /// Output value at each time step (corrected when the dual is solved).
    pub outputs: Vec<E>,
    pub condition_number: Option<E>,
}

impl OnlineSolution {
    pub fn output(&self) -> E {
        *self.outputs.last().expect("empty online solution")
    }
}

/// Result of one error estimation.
#[derive(Debug, Clone)]
pub struct ErrorEstimate {
    /// Output error bound (product of the primal and dual contributions), or
    /// `-1` when estimation is disabled.
    pub bound: E,
    pub delta_pr: E,
    pub delta_du: E,
    /// Residual parts per time step (primal).
    pub primal_parts: Vec<Vec<E>>,
    /// Residual parts per time step (dual).
    pub dual_parts: Vec<Vec<E>>,
}

/// Certified output of one online query.
#[derive(Debug, Clone)]
pub struct CrbOutput {
    pub output: E,
    pub dimension: I,
    pub bound: E,
    pub delta_pr: E,
    pub delta_du: E,
    pub condition_number: Option<E>,
    pub primal_residual_norm: E,
    pub dual_residual_norm: E,
}

impl<M: TruthModel> Crb<M> {
    /// Number of time steps and step size of the online trajectory; steady
    /// problems report a single step.
    pub(crate) fn time_grid(&self, k_cap: Option<I>) -> (E, I) {
        if self.model.is_steady() {
            return (E::INFINITY, 1);
        }
        let dt = self.model.time_step();
        let steps = ((self.model.time_final() - self.model.time_initial()) / dt).round() as I;
        let steps = steps.max(1);
        match k_cap {
            Some(k) if k > 0 => (dt, k.min(steps)),
            _ => (dt, steps),
        }
    }

    /// Solves the reduced problem of dimension `n` at `mu`. For transient
    /// problems `k_cap` truncates the trajectory after `k` steps.
    pub fn online_solve(
        &self,
        n: I,
        mu: &Parameter,
        k_cap: Option<I>,
    ) -> Result<OnlineSolution, Problem> {
        let n = self.clamp_dimension(n)?;

        let mut solution = if self.model.is_steady() {
            let (u, output, cond) = if self.config.use_newton {
                self.newton_solve(n, mu)?
            } else {
                self.steady_fixed_point(n, mu)?
            };
            let mut solution = OnlineSolution {
                u: vec![u],
                u_old: Vec::new(),
                u_du: Vec::new(),
                u_du_old: Vec::new(),
                outputs: vec![output],
                condition_number: cond,
            };
            if self.config.solve_dual_problem {
                let psi = self.steady_dual_solve(n, mu)?;
                solution.u_du.push(psi);
                let correction = self.correction_terms(mu, &solution, 1)?;
                solution.outputs[0] += correction;
            }
            solution
        } else {
            let mut solution = self.transient_primal(n, mu, k_cap)?;
            if self.config.solve_dual_problem {
                self.transient_dual(n, mu, &mut solution)?;
                let steps = solution.u.len();
                for k in 1..=steps {
                    let correction = self.correction_terms(mu, &solution, k)?;
                    solution.outputs[k - 1] += correction;
                }
            }
            solution
        };

        if self.config.compute_variance {
            self.variance_outputs(n, &mut solution)?;
        }

        if self.config.save_output_behavior && !self.model.is_steady() {
            self.dump_output_behavior(mu, &solution)?;
        }

        Ok(solution)
    }

    /// Reduced projection of the truth initial guess, or a vector of ones
    /// when the model provides no initial-guess decomposition.
    pub(crate) fn projection_initial_guess(&self, mu: &Parameter, n: I) -> Result<Col<E>, Problem> {
        if self.model.q_initial_guess() == 0 {
            return Ok(Col::ones(n));
        }
        let beta = self.model.beta_initial_guess(mu)?;
        let mass = if self.model.qm() > 0 {
            let unit: Vec<Vec<E>> = (0..self.model.qm())
                .map(|q| vec![1.0; self.model.m_max_m(q)])
                .collect();
            self.mqm_pr.combine(&unit, n)
        } else {
            self.gram_pr.as_ref().submatrix(0, 0, n, n).to_owned()
        };
        let f = self.initial_guess_pr.combine(&beta, n);
        Ok(lu_solve(mass.as_ref(), f.as_ref()))
    }

    fn steady_fixed_point(
        &self,
        n: I,
        mu: &Parameter,
    ) -> Result<(Col<E>, E, Option<E>), Problem> {
        let tol = self.config.increment_fixedpoint_tol;
        let critical = self.config.fixedpoint_critical_value;
        let max_iterations = self.config.max_fixedpoint_iterations.max(1);

        let mut u = self.projection_initial_guess(mu, n)?;
        let mut a = Mat::<E>::zeros(n, n);
        let mut output = 0.0;
        let mut increment = E::INFINITY;

        let mut iteration = 0;
        while iteration < max_iterations {
            let expansion = self.expansion_pr(u.as_ref(), n);
            let beta = self
                .model
                .compute_beta_with_state(expansion.as_ref(), mu, 0.0)?;

            a = self.aqm_pr.combine(&beta.a, n);
            let f = self.fqm_pr.combine(&beta.f[0], n);

            let previous = u.clone();
            u = lu_solve(a.as_ref(), f.as_ref());

            let l = self.lqm_pr.combine(&beta.f[self.config.output_index], n);
            output = dot(l.as_ref(), u.as_ref());

            increment = (&u - &previous).norm_l2();
            iteration += 1;
            if self.config.fixedpoint_verbose {
                debug!(
                    target: "certrb::online",
                    "fixed point iteration {} increment {:e}", iteration, increment
                );
            }
            if increment > critical {
                return Err(Problem::from(CrbError::Divergence {
                    mu: mu.to_string(),
                    context: format!("reduced fixed point, iteration {}", iteration),
                    increment,
                }));
            }
            if increment <= tol {
                break;
            }
        }
        if increment > tol {
            warn!(
                target: "certrb::online",
                "fixed point stopped after {} iterations with increment {:e} at mu = {}",
                max_iterations, increment, mu
            );
        }

        let cond = if self.config.compute_conditioning {
            Some(condition_number(a.as_ref())?)
        } else {
            None
        };
        Ok((u, output, cond))
    }

    fn newton_solve(&self, n: I, mu: &Parameter) -> Result<(Col<E>, E, Option<E>), Problem> {
        let tol = self.config.newton_tolerance;
        let critical = self.config.fixedpoint_critical_value;
        let max_iterations = self.config.newton_max_iterations.max(1);

        let mut u = self.projection_initial_guess(mu, n)?;
        let mut j = Mat::<E>::zeros(n, n);

        for iteration in 1..=max_iterations {
            let expansion = self.expansion_pr(u.as_ref(), n);
            let beta = self
                .model
                .compute_beta_with_state(expansion.as_ref(), mu, 0.0)?;

            j = self.jqm_pr.combine(&beta.a, n);
            let r = self.rqm_pr.combine(&beta.f[0], n);
            if r.norm_l2() < tol {
                break;
            }

            let rhs = -1.0 * &r;
            let step = lu_solve(j.as_ref(), rhs.as_ref());
            let step_norm = step.norm_l2();
            u = &u + &step;

            if step_norm > critical {
                return Err(Problem::from(CrbError::Divergence {
                    mu: mu.to_string(),
                    context: format!("reduced Newton, iteration {}", iteration),
                    increment: step_norm,
                }));
            }
            if step_norm < tol {
                break;
            }
            if iteration == max_iterations {
                warn!(
                    target: "certrb::online",
                    "Newton stopped after {} iterations with step {:e} at mu = {}",
                    max_iterations, step_norm, mu
                );
            }
        }

        let expansion = self.expansion_pr(u.as_ref(), n);
        let beta = self
            .model
            .compute_beta_with_state(expansion.as_ref(), mu, 0.0)?;
        let l = self.lqm_pr.combine(&beta.f[self.config.output_index], n);
        let output = dot(l.as_ref(), u.as_ref());

        let cond = if self.config.compute_conditioning {
            Some(condition_number(j.as_ref())?)
        } else {
            None
        };
        Ok((u, output, cond))
    }

    /// Steady dual solve `A_du(mu) psi = -L_du(mu)`.
    fn steady_dual_solve(&self, n: I, mu: &Parameter) -> Result<Col<E>, Problem> {
        let beta = self.model.compute_beta(mu, 0.0)?;
        let a_du = self.aqm_du.combine(&beta.a, n);
        let l_du = self.lqm_du.combine(&beta.f[self.config.output_index], n);
        let rhs = -1.0 * &l_du;
        Ok(lu_solve(a_du.as_ref(), rhs.as_ref()))
    }

    fn transient_primal(
        &self,
        n: I,
        mu: &Parameter,
        k_cap: Option<I>,
    ) -> Result<OnlineSolution, Problem> {
        let (dt, steps) = self.time_grid(k_cap);
        let t0 = self.model.time_initial();
        let scheme = BdfScheme::new(self.model.time_order());
        let tol = self.config.increment_fixedpoint_tol;
        let critical = self.config.fixedpoint_critical_value;
        let max_iterations = self.config.max_fixedpoint_iterations.max(1);

        let u_initial = Col::from_fn(n, |i| self.coeff_pr_ini[i]);
        let mut history: Vec<Col<E>> = vec![u_initial];

        let mut u = Vec::with_capacity(steps);
        let mut u_old = Vec::with_capacity(steps);
        let mut outputs = Vec::with_capacity(steps);
        let mut last_matrix = Mat::<E>::zeros(n, n);

        for step in 1..=steps {
            let time = t0 + step as E * dt;
            let alpha0 = scheme.alpha0(step);
            let weights = scheme.history_weights(step);

            let mut history_term = Col::<E>::zeros(n);
            for (j, w) in weights.iter().enumerate() {
                history_term += *w * &history[j];
            }

            let mut u_cur = self.projection_initial_guess(mu, n)?;
            let mut increment = E::INFINITY;
            let mut iteration = 0;
            while iteration < max_iterations {
                let expansion = self.expansion_pr(u_cur.as_ref(), n);
                let beta = self
                    .model
                    .compute_beta_with_state(expansion.as_ref(), mu, time)?;

                let mut a = self.aqm_pr.combine(&beta.a, n);
                let m = self.mqm_pr.combine(&beta.m, n);
                a += (alpha0 / dt) * &m;
                let mut f = self.fqm_pr.combine(&beta.f[0], n);
                f += (1.0 / dt) * (m.as_ref() * history_term.as_ref());

                let previous = u_cur.clone();
                u_cur = lu_solve(a.as_ref(), f.as_ref());
                last_matrix = a;

                let l = self.lqm_pr.combine(&beta.f[self.config.output_index], n);
                let output = dot(l.as_ref(), u_cur.as_ref());
                if outputs.len() < step {
                    outputs.push(output);
                } else {
                    outputs[step - 1] = output;
                }

                increment = (&u_cur - &previous).norm_l2();
                iteration += 1;
                if self.config.fixedpoint_verbose {
                    debug!(
                        target: "certrb::online",
                        "time {:.6}: fixed point iteration {} increment {:e}",
                        time, iteration, increment
                    );
                }
                if increment > critical {
                    return Err(Problem::from(CrbError::Divergence {
                        mu: mu.to_string(),
                        context: format!("time step {:.6}, iteration {}", time, iteration),
                        increment,
                    }));
                }
                if increment <= tol {
                    break;
                }
            }
            if increment > tol {
                warn!(
                    target: "certrb::online",
                    "fixed point at time {:.6} stopped with increment {:e} at mu = {}",
                    time, increment, mu
                );
            }

            u_old.push(history[0].clone());
            u.push(u_cur.clone());
            history.insert(0, u_cur);
            history.truncate(crate::bdf::MAX_ORDER);
        }

        let cond = if self.config.compute_conditioning {
            Some(condition_number(last_matrix.as_ref())?)
        } else {
            None
        };
        Ok(OnlineSolution {
            u,
            u_old,
            u_du: Vec::new(),
            u_du_old: Vec::new(),
            outputs,
            condition_number: cond,
        })
    }

    /// Time-reversed dual solve; fills `u_du` and `u_du_old` of `solution`.
    /// The final-time state is the stored projection of the output
    /// functional; the march is first order, matching the residual tables.
    fn transient_dual(
        &self,
        n: I,
        mu: &Parameter,
        solution: &mut OnlineSolution,
    ) -> Result<(), Problem> {
        let steps = solution.u.len();
        let dt = self.model.time_step();
        let t0 = self.model.time_initial();

        let mut u_du = vec![Col::<E>::zeros(n); steps];
        let mut u_du_old = vec![Col::<E>::zeros(n); steps];
        u_du_old[steps - 1] = Col::from_fn(n, |i| self.coeff_du_ini[i]);

        let mut time_index = steps - 1;
        for step in (1..=steps).rev() {
            let time = t0 + step as E * dt;
            let beta = self.model.compute_beta(mu, time)?;

            let mut a_du = self.aqm_du.combine(&beta.a, n);
            let m_du = self.mqm_du.combine(&beta.m, n);
            a_du += (1.0 / dt) * &m_du;
            let f_du = (1.0 / dt) * (m_du.as_ref() * u_du_old[time_index].as_ref());

            u_du[time_index] = lu_solve(a_du.as_ref(), f_du.as_ref());
            if time_index > 0 {
                u_du_old[time_index - 1] = u_du[time_index].clone();
            }
            time_index = time_index.saturating_sub(1);
        }

        solution.u_du = u_du;
        solution.u_du_old = u_du_old;
        Ok(())
    }

    /// Second-order output correction from the dual solution. For transient
    /// problems the correction at step `k` pairs the dual at `T - t` with the
    /// primal at `t` and accumulates over the elapsed steps.
    pub(crate) fn correction_terms(
        &self,
        mu: &Parameter,
        solution: &OnlineSolution,
        k: I,
    ) -> Result<E, Problem> {
        let n = solution.u[0].nrows();

        if self.model.is_steady() {
            let beta = self.model.compute_beta(mu, 0.0)?;
            let f_du = self.fqm_du.combine(&beta.f[0], n);
            let a_pr_du = self.aqm_pr_du.combine(&beta.a, n);
            let du = &solution.u_du[0];
            let pr = &solution.u[0];
            let coupled = a_pr_du.as_ref() * pr.as_ref();
            return Ok(-(dot(f_du.as_ref(), du.as_ref()) - dot(du.as_ref(), coupled.as_ref())));
        }

        let dt = self.model.time_step();
        let t0 = self.model.time_initial();
        let steps = solution.u.len();
        let mut correction = 0.0;

        for kp in 1..=k {
            let time_index = steps - k + kp;
            let time = t0 + time_index as E * dt;
            let beta = self.model.compute_beta(mu, time)?;

            let f_du = self.fqm_du.combine(&beta.f[0], n);
            let a_pr_du = self.aqm_pr_du.combine(&beta.a, n);
            let m_pr_du = self.mqm_pr_du.combine(&beta.m, n);

            let time_index = time_index - 1;
            let du = &solution.u_du[steps - 1 - time_index];
            let pr = &solution.u[time_index];
            let old_pr = &solution.u_old[time_index];

            let a_pr = a_pr_du.as_ref() * pr.as_ref();
            let m_pr = m_pr_du.as_ref() * pr.as_ref();
            let m_oldpr = m_pr_du.as_ref() * old_pr.as_ref();
            correction += dt
                * (dot(f_du.as_ref(), du.as_ref()) - dot(du.as_ref(), a_pr.as_ref()))
                - dot(du.as_ref(), m_pr.as_ref())
                + dot(du.as_ref(), m_oldpr.as_ref());
        }
        Ok(correction)
    }

    /// Replaces the reported outputs by the variance `u . Phi u`.
    fn variance_outputs(&self, n: I, solution: &mut OnlineSolution) -> Result<(), Problem> {
        let phi = self.variance_phi.as_ref().ok_or_else(|| {
            CrbError::configuration(
                "crb.compute-variance",
                "no variance information in the database; rebuild with \
                 crb.save-information-for-variance",
            )
        })?;
        let block = phi.as_ref().submatrix(0, 0, n, n);
        for (k, u) in solution.u.iter().enumerate() {
            solution.outputs[k] = dot(u.as_ref(), (block * u.as_ref()).as_ref());
        }
        Ok(())
    }

    fn dump_output_behavior(
        &self,
        mu: &Parameter,
        solution: &OnlineSolution,
    ) -> Result<(), Problem> {
        let mut name = format!("{}_output_evolution", self.config.results_repo_name);
        for v in mu.as_slice() {
            name.push_str(&format!("_{}", v));
        }
        let file = File::create(&name)
            .via(CrbError::database(format!("cannot create {}", name)))?;
        let mut out = BufWriter::new(file);
        let dt = self.model.time_step();
        let t0 = self.model.time_initial();
        for (k, output) in solution.outputs.iter().enumerate() {
            writeln!(out, "{}\t{}", t0 + (k + 1) as E * dt, output)
                .via(CrbError::database(format!("cannot write {}", name)))?;
        }
        Ok(())
    }

    /// Error estimation for a computed online solution.
    ///
    /// Residual modes evaluate the precomputed quadratic forms and divide by
    /// the coercivity lower bound when an SCM provider is installed
    /// (`residual-scm`); plain `residual` mode reports the undivided dual
    /// norm, a relative indicator rather than a certified bound. Empirical
    /// mode compares against a smaller basis; `none` reports `-1`.
    pub fn delta(
        &self,
        n: I,
        mu: &Parameter,
        solution: &OnlineSolution,
    ) -> Result<ErrorEstimate, Problem> {
        match self.config.error_type {
            ErrorEstimationKind::NoResidual => Ok(ErrorEstimate {
                bound: -1.0,
                delta_pr: 0.0,
                delta_du: 0.0,
                primal_parts: Vec::new(),
                dual_parts: Vec::new(),
            }),
            ErrorEstimationKind::Empirical => {
                let bound = self.empirical_error(n, mu)?;
                Ok(ErrorEstimate {
                    bound,
                    delta_pr: 0.0,
                    delta_du: 0.0,
                    primal_parts: Vec::new(),
                    dual_parts: Vec::new(),
                })
            }
            ErrorEstimationKind::Residual | ErrorEstimationKind::ResidualScm => {
                self.residual_delta(n, mu, solution)
            }
        }
    }

    fn coercivity_lower_bound(&self, mu: &Parameter, target: BoundTarget) -> Result<E, Problem> {
        match self.config.error_type {
            ErrorEstimationKind::ResidualScm => {
                let provider = self.coercivity.as_ref().ok_or_else(|| {
                    CrbError::configuration(
                        "crb.error-type",
                        "residual-scm requires a coercivity-bound provider",
                    )
                })?;
                Ok(provider.lower_bound(mu, target)?.0)
            }
            _ => Ok(1.0),
        }
    }

    fn residual_delta(
        &self,
        n: I,
        mu: &Parameter,
        solution: &OnlineSolution,
    ) -> Result<ErrorEstimate, Problem> {
        let mu_display = mu.to_string();
        let solve_dual = self.config.solve_dual_problem;
        let output_index = self.config.output_index;

        let alpha_a = self.coercivity_lower_bound(mu, BoundTarget::Stiffness)?;

        if self.model.is_steady() {
            let beta = self.model.compute_beta(mu, 0.0)?;
            let pr = self
                .residual
                .steady_primal(n, &beta, solution.u[0].as_ref(), &mu_display);
            let primal_sum = pr.value;
            let mut dual_parts = Vec::new();
            let delta_pr = primal_sum.sqrt() / alpha_a.sqrt();
            let delta_du = if solve_dual {
                let du = self.residual.steady_dual(
                    n,
                    &beta,
                    output_index,
                    solution.u_du[0].as_ref(),
                    &mu_display,
                );
                let value = du.value;
                dual_parts.push(du.parts);
                value.sqrt() / alpha_a.sqrt()
            } else {
                1.0
            };
            return Ok(ErrorEstimate {
                bound: delta_pr * delta_du,
                delta_pr,
                delta_du,
                primal_parts: vec![pr.parts],
                dual_parts,
            });
        }

        let alpha_m = self.coercivity_lower_bound(mu, BoundTarget::Mass)?;
        let dt = self.model.time_step();
        let t0 = self.model.time_initial();
        let steps = solution.u.len();

        let mut primal_sum = 0.0;
        let mut primal_parts = Vec::with_capacity(steps);
        for step in 1..=steps {
            let time = t0 + step as E * dt;
            let beta = self.model.compute_beta(mu, time)?;
            let value = self.residual.transient_primal(
                n,
                &beta,
                solution.u[step - 1].as_ref(),
                solution.u_old[step - 1].as_ref(),
                dt,
                &mu_display,
            );
            primal_sum += value.value;
            primal_parts.push(value.parts);
        }

        let beta_final = self.model.compute_beta(mu, self.model.time_final())?;
        let initial_dual = if solve_dual {
            self.residual.initial_dual(
                n,
                &beta_final,
                output_index,
                solution.u_du_old[steps - 1].as_ref(),
            )
        } else {
            0.0
        };

        let mut dual_sum = 0.0;
        let mut dual_parts = vec![Vec::new(); steps];
        if solve_dual {
            for step in (1..=steps).rev() {
                let time = t0 + step as E * dt;
                let beta = self.model.compute_beta(mu, time)?;
                let value = self.residual.transient_dual(
                    n,
                    &beta,
                    output_index,
                    solution.u_du[step - 1].as_ref(),
                    solution.u_du_old[step - 1].as_ref(),
                    dt,
                    &mu_display,
                );
                dual_sum += value.value;
                dual_parts[step - 1] = value.parts;
            }
        }

        let delta_pr = (dt / alpha_a * primal_sum).sqrt();
        let delta_du = if solve_dual {
            (dt / alpha_a * dual_sum + initial_dual / alpha_m).sqrt()
        } else {
            1.0
        };
        Ok(ErrorEstimate {
            bound: delta_pr * delta_du,
            delta_pr,
            delta_du,
            primal_parts,
            dual_parts,
        })
    }

    /// Empirical error `|s_N - s_N'|` with `N'` given by the factor rule.
    pub(crate) fn empirical_error(&self, n: I, mu: &Parameter) -> Result<E, Problem> {
        let solution = self.online_solve(n, mu, None)?;
        let s_n = solution.output();
        let smaller = self.config.empirical_comparison_dimension(n);
        if smaller == n {
            return Ok(0.0);
        }
        let solution_small = self.online_solve(smaller, mu, None)?;
        Ok((s_n - solution_small.output()).abs())
    }

    /// One certified online query: reduced output, error bound and residual
    /// norms at the final time.
    pub fn run(&self, mu: &Parameter, dimension: Option<I>) -> Result<CrbOutput, Problem> {
        let n = self.clamp_dimension(dimension.unwrap_or(self.n))?;
        let solution = self.online_solve(n, mu, None)?;
        let estimate = self.delta(n, mu, &solution)?;

        let mut primal_residual_norm = 0.0;
        let mut dual_residual_norm = 0.0;
        if self.config.error_type.uses_residual() {
            if let Some(parts) = estimate.primal_parts.last() {
                primal_residual_norm = parts.iter().sum::<E>().abs().sqrt();
            }
            if self.config.solve_dual_problem {
                if let Some(parts) = estimate.dual_parts.first() {
                    dual_residual_norm = if self.model.is_steady() {
                        (parts[0] + parts[1] + parts[2]).abs().sqrt()
                    } else {
                        (parts[2] + parts[4] + parts[5]).abs().sqrt()
                    };
                }
            }
        }

        Ok(CrbOutput {
            output: solution.output(),
            dimension: n,
            bound: estimate.bound,
            delta_pr: estimate.delta_pr,
            delta_du: estimate.delta_du,
            condition_number: solution.condition_number,
            primal_residual_norm,
            dual_residual_norm,
        })
    }

    /// `crb.check.residual` diagnostic: compares the table-based steady
    /// primal residual against a direct truth-space dual-norm evaluation.
    pub fn check_residual(&self, n: I, mu: &Parameter) -> Result<(E, E), Problem> {
        if !self.config.error_type.uses_residual() {
            return Err(Problem::from(CrbError::configuration(
                "crb.check.residual",
                "residual checking requires a residual error type",
            )));
        }
        let solution = self.online_solve(n, mu, None)?;
        let beta = self.model.compute_beta(mu, 0.0)?;
        let from_tables =
            self.residual
                .steady_primal(n, &beta, solution.u[0].as_ref(), &mu.to_string());
        let expansion = self.expansion_pr(solution.u[0].as_ref(), n);
        let direct =
            crate::residual::direct_steady_primal_residual(&self.model, &beta, expansion.as_ref())?;
        Ok((from_tables.value, direct))
    }
}
