//! Offline greedy construction of the reduced basis.
//!
//! Each iteration solves the truth problem at the currently selected
//! parameter, enriches the primal (and dual) bases, re-orthonormalises,
//! updates the reduced operator tables and the residual precomputations,
//! then scans the training sampling for the worst-estimated parameter. The
//! loop stops when the estimated error drops below the offline tolerance,
//! the basis reaches its maximum dimension, or a predefined sampling is
//! exhausted. State is persisted after every step so an interrupted run can
//! resume.

use std::path::Path;
use std::time::Instant;

use faer::Col;
use problemo::Problem;
use tracing::{info, warn};

use crate::basis::{gram_deviation, orthonormalize};
use crate::callback::OfflineIteration;
use crate::config::ErrorEstimationKind;
use crate::crb::{ConvergenceRecord, Crb};
use crate::db::DbPaths;
use crate::error::CrbError;
use crate::linalg::{dot, lu_solve};
use crate::model::TruthModel;
use crate::parameter::{Parameter, Sampling, SamplingMode};
use crate::pod::Pod;
use crate::variance::update_variance_matrix;
use crate::{E, I, OfflineHooks, OfflineStatus};

/// Sentinel used while the estimated error is unknown (no-residual and
/// predefined-sampling modes).
const UNKNOWN_ERROR: E = 1e10;

impl<M: TruthModel> Crb<M> {
    /// Runs the offline greedy loop. `db` enables persistence after each
    /// step; pass `None` for in-memory construction.
    pub fn offline(
        &mut self,
        hooks: &mut OfflineHooks,
        db: Option<&DbPaths>,
    ) -> Result<OfflineStatus, Problem> {
        self.validate_offline_setup()?;
        let predefined = self.setup_samplings()?;

        let iter_max = match &predefined {
            Some(sampling) => sampling.len(),
            None => self.config.dimension_max,
        };

        let (mut mu, mut mu_index) = self.first_parameter(&predefined)?;
        if self.n == 0 {
            self.max_error = UNKNOWN_ERROR;
        }
        if self.config.error_type == ErrorEstimationKind::NoResidual || predefined.is_some() {
            self.max_error = UNKNOWN_ERROR;
        }

        info!(
            target: "certrb::offline",
            "starting offline loop: N = {}, iter_max = {}, strategy = {:?}",
            self.n, iter_max, self.config.error_type
        );

        hooks.callback.init();
        hooks.terminator.initialize();

        while self.max_error > self.config.error_max && self.n < iter_max {
            let timer = Instant::now();

            let added = self.snapshot_and_enrich(&mu)?;
            self.wnmu.push(mu.clone());
            self.selection_indices.push(mu_index);

            self.orthonormalize_bases(added);
            self.update_gram(added);
            self.update_operator_tables(added)?;
            if self.is_transient() {
                self.update_initial_condition_coefficients(&mu, added)?;
            }
            if self.config.save_information_for_variance {
                let mut phi = self.variance_phi.take().unwrap_or_else(|| {
                    faer::Mat::zeros(0, 0)
                });
                update_variance_matrix(&self.model, &self.basis_pr, &mut phi, self.n, added);
                self.variance_phi = Some(phi);
            }
            if self.config.error_type.uses_residual() {
                self.residual.offline_update(
                    &self.model,
                    &self.basis_pr,
                    &self.basis_du,
                    self.n,
                    added,
                    self.config.output_index,
                    self.config.solve_dual_problem,
                    self.is_transient(),
                    self.config.use_symmetric_matrix,
                )?;
            }

            let mut delta_pr = 0.0;
            let mut delta_du = 0.0;
            let (next_mu, next_index) = match (&predefined, self.config.error_type) {
                (Some(sampling), _) => {
                    if self.n < iter_max {
                        (sampling.at(self.n).clone(), self.n)
                    } else {
                        (mu.clone(), mu_index)
                    }
                }
                (None, ErrorEstimationKind::NoResidual) => {
                    let candidate = self.random_unselected_parameter();
                    (candidate, 0)
                }
                _ => {
                    let bounds = self.max_error_bounds()?;
                    self.max_error = bounds.max_error;
                    delta_pr = bounds.delta_pr;
                    delta_du = bounds.delta_du;
                    (bounds.mu, bounds.index)
                }
            };

            self.convergence.insert(
                self.n,
                ConvergenceRecord {
                    max_error: self.max_error,
                    delta_pr,
                    delta_du,
                },
            );

            self.mode_number = 1 + self
                .wnmu
                .iter()
                .filter(|selected| *selected == &next_mu)
                .count();

            if self.config.check_rb {
                self.check_reproduction()?;
            }
            if self.config.check_gs && self.config.orthonormalize_primal {
                let deviation = gram_deviation(&self.model, &self.basis_pr);
                info!(
                    target: "certrb::offline",
                    "Gram-Schmidt check: ||G - I|| = {:e}", deviation
                );
            }
            if self.config.check_residual && self.model.is_steady() {
                let (from_tables, direct) = self.check_residual(self.n, &mu)?;
                info!(
                    target: "certrb::offline",
                    "residual check at {}: tables {:e} vs direct {:e}", mu, from_tables, direct
                );
            }

            self.current_mu = Some(next_mu.clone());

            if let Some(paths) = db {
                crate::db::save(self, paths)?;
            }

            let iteration = OfflineIteration {
                n: self.n,
                max_error: self.max_error,
                delta_pr,
                delta_du,
                next_mu: next_mu.clone(),
                elapsed: timer.elapsed().as_secs_f64(),
            };
            hooks.callback.call(&iteration);

            if let Some(status) = hooks.terminator.terminate(&iteration) {
                info!(target: "certrb::offline", "offline loop stopped: {:?}", status);
                return Ok(status);
            }

            mu = next_mu;
            mu_index = next_index;
        }

        let status = if self.max_error <= self.config.error_max {
            OfflineStatus::Converged
        } else if predefined.is_some() {
            OfflineStatus::SamplingExhausted
        } else {
            OfflineStatus::DimensionLimit
        };

        if self.config.show_mu_selection {
            self.print_mu_selection();
        }
        info!(
            target: "certrb::offline",
            "offline loop finished with {} basis functions: {:?}", self.n, status
        );
        Ok(status)
    }

    fn validate_offline_setup(&self) -> Result<(), Problem> {
        if self.config.error_type == ErrorEstimationKind::ResidualScm && self.coercivity.is_none() {
            return Err(Problem::from(CrbError::configuration(
                "crb.error-type",
                "residual-scm requires a coercivity-bound provider",
            )));
        }
        if self.config.use_newton && self.is_transient() {
            return Err(Problem::from(CrbError::configuration(
                "crb.use-newton",
                "the Newton online solver supports steady problems only",
            )));
        }
        Ok(())
    }

    /// Builds the training sampling and, when requested, the predefined
    /// greedy sampling (generating its file for the log/equidistributed
    /// variants).
    fn setup_samplings(&mut self) -> Result<Option<Sampling>, Problem> {
        if self.xi.is_empty() {
            self.xi = Sampling::generate(
                self.model.parameter_space(),
                self.config.sampling_mode,
                self.config.sampling_size,
                &mut self.rng,
            );
        }

        let path = self.config.predefined_wnmu_file.clone();
        if self.config.use_log_equidistributed_wnmu > 0 {
            let sampling = Sampling::generate(
                self.model.parameter_space(),
                SamplingMode::LogEquidistributed,
                self.config.use_log_equidistributed_wnmu,
                &mut self.rng,
            );
            sampling.write_to_file(Path::new(&path))?;
        } else if self.config.use_equidistributed_wnmu > 0 {
            let sampling = Sampling::generate(
                self.model.parameter_space(),
                SamplingMode::Equidistributed,
                self.config.use_equidistributed_wnmu,
                &mut self.rng,
            );
            sampling.write_to_file(Path::new(&path))?;
        }

        if self.config.predefined_wnmu_requested() {
            let sampling = Sampling::read_from_file(Path::new(&path))?;
            info!(
                target: "certrb::offline",
                "predefined greedy sampling of size {}", sampling.len()
            );
            Ok(Some(sampling))
        } else {
            Ok(None)
        }
    }

    fn first_parameter(
        &mut self,
        predefined: &Option<Sampling>,
    ) -> Result<(Parameter, I), Problem> {
        if self.n > 0 {
            let mu = self.current_mu.clone().ok_or_else(|| {
                CrbError::database("resumed database does not record the current parameter")
            })?;
            info!(
                target: "certrb::offline",
                "enriching an existing basis of {} elements", self.n
            );
            return Ok((mu, 0));
        }
        if let Some(sampling) = predefined {
            return Ok((sampling.at(0).clone(), 0));
        }
        if self.config.error_type.uses_residual() {
            let (mu, index) = self.xi.min();
            Ok((mu.clone(), index))
        } else {
            let mu = self.random_unselected_parameter();
            Ok((mu, 0))
        }
    }

    /// Draws a random parameter that is not already selected; the rejection
    /// scan is linear in the selected sampling.
    fn random_unselected_parameter(&mut self) -> Parameter {
        loop {
            let candidate = self.model.parameter_space().random_element(&mut self.rng);
            if !self.wnmu.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Truth solve at `mu` and enrichment of both bases. Returns the number
    /// of appended elements.
    fn snapshot_and_enrich(&mut self, mu: &Parameter) -> Result<I, Problem> {
        let output_index = self.config.output_index;
        if self.model.is_steady() {
            let u = self.model.solve(mu)?;
            let udu = if self.config.solve_dual_problem {
                self.model.solve_dual(mu, output_index)?
            } else {
                Col::zeros(self.model.dimension())
            };
            self.basis_pr.push(u);
            self.basis_du.push(udu);
            self.n += 1;
            return Ok(1);
        }

        let trajectory = self.model.solve_trajectory(mu)?;
        let nm = self.config.nm;
        let pod = Pod::new(nm * self.mode_number);
        let all_modes = pod.modes(&self.model, &trajectory)?;
        let new_modes: Vec<Col<E>> = all_modes
            .into_iter()
            .skip((self.mode_number - 1) * nm)
            .collect();
        if new_modes.is_empty() {
            return Err(Problem::from(CrbError::truth_model(format!(
                "POD produced no new mode at mu = {} (multiplicity {})",
                mu, self.mode_number
            ))));
        }
        if new_modes.len() < nm {
            // The trajectory does not carry the requested number of modes;
            // lower the per-step count so later iterations ask for what the
            // snapshots can actually provide.
            warn!(
                target: "certrb::offline",
                "POD produced {} of the {} requested modes at mu = {}; \
                 lowering the modes per step",
                new_modes.len(),
                nm,
                mu
            );
            self.config.nm = new_modes.len();
        }

        let mut primal_new: Vec<Col<E>> = Vec::new();
        if self.n == 0 && !self.config.orthonormalize_primal {
            let initial = self.model.initialization_field(mu);
            if initial.norm_l2() > 0.0 {
                primal_new.push(initial);
            }
        }
        primal_new.extend(new_modes);

        let dual_new: Vec<Col<E>> = if self.config.solve_dual_problem {
            let dual_trajectory = self.model.solve_dual_trajectory(mu, output_index)?;
            let dual_modes = pod.modes(&self.model, &dual_trajectory)?;
            let mut modes: Vec<Col<E>> = dual_modes
                .into_iter()
                .skip((self.mode_number - 1) * nm)
                .collect();
            modes.resize(primal_new.len(), Col::zeros(self.model.dimension()));
            modes
        } else {
            vec![Col::zeros(self.model.dimension()); primal_new.len()]
        };

        let added = primal_new.len();
        for v in primal_new {
            self.basis_pr.push(v);
        }
        for v in dual_new {
            self.basis_du.push(v);
        }
        self.n += added;
        Ok(added)
    }

    /// Three consecutive Gram-Schmidt passes over the newly added vectors.
    fn orthonormalize_bases(&mut self, added: I) {
        if self.config.orthonormalize_primal {
            for _ in 0..3 {
                orthonormalize(&self.model, &mut self.basis_pr, added);
            }
        }
        if self.config.orthonormalize_dual && self.config.solve_dual_problem {
            for _ in 0..3 {
                orthonormalize(&self.model, &mut self.basis_du, added);
            }
        }
    }

    fn update_gram(&mut self, added: I) {
        let n = self.n;
        self.gram_pr.resize_with(n, n, |_, _| 0.0);
        for i in (n - added)..n {
            for j in 0..n {
                let value = self.model.scalar_product(self.basis_pr.at(i), self.basis_pr.at(j));
                self.gram_pr[(i, j)] = value;
                self.gram_pr[(j, i)] = value;
            }
        }
    }

    /// Appends the last rows and columns of every reduced operator table.
    fn update_operator_tables(&mut self, added: I) -> Result<(), Problem> {
        let n = self.n;
        let output_index = self.config.output_index;
        let model = &self.model;
        let basis_pr = &self.basis_pr;
        let basis_du = &self.basis_du;

        if !self.config.use_newton {
            self.aqm_pr.resize_dim(n);
            self.aqm_du.resize_dim(n);
            self.aqm_pr_du.resize_dim(n);
            for q in 0..model.qa() {
                for m in 0..model.m_max_a(q) {
                    for i in (n - added)..n {
                        for j in 0..n {
                            self.aqm_pr.at_mut(q, m)[(i, j)] =
                                model.bilinear_a(q, m, basis_pr.at(i), basis_pr.at(j), false);
                            self.aqm_du.at_mut(q, m)[(i, j)] =
                                model.bilinear_a(q, m, basis_du.at(i), basis_du.at(j), true);
                            self.aqm_pr_du.at_mut(q, m)[(i, j)] =
                                model.bilinear_a(q, m, basis_du.at(i), basis_pr.at(j), false);
                        }
                    }
                    for j in (n - added)..n {
                        for i in 0..n {
                            self.aqm_pr.at_mut(q, m)[(i, j)] =
                                model.bilinear_a(q, m, basis_pr.at(i), basis_pr.at(j), false);
                            self.aqm_du.at_mut(q, m)[(i, j)] =
                                model.bilinear_a(q, m, basis_du.at(i), basis_du.at(j), true);
                            self.aqm_pr_du.at_mut(q, m)[(i, j)] =
                                model.bilinear_a(q, m, basis_du.at(i), basis_pr.at(j), false);
                        }
                    }
                }
            }

            self.fqm_pr.resize_dim(n);
            self.fqm_du.resize_dim(n);
            for q in 0..model.ql(0) {
                for m in 0..model.m_max_f(0, q) {
                    for l in 1..=added {
                        let index = n - l;
                        self.fqm_pr.at_mut(q, m)[index] =
                            model.functional(0, q, m, basis_pr.at(index));
                        self.fqm_du.at_mut(q, m)[index] =
                            model.functional(0, q, m, basis_du.at(index));
                    }
                }
            }
        } else {
            self.jqm_pr.resize_dim(n);
            for q in 0..model.qa() {
                for m in 0..model.m_max_a(q) {
                    for i in (n - added)..n {
                        for j in 0..n {
                            self.jqm_pr.at_mut(q, m)[(i, j)] =
                                model.bilinear_jacobian(q, m, basis_pr.at(i), basis_pr.at(j));
                        }
                    }
                    for j in (n - added)..n {
                        for i in 0..n {
                            self.jqm_pr.at_mut(q, m)[(i, j)] =
                                model.bilinear_jacobian(q, m, basis_pr.at(i), basis_pr.at(j));
                        }
                    }
                }
            }

            self.rqm_pr.resize_dim(n);
            for q in 0..model.ql(0) {
                for m in 0..model.m_max_f(0, q) {
                    for l in 1..=added {
                        let index = n - l;
                        self.rqm_pr.at_mut(q, m)[index] =
                            model.functional(0, q, m, basis_pr.at(index));
                    }
                }
            }
        }

        self.mqm_pr.resize_dim(n);
        self.mqm_du.resize_dim(n);
        self.mqm_pr_du.resize_dim(n);
        for q in 0..model.qm() {
            for m in 0..model.m_max_m(q) {
                for i in (n - added)..n {
                    for j in 0..n {
                        self.mqm_pr.at_mut(q, m)[(i, j)] =
                            model.bilinear_m(q, m, basis_pr.at(i), basis_pr.at(j), false);
                        self.mqm_du.at_mut(q, m)[(i, j)] =
                            model.bilinear_m(q, m, basis_du.at(i), basis_du.at(j), true);
                        self.mqm_pr_du.at_mut(q, m)[(i, j)] =
                            model.bilinear_m(q, m, basis_du.at(i), basis_pr.at(j), false);
                    }
                }
                for j in (n - added)..n {
                    for i in 0..n {
                        self.mqm_pr.at_mut(q, m)[(i, j)] =
                            model.bilinear_m(q, m, basis_pr.at(i), basis_pr.at(j), false);
                        self.mqm_du.at_mut(q, m)[(i, j)] =
                            model.bilinear_m(q, m, basis_du.at(i), basis_du.at(j), true);
                        self.mqm_pr_du.at_mut(q, m)[(i, j)] =
                            model.bilinear_m(q, m, basis_du.at(i), basis_pr.at(j), false);
                    }
                }
            }
        }

        self.lqm_pr.resize_dim(n);
        self.lqm_du.resize_dim(n);
        for q in 0..model.ql(output_index) {
            for m in 0..model.m_max_f(output_index, q) {
                for l in 1..=added {
                    let index = n - l;
                    self.lqm_pr.at_mut(q, m)[index] =
                        model.functional(output_index, q, m, basis_pr.at(index));
                    self.lqm_du.at_mut(q, m)[index] =
                        model.functional(output_index, q, m, basis_du.at(index));
                }
            }
        }

        self.initial_guess_pr.resize_dim(n);
        for q in 0..model.q_initial_guess() {
            for m in 0..model.m_max_initial_guess(q) {
                let vector = model.initial_guess_vector(q, m);
                for j in 0..n {
                    self.initial_guess_pr.at_mut(q, m)[j] = dot(vector.as_ref(), basis_pr.at(j));
                }
            }
        }

        Ok(())
    }

    /// Projection coefficients of the initial conditions on the enriched
    /// bases: direct inner products in the orthonormal case, a Gram-system
    /// solve otherwise.
    fn update_initial_condition_coefficients(
        &mut self,
        mu: &Parameter,
        added: I,
    ) -> Result<(), Problem> {
        let n = self.n;
        let initial = self.model.initialization_field(mu);

        if self.config.orthonormalize_primal {
            for elem in (n - added)..n {
                self.coeff_pr_ini
                    .push(self.model.scalar_product(initial.as_ref(), self.basis_pr.at(elem)));
            }
        } else {
            let mut rhs = Col::<E>::zeros(n);
            for i in 0..n {
                rhs[i] = self.model.scalar_product(initial.as_ref(), self.basis_pr.at(i));
            }
            let projection = lu_solve(self.gram_pr.as_ref().submatrix(0, 0, n, n), rhs.as_ref());
            for i in (n - added)..n {
                self.coeff_pr_ini.push(projection[i]);
            }
        }

        if self.config.solve_dual_problem {
            let dual_initial = self
                .model
                .dual_initial_field(mu, self.config.output_index)?;
            if self.config.orthonormalize_dual {
                for elem in (n - added)..n {
                    self.coeff_du_ini.push(
                        self.model
                            .scalar_product(dual_initial.as_ref(), self.basis_du.at(elem)),
                    );
                }
            } else {
                let mut gram = faer::Mat::<E>::zeros(n, n);
                for i in 0..n {
                    for j in 0..n {
                        gram[(i, j)] =
                            self.model.scalar_product(self.basis_du.at(j), self.basis_du.at(i));
                    }
                }
                let mut rhs = Col::<E>::zeros(n);
                for i in 0..n {
                    rhs[i] = self
                        .model
                        .scalar_product(dual_initial.as_ref(), self.basis_du.at(i));
                }
                let projection = lu_solve(gram.as_ref(), rhs.as_ref());
                for i in (n - added)..n {
                    self.coeff_du_ini.push(projection[i]);
                }
            }
        } else {
            for _ in (n - added)..n {
                self.coeff_du_ini.push(0.0);
            }
        }

        Ok(())
    }

    /// Scans the training sampling (or its complement) for the parameter
    /// with the largest estimated error. A non-finite estimate skips the
    /// sample; all samples non-finite is fatal.
    pub(crate) fn max_error_bounds(&self) -> Result<MaxErrorBounds, Problem> {
        if self.config.error_type == ErrorEstimationKind::Empirical && self.wnmu.len() == 1 {
            let (mu, index) = self.xi.max();
            return Ok(MaxErrorBounds {
                max_error: 1e5,
                mu: mu.clone(),
                index,
                delta_pr: 0.0,
                delta_du: 0.0,
            });
        }

        let use_complement = self.config.seek_mu_in_complement
            || self.config.error_type == ErrorEstimationKind::Empirical;
        let complement = if use_complement {
            Some(self.xi.complement(&self.wnmu))
        } else {
            None
        };
        let candidates = complement.as_ref().unwrap_or(&self.xi);

        let mut errors = Vec::with_capacity(candidates.len());
        let mut deltas = Vec::with_capacity(candidates.len());
        let mut skipped = 0;
        for k in 0..candidates.len() {
            let mu = candidates.at(k);
            let solution = self.online_solve(self.n, mu, None)?;
            let estimate = self.delta(self.n, mu, &solution)?;
            if estimate.bound.is_finite() {
                errors.push(estimate.bound.abs());
                deltas.push((estimate.delta_pr, estimate.delta_du));
            } else {
                warn!(
                    target: "certrb::offline",
                    "skipping non-finite error estimate at mu = {}", mu
                );
                errors.push(E::NEG_INFINITY);
                deltas.push((0.0, 0.0));
                skipped += 1;
            }
        }
        if skipped == candidates.len() {
            return Err(Problem::from(CrbError::NonFiniteEstimate {
                mu: "every training sample".to_string(),
            }));
        }

        let mut index = 0;
        for k in 1..errors.len() {
            if errors[k] > errors[index] {
                index = k;
            }
        }
        let check_index = errors
            .iter()
            .enumerate()
            .fold(0, |best, (k, v)| if *v > errors[best] { k } else { best });
        if index != check_index {
            return Err(Problem::from(CrbError::configuration(
                "crb.error-type",
                format!(
                    "greedy argmax mismatch: {} versus {}",
                    index, check_index
                ),
            )));
        }

        let mu = candidates.at(index).clone();
        let super_index = candidates.index_in_super_sampling(index);
        Ok(MaxErrorBounds {
            max_error: errors[index],
            mu,
            index: super_index,
            delta_pr: deltas[index].0,
            delta_du: deltas[index].1,
        })
    }

    /// Truth output `l(u; mu)` for the configured functional.
    pub(crate) fn truth_output(&self, mu: &Parameter, u: &Col<E>) -> Result<E, Problem> {
        let beta = self.model.compute_beta_with_state(u.as_ref(), mu, 0.0)?;
        let output_index = self.config.output_index;
        let mut output = 0.0;
        for q in 0..self.model.ql(output_index) {
            for m in 0..self.model.m_max_f(output_index, q) {
                output += beta.f[output_index][q][m] * self.model.functional(output_index, q, m, u.as_ref());
            }
        }
        Ok(output)
    }

    /// `crb.check.rb` diagnostic: the reduced output at each selected
    /// parameter must reproduce the truth output.
    fn check_reproduction(&self) -> Result<(), Problem> {
        if !self.model.is_steady() {
            info!(
                target: "certrb::offline",
                "reproduction check skipped for a transient model"
            );
            return Ok(());
        }
        for idx in 0..self.wnmu.len() {
            let mu = self.wnmu.at(idx);
            let solution = self.online_solve(self.n, mu, None)?;
            let truth = self.model.solve(mu)?;
            let truth_output = self.truth_output(mu, &truth)?;
            let error = (solution.output() - truth_output).abs();
            if self.config.print_error_during_rb_construction {
                println!(
                    "  -- reproduction at {}: |s_N - s| = {:e}",
                    mu, error
                );
            }
            info!(
                target: "certrb::offline",
                "reproduction at {}: reduced {:e}, truth {:e}",
                mu, solution.output(), truth_output
            );
        }
        Ok(())
    }

    fn print_mu_selection(&self) {
        println!("parameters selected during the greedy construction:");
        for (step, mu) in self.wnmu.iter().enumerate() {
            println!("  {:>4}: {}", step, mu);
        }
    }
}

/// Result of one greedy error sweep.
pub(crate) struct MaxErrorBounds {
    pub max_error: E,
    pub mu: Parameter,
    pub index: I,
    pub delta_pr: E,
    pub delta_du: E,
}
