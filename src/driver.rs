//! Study orchestration: offline construction against a persisted database,
//! verification sweeps over a test sampling, convergence studies indexed by
//! the reduced dimension, and online timing statistics.

use std::path::Path;
use std::time::Instant;

use faer::rand::SeedableRng;
use faer::rand::rngs::StdRng;
use problemo::Problem;
use tracing::info;

use crate::callback::{Callback, NoOpCallback, OfflineReport};
use crate::config::CrbConfig;
use crate::crb::Crb;
use crate::db::DbPaths;
use crate::model::TruthModel;
use crate::online::CrbOutput;
use crate::parameter::{Parameter, Sampling};
use crate::scm::CoercivityProvider;
use crate::terminators::TimeBudgetTerminator;
use crate::{E, I, OfflineHooks, OfflineStatus};

/// One verified sample of a test sweep.
#[derive(Debug, Clone)]
pub struct VerificationRow {
    pub mu: Parameter,
    pub reduced_output: E,
    /// Truth output, computed for steady models only.
    pub truth_output: Option<E>,
    /// `|s - s_N|` when the truth output is available.
    pub error: Option<E>,
    pub bound: E,
}

/// Summary of a verification sweep.
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub rows: Vec<VerificationRow>,
    pub max_error: E,
    pub min_error: E,
    pub mean_error: E,
}

/// One row of a convergence study: error statistics at dimension `n`.
#[derive(Debug, Clone)]
pub struct ConvergenceStudyRow {
    pub n: I,
    pub max_error: E,
    pub mean_error: E,
    pub max_bound: E,
    pub mean_bound: E,
}

/// Online timing statistics over a sample of random parameters.
#[derive(Debug, Clone)]
pub struct TimingStatistics {
    pub evaluations: I,
    pub mean_seconds: E,
    pub min_seconds: E,
    pub max_seconds: E,
}

/// Drives one reduced-basis study: owns the engine and its database paths.
pub struct Driver<M: TruthModel> {
    crb: Crb<M>,
    db: Option<DbPaths>,
}

impl<M: TruthModel> Driver<M> {
    /// Builds a fresh engine, or resumes from the database when one exists
    /// at `db` and rebuilding is not forced.
    pub fn new(model: M, config: CrbConfig, db: Option<DbPaths>) -> Result<Self, Problem> {
        if let Some(paths) = &db {
            if config.rebuild_database {
                paths.wipe();
            } else if paths.exists() {
                let crb = crate::db::load(model, config, paths)?;
                return Ok(Self {
                    crb,
                    db: db.clone(),
                });
            }
        }
        Ok(Self {
            crb: Crb::new(model, config)?,
            db,
        })
    }

    pub fn with_coercivity(mut self, provider: CoercivityProvider) -> Self {
        self.crb = self.crb.with_coercivity(provider);
        self
    }

    pub fn engine(&self) -> &Crb<M> {
        &self.crb
    }

    pub fn engine_mut(&mut self) -> &mut Crb<M> {
        &mut self.crb
    }

    /// Hooks wired from the configuration: the per-iteration report (silent
    /// in script mode) and the offline wall-clock budget.
    pub fn standard_hooks(&self) -> OfflineHooks {
        let config = self.crb.config();
        let callback: Box<dyn Callback> = if config.script_mode {
            Box::new(NoOpCallback::new())
        } else {
            Box::new(OfflineReport::new())
        };
        OfflineHooks {
            callback,
            terminator: Box::new(TimeBudgetTerminator::from_config(config)),
        }
    }

    /// Runs the offline construction, persisting after every greedy step
    /// when a database is configured.
    pub fn offline(&mut self, hooks: &mut OfflineHooks) -> Result<OfflineStatus, Problem> {
        self.crb.offline(hooks, self.db.as_ref())
    }

    /// One certified online query.
    pub fn online(&self, mu: &Parameter, dimension: Option<I>) -> Result<CrbOutput, Problem> {
        self.crb.run(mu, dimension)
    }

    /// The sampling a verification sweep should run over: the selected
    /// greedy sampling when `crb.run-on-WNmu` is set, the predefined test
    /// sampling when one is configured, a random sampling otherwise.
    pub fn verification_sampling(&self) -> Result<Sampling, Problem> {
        if self.crb.config().run_on_wnmu {
            return Ok(self.crb.selected_sampling().clone());
        }
        self.test_sampling(self.crb.config().sampling_size)
    }

    /// The verification sampling: read from the predefined file when
    /// requested, generated at random otherwise.
    pub fn test_sampling(&self, size: I) -> Result<Sampling, Problem> {
        let config = self.crb.config();
        if config.use_predefined_test_sampling {
            return Sampling::read_from_file(Path::new(&config.predefined_test_sampling_file));
        }
        let mut rng = StdRng::seed_from_u64(config.sampling_seed.wrapping_add(1));
        Ok(Sampling::generate(
            self.crb.model().parameter_space(),
            config.sampling_mode,
            size,
            &mut rng,
        ))
    }

    /// Sweeps a sampling with online queries; for steady models the truth
    /// output is computed alongside and the true output error reported.
    pub fn verify(&self, sampling: &Sampling) -> Result<VerificationReport, Problem> {
        let mut rows = Vec::with_capacity(sampling.len());
        for mu in sampling.iter() {
            let output = self.crb.run(mu, None)?;
            let truth_output = if self.crb.model().is_steady() {
                let u = self.crb.model().solve(mu)?;
                Some(self.crb.truth_output(mu, &u)?)
            } else {
                None
            };
            let error = truth_output.map(|s| (s - output.output).abs());
            rows.push(VerificationRow {
                mu: mu.clone(),
                reduced_output: output.output,
                truth_output,
                error,
                bound: output.bound,
            });
        }

        let errors: Vec<E> = rows.iter().filter_map(|r| r.error).collect();
        let (max_error, min_error, mean_error) = if errors.is_empty() {
            (E::NAN, E::NAN, E::NAN)
        } else {
            let max = errors.iter().cloned().fold(E::NEG_INFINITY, E::max);
            let min = errors.iter().cloned().fold(E::INFINITY, E::min);
            let mean = errors.iter().sum::<E>() / errors.len() as E;
            (max, min, mean)
        };
        Ok(VerificationReport {
            rows,
            max_error,
            min_error,
            mean_error,
        })
    }

    /// Error statistics for every dimension `1..=N` over a test sampling.
    pub fn convergence_study(
        &self,
        sampling: &Sampling,
    ) -> Result<Vec<ConvergenceStudyRow>, Problem> {
        let mut rows = Vec::with_capacity(self.crb.n());
        for n in 1..=self.crb.n() {
            let mut max_error: E = 0.0;
            let mut sum_error = 0.0;
            let mut count = 0;
            let mut max_bound: E = 0.0;
            let mut sum_bound = 0.0;
            for mu in sampling.iter() {
                let output = self.crb.run(mu, Some(n))?;
                max_bound = max_bound.max(output.bound);
                sum_bound += output.bound;
                if self.crb.model().is_steady() {
                    let u = self.crb.model().solve(mu)?;
                    let truth = self.crb.truth_output(mu, &u)?;
                    let error = (truth - output.output).abs();
                    max_error = max_error.max(error);
                    sum_error += error;
                    count += 1;
                }
            }
            let samples = sampling.len().max(1) as E;
            rows.push(ConvergenceStudyRow {
                n,
                max_error,
                mean_error: if count > 0 { sum_error / count as E } else { E::NAN },
                max_bound,
                mean_bound: sum_bound / samples,
            });
        }
        Ok(rows)
    }

    /// Measures the online query time over `neval` random parameters.
    pub fn timing_statistics(&self, neval: I) -> Result<TimingStatistics, Problem> {
        let sampling = self.test_sampling(neval.max(1))?;
        let mut min_seconds = E::INFINITY;
        let mut max_seconds: E = 0.0;
        let mut total = 0.0;
        for mu in sampling.iter() {
            let timer = Instant::now();
            let _ = self.crb.run(mu, None)?;
            let elapsed = timer.elapsed().as_secs_f64();
            min_seconds = min_seconds.min(elapsed);
            max_seconds = max_seconds.max(elapsed);
            total += elapsed;
        }
        Ok(TimingStatistics {
            evaluations: sampling.len(),
            mean_seconds: total / sampling.len() as E,
            min_seconds,
            max_seconds,
        })
    }

    /// Prints the final summary of a verification sweep; tab-separated in
    /// script mode.
    pub fn print_summary(&self, report: &VerificationReport) {
        let config = self.crb.config();
        if config.script_mode {
            for row in &report.rows {
                println!(
                    "{}\t{}\t{}\t{}",
                    row.mu,
                    row.reduced_output,
                    row.error.unwrap_or(E::NAN),
                    row.bound
                );
            }
            return;
        }
        println!("verification over {} samples:", report.rows.len());
        println!("  max error  : {:e}", report.max_error);
        println!("  min error  : {:e}", report.min_error);
        println!("  mean error : {:e}", report.mean_error);
        if config.cvg_study {
            println!("  (convergence tables available through convergence_study)");
        }
        info!(
            target: "certrb::driver",
            "verification sweep done over {} samples", report.rows.len()
        );
    }
}
