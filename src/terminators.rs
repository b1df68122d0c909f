//! Early-stopping policies for the offline greedy loop.
//!
//! The greedy construction can run for hours on large truth models. A
//! terminator inspects every finished [`OfflineIteration`] — dimension,
//! estimated error, elapsed time — and decides whether the loop should stop.
//! Because the engine persists after each step, any stop leaves a resumable
//! database behind.
//!
//! # Note
//! [`InterruptTerminator`] installs a global signal handler and can only be
//! constructed once per process; a second construction panics.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::callback::OfflineIteration;
use crate::config::CrbConfig;
use crate::{E, I, OfflineStatus};

pub trait Terminator {
    fn initialize(&mut self) {}

    /// Inspects the iteration that just finished; returns the terminal
    /// status when the loop should stop, `None` to continue.
    fn terminate(&mut self, iteration: &OfflineIteration) -> Option<OfflineStatus>;
}

/// A terminator that never fires.
pub struct NeverTerminate {}

impl NeverTerminate {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for NeverTerminate {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminator for NeverTerminate {
    fn terminate(&mut self, _iteration: &OfflineIteration) -> Option<OfflineStatus> {
        None
    }
}

/// Responds to Ctrl-C (SIGINT) or programmatic interrupts between greedy
/// iterations, so a long offline run can be stopped at a step boundary with
/// the database intact.
pub struct InterruptTerminator {
    interrupted: Arc<AtomicBool>,
}

impl InterruptTerminator {
    pub fn new() -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        ctrlc::set_handler({
            let interrupted = interrupted.clone();
            move || {
                interrupted.store(true, Ordering::SeqCst);
            }
        })
        .expect("Error setting Ctrl-C handler");
        Self { interrupted }
    }

    pub fn interrupt(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }
}

impl Terminator for InterruptTerminator {
    fn terminate(&mut self, _iteration: &OfflineIteration) -> Option<OfflineStatus> {
        if self.interrupted.load(Ordering::SeqCst) {
            Some(OfflineStatus::Interrupted)
        } else {
            None
        }
    }
}

/// Enforces the wall-clock budget of the offline stage
/// (`crb.offline-time-budget-secs`; zero disables).
///
/// The decision is predictive: the loop stops as soon as another iteration
/// of the last observed duration would overrun the budget, rather than
/// starting a greedy step that cannot finish in time.
pub struct TimeBudgetTerminator {
    budget_secs: u64,
    start_time: Instant,
}

impl TimeBudgetTerminator {
    pub fn new(budget_secs: u64) -> Self {
        Self {
            budget_secs,
            start_time: Instant::now(),
        }
    }

    pub fn from_config(config: &CrbConfig) -> Self {
        Self::new(config.offline_time_budget_secs)
    }
}

impl Terminator for TimeBudgetTerminator {
    fn initialize(&mut self) {
        self.start_time = Instant::now();
    }

    fn terminate(&mut self, iteration: &OfflineIteration) -> Option<OfflineStatus> {
        if self.budget_secs == 0 {
            return None;
        }
        let spent = self.start_time.elapsed().as_secs_f64();
        if spent + iteration.elapsed > self.budget_secs as E {
            Some(OfflineStatus::TimeLimit)
        } else {
            None
        }
    }
}

/// Detects a stalled greedy: `patience` consecutive iterations in which the
/// maximum estimated error failed to drop below `factor` times the best
/// value seen so far.
///
/// Iterations without a usable estimate (no-residual and predefined modes
/// report a sentinel error) never count as progress or stagnation.
pub struct StagnationTerminator {
    patience: I,
    factor: E,
    best_error: E,
    stalled: I,
}

impl StagnationTerminator {
    pub fn new(patience: I, factor: E) -> Self {
        Self {
            patience: patience.max(1),
            factor,
            best_error: E::INFINITY,
            stalled: 0,
        }
    }
}

impl Terminator for StagnationTerminator {
    fn initialize(&mut self) {
        self.best_error = E::INFINITY;
        self.stalled = 0;
    }

    fn terminate(&mut self, iteration: &OfflineIteration) -> Option<OfflineStatus> {
        let error = iteration.max_error;
        if !error.is_finite() || error >= 1e9 {
            return None;
        }
        if error < self.factor * self.best_error {
            self.best_error = error.min(self.best_error);
            self.stalled = 0;
            return None;
        }
        self.stalled += 1;
        if self.stalled >= self.patience {
            Some(OfflineStatus::Stagnated)
        } else {
            None
        }
    }
}

/// Combines several terminators; the first that fires wins.
pub struct CompositeTerminator {
    terminators: Vec<Box<dyn Terminator>>,
}

impl CompositeTerminator {
    pub fn new(terminators: Vec<Box<dyn Terminator>>) -> Self {
        Self { terminators }
    }
}

impl Terminator for CompositeTerminator {
    fn initialize(&mut self) {
        for terminator in &mut self.terminators {
            terminator.initialize();
        }
    }

    fn terminate(&mut self, iteration: &OfflineIteration) -> Option<OfflineStatus> {
        for terminator in &mut self.terminators {
            if let Some(status) = terminator.terminate(iteration) {
                return Some(status);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::Parameter;

    fn iteration(max_error: E, elapsed: E) -> OfflineIteration {
        OfflineIteration {
            n: 1,
            max_error,
            delta_pr: 0.0,
            delta_du: 0.0,
            next_mu: Parameter::new(vec![1.0]),
            elapsed,
        }
    }

    #[test]
    fn zero_time_budget_never_fires() {
        let mut terminator = TimeBudgetTerminator::new(0);
        terminator.initialize();
        assert_eq!(terminator.terminate(&iteration(1.0, 1e6)), None);
    }

    #[test]
    fn time_budget_refuses_an_iteration_that_cannot_fit() {
        let mut terminator = TimeBudgetTerminator::new(1);
        terminator.initialize();
        // The last iteration took ten seconds; another one would overrun a
        // one-second budget.
        assert_eq!(
            terminator.terminate(&iteration(1.0, 10.0)),
            Some(OfflineStatus::TimeLimit)
        );
    }

    #[test]
    fn time_budget_reads_the_configuration() {
        let mut config = CrbConfig::default();
        config.offline_time_budget_secs = 1;
        let mut terminator = TimeBudgetTerminator::from_config(&config);
        terminator.initialize();
        assert_eq!(
            terminator.terminate(&iteration(1.0, 10.0)),
            Some(OfflineStatus::TimeLimit)
        );
    }

    #[test]
    fn stagnation_fires_after_patience_flat_iterations() {
        let mut terminator = StagnationTerminator::new(2, 0.5);
        terminator.initialize();
        assert_eq!(terminator.terminate(&iteration(1e-2, 0.1)), None);
        // Improving by more than the factor resets the stall counter.
        assert_eq!(terminator.terminate(&iteration(1e-3, 0.1)), None);
        assert_eq!(terminator.terminate(&iteration(9e-4, 0.1)), None);
        assert_eq!(
            terminator.terminate(&iteration(8e-4, 0.1)),
            Some(OfflineStatus::Stagnated)
        );
    }

    #[test]
    fn stagnation_ignores_sentinel_errors() {
        let mut terminator = StagnationTerminator::new(1, 0.5);
        terminator.initialize();
        assert_eq!(terminator.terminate(&iteration(1e10, 0.1)), None);
        assert_eq!(terminator.terminate(&iteration(1e10, 0.1)), None);
    }

    #[test]
    fn composite_reports_the_first_hit() {
        let mut terminator = CompositeTerminator::new(vec![
            Box::new(NeverTerminate::new()),
            Box::new(TimeBudgetTerminator::new(1)),
        ]);
        terminator.initialize();
        assert_eq!(
            terminator.terminate(&iteration(1.0, 10.0)),
            Some(OfflineStatus::TimeLimit)
        );
    }
}
