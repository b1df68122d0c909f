//! Proper orthogonal decomposition of transient trajectories.
//!
//! At each greedy iteration of a transient problem, the truth trajectory is
//! compressed into its first `N_m` modes with respect to the truth scalar
//! product. The decomposition uses the method of snapshots: the eigenvectors
//! of the snapshot correlation matrix lift back to truth-space modes.

use faer::Col;
use problemo::Problem;
use tracing::debug;

use crate::error::CrbError;
use crate::linalg::sym_eigen;
use crate::model::TruthModel;
use crate::{E, I};

/// POD compressor configured with the number of modes to extract.
#[derive(Debug, Clone, Copy)]
pub struct Pod {
    n_modes: I,
}

impl Pod {
    pub fn new(n_modes: I) -> Self {
        Self { n_modes }
    }

    pub fn n_modes(&self) -> I {
        self.n_modes
    }

    /// Extracts up to `n_modes` modes from the trajectory, ordered by
    /// decreasing energy and normalised in the truth scalar product. Modes
    /// with numerically zero energy are discarded.
    pub fn modes<M: TruthModel>(
        &self,
        model: &M,
        trajectory: &[Col<E>],
    ) -> Result<Vec<Col<E>>, Problem> {
        if trajectory.is_empty() {
            return Err(Problem::from(CrbError::truth_model(
                "POD called on an empty trajectory",
            )));
        }
        let k = trajectory.len();
        let mut correlation = faer::Mat::<E>::zeros(k, k);
        for i in 0..k {
            for j in 0..=i {
                let value =
                    model.scalar_product(trajectory[i].as_ref(), trajectory[j].as_ref()) / k as E;
                correlation[(i, j)] = value;
                correlation[(j, i)] = value;
            }
        }

        let (eigenvalues, eigenvectors) = sym_eigen(correlation.as_ref())?;

        // Largest eigenvalues first.
        let mut order: Vec<I> = (0..k).collect();
        order.sort_by(|&a, &b| {
            eigenvalues[b]
                .partial_cmp(&eigenvalues[a])
                .expect("non-finite POD eigenvalue")
        });

        let scale = eigenvalues.iter().fold(0.0f64, |acc, &l| acc.max(l.abs()));
        let mut modes = Vec::new();
        for &idx in order.iter().take(self.n_modes.min(k)) {
            let lambda = eigenvalues[idx];
            if lambda <= scale * 1e-14 {
                debug!(
                    target: "certrb::pod",
                    "discarding POD mode with eigenvalue {:e}", lambda
                );
                continue;
            }
            let mut mode = Col::<E>::zeros(trajectory[0].nrows());
            for (i, snapshot) in trajectory.iter().enumerate() {
                mode += eigenvectors[(i, idx)] * snapshot;
            }
            let norm = model.scalar_product(mode.as_ref(), mode.as_ref()).sqrt();
            modes.push((1.0 / norm) * &mode);
        }
        Ok(modes)
    }
}
