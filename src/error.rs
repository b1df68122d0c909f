use derive_more::{Display, Error};

use crate::E;

/// Error taxonomy of the reduced-basis engine.
///
/// Recoverable conditions (a single non-finite estimate, a single truth-model
/// warning) are logged where they occur; everything that violates an engine
/// invariant is propagated as a fatal [`problemo::Problem`] to the driver.
#[derive(Debug, Display, Error, PartialEq)]
pub enum CrbError {
    /// Mismatched or contradictory runtime options. Reported with the
    /// offending option name.
    #[display("configuration error on '{option}': {reason}")]
    Configuration { option: String, reason: String },

    /// A fixed-point or Newton loop exceeded its critical value.
    #[display("divergence at mu = {mu} ({context}): increment {increment:e}")]
    Divergence {
        mu: String,
        context: String,
        increment: E,
    },

    /// The residual combination produced a NaN or infinity.
    #[display("non-finite error estimate at mu = {mu}")]
    NonFiniteEstimate { mu: String },

    /// The persisted database is missing, unreadable, or carries an
    /// incompatible schema version.
    #[display("database error: {reason}")]
    Database { reason: String },

    /// Failure surfaced unchanged from the truth-model collaborator.
    #[display("truth model failure: {reason}")]
    TruthModel { reason: String },

    /// Dense linear-algebra kernel failure (factorization, eigenvalues).
    #[display("dense solver error: {reason}")]
    DenseSolver { reason: String },
}

impl CrbError {
    pub fn configuration(option: &str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            option: option.to_string(),
            reason: reason.into(),
        }
    }

    pub fn database(reason: impl Into<String>) -> Self {
        Self::Database {
            reason: reason.into(),
        }
    }

    pub fn truth_model(reason: impl Into<String>) -> Self {
        Self::TruthModel {
            reason: reason.into(),
        }
    }
}
