//! Variance output tables.
//!
//! When the variance output is requested, each basis function is centred
//! against its domain mean, `phi_i = w_i - mean(w_i)`, and the engine stores
//! `Phi[i][j] = int phi_i phi_j`. The online variance at `mu` is the
//! quadratic form `u . Phi u` of the reduced coordinates.

use faer::Mat;

use crate::basis::ReducedBasis;
use crate::model::TruthModel;
use crate::{E, I};

/// Conservatively extends `phi` to cover a basis of dimension `n`: existing
/// entries are kept, only the new rows and columns are integrated.
pub fn update_variance_matrix<M: TruthModel>(
    model: &M,
    basis: &ReducedBasis,
    phi: &mut Mat<E>,
    n: I,
    added: I,
) {
    let measure = model.domain_measure();
    let means: Vec<E> = (0..n)
        .map(|i| {
            let ones = faer::Col::<E>::ones(model.dimension());
            model.domain_l2_inner(basis.at(i), ones.as_ref()) / measure
        })
        .collect();

    phi.resize_with(n, n, |_, _| 0.0);
    let entry = |i: I, j: I| {
        model.domain_l2_inner(basis.at(i), basis.at(j)) - measure * means[i] * means[j]
    };
    for i in (n - added)..n {
        for j in 0..n {
            let value = entry(i, j);
            phi[(i, j)] = value;
            phi[(j, i)] = value;
        }
    }
}
