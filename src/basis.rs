//! Reduced-basis store and orthonormalisation.
//!
//! The basis is an append-only sequence of truth-space snapshots. Enrichment
//! only ever appends: for every `i < N` the element `w_i` is identical before
//! and after a greedy step. Orthonormalisation runs a modified Gram-Schmidt
//! sweep against the truth scalar product over the last `k` vectors; the
//! offline driver applies it three times in a row for numerical robustness.

use faer::{Col, ColRef, Mat};

use crate::model::TruthModel;
use crate::{E, I};

/// Append-only container of truth-space elements.
#[derive(Debug, Clone, Default)]
pub struct ReducedBasis {
    elements: Vec<Col<E>>,
}

impl ReducedBasis {
    pub fn new() -> Self {
        Self {
            elements: Vec::new(),
        }
    }

    pub fn len(&self) -> I {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Indexed access; out-of-bounds lookups are fatal.
    pub fn at(&self, i: I) -> ColRef<'_, E> {
        self.elements[i].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = ColRef<'_, E>> {
        self.elements.iter().map(|e| e.as_ref())
    }

    pub fn push(&mut self, element: Col<E>) {
        self.elements.push(element);
    }

    /// Truth-space expansion `sum_i coeff[i] w_i` over the first `n` vectors.
    pub fn expansion(&self, coeff: ColRef<'_, E>, n: I) -> Col<E> {
        assert!(n <= self.len(), "expansion beyond the basis dimension");
        let dim = self.elements.first().map_or(0, |e| e.nrows());
        let mut out = Col::<E>::zeros(dim);
        for i in 0..n {
            out += coeff[i] * &self.elements[i];
        }
        out
    }
}

/// One modified Gram-Schmidt sweep in the truth scalar product, touching only
/// the last `newly_added` vectors. Each new vector is normalised afterwards.
pub fn orthonormalize<M: TruthModel>(model: &M, basis: &mut ReducedBasis, newly_added: I) {
    let n = basis.len();
    for i in 0..n {
        let start = (i + 1).max(n - newly_added);
        for j in start..n {
            let r_ij = model.scalar_product(basis.elements[i].as_ref(), basis.elements[j].as_ref());
            let correction = r_ij * &basis.elements[i];
            basis.elements[j] -= correction;
        }
    }
    for i in (n - newly_added)..n {
        let r_ii = model
            .scalar_product(basis.elements[i].as_ref(), basis.elements[i].as_ref())
            .sqrt();
        basis.elements[i] = (1.0 / r_ii) * &basis.elements[i];
    }
}

/// Deviation of the Gram matrix from the identity, `||G - I||_F`, with
/// `G[i][j] = (w_i, w_j)_X`. Used by the `crb.check.gs` diagnostic.
pub fn gram_deviation<M: TruthModel>(model: &M, basis: &ReducedBasis) -> E {
    let n = basis.len();
    let mut g = Mat::<E>::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            g[(i, j)] = model.scalar_product(basis.at(i), basis.at(j));
            if i == j {
                g[(i, j)] -= 1.0;
            }
        }
    }
    g.norm_l2()
}
