//! Reduced projections of the affine operator decomposition.
//!
//! For each operator the truth model exposes `sum_q sum_m beta_{q,m}(mu) T_{q,m}`
//! with mu-independent `T_{q,m}`. The tables below store the reduced
//! projections of those terms on the primal and dual bases. They grow with
//! the basis: a greedy step appends the last `k` rows and columns and leaves
//! the leading `(N-k) x (N-k)` block untouched.

use faer::{Col, Mat};

use crate::{E, I};

/// Dense `N x N` reduced matrices, one per `(q, m)` affine term.
#[derive(Debug, Clone)]
pub struct OperatorTable {
    blocks: Vec<Vec<Mat<E>>>,
}

impl OperatorTable {
    /// Allocates the `(q, m)` layout from the decomposition cardinalities;
    /// every block starts at dimension zero.
    pub fn new(q_terms: I, m_max: impl Fn(I) -> I) -> Self {
        let blocks = (0..q_terms)
            .map(|q| (0..m_max(q)).map(|_| Mat::zeros(0, 0)).collect())
            .collect();
        Self { blocks }
    }

    pub fn q_terms(&self) -> I {
        self.blocks.len()
    }

    pub fn m_max(&self, q: I) -> I {
        self.blocks[q].len()
    }

    pub fn at(&self, q: I, m: I) -> &Mat<E> {
        &self.blocks[q][m]
    }

    pub fn at_mut(&mut self, q: I, m: I) -> &mut Mat<E> {
        &mut self.blocks[q][m]
    }

    /// Conservative resize of every block to `n x n`: existing entries keep
    /// their values, new entries are zeroed.
    pub fn resize_dim(&mut self, n: I) {
        for row in &mut self.blocks {
            for block in row {
                block.resize_with(n, n, |_, _| 0.0);
            }
        }
    }

    /// Assembles `sum_{q,m} beta[q][m] * block(0..n, 0..n)`.
    pub fn combine(&self, beta: &[Vec<E>], n: I) -> Mat<E> {
        let mut out = Mat::<E>::zeros(n, n);
        for (q, row) in self.blocks.iter().enumerate() {
            for (m, block) in row.iter().enumerate() {
                out += beta[q][m] * block.as_ref().submatrix(0, 0, n, n);
            }
        }
        out
    }

    /// Assembles `factor * sum_{q,m} beta[q][m] * block(0..n, 0..n)` into an
    /// existing accumulator.
    pub fn combine_into(&self, beta: &[Vec<E>], n: I, factor: E, out: &mut Mat<E>) {
        for (q, row) in self.blocks.iter().enumerate() {
            for (m, block) in row.iter().enumerate() {
                *out += factor * beta[q][m] * block.as_ref().submatrix(0, 0, n, n);
            }
        }
    }

    pub(crate) fn blocks(&self) -> &[Vec<Mat<E>>] {
        &self.blocks
    }

    pub(crate) fn from_blocks(blocks: Vec<Vec<Mat<E>>>) -> Self {
        Self { blocks }
    }
}

/// Dense length-`N` reduced vectors, one per `(q, m)` affine term.
#[derive(Debug, Clone)]
pub struct VectorTable {
    blocks: Vec<Vec<Col<E>>>,
}

impl VectorTable {
    pub fn new(q_terms: I, m_max: impl Fn(I) -> I) -> Self {
        let blocks = (0..q_terms)
            .map(|q| (0..m_max(q)).map(|_| Col::zeros(0)).collect())
            .collect();
        Self { blocks }
    }

    pub fn q_terms(&self) -> I {
        self.blocks.len()
    }

    pub fn m_max(&self, q: I) -> I {
        self.blocks[q].len()
    }

    pub fn at(&self, q: I, m: I) -> &Col<E> {
        &self.blocks[q][m]
    }

    pub fn at_mut(&mut self, q: I, m: I) -> &mut Col<E> {
        &mut self.blocks[q][m]
    }

    pub fn resize_dim(&mut self, n: I) {
        for row in &mut self.blocks {
            for block in row {
                block.resize_with(n, |_| 0.0);
            }
        }
    }

    /// Assembles `sum_{q,m} beta[q][m] * block(0..n)`.
    pub fn combine(&self, beta: &[Vec<E>], n: I) -> Col<E> {
        let mut out = Col::<E>::zeros(n);
        for (q, row) in self.blocks.iter().enumerate() {
            for (m, block) in row.iter().enumerate() {
                out += beta[q][m] * block.as_ref().subrows(0, n);
            }
        }
        out
    }

    pub(crate) fn blocks(&self) -> &[Vec<Col<E>>] {
        &self.blocks
    }

    pub(crate) fn from_blocks(blocks: Vec<Vec<Col<E>>>) -> Self {
        Self { blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conservative_resize_preserves_the_leading_block() {
        let mut table = OperatorTable::new(1, |_| 1);
        table.resize_dim(2);
        table.at_mut(0, 0)[(0, 0)] = 1.0;
        table.at_mut(0, 0)[(0, 1)] = 2.0;
        table.at_mut(0, 0)[(1, 0)] = 3.0;
        table.at_mut(0, 0)[(1, 1)] = 4.0;

        table.resize_dim(3);
        let block = table.at(0, 0);
        assert_eq!(block[(0, 0)], 1.0);
        assert_eq!(block[(0, 1)], 2.0);
        assert_eq!(block[(1, 0)], 3.0);
        assert_eq!(block[(1, 1)], 4.0);
        assert_eq!(block[(2, 2)], 0.0);
    }

    #[test]
    fn combine_weights_each_term() {
        let mut table = OperatorTable::new(2, |_| 1);
        table.resize_dim(1);
        table.at_mut(0, 0)[(0, 0)] = 1.0;
        table.at_mut(1, 0)[(0, 0)] = 10.0;
        let beta = vec![vec![2.0], vec![0.5]];
        let combined = table.combine(&beta, 1);
        assert_eq!(combined[(0, 0)], 2.0 + 5.0);
    }

    #[test]
    fn vector_combine_uses_the_leading_entries() {
        let mut table = VectorTable::new(1, |_| 2);
        table.resize_dim(3);
        for i in 0..3 {
            table.at_mut(0, 0)[i] = (i + 1) as E;
            table.at_mut(0, 1)[i] = 1.0;
        }
        let beta = vec![vec![1.0, -1.0]];
        let combined = table.combine(&beta, 2);
        assert_eq!(combined[0], 0.0);
        assert_eq!(combined[1], 1.0);
    }
}
