//! Small dense kernels shared by the reduced-space solvers.
//!
//! Everything here operates on replicated N-by-N data; the truth-space side
//! of the computation goes through [`crate::model::TruthModel`] instead.

#[allow(unused_imports)]
use faer::prelude::*;
use faer::{Col, ColRef, Mat, MatRef, unzip, zip};
use problemo::Problem;

use crate::E;
use crate::error::CrbError;

/// Euclidean inner product of two columns.
pub(crate) fn dot<'a>(x1: ColRef<'a, E>, x2: ColRef<'a, E>) -> E {
    let mut acc = 0.0;
    zip!(x1, x2).for_each(|unzip!(x1, x2)| acc += *x1 * *x2);
    acc
}

/// Solves the dense system `a * x = b` by partial-pivoting LU.
pub(crate) fn lu_solve<'a>(a: MatRef<'a, E>, b: ColRef<'a, E>) -> Col<E> {
    let lu = a.partial_piv_lu();
    let x = lu.solve(b.as_mat());
    x.col(0).to_owned()
}

/// Condition number of a symmetric reduced matrix, computed as the ratio of
/// its extreme eigenvalues.
pub(crate) fn condition_number(a: MatRef<'_, E>) -> Result<E, Problem> {
    let eigenvalues = sym_eigenvalues(a)?;
    let mut min = E::INFINITY;
    let mut max = E::NEG_INFINITY;
    for lambda in eigenvalues {
        min = min.min(lambda);
        max = max.max(lambda);
    }
    Ok(max / min)
}

/// Eigenvalues of a symmetric matrix.
pub(crate) fn sym_eigenvalues(a: MatRef<'_, E>) -> Result<Vec<E>, Problem> {
    let eigenvalues = a.self_adjoint_eigenvalues(faer::Side::Lower).map_err(|e| {
        Problem::from(CrbError::DenseSolver {
            reason: format!("self-adjoint eigenvalue computation failed: {:?}", e),
        })
    })?;
    Ok(eigenvalues)
}

/// Eigendecomposition of a symmetric matrix. Returns the eigenvalues and the
/// matrix of eigenvectors (one per column, same ordering as the values).
pub(crate) fn sym_eigen(a: MatRef<'_, E>) -> Result<(Vec<E>, Mat<E>), Problem> {
    let evd = a.self_adjoint_eigen(faer::Side::Lower).map_err(|e| {
        Problem::from(CrbError::DenseSolver {
            reason: format!("self-adjoint eigendecomposition failed: {:?}", e),
        })
    })?;
    let n = a.nrows();
    let u = evd.U().to_owned();
    let s = evd.S().column_vector().to_owned();
    let mut values = Vec::with_capacity(n);
    for i in 0..n {
        values.push(s[i]);
    }
    Ok((values, u))
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn lu_solve_recovers_rhs() {
        let a = mat![[4.0, 1.0], [1.0, 3.0]];
        let b = Col::from_fn(2, |i| (i + 1) as E);
        let x = lu_solve(a.as_ref(), b.as_ref());
        let residual = &b - &a * &x;
        assert!(residual.norm_l2() < 1e-12);
    }

    #[test]
    fn dot_matches_manual_sum() {
        let x = Col::from_fn(3, |i| (i + 1) as E);
        let y = Col::from_fn(3, |i| 2.0 * (i as E) + 1.0);
        assert_eq!(dot(x.as_ref(), y.as_ref()), 1.0 + 2.0 * 3.0 + 3.0 * 5.0);
    }

    #[test]
    fn condition_number_of_diagonal() {
        let a = mat![[10.0, 0.0], [0.0, 2.0]];
        let kappa = condition_number(a.as_ref()).unwrap();
        assert!((kappa - 5.0).abs() < 1e-12);
    }
}
