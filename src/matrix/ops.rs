//! Sparse products used by the solver and by prediction.
//!
//! Every output element is produced by exactly one task that walks its row
//! in storage order, so results are bit-identical across thread counts.

use rayon::prelude::*;
use sprs::CsMat;

/// `A x` for a CSR matrix.
pub fn mul_vec(a: &CsMat<f64>, x: &[f64]) -> Vec<f64> {
    debug_assert!(a.is_csr());
    debug_assert_eq!(a.cols(), x.len());
    let indptr = a.indptr();
    let indptr = indptr.raw_storage();
    let indices = a.indices();
    let data = a.data();
    (0..a.rows())
        .into_par_iter()
        .map(|r| {
            (indptr[r]..indptr[r + 1])
                .map(|k| data[k] * x[indices[k]])
                .sum::<f64>()
        })
        .collect()
}

/// CSR storage of `A^T`, so `A^T r` can be computed row-parallel by `mul_vec`.
pub fn transpose_csr(a: &CsMat<f64>) -> CsMat<f64> {
    a.transpose_view().to_csr()
}

/// `||A||_F^2`.
pub fn frobenius_sq(a: &CsMat<f64>) -> f64 {
    a.data().iter().map(|v| v * v).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sprs::TriMat;

    fn small() -> CsMat<f64> {
        let mut t = TriMat::new((3, 2));
        t.add_triplet(0, 0, 1.0);
        t.add_triplet(1, 1, 2.0);
        t.add_triplet(2, 0, -1.0);
        t.add_triplet(2, 1, 3.0);
        t.to_csr()
    }

    #[test]
    fn products_match_dense_arithmetic() {
        let a = small();
        assert_eq!(mul_vec(&a, &[2.0, 1.0]), vec![2.0, 2.0, 1.0]);
        let at = transpose_csr(&a);
        assert_eq!(at.shape(), (2, 3));
        assert!(at.is_csr());
        assert_eq!(mul_vec(&at, &[1.0, 1.0, 1.0]), vec![0.0, 5.0]);
    }

    #[test]
    fn frobenius_norm() {
        let a = small();
        assert_eq!(frobenius_sq(&a), 15.0);
    }
}
