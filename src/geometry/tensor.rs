//! Single-fiber response tensors and their predicted signal.
//!
//! A node's tensor is the canonical diagonal tensor `diag(evals)` rotated so
//! its first (axial) axis lies along the local tangent:
//!
//! `D = R · diag(λ1, λ2, λ3) · Rᵀ`, with `R = [e1 e2 e3]` and `e1 = t / |t|`.
//!
//! `e2`/`e3` complete `e1` to a right-handed orthonormal frame using the `z`
//! axis as reference (`y` when the tangent is parallel to `z`). The frame is
//! then projected onto the nearest rotation through its SVD (`R = U Vᵀ`), which
//! removes any drift from the cross products for nearly degenerate tangents.
//!
//! The predicted signal for a weighted measurement `(b, g)` follows the
//! single-compartment law `S/S0 = exp(-b · gᵀ D g)`.

use nalgebra::{Matrix3, Vector3};

use crate::domain::GradientTable;

/// Below this cross-product norm the reference axis is considered parallel.
const PARALLEL_EPS: f64 = 1e-6;

/// Orthonormal frame whose first column is the unit tangent.
///
/// `direction` must be non-zero; the signal cache only passes repaired tangents.
pub fn principal_frame(direction: &Vector3<f64>) -> Matrix3<f64> {
    let e1 = direction.normalize();
    let mut e2 = Vector3::z().cross(&e1);
    if e2.norm() < PARALLEL_EPS {
        e2 = Vector3::y().cross(&e1);
    }
    let e2 = e2.normalize();
    let e3 = e1.cross(&e2);
    let frame = Matrix3::from_columns(&[e1, e2, e3]);

    let svd = frame.svd(true, true);
    match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => u * v_t,
        _ => frame,
    }
}

/// Response tensor oriented along `direction`.
pub fn response_tensor(direction: &Vector3<f64>, evals: &[f64; 3]) -> Matrix3<f64> {
    let r = principal_frame(direction);
    let d = Matrix3::from_diagonal(&Vector3::new(evals[0], evals[1], evals[2]));
    r * d * r.transpose()
}

/// Predicted attenuation `exp(-b · gᵀ D g)` for every weighted measurement,
/// with its own mean removed.
///
/// Demeaning drops the isotropic component, so each node contributes only its
/// orientation-dependent part to the design matrix.
pub fn demeaned_signal(tensor: &Matrix3<f64>, gtab: &GradientTable) -> Vec<f64> {
    let mut sig: Vec<f64> = gtab
        .weighted()
        .map(|(b, g)| (-b * g.dot(&(tensor * g))).exp())
        .collect();
    let mean = sig.iter().sum::<f64>() / sig.len().max(1) as f64;
    sig.iter_mut().for_each(|s| *s -= mean);
    sig
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_B0_THRESHOLD;

    fn assert_mat_close(a: &Matrix3<f64>, b: &Matrix3<f64>, tol: f64) {
        for i in 0..3 {
            for j in 0..3 {
                assert!(
                    (a[(i, j)] - b[(i, j)]).abs() < tol,
                    "entry ({i},{j}): {} vs {}",
                    a[(i, j)],
                    b[(i, j)]
                );
            }
        }
    }

    #[test]
    fn oblique_tangent_matches_reference_tensor() {
        // First tangent of [[1,2,3],[4,5,3],[5,6,3]] is [3,3,0].
        let evals = [0.0012, 0.0006, 0.0004];
        let t = response_tensor(&Vector3::new(3.0, 3.0, 0.0), &evals);
        let expected = Matrix3::new(0.0009, 0.0003, 0.0, 0.0003, 0.0009, 0.0, 0.0, 0.0, 0.0004);
        assert_mat_close(&t, &expected, 1e-12);
    }

    #[test]
    fn x_aligned_tangent_keeps_canonical_eigen_order() {
        let evals = [0.0012, 0.0006, 0.0004];
        let t = response_tensor(&Vector3::x(), &evals);
        let eig = t.symmetric_eigen();
        let mut pairs: Vec<(f64, Vector3<f64>)> = (0..3)
            .map(|i| (eig.eigenvalues[i], eig.eigenvectors.column(i).into_owned()))
            .collect();
        pairs.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());

        for (i, (val, _)) in pairs.iter().enumerate() {
            assert!((val - evals[i]).abs() < 1e-15);
        }
        let axes = [Vector3::x(), Vector3::y(), Vector3::z()];
        for ((_, vec), axis) in pairs.iter().zip(axes.iter()) {
            assert!((vec.dot(axis).abs() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn frame_is_a_rotation_for_z_aligned_tangent() {
        let r = principal_frame(&Vector3::new(0.0, 0.0, -2.0));
        assert_mat_close(&(r.transpose() * r), &Matrix3::identity(), 1e-12);
        assert!((r.determinant() - 1.0).abs() < 1e-12);
        assert!((r.column(0).into_owned() - Vector3::new(0.0, 0.0, -1.0)).norm() < 1e-12);
    }

    #[test]
    fn demeaned_signal_sums_to_zero_and_peaks_across_the_fiber() {
        let gtab = GradientTable::new(
            vec![0.0, 1000.0, 1000.0, 1000.0],
            vec![Vector3::zeros(), Vector3::x(), Vector3::y(), Vector3::z()],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap();
        let tensor = response_tensor(&Vector3::x(), &[0.0015, 0.0005, 0.0005]);
        let sig = demeaned_signal(&tensor, &gtab);
        assert_eq!(sig.len(), 3);
        assert!(sig.iter().sum::<f64>().abs() < 1e-12);
        // Diffusion along the fiber attenuates most.
        assert!(sig[0] < sig[1]);
        assert!((sig[1] - sig[2]).abs() < 1e-12);
    }
}
