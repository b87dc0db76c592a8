//! Observed signal in the fit domain.
//!
//! For every fit voxel the weighted measurements are divided by the voxel's
//! mean baseline signal (S0). The model then fits the relative signal minus
//! its per-voxel mean, so only the anisotropic part is explained by
//! streamlines.

use nalgebra::DMatrix;

use crate::domain::{DiffusionVolume, GradientTable, Voxel};
use crate::error::{ErrorKind, FitError};

#[derive(Debug, Clone)]
pub struct VoxelSignals {
    /// Mean baseline signal per voxel.
    pub s0: Vec<f64>,
    /// `n_voxels x n_weighted` weighted signal divided by S0.
    pub relative: DMatrix<f64>,
    /// Row means of `relative`.
    pub mean: Vec<f64>,
    /// `relative - mean`, flattened voxel-major (the solver's `y`).
    pub demeaned: Vec<f64>,
    /// `n_voxels x n_directions` raw measurements.
    pub observed: DMatrix<f64>,
}

impl VoxelSignals {
    pub fn extract(volume: &DiffusionVolume, voxels: &[Voxel], gtab: &GradientTable) -> Result<Self, FitError> {
        if volume.n_directions() != gtab.n_directions() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!(
                    "Volume has {} directions but the gradient table has {}.",
                    volume.n_directions(),
                    gtab.n_directions()
                ),
            ));
        }

        let n_vox = voxels.len();
        let n_dir = gtab.n_directions();
        let n_w = gtab.n_weighted();
        let baseline: Vec<usize> = gtab.baseline_indices().collect();
        let weighted: Vec<usize> = gtab.weighted_indices().collect();

        let mut s0 = Vec::with_capacity(n_vox);
        let mut relative = DMatrix::zeros(n_vox, n_w);
        let mut observed = DMatrix::zeros(n_vox, n_dir);

        for (v, voxel) in voxels.iter().enumerate() {
            let data = volume.voxel(voxel).ok_or_else(|| {
                FitError::new(
                    ErrorKind::InputShape,
                    format!("Voxel {voxel:?} lies outside the volume {:?}.", volume.dims()),
                )
            })?;
            if data.iter().any(|x| !x.is_finite()) {
                return Err(FitError::new(
                    ErrorKind::Numerical,
                    format!("Voxel {voxel:?} has non-finite measurements."),
                ));
            }

            let b0 = baseline.iter().map(|&i| data[i]).sum::<f64>() / baseline.len() as f64;
            if b0 <= 0.0 {
                return Err(FitError::new(
                    ErrorKind::Numerical,
                    format!("Voxel {voxel:?} has non-positive baseline signal {b0}."),
                ));
            }
            s0.push(b0);
            for (d, &i) in weighted.iter().enumerate() {
                relative[(v, d)] = data[i] / b0;
            }
            for (d, &x) in data.iter().enumerate() {
                observed[(v, d)] = x;
            }
        }

        let mean: Vec<f64> = (0..n_vox).map(|v| relative.row(v).mean()).collect();
        let mut demeaned = Vec::with_capacity(n_vox * n_w);
        for v in 0..n_vox {
            demeaned.extend(relative.row(v).iter().map(|x| x - mean[v]));
        }

        Ok(Self {
            s0,
            relative,
            mean,
            demeaned,
            observed,
        })
    }

    pub fn n_voxels(&self) -> usize {
        self.s0.len()
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use super::*;
    use crate::domain::DEFAULT_B0_THRESHOLD;

    fn gtab() -> GradientTable {
        GradientTable::new(
            vec![0.0, 1000.0, 0.0, 1000.0],
            vec![Vector3::zeros(), Vector3::x(), Vector3::zeros(), Vector3::y()],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap()
    }

    #[test]
    fn normalizes_by_mean_baseline_and_demeans() {
        let mut volume = DiffusionVolume::zeros([2, 1, 1], 4);
        volume.voxel_mut(&[1, 0, 0]).unwrap().copy_from_slice(&[90.0, 60.0, 110.0, 20.0]);
        let s = VoxelSignals::extract(&volume, &[[1, 0, 0]], &gtab()).unwrap();
        assert_eq!(s.s0, vec![100.0]);
        assert!((s.relative[(0, 0)] - 0.6).abs() < 1e-12);
        assert!((s.relative[(0, 1)] - 0.2).abs() < 1e-12);
        assert!((s.mean[0] - 0.4).abs() < 1e-12);
        assert!((s.demeaned[0] - 0.2).abs() < 1e-12);
        assert!((s.demeaned[1] + 0.2).abs() < 1e-12);
        assert_eq!(s.observed[(0, 2)], 110.0);
    }

    #[test]
    fn rejects_out_of_volume_and_zero_baseline() {
        let volume = DiffusionVolume::zeros([2, 1, 1], 4);
        let err = VoxelSignals::extract(&volume, &[[5, 0, 0]], &gtab()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
        let err = VoxelSignals::extract(&volume, &[[0, 0, 0]], &gtab()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Numerical);
    }
}
