//! Fitted weights and forward prediction.

use std::sync::Arc;

use nalgebra::DMatrix;
use sprs::CsMat;

use crate::domain::{DiffusionVolume, FitStrategy, GradientTable, Streamline, Voxel};
use crate::error::{ErrorKind, FitError};
use crate::fit::VoxelSignals;
use crate::index::{Incidence, VoxelBatches};
use crate::matrix::{mul_vec, tangent_field, DesignMatrixBuilder};
use crate::signal::{SignalMode, TensorSignalCache};
use crate::solve::{ChunkedOperator, SolveOutcome, SolveReport};

/// Everything a fit produces, handed over by `FiberModel`.
pub(crate) struct FitParts {
    pub gtab: Arc<GradientTable>,
    pub evals: [f64; 3],
    pub mode: SignalMode,
    pub streamlines: Arc<Vec<Streamline>>,
    pub voxels: Vec<Voxel>,
    pub volume_dims: [usize; 3],
    pub signals: VoxelSignals,
    pub nnz: usize,
    pub matrix: Option<CsMat<f64>>,
    pub outcome: SolveOutcome,
    pub strategy: FitStrategy,
    pub chunk_voxels: usize,
}

/// A fitted model. Owns its inputs; no reference back to the model.
#[derive(Debug, Clone)]
pub struct FiberFit {
    gtab: Arc<GradientTable>,
    evals: [f64; 3],
    mode: SignalMode,
    streamlines: Arc<Vec<Streamline>>,
    voxels: Vec<Voxel>,
    volume_dims: [usize; 3],
    signals: VoxelSignals,
    nnz: usize,
    matrix: Option<CsMat<f64>>,
    weights: Vec<f64>,
    report: SolveReport,
    strategy: FitStrategy,
    chunk_voxels: usize,
}

impl FiberFit {
    pub(crate) fn from_parts(parts: FitParts) -> Self {
        Self {
            gtab: parts.gtab,
            evals: parts.evals,
            mode: parts.mode,
            streamlines: parts.streamlines,
            voxels: parts.voxels,
            volume_dims: parts.volume_dims,
            signals: parts.signals,
            nnz: parts.nnz,
            matrix: parts.matrix,
            weights: parts.outcome.weights,
            report: parts.outcome.report,
            strategy: parts.strategy,
            chunk_voxels: parts.chunk_voxels,
        }
    }

    /// One non-negative weight per streamline.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn report(&self) -> &SolveReport {
        &self.report
    }

    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn streamlines(&self) -> &[Streamline] {
        &self.streamlines
    }

    pub fn gradient_table(&self) -> &GradientTable {
        &self.gtab
    }

    pub fn signals(&self) -> &VoxelSignals {
        &self.signals
    }

    pub fn evals(&self) -> [f64; 3] {
        self.evals
    }

    pub fn strategy(&self) -> FitStrategy {
        self.strategy
    }

    /// Stored entries of the fitting design matrix.
    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Fitting design matrix, when the fit materialized one.
    pub fn matrix(&self) -> Option<&CsMat<f64>> {
        self.matrix.as_ref()
    }

    /// `A w` for `gtab`, reusing the fitting matrix when possible.
    fn fiber_signal(&self, gtab: Option<&GradientTable>) -> Result<Vec<f64>, FitError> {
        if let (None, Some(a)) = (gtab, &self.matrix) {
            return Ok(mul_vec(a, &self.weights));
        }

        let gtab = Arc::new(gtab.cloned().unwrap_or_else(|| (*self.gtab).clone()));
        let cache = TensorSignalCache::new(gtab, self.evals, self.mode.clone());
        let tangents = tangent_field(&self.streamlines);
        match self.strategy {
            FitStrategy::InMemory => {
                let incidence = Incidence::for_voxels(&self.streamlines, self.voxels.clone());
                let a = DesignMatrixBuilder::new(&cache, &tangents).assemble(&incidence, self.streamlines.len())?;
                Ok(mul_vec(&a, &self.weights))
            }
            FitStrategy::OutOfCore => {
                let batches = VoxelBatches::new(&self.streamlines, self.chunk_voxels)?;
                ChunkedOperator::new(batches, &cache, &tangents)?.forward(&self.weights)
            }
        }
    }

    /// Predicted signal, `n_voxels x n_directions` of the target table.
    ///
    /// `gtab = None` predicts for the fitting table (reusing the fitting
    /// matrix when there is one); `s0 = None` uses the fitted voxels' mean
    /// baseline. Baseline columns carry S0; weighted columns are
    /// `(A w + mean) * S0`, with the per-voxel relative mean of the fit.
    pub fn predict(&self, gtab: Option<&GradientTable>, s0: Option<&[f64]>) -> Result<DMatrix<f64>, FitError> {
        let n_vox = self.voxels.len();
        let s0 = s0.unwrap_or(&self.signals.s0);
        if s0.len() != n_vox {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("S0 has {} entries for {n_vox} voxels.", s0.len()),
            ));
        }

        let target = gtab.unwrap_or(&self.gtab);
        let n_w = target.n_weighted();
        let fiber = self.fiber_signal(gtab)?;

        let mut out = DMatrix::zeros(n_vox, target.n_directions());
        for v in 0..n_vox {
            for i in target.baseline_indices() {
                out[(v, i)] = s0[v];
            }
            for (d, i) in target.weighted_indices().enumerate() {
                out[(v, i)] = (fiber[v * n_w + d] + self.signals.mean[v]) * s0[v];
            }
        }

        if out.iter().any(|x| !x.is_finite()) {
            return Err(FitError::new(ErrorKind::Numerical, "Prediction produced non-finite values."));
        }
        Ok(out)
    }

    /// `predict` scattered into a volume shaped like the fitted one; voxels
    /// outside the fit domain are zero.
    pub fn predict_volume(&self, gtab: Option<&GradientTable>) -> Result<DiffusionVolume, FitError> {
        let pred = self.predict(gtab, None)?;
        let mut volume = DiffusionVolume::zeros(self.volume_dims, pred.ncols());
        for (v, voxel) in self.voxels.iter().enumerate() {
            if let Some(dst) = volume.voxel_mut(voxel) {
                for (d, x) in dst.iter_mut().enumerate() {
                    *x = pred[(v, d)];
                }
            }
        }
        Ok(volume)
    }

    /// Observed minus predicted, on the fitting table.
    pub fn residuals(&self) -> Result<DMatrix<f64>, FitError> {
        Ok(&self.signals.observed - self.predict(None, None)?)
    }

    /// Root mean squared residual of each voxel over the weighted directions.
    pub fn rmse_per_voxel(&self) -> Result<Vec<f64>, FitError> {
        let res = self.residuals()?;
        let weighted: Vec<usize> = self.gtab.weighted_indices().collect();
        Ok((0..res.nrows())
            .map(|v| {
                let ss: f64 = weighted.iter().map(|&i| res[(v, i)].powi(2)).sum();
                (ss / weighted.len() as f64).sqrt()
            })
            .collect())
    }

    /// Streamlines whose weight is exactly zero.
    pub fn pruned(&self) -> Vec<usize> {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w == 0.0)
            .map(|(i, _)| i)
            .collect()
    }
}
