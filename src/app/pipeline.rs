//! Shared fit and predict workflows used by every subcommand.
//!
//! problem -> model -> fit -> summary/ranking, or
//! problem + saved fit -> restored fit -> prediction error.

use crate::domain::{FitConfig, FitStrategy, Voxel};
use crate::error::FitError;
use crate::fit::{FiberFit, FiberModel};
use crate::io::{FitFile, Problem};
use crate::report::{rank_streamlines, summarize, FitSummary, RankedStreamline};

/// All computed outputs of a single fit run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub fit: FiberFit,
    pub summary: FitSummary,
    pub top: Vec<RankedStreamline>,
}

/// Outputs of `life predict`.
#[derive(Debug, Clone)]
pub struct PredictOutput {
    pub fit: FiberFit,
    pub voxels: Vec<Voxel>,
    pub rmse: Vec<f64>,
}

/// Fit `problem`; streamlines are in world coordinates and mapped to voxels
/// through the inverse of the problem's affine.
pub fn run_fit(problem: &Problem, config: &FitConfig, strategy: FitStrategy, top_n: usize) -> Result<RunOutput, FitError> {
    let model = FiberModel::new(problem.gtab.clone(), config.clone())?;
    let to_voxel = problem.affine.try_inverse()?;
    let fit = model.fit_with(strategy, &problem.volume, &problem.streamlines, &to_voxel)?;
    let summary = summarize(&fit)?;
    let top = rank_streamlines(&fit, top_n);
    Ok(RunOutput { fit, summary, top })
}

/// Evaluate saved weights on `problem` (which may be a different acquisition
/// of the same bundle).
pub fn run_predict(problem: &Problem, saved: &FitFile) -> Result<PredictOutput, FitError> {
    let model = FiberModel::new(problem.gtab.clone(), saved.config.clone())?;
    let to_voxel = problem.affine.try_inverse()?;
    let fit = model.restore(
        &problem.volume,
        &problem.streamlines,
        &to_voxel,
        saved.weights.clone(),
        saved.report.clone(),
    )?;
    let rmse = fit.rmse_per_voxel()?;
    tracing::info!(voxels = rmse.len(), streamlines = fit.streamlines().len(), "prediction evaluated");
    Ok(PredictOutput {
        voxels: fit.voxels().to_vec(),
        rmse,
        fit,
    })
}
