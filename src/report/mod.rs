//! Reporting utilities: fit diagnostics, weight rankings and formatted
//! terminal output.

pub mod format;

pub use format::*;

use crate::error::FitError;
use crate::fit::FiberFit;
use crate::solve::Termination;

/// Distribution of streamline weights.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightStats {
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
    pub n_nonzero: usize,
}

/// Numbers printed after a fit.
#[derive(Debug, Clone)]
pub struct FitSummary {
    pub n_voxels: usize,
    pub n_streamlines: usize,
    pub nnz: usize,
    pub iterations: usize,
    pub termination: Termination,
    pub sse: f64,
    /// Mean of the per-voxel RMSE, in signal units.
    pub mean_rmse: f64,
    pub max_rmse: f64,
    pub weights: Option<WeightStats>,
    pub n_pruned: usize,
}

/// A streamline and its weight, for top-N tables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedStreamline {
    pub index: usize,
    pub weight: f64,
    pub n_nodes: usize,
}

/// `None` for an empty slice.
pub fn weight_stats(weights: &[f64]) -> Option<WeightStats> {
    if weights.is_empty() {
        return None;
    }
    let mut sorted = weights.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    };
    Some(WeightStats {
        min: sorted[0],
        median,
        max: sorted[n - 1],
        mean: sorted.iter().sum::<f64>() / n as f64,
        n_nonzero: sorted.iter().filter(|w| **w != 0.0).count(),
    })
}

pub fn summarize(fit: &FiberFit) -> Result<FitSummary, FitError> {
    let rmse = fit.rmse_per_voxel()?;
    let report = fit.report();
    let mean_rmse = if rmse.is_empty() {
        0.0
    } else {
        rmse.iter().sum::<f64>() / rmse.len() as f64
    };
    Ok(FitSummary {
        n_voxels: fit.voxels().len(),
        n_streamlines: fit.streamlines().len(),
        nnz: fit.nnz(),
        iterations: report.iterations,
        termination: report.termination,
        sse: report.best_sse,
        mean_rmse,
        max_rmse: rmse.iter().copied().fold(0.0, f64::max),
        weights: weight_stats(fit.weights()),
        n_pruned: fit.pruned().len(),
    })
}

/// The `top_n` heaviest streamlines, heaviest first; ties keep index order.
pub fn rank_streamlines(fit: &FiberFit, top_n: usize) -> Vec<RankedStreamline> {
    let mut ranked: Vec<RankedStreamline> = fit
        .weights()
        .iter()
        .zip(fit.streamlines())
        .enumerate()
        .map(|(index, (w, s))| RankedStreamline {
            index,
            weight: *w,
            n_nodes: s.len(),
        })
        .collect();
    ranked.sort_by(|a, b| b.weight.total_cmp(&a.weight).then(a.index.cmp(&b.index)));
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_stats_basic() {
        let s = weight_stats(&[0.0, 3.0, 1.0, 2.0]).unwrap();
        assert_eq!(s.min, 0.0);
        assert_eq!(s.max, 3.0);
        assert_eq!(s.median, 1.5);
        assert_eq!(s.mean, 1.5);
        assert_eq!(s.n_nonzero, 3);

        assert_eq!(weight_stats(&[2.0, 0.0, 1.0]).unwrap().median, 1.0);
        assert!(weight_stats(&[]).is_none());
    }
}
