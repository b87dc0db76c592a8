//! Export fit results.
//!
//! The weights CSV is meant for spreadsheets and downstream scripts; the fit
//! JSON carries enough (configuration, solver report, weights) for
//! `life predict` to rebuild the fit against a problem file.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{FitConfig, FitStrategy};
use crate::error::{ErrorKind, FitError};
use crate::fit::FiberFit;
use crate::solve::SolveReport;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitFile {
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub config: FitConfig,
    pub strategy: FitStrategy,
    pub n_voxels: usize,
    pub n_streamlines: usize,
    pub nnz: usize,
    pub report: SolveReport,
    pub weights: Vec<f64>,
}

impl FitFile {
    pub fn from_fit(fit: &FiberFit, config: &FitConfig) -> Self {
        Self {
            tool: "life".to_string(),
            created_at: Utc::now(),
            config: config.clone(),
            strategy: fit.strategy(),
            n_voxels: fit.voxels().len(),
            n_streamlines: fit.streamlines().len(),
            nnz: fit.nnz(),
            report: fit.report().clone(),
            weights: fit.weights().to_vec(),
        }
    }
}

/// Write one row per streamline: index, weight, node count, pruned flag.
pub fn write_weights_csv(path: &Path, fit: &FiberFit) -> Result<(), FitError> {
    let file = File::create(path).map_err(|e| {
        FitError::new(ErrorKind::Io, format!("Failed to create weights CSV '{}': {e}", path.display()))
    })?;
    let mut out = BufWriter::new(file);

    writeln!(out, "streamline,weight,n_nodes,pruned")
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to write weights CSV header: {e}")))?;

    for (i, (w, s)) in fit.weights().iter().zip(fit.streamlines()).enumerate() {
        writeln!(out, "{i},{w:.10},{},{}", s.len(), *w == 0.0)
            .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to write weights CSV row: {e}")))?;
    }
    out.flush()
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to flush weights CSV: {e}")))?;
    Ok(())
}

pub fn write_fit_json(path: &Path, fit: &FiberFit, config: &FitConfig) -> Result<(), FitError> {
    let file = File::create(path).map_err(|e| {
        FitError::new(ErrorKind::Io, format!("Failed to create fit JSON '{}': {e}", path.display()))
    })?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &FitFile::from_fit(fit, config))
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to write fit JSON: {e}")))?;
    out.flush()
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to flush fit JSON: {e}")))
}

pub fn read_fit_json(path: &Path) -> Result<FitFile, FitError> {
    let file = File::open(path)
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to open fit JSON '{}': {e}", path.display())))?;
    let fit: FitFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Invalid fit JSON '{}': {e}", path.display())))?;
    fit.config.validate()?;
    Ok(fit)
}
