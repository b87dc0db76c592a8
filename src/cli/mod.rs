//! Command-line parsing for the `life` binary.
//!
//! Argument parsing and command dispatch stay separate from the fitting
//! code; `app::fit_config_from_args` turns these structs into a `FitConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::SphereChoice;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "life", version, about = "Linear fascicle evaluation: fit streamline weights to diffusion data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a synthetic crossing-bundle phantom and fit it.
    Phantom(PhantomArgs),
    /// Fit a problem JSON (gradient table, affine, streamlines, volume).
    Fit(FitArgs),
    /// Rebuild a saved fit against a problem JSON and report prediction error.
    Predict(PredictArgs),
}

/// Model and solver options shared by `phantom` and `fit`.
///
/// Every option left unset keeps the value from `--config` (or the default).
#[derive(Debug, Args, Clone, Default)]
pub struct ModelArgs {
    /// Fit configuration JSON; flags below override its fields.
    #[arg(long, value_name = "JSON")]
    pub config: Option<PathBuf>,

    /// Response tensor eigenvalues, axial first (e.g. 0.001,0,0).
    #[arg(long, value_delimiter = ',', value_name = "E1,E2,E3")]
    pub evals: Option<Vec<f64>>,

    /// Tangent discretization.
    #[arg(long, value_enum)]
    pub sphere: Option<SphereChoice>,

    /// Gradient descent step length.
    #[arg(long)]
    pub step: Option<f64>,

    /// Step along the unit-length gradient instead of the raw one.
    #[arg(long)]
    pub normalized_gradient: bool,

    /// Iterations between SSE checkpoints.
    #[arg(long)]
    pub check_interval: Option<usize>,

    /// Consecutive non-improving checkpoints before stopping.
    #[arg(long)]
    pub max_bad_checks: Option<usize>,

    /// Hard iteration ceiling.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Largest voxels x streamlines product an in-memory fit may build.
    #[arg(long)]
    pub budget: Option<u64>,

    /// Voxels per out-of-core chunk.
    #[arg(long)]
    pub chunk_voxels: Option<usize>,

    /// Spill out-of-core chunk incidence to this directory.
    #[arg(long, value_name = "DIR")]
    pub spill_dir: Option<PathBuf>,

    /// Fit without materializing the design matrix.
    #[arg(long)]
    pub out_of_core: bool,
}

/// Options for `life phantom`.
#[derive(Debug, Args, Clone)]
pub struct PhantomArgs {
    #[command(flatten)]
    pub model: ModelArgs,

    /// In-plane grid size.
    #[arg(long, default_value_t = 10)]
    pub grid: usize,

    /// Streamlines in each of the two bundles.
    #[arg(long, default_value_t = 4)]
    pub per_bundle: usize,

    /// Standard deviation of additive Gaussian noise.
    #[arg(long, default_value_t = 0.5)]
    pub noise: f64,

    /// Random seed.
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Show the top-N streamlines by weight.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Write the generated problem to JSON.
    #[arg(long = "export-problem", value_name = "JSON")]
    pub export_problem: Option<PathBuf>,

    /// Write per-streamline weights to CSV.
    #[arg(long = "export-weights", value_name = "CSV")]
    pub export_weights: Option<PathBuf>,

    /// Write the fit (config, report, weights) to JSON.
    #[arg(long = "export-fit", value_name = "JSON")]
    pub export_fit: Option<PathBuf>,
}

/// Options for `life fit`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Problem JSON.
    #[arg(long, value_name = "JSON")]
    pub problem: PathBuf,

    #[command(flatten)]
    pub model: ModelArgs,

    /// Show the top-N streamlines by weight.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Write per-streamline weights to CSV.
    #[arg(long = "export-weights", value_name = "CSV")]
    pub export_weights: Option<PathBuf>,

    /// Write the fit (config, report, weights) to JSON.
    #[arg(long = "export-fit", value_name = "JSON")]
    pub export_fit: Option<PathBuf>,
}

/// Options for `life predict`.
#[derive(Debug, Args, Clone)]
pub struct PredictArgs {
    /// Fit JSON produced by `--export-fit`.
    #[arg(long, value_name = "JSON")]
    pub fit: PathBuf,

    /// Problem JSON whose gradient table and volume are predicted.
    #[arg(long, value_name = "JSON")]
    pub problem: PathBuf,

    /// Show the N worst voxels.
    #[arg(long, default_value_t = 10)]
    pub top: usize,
}
