//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main:
//! - sets up logging
//! - parses CLI arguments
//! - loads or generates a problem
//! - runs the fit (or restores a saved one)
//! - prints reports and writes optional exports

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Command, FitArgs, ModelArgs, PhantomArgs, PredictArgs};
use crate::data::{generate_phantom, PhantomSpec};
use crate::domain::{FitConfig, FitStrategy};
use crate::error::{ErrorKind, FitError};

pub mod pipeline;

/// Entry point for the `life` binary.
pub fn run() -> Result<(), FitError> {
    init_tracing();
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Phantom(args) => handle_phantom(args),
        Command::Fit(args) => handle_fit(args),
        Command::Predict(args) => handle_predict(args),
    }
}

/// Logs go to stderr so reports on stdout stay pipeable. `RUST_LOG`
/// overrides the default `info` level.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn handle_phantom(args: PhantomArgs) -> Result<(), FitError> {
    let spec = PhantomSpec {
        grid: args.grid,
        streamlines_per_bundle: args.per_bundle,
        noise_sd: args.noise,
        seed: args.seed,
        ..PhantomSpec::default()
    };
    let phantom = generate_phantom(&spec)?;

    // The phantom's own response is the natural default for its fit.
    let base = FitConfig {
        evals: spec.evals,
        sphere: spec.sphere,
        ..FitConfig::default()
    };
    let (config, strategy) = fit_config_from_args(&args.model, base)?;

    if let Some(path) = &args.export_problem {
        crate::io::write_problem_json(path, &phantom.problem)?;
    }

    let run = pipeline::run_fit(&phantom.problem, &config, strategy, args.top)?;
    println!("{}", crate::report::format_fit_summary(&run.summary, &config));
    println!("{}", crate::report::format_truth_comparison(run.fit.weights(), &phantom.true_weights));
    println!("{}", crate::report::format_top_weights(&run.top));

    write_exports(&run, &config, args.export_weights.as_deref(), args.export_fit.as_deref())
}

fn handle_fit(args: FitArgs) -> Result<(), FitError> {
    let problem = crate::io::read_problem_json(&args.problem)?;
    let (config, strategy) = fit_config_from_args(&args.model, FitConfig::default())?;

    let run = pipeline::run_fit(&problem, &config, strategy, args.top)?;
    println!("{}", crate::report::format_fit_summary(&run.summary, &config));
    println!("{}", crate::report::format_top_weights(&run.top));

    write_exports(&run, &config, args.export_weights.as_deref(), args.export_fit.as_deref())
}

fn handle_predict(args: PredictArgs) -> Result<(), FitError> {
    let saved = crate::io::read_fit_json(&args.fit)?;
    let problem = crate::io::read_problem_json(&args.problem)?;
    let out = pipeline::run_predict(&problem, &saved)?;
    println!("{}", crate::report::format_rmse_table(&out.voxels, &out.rmse, args.top));
    Ok(())
}

fn write_exports(
    run: &pipeline::RunOutput,
    config: &FitConfig,
    weights: Option<&std::path::Path>,
    fit: Option<&std::path::Path>,
) -> Result<(), FitError> {
    if let Some(path) = weights {
        crate::io::write_weights_csv(path, &run.fit)?;
    }
    if let Some(path) = fit {
        crate::io::write_fit_json(path, &run.fit, config)?;
    }
    Ok(())
}

/// Layer CLI overrides on `base` (or on `--config` when given).
pub fn fit_config_from_args(args: &ModelArgs, base: FitConfig) -> Result<(FitConfig, FitStrategy), FitError> {
    let mut config = match &args.config {
        Some(path) => crate::io::read_config_json(path)?,
        None => base,
    };

    if let Some(evals) = &args.evals {
        config.evals = evals.as_slice().try_into().map_err(|_| {
            FitError::new(
                ErrorKind::InputShape,
                format!("Expected 3 eigenvalues, got {}.", evals.len()),
            )
        })?;
    }
    if let Some(sphere) = args.sphere {
        config.sphere = sphere;
    }

    let solver = &mut config.solver;
    if let Some(step) = args.step {
        solver.step_size = step;
    }
    if args.normalized_gradient {
        solver.normalize_gradient = true;
    }
    if let Some(n) = args.check_interval {
        solver.check_interval = n;
    }
    if let Some(n) = args.max_bad_checks {
        solver.max_bad_checks = n;
    }
    if let Some(n) = args.max_iterations {
        solver.max_iterations = n;
    }

    let ooc = &mut config.out_of_core;
    if let Some(budget) = args.budget {
        ooc.materialization_budget = budget;
    }
    if let Some(n) = args.chunk_voxels {
        ooc.chunk_voxels = n;
    }
    if let Some(dir) = &args.spill_dir {
        ooc.spill_dir = Some(dir.clone());
    }

    config.validate()?;
    let strategy = if args.out_of_core {
        FitStrategy::OutOfCore
    } else {
        FitStrategy::InMemory
    };
    Ok((config, strategy))
}
