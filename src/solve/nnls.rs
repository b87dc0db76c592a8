//! Non-negative least squares by projected gradient descent.
//!
//! Minimizes `||A w - y||^2` subject to `w >= 0`, starting from `w = 0`:
//!
//! - every iteration: `r = A w - y`, `g = A^T r`, `w <- max(0, w - s * g)`
//!   where `s = step / ||g||` (normalized) or `s = step` (raw);
//! - every `check_interval` iterations the SSE of the current iterate is
//!   compared with the best seen so far; `max_bad_checks` consecutive
//!   checkpoints without improvement stop the descent.
//!
//! The weights returned are always the best checkpointed iterate, never
//! simply the last one. A shared cancel flag stops the descent early on the
//! same terms.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use sprs::CsMat;

use crate::domain::SolverConfig;
use crate::error::{ErrorKind, FitError};
use crate::matrix::{mul_vec, transpose_csr};

/// A linear least-squares objective the solver can descend on.
pub trait LeastSquaresProblem: Sync {
    fn n_rows(&self) -> usize;
    fn n_cols(&self) -> usize;

    /// Write `A^T (A w - y)` into `grad` and return `||A w - y||^2`.
    fn residual_gradient(&self, w: &[f64], grad: &mut [f64]) -> Result<f64, FitError>;
}

/// Why the descent stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// `max_bad_checks` checkpoints in a row without improvement.
    Converged,
    /// `max_iterations` reached.
    IterationLimit,
    /// The gradient vanished; the iterate is a stationary point.
    ZeroGradient,
    /// The objective became non-finite.
    Diverged,
    /// The caller raised the cancel flag.
    Cancelled,
}

impl Termination {
    pub fn label(self) -> &'static str {
        match self {
            Termination::Converged => "converged",
            Termination::IterationLimit => "iteration-limit",
            Termination::ZeroGradient => "zero-gradient",
            Termination::Diverged => "diverged",
            Termination::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    pub checkpoints: usize,
    pub best_sse: f64,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct SolveOutcome {
    pub weights: Vec<f64>,
    pub report: SolveReport,
}

/// In-memory problem over a materialized CSR matrix.
///
/// Holds `A^T` in CSR form as well so both products are row-parallel with one
/// task per output element.
pub struct CsrProblem<'a> {
    a: &'a CsMat<f64>,
    at: CsMat<f64>,
    y: &'a [f64],
}

impl<'a> CsrProblem<'a> {
    pub fn new(a: &'a CsMat<f64>, y: &'a [f64]) -> Result<Self, FitError> {
        if a.rows() != y.len() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Design matrix has {} rows but the signal has {} entries.", a.rows(), y.len()),
            ));
        }
        if !a.is_csr() {
            return Err(FitError::new(ErrorKind::InputShape, "Design matrix must be stored as CSR."));
        }
        Ok(Self {
            a,
            at: transpose_csr(a),
            y,
        })
    }
}

impl LeastSquaresProblem for CsrProblem<'_> {
    fn n_rows(&self) -> usize {
        self.a.rows()
    }

    fn n_cols(&self) -> usize {
        self.a.cols()
    }

    fn residual_gradient(&self, w: &[f64], grad: &mut [f64]) -> Result<f64, FitError> {
        let mut r = mul_vec(self.a, w);
        for (ri, yi) in r.iter_mut().zip(self.y) {
            *ri -= yi;
        }
        let sse = r.iter().map(|v| v * v).sum();
        grad.copy_from_slice(&mul_vec(&self.at, &r));
        Ok(sse)
    }
}

/// Run the projected gradient descent on `problem`.
pub fn solve<P: LeastSquaresProblem + ?Sized>(problem: &P, config: &SolverConfig) -> Result<SolveOutcome, FitError> {
    solve_with_cancel(problem, config, None)
}

/// As [`solve`], checking `cancel` before every iteration.
pub fn solve_with_cancel<P: LeastSquaresProblem + ?Sized>(
    problem: &P,
    config: &SolverConfig,
    cancel: Option<&AtomicBool>,
) -> Result<SolveOutcome, FitError> {
    let n = problem.n_cols();
    let check_interval = config.check_interval.max(1);

    let mut w = vec![0.0; n];
    let mut grad = vec![0.0; n];
    let mut best = w.clone();
    let mut best_sse = f64::INFINITY;
    let mut bad_checks = 0usize;
    let mut checkpoints = 0usize;

    for iter in 0..config.max_iterations {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return finish(best, best_sse, iter, checkpoints, Termination::Cancelled);
        }
        let sse = problem.residual_gradient(&w, &mut grad)?;

        if iter % check_interval == 0 {
            checkpoints += 1;
            if !sse.is_finite() {
                return finish(best, best_sse, iter, checkpoints, Termination::Diverged);
            }
            if sse < best_sse {
                best_sse = sse;
                best.copy_from_slice(&w);
                bad_checks = 0;
            } else {
                bad_checks += 1;
            }
            tracing::debug!(iter, sse, best_sse, bad_checks, "checkpoint");
            if bad_checks >= config.max_bad_checks {
                return finish(best, best_sse, iter, checkpoints, Termination::Converged);
            }
        }

        let g_norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
        if g_norm == 0.0 {
            if sse.is_finite() && sse < best_sse {
                best_sse = sse;
                best.copy_from_slice(&w);
            }
            return finish(best, best_sse, iter, checkpoints, Termination::ZeroGradient);
        }
        if !g_norm.is_finite() {
            return finish(best, best_sse, iter, checkpoints, Termination::Diverged);
        }

        let scale = if config.normalize_gradient {
            config.step_size / g_norm
        } else {
            config.step_size
        };
        for (wi, gi) in w.iter_mut().zip(&grad) {
            *wi = (*wi - scale * gi).max(0.0);
        }
    }

    // The last update was never evaluated.
    let sse = problem.residual_gradient(&w, &mut grad)?;
    if sse.is_finite() && sse < best_sse {
        best_sse = sse;
        best.copy_from_slice(&w);
    }
    finish(best, best_sse, config.max_iterations, checkpoints, Termination::IterationLimit)
}

fn finish(
    best: Vec<f64>,
    best_sse: f64,
    iterations: usize,
    checkpoints: usize,
    termination: Termination,
) -> Result<SolveOutcome, FitError> {
    tracing::info!(iterations, checkpoints, best_sse, ?termination, "solver finished");
    Ok(SolveOutcome {
        weights: best,
        report: SolveReport {
            iterations,
            checkpoints,
            best_sse,
            termination,
        },
    })
}
