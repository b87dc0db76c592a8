//! Fit orchestration and prediction.
//!
//! - `signals`: observed signal of the fit domain (S0, relative, demeaned)
//! - `model`: `FiberModel`, which builds the problem and runs the solver
//! - `fiber_fit`: `FiberFit`, the fitted weights plus forward prediction

pub mod fiber_fit;
pub mod model;
pub mod signals;

pub use fiber_fit::FiberFit;
pub use model::*;
pub use signals::*;
