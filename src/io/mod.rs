//! Input/output helpers.
//!
//! - problem JSON read/write (`problem`)
//! - result exports: weights CSV, fit JSON (`export`)

pub mod export;
pub mod problem;

pub use export::*;
pub use problem::*;
