//! Synthetic data.

pub mod phantom;

pub use phantom::*;
