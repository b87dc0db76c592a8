//! Tangent-to-signal modelling with a memoizing cache.

pub mod cache;

pub use cache::*;
