//! Non-negative weight estimation.
//!
//! - `nnls`: the projected gradient solver and the in-memory problem
//! - `out_of_core`: the voxel-chunked problem for bundles too large to materialize

pub mod nnls;
pub mod out_of_core;

pub use nnls::*;
pub use out_of_core::*;
