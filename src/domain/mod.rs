//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - inputs (`Streamline`, `GradientTable`, `DiffusionVolume`, `Voxel`)
//! - configuration (`FitConfig`, `SolverConfig`, `OutOfCoreConfig`, `SphereChoice`)

pub mod types;

pub use types::*;
