//! `life-fit` library crate: linear fascicle evaluation.
//!
//! Given tractography streamlines and a diffusion-weighted volume, fit one
//! non-negative weight per streamline so the summed, tensor-modelled fiber
//! signal explains the observed anisotropic signal.
//!
//! The binary (`life`) is a thin wrapper around this library so the whole
//! pipeline is testable without spawning processes.

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod geometry;
pub mod index;
pub mod io;
pub mod matrix;
pub mod report;
pub mod signal;
pub mod solve;
