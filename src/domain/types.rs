//! Shared domain types.
//!
//! These types are kept small and (where it makes sense) serializable so they can be:
//!
//! - passed between the indexer, matrix builder and solver without conversion
//! - exported to / reloaded from JSON problem and fit files

use std::path::PathBuf;

use clap::ValueEnum;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, FitError};

/// Integer grid cell `(i, j, k)` in voxel-index space.
pub type Voxel = [i64; 3];

/// An ordered polyline of node coordinates.
///
/// Construction does not validate; the indexer rejects streamlines with fewer
/// than two nodes or non-finite coordinates before any assembly happens.
#[derive(Debug, Clone, PartialEq)]
pub struct Streamline {
    points: Vec<Point3<f64>>,
}

impl Streamline {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    pub fn from_coords(coords: &[[f64; 3]]) -> Self {
        Self {
            points: coords.iter().map(|c| Point3::new(c[0], c[1], c[2])).collect(),
        }
    }

    pub fn points(&self) -> &[Point3<f64>] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn to_coords(&self) -> Vec<[f64; 3]> {
        self.points.iter().map(|p| [p.x, p.y, p.z]).collect()
    }
}

/// Default b-value at or below which a measurement counts as baseline.
pub const DEFAULT_B0_THRESHOLD: f64 = 50.0;

/// Diffusion-sensitizing directions and their b-values, partitioned into
/// baseline (b ≈ 0) and weighted measurements.
///
/// Invariants (checked by [`GradientTable::new`]):
/// - `bvals.len() == bvecs.len()`
/// - at least one baseline and one weighted measurement
/// - weighted directions have non-zero length (they are re-normalized)
#[derive(Debug, Clone, PartialEq)]
pub struct GradientTable {
    bvals: Vec<f64>,
    bvecs: Vec<Vector3<f64>>,
    b0_mask: Vec<bool>,
    b0_threshold: f64,
}

impl GradientTable {
    pub fn new(bvals: Vec<f64>, bvecs: Vec<Vector3<f64>>, b0_threshold: f64) -> Result<Self, FitError> {
        if bvals.len() != bvecs.len() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!(
                    "Gradient table has {} b-values but {} b-vectors.",
                    bvals.len(),
                    bvecs.len()
                ),
            ));
        }
        if !(b0_threshold.is_finite() && b0_threshold >= 0.0) {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Invalid b0 threshold: {b0_threshold}."),
            ));
        }
        if let Some(i) = bvals.iter().position(|b| !b.is_finite() || *b < 0.0) {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Invalid b-value at index {i}: {}.", bvals[i]),
            ));
        }

        let b0_mask: Vec<bool> = bvals.iter().map(|&b| b <= b0_threshold).collect();
        let n_b0 = b0_mask.iter().filter(|&&m| m).count();
        if n_b0 == 0 {
            return Err(FitError::new(
                ErrorKind::InputShape,
                "Gradient table has no baseline (b0) measurements.",
            ));
        }
        if n_b0 == b0_mask.len() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                "Gradient table has no diffusion-weighted measurements.",
            ));
        }

        let mut unit = Vec::with_capacity(bvecs.len());
        for (i, (v, &is_b0)) in bvecs.iter().zip(&b0_mask).enumerate() {
            if is_b0 {
                unit.push(*v);
                continue;
            }
            let norm = v.norm();
            if !(norm.is_finite() && norm > 1e-8) {
                return Err(FitError::new(
                    ErrorKind::InputShape,
                    format!("Weighted measurement {i} has a zero-length or non-finite b-vector."),
                ));
            }
            unit.push(v / norm);
        }

        Ok(Self {
            bvals,
            bvecs: unit,
            b0_mask,
            b0_threshold,
        })
    }

    pub fn bvals(&self) -> &[f64] {
        &self.bvals
    }

    pub fn bvecs(&self) -> &[Vector3<f64>] {
        &self.bvecs
    }

    pub fn b0_mask(&self) -> &[bool] {
        &self.b0_mask
    }

    pub fn b0_threshold(&self) -> f64 {
        self.b0_threshold
    }

    /// Total number of measurements (baseline + weighted).
    pub fn n_directions(&self) -> usize {
        self.bvals.len()
    }

    pub fn n_weighted(&self) -> usize {
        self.b0_mask.iter().filter(|&&m| !m).count()
    }

    pub fn baseline_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.b0_mask.iter().enumerate().filter(|(_, m)| **m).map(|(i, _)| i)
    }

    pub fn weighted_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.b0_mask.iter().enumerate().filter(|(_, m)| !**m).map(|(i, _)| i)
    }

    /// `(b, unit direction)` for every weighted measurement, in table order.
    pub fn weighted(&self) -> impl Iterator<Item = (f64, &Vector3<f64>)> + '_ {
        self.weighted_indices().map(|i| (self.bvals[i], &self.bvecs[i]))
    }
}

/// A 4-D diffusion volume: a 3-D grid with one sample per measurement.
///
/// Samples are direction-contiguous per voxel:
/// `((z * ny + y) * nx + x) * n_directions + d`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffusionVolume {
    dims: [usize; 3],
    n_directions: usize,
    data: Vec<f64>,
}

impl DiffusionVolume {
    pub fn new(dims: [usize; 3], n_directions: usize, data: Vec<f64>) -> Result<Self, FitError> {
        let expected = dims.iter().product::<usize>() * n_directions;
        if data.len() != expected {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!(
                    "Volume data has {} samples; dims {:?} x {} directions needs {expected}.",
                    data.len(),
                    dims,
                    n_directions
                ),
            ));
        }
        Ok(Self {
            dims,
            n_directions,
            data,
        })
    }

    pub fn zeros(dims: [usize; 3], n_directions: usize) -> Self {
        Self {
            dims,
            n_directions,
            data: vec![0.0; dims.iter().product::<usize>() * n_directions],
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn n_directions(&self) -> usize {
        self.n_directions
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Offset of the first sample of `voxel`, or `None` outside the grid.
    fn offset(&self, voxel: &Voxel) -> Option<usize> {
        let [nx, ny, nz] = self.dims;
        let [x, y, z] = *voxel;
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= nx || y >= ny || z >= nz {
            return None;
        }
        Some(((z * ny + y) * nx + x) * self.n_directions)
    }

    pub fn contains(&self, voxel: &Voxel) -> bool {
        self.offset(voxel).is_some()
    }

    pub fn voxel(&self, voxel: &Voxel) -> Option<&[f64]> {
        let start = self.offset(voxel)?;
        Some(&self.data[start..start + self.n_directions])
    }

    pub fn voxel_mut(&mut self, voxel: &Voxel) -> Option<&mut [f64]> {
        let start = self.offset(voxel)?;
        Some(&mut self.data[start..start + self.n_directions])
    }
}

/// How local tangents are turned into response signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SphereChoice {
    /// Compute the signal for every distinct tangent (no snapping).
    Exact,
    /// Snap tangents to the 362-vertex icosahedral sphere.
    Symmetric362,
    /// Snap tangents to the 642-vertex icosahedral sphere (finer, slower).
    Symmetric642,
}

/// Which assembly path a fit used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FitStrategy {
    /// Materialize the whole sparse design matrix.
    InMemory,
    /// Re-derive row blocks per voxel chunk on every solver iteration.
    OutOfCore,
}

/// Projected gradient descent settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Evaluate the residual error every `check_interval` iterations.
    pub check_interval: usize,
    /// Stop after this many consecutive checkpoints without improvement.
    pub max_bad_checks: usize,
    /// Fixed step length.
    pub step_size: f64,
    /// Scale the gradient to unit length before stepping.
    ///
    /// Off by default: the step multiplies the raw gradient and must stay below
    /// `2 / ||A||²`. With normalization the step is a fixed distance in weight
    /// space whatever the scale of the design matrix.
    pub normalize_gradient: bool,
    /// Hard iteration ceiling.
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            check_interval: 10,
            max_bad_checks: 10,
            step_size: 0.01,
            normalize_gradient: false,
            max_iterations: 100_000,
        }
    }
}

/// Out-of-core partitioning settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutOfCoreConfig {
    /// Maximum `n_voxels * n_streamlines` an in-memory fit may materialize.
    pub materialization_budget: u64,
    /// Voxels per chunk.
    pub chunk_voxels: usize,
    /// When set, chunk incidence is written here once and read back on
    /// every iteration instead of being re-derived from the streamlines.
    pub spill_dir: Option<PathBuf>,
}

impl Default for OutOfCoreConfig {
    fn default() -> Self {
        Self {
            materialization_budget: 500_000_000,
            chunk_voxels: 1000,
            spill_dir: None,
        }
    }
}

/// A full fit configuration.
///
/// This is derived from CLI flags (plus defaults) or loaded from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    /// Eigenvalues of the canonical single-fiber response tensor
    /// (axial first, then the two radial diffusivities).
    pub evals: [f64; 3],
    pub sphere: SphereChoice,
    pub solver: SolverConfig,
    pub out_of_core: OutOfCoreConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            evals: [0.001, 0.0, 0.0],
            sphere: SphereChoice::Symmetric362,
            solver: SolverConfig::default(),
            out_of_core: OutOfCoreConfig::default(),
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<(), FitError> {
        if self.evals.iter().any(|e| !e.is_finite() || *e < 0.0) {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Response eigenvalues must be finite and >= 0, got {:?}.", self.evals),
            ));
        }
        let s = &self.solver;
        if s.check_interval == 0 || s.max_bad_checks == 0 || s.max_iterations == 0 {
            return Err(FitError::new(
                ErrorKind::InputShape,
                "Solver check interval, max bad checks and max iterations must be > 0.",
            ));
        }
        if !(s.step_size.is_finite() && s.step_size > 0.0) {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Solver step size must be finite and > 0, got {}.", s.step_size),
            ));
        }
        if self.out_of_core.chunk_voxels == 0 {
            return Err(FitError::new(ErrorKind::InputShape, "Out-of-core chunk size must be > 0."));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> GradientTable {
        GradientTable::new(
            vec![0.0, 1000.0, 1000.0, 5.0],
            vec![
                Vector3::zeros(),
                Vector3::new(2.0, 0.0, 0.0),
                Vector3::new(0.0, 1.0, 0.0),
                Vector3::zeros(),
            ],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap()
    }

    #[test]
    fn gradient_table_partitions_and_normalizes() {
        let g = table();
        assert_eq!(g.n_directions(), 4);
        assert_eq!(g.n_weighted(), 2);
        assert_eq!(g.baseline_indices().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(g.weighted_indices().collect::<Vec<_>>(), vec![1, 2]);
        let (b, v) = g.weighted().next().unwrap();
        assert_eq!(b, 1000.0);
        assert!((v.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn gradient_table_without_baseline_is_rejected() {
        let err = GradientTable::new(
            vec![1000.0, 1000.0],
            vec![Vector3::x(), Vector3::y()],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
    }

    #[test]
    fn gradient_table_rejects_zero_weighted_vector() {
        let err = GradientTable::new(
            vec![0.0, 1000.0],
            vec![Vector3::zeros(), Vector3::zeros()],
            DEFAULT_B0_THRESHOLD,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
    }

    #[test]
    fn volume_indexing_is_direction_contiguous() {
        let dims = [2, 3, 4];
        let n = dims.iter().product::<usize>() * 2;
        let vol = DiffusionVolume::new(dims, 2, (0..n).map(|i| i as f64).collect()).unwrap();
        // (x=1, y=2, z=3) -> ((3*3 + 2)*2 + 1) * 2 = 46
        assert_eq!(vol.voxel(&[1, 2, 3]).unwrap(), &[46.0, 47.0]);
        assert!(vol.voxel(&[2, 0, 0]).is_none());
        assert!(vol.voxel(&[-1, 0, 0]).is_none());
    }

    #[test]
    fn volume_length_mismatch_is_rejected() {
        let err = DiffusionVolume::new([2, 2, 2], 3, vec![0.0; 5]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
    }

    #[test]
    fn default_config_is_valid_and_round_trips_json() {
        let config = FitConfig::default();
        config.validate().unwrap();
        let text = serde_json::to_string(&config).unwrap();
        let back: FitConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back, config);
        let partial: FitConfig = serde_json::from_str(r#"{"solver": {"step_size": 0.001}}"#).unwrap();
        assert_eq!(partial.solver.step_size, 0.001);
        assert_eq!(partial.solver.check_interval, 10);
    }

    #[test]
    fn invalid_solver_config_is_rejected() {
        let mut config = FitConfig::default();
        config.solver.step_size = 0.0;
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InputShape);
    }
}
