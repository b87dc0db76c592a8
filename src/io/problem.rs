//! JSON problem files.
//!
//! A problem bundles everything a fit needs: gradient table, voxel-to-world
//! affine, streamlines in world coordinates and the observed volume. The
//! on-disk schema (`ProblemFile`) is plain arrays so it can be produced by
//! other tools; `Problem` is the validated in-memory form.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::domain::{DiffusionVolume, FitConfig, GradientTable, Streamline, DEFAULT_B0_THRESHOLD};
use crate::error::{ErrorKind, FitError};
use crate::geometry::Affine;

#[derive(Debug, Clone, PartialEq)]
pub struct Problem {
    pub gtab: GradientTable,
    /// Voxel index -> world coordinates. Fits use its inverse.
    pub affine: Affine,
    /// World coordinates.
    pub streamlines: Vec<Streamline>,
    pub volume: DiffusionVolume,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientFile {
    pub bvals: Vec<f64>,
    pub bvecs: Vec<[f64; 3]>,
    #[serde(default = "default_b0_threshold")]
    pub b0_threshold: f64,
}

fn default_b0_threshold() -> f64 {
    DEFAULT_B0_THRESHOLD
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeFile {
    pub dims: [usize; 3],
    pub n_directions: usize,
    /// `((z * ny + y) * nx + x) * n_directions + d` order.
    pub data: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemFile {
    pub gradients: GradientFile,
    pub affine: [[f64; 4]; 4],
    pub streamlines: Vec<Vec<[f64; 3]>>,
    pub volume: VolumeFile,
}

impl Problem {
    pub fn from_file(file: ProblemFile) -> Result<Self, FitError> {
        let bvecs = file
            .gradients
            .bvecs
            .iter()
            .map(|v| Vector3::new(v[0], v[1], v[2]))
            .collect();
        let gtab = GradientTable::new(file.gradients.bvals, bvecs, file.gradients.b0_threshold)?;
        let affine = Affine::from_rows(file.affine)?;
        let streamlines = file.streamlines.iter().map(|s| Streamline::from_coords(s)).collect();
        let volume = DiffusionVolume::new(file.volume.dims, file.volume.n_directions, file.volume.data)?;
        Ok(Self {
            gtab,
            affine,
            streamlines,
            volume,
        })
    }

    pub fn to_file(&self) -> ProblemFile {
        ProblemFile {
            gradients: GradientFile {
                bvals: self.gtab.bvals().to_vec(),
                bvecs: self.gtab.bvecs().iter().map(|v| [v.x, v.y, v.z]).collect(),
                b0_threshold: self.gtab.b0_threshold(),
            },
            affine: self.affine.to_rows(),
            streamlines: self.streamlines.iter().map(Streamline::to_coords).collect(),
            volume: VolumeFile {
                dims: self.volume.dims(),
                n_directions: self.volume.n_directions(),
                data: self.volume.data().to_vec(),
            },
        }
    }
}

pub fn read_problem_json(path: &Path) -> Result<Problem, FitError> {
    let file = File::open(path).map_err(|e| {
        FitError::new(ErrorKind::Io, format!("Failed to open problem JSON '{}': {e}", path.display()))
    })?;
    let raw: ProblemFile = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Invalid problem JSON '{}': {e}", path.display())))?;
    Problem::from_file(raw)
}

pub fn write_problem_json(path: &Path, problem: &Problem) -> Result<(), FitError> {
    let file = File::create(path).map_err(|e| {
        FitError::new(ErrorKind::Io, format!("Failed to create problem JSON '{}': {e}", path.display()))
    })?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, &problem.to_file())
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to write problem JSON: {e}")))?;
    out.flush()
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Failed to flush problem JSON: {e}")))
}

/// Load a `FitConfig`; missing fields take their defaults.
pub fn read_config_json(path: &Path) -> Result<FitConfig, FitError> {
    let file = File::open(path).map_err(|e| {
        FitError::new(ErrorKind::Io, format!("Failed to open config JSON '{}': {e}", path.display()))
    })?;
    let config: FitConfig = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FitError::new(ErrorKind::Io, format!("Invalid config JSON '{}': {e}", path.display())))?;
    config.validate()?;
    Ok(config)
}
