//! On-disk batch incidence.
//!
//! Rebuilding each batch's incidence every solver iteration costs a pass over
//! all streamlines per batch. When a spill directory is configured the
//! batches are written once as JSON and read back instead.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, FitError};
use crate::index::{Incidence, VoxelBatch, VoxelBatches};

#[derive(Debug, Clone)]
pub struct IncidenceSpill {
    dir: PathBuf,
    offsets: Vec<usize>,
}

impl IncidenceSpill {
    /// Write every batch of `batches` into `dir` (created if missing).
    pub fn write(batches: &VoxelBatches<'_>, dir: &Path) -> Result<Self, FitError> {
        fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        let mut offsets = Vec::with_capacity(batches.n_batches());
        for batch in batches.iter() {
            let path = batch_path(dir, offsets.len());
            let file = fs::File::create(&path).map_err(|e| io_error(&path, e))?;
            let mut out = BufWriter::new(file);
            serde_json::to_writer(&mut out, &batch.incidence).map_err(|e| {
                FitError::new(ErrorKind::Io, format!("Could not write {}: {e}", path.display()))
            })?;
            out.flush().map_err(|e| io_error(&path, e))?;
            offsets.push(batch.offset);
        }
        tracing::debug!(dir = %dir.display(), n_batches = offsets.len(), "incidence spilled");
        Ok(Self {
            dir: dir.to_path_buf(),
            offsets,
        })
    }

    pub fn load(&self, i: usize) -> Result<VoxelBatch, FitError> {
        let Some(&offset) = self.offsets.get(i) else {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Batch {i} is out of range ({} spilled).", self.offsets.len()),
            ));
        };
        let path = batch_path(&self.dir, i);
        let file = fs::File::open(&path).map_err(|e| io_error(&path, e))?;
        let incidence: Incidence = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            FitError::new(ErrorKind::Io, format!("Could not parse {}: {e}", path.display()))
        })?;
        Ok(VoxelBatch { offset, incidence })
    }
}

fn batch_path(dir: &Path, i: usize) -> PathBuf {
    dir.join(format!("incidence_{i:06}.json"))
}

fn io_error(path: &Path, e: std::io::Error) -> FitError {
    FitError::new(ErrorKind::Io, format!("{}: {e}", path.display()))
}
