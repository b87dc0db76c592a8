//! Streaming voxel batches.
//!
//! The out-of-core fit never holds the incidence of the whole bundle. Instead
//! the sorted voxel set is cut into fixed-size contiguous batches, and each
//! batch's incidence is derived on demand from the streamlines. Batch `i`
//! always covers the same voxels, so results are reproducible regardless of
//! how many times (or on which thread) a batch is rebuilt.

use crate::domain::{Streamline, Voxel};
use crate::error::{ErrorKind, FitError};
use crate::index::{unique_voxels, validate_streamlines, Incidence};

/// One contiguous slice of the global voxel list with its incidence.
#[derive(Debug, Clone)]
pub struct VoxelBatch {
    /// Index of the batch's first voxel in the global voxel list.
    pub offset: usize,
    pub incidence: Incidence,
}

#[derive(Debug)]
pub struct VoxelBatches<'a> {
    streamlines: &'a [Streamline],
    voxels: Vec<Voxel>,
    batch_size: usize,
}

impl<'a> VoxelBatches<'a> {
    pub fn new(streamlines: &'a [Streamline], batch_size: usize) -> Result<Self, FitError> {
        if batch_size == 0 {
            return Err(FitError::new(ErrorKind::InputShape, "Voxel batch size must be positive."));
        }
        validate_streamlines(streamlines)?;
        Ok(Self {
            streamlines,
            voxels: unique_voxels(streamlines),
            batch_size,
        })
    }

    /// Global, sorted voxel list.
    pub fn voxels(&self) -> &[Voxel] {
        &self.voxels
    }

    pub fn streamlines(&self) -> &'a [Streamline] {
        self.streamlines
    }

    pub fn n_batches(&self) -> usize {
        self.voxels.len().div_ceil(self.batch_size)
    }

    /// Range of global voxel indices covered by batch `i`.
    pub fn range(&self, i: usize) -> std::ops::Range<usize> {
        let start = (i * self.batch_size).min(self.voxels.len());
        let end = (start + self.batch_size).min(self.voxels.len());
        start..end
    }

    pub fn batch(&self, i: usize) -> VoxelBatch {
        let range = self.range(i);
        let offset = range.start;
        let voxels = self.voxels[range].to_vec();
        VoxelBatch {
            offset,
            incidence: Incidence::for_voxels(self.streamlines, voxels),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = VoxelBatch> + '_ {
        (0..self.n_batches()).map(move |i| self.batch(i))
    }
}
