//! Chunked least-squares problem that never materializes the full matrix.
//!
//! The row space is cut into voxel chunks (`VoxelBatches`). Every
//! `residual_gradient` call rebuilds each chunk's rows from the streamlines,
//! or from a spill written once up front, computes the chunk residual and a
//! sparse partial gradient, and reduces the partials in chunk order. Only one
//! chunk matrix per worker is alive at any time.

use std::path::Path;

use nalgebra::Vector3;
use rayon::prelude::*;
use sprs::CsMat;

use crate::domain::Voxel;
use crate::error::{ErrorKind, FitError};
use crate::index::{IncidenceSpill, VoxelBatch, VoxelBatches};
use crate::matrix::{mul_vec, transpose_csr, DesignMatrixBuilder};
use crate::signal::TensorSignalCache;
use crate::solve::LeastSquaresProblem;

/// The design matrix as a sequence of voxel chunks, assembled on demand.
pub struct ChunkedOperator<'a> {
    batches: VoxelBatches<'a>,
    spill: Option<IncidenceSpill>,
    cache: &'a TensorSignalCache,
    tangents: &'a [Vec<Vector3<f64>>],
}

impl<'a> ChunkedOperator<'a> {
    pub fn new(
        batches: VoxelBatches<'a>,
        cache: &'a TensorSignalCache,
        tangents: &'a [Vec<Vector3<f64>>],
    ) -> Result<Self, FitError> {
        if tangents.len() != batches.streamlines().len() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!(
                    "{} tangent lists for {} streamlines.",
                    tangents.len(),
                    batches.streamlines().len()
                ),
            ));
        }
        Ok(Self {
            batches,
            spill: None,
            cache,
            tangents,
        })
    }

    /// Write every chunk's incidence to `dir` and read it from there from now on.
    pub fn with_spill(mut self, dir: &Path) -> Result<Self, FitError> {
        self.spill = Some(IncidenceSpill::write(&self.batches, dir)?);
        Ok(self)
    }

    pub fn n_chunks(&self) -> usize {
        self.batches.n_batches()
    }

    pub fn n_rows(&self) -> usize {
        self.batches.voxels().len() * self.cache.n_weighted()
    }

    pub fn n_cols(&self) -> usize {
        self.batches.streamlines().len()
    }

    pub fn voxels(&self) -> &[Voxel] {
        self.batches.voxels()
    }

    fn load(&self, i: usize) -> Result<VoxelBatch, FitError> {
        match &self.spill {
            Some(spill) => spill.load(i),
            None => Ok(self.batches.batch(i)),
        }
    }

    /// Rows of chunk `i` (local numbering) and the global row offset.
    pub fn chunk_matrix(&self, i: usize) -> Result<(usize, CsMat<f64>), FitError> {
        let batch = self.load(i)?;
        let a = DesignMatrixBuilder::new(self.cache, self.tangents)
            .assemble(&batch.incidence, self.n_cols())?;
        Ok((batch.offset * self.cache.n_weighted(), a))
    }

    /// `A w` over all chunks, in global row order.
    pub fn forward(&self, w: &[f64]) -> Result<Vec<f64>, FitError> {
        let parts: Vec<Vec<f64>> = (0..self.n_chunks())
            .into_par_iter()
            .map(|i| self.chunk_matrix(i).map(|(_, a)| mul_vec(&a, w)))
            .collect::<Result<_, _>>()?;
        Ok(parts.concat())
    }

    /// Total stored entries over all chunks.
    pub fn nnz(&self) -> Result<usize, FitError> {
        let counts: Vec<usize> = (0..self.n_chunks())
            .into_par_iter()
            .map(|i| self.chunk_matrix(i).map(|(_, a)| a.nnz()))
            .collect::<Result<_, _>>()?;
        Ok(counts.iter().sum())
    }
}

/// `||A w - y||^2` over a [`ChunkedOperator`].
pub struct ChunkedProblem<'a> {
    op: ChunkedOperator<'a>,
    y: &'a [f64],
}

impl<'a> ChunkedProblem<'a> {
    /// `y` is the demeaned signal in the operator's global voxel order.
    pub fn new(op: ChunkedOperator<'a>, y: &'a [f64]) -> Result<Self, FitError> {
        if y.len() != op.n_rows() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Chunked problem has {} rows but the signal has {} entries.", op.n_rows(), y.len()),
            ));
        }
        Ok(Self { op, y })
    }

    pub fn operator(&self) -> &ChunkedOperator<'a> {
        &self.op
    }
}

impl LeastSquaresProblem for ChunkedProblem<'_> {
    fn n_rows(&self) -> usize {
        self.y.len()
    }

    fn n_cols(&self) -> usize {
        self.op.n_cols()
    }

    fn residual_gradient(&self, w: &[f64], grad: &mut [f64]) -> Result<f64, FitError> {
        let partials: Vec<(f64, Vec<(usize, f64)>)> = (0..self.op.n_chunks())
            .into_par_iter()
            .map(|i| {
                let (row0, a) = self.op.chunk_matrix(i)?;
                let mut r = mul_vec(&a, w);
                for (ri, yi) in r.iter_mut().zip(&self.y[row0..row0 + a.rows()]) {
                    *ri -= yi;
                }
                let sse: f64 = r.iter().map(|v| v * v).sum();

                let at = transpose_csr(&a);
                let g: Vec<(usize, f64)> = at
                    .outer_iterator()
                    .enumerate()
                    .filter(|(_, col)| col.nnz() > 0)
                    .map(|(j, col)| (j, col.iter().map(|(k, v)| v * r[k]).sum::<f64>()))
                    .collect();
                Ok::<_, FitError>((sse, g))
            })
            .collect::<Result<_, _>>()?;

        grad.iter_mut().for_each(|g| *g = 0.0);
        let mut sse = 0.0;
        for (chunk_sse, g) in partials {
            sse += chunk_sse;
            for (j, v) in g {
                grad[j] += v;
            }
        }
        Ok(sse)
    }
}
