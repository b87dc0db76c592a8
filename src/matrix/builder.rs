//! Sparse design-matrix assembly.
//!
//! Row `v * n_weighted + d` holds measurement direction `d` of voxel `v`;
//! column `s` is streamline `s`. The entry is the sum, over the nodes of `s`
//! inside `v`, of the demeaned response signal for that node's tangent.
//!
//! Voxels are processed in fixed-size chunks on the rayon pool; chunk
//! triplet lists are concatenated in chunk order, so the matrix (values and
//! storage order) does not depend on the thread count.

use nalgebra::Vector3;
use rayon::prelude::*;
use sprs::{CsMat, TriMat};

use crate::domain::Streamline;
use crate::error::{ErrorKind, FitError};
use crate::geometry::streamline_tangents;
use crate::index::Incidence;
use crate::signal::TensorSignalCache;

/// Voxels per parallel work unit.
pub const DEFAULT_VOXEL_CHUNK: usize = 256;

/// Unit tangents for every node of every streamline.
pub fn tangent_field(streamlines: &[Streamline]) -> Vec<Vec<Vector3<f64>>> {
    streamlines
        .par_iter()
        .map(|s| streamline_tangents(s.points()))
        .collect()
}

pub struct DesignMatrixBuilder<'a> {
    cache: &'a TensorSignalCache,
    tangents: &'a [Vec<Vector3<f64>>],
    voxel_chunk: usize,
}

impl<'a> DesignMatrixBuilder<'a> {
    pub fn new(cache: &'a TensorSignalCache, tangents: &'a [Vec<Vector3<f64>>]) -> Self {
        Self {
            cache,
            tangents,
            voxel_chunk: DEFAULT_VOXEL_CHUNK,
        }
    }

    pub fn with_voxel_chunk(mut self, voxel_chunk: usize) -> Self {
        self.voxel_chunk = voxel_chunk.max(1);
        self
    }

    /// Build the `(n_voxels * n_weighted) x n_streamlines` matrix for the
    /// voxels of `incidence`. Row numbering is local to `incidence`.
    pub fn assemble(&self, incidence: &Incidence, n_streamlines: usize) -> Result<CsMat<f64>, FitError> {
        let n_w = self.cache.n_weighted();
        let n_vox = incidence.n_voxels();
        let n_chunks = n_vox.div_ceil(self.voxel_chunk);

        let chunks: Vec<Vec<(usize, usize, f64)>> = (0..n_chunks)
            .into_par_iter()
            .map(|c| {
                let start = c * self.voxel_chunk;
                let end = (start + self.voxel_chunk).min(n_vox);
                self.chunk_triplets(incidence, start..end, n_streamlines)
            })
            .collect::<Result<_, _>>()?;

        let nnz = chunks.iter().map(Vec::len).sum();
        let mut tri = TriMat::with_capacity((n_vox * n_w, n_streamlines), nnz);
        for (row, col, val) in chunks.into_iter().flatten() {
            tri.add_triplet(row, col, val);
        }
        Ok(tri.to_csr())
    }

    fn chunk_triplets(
        &self,
        incidence: &Incidence,
        voxels: std::ops::Range<usize>,
        n_streamlines: usize,
    ) -> Result<Vec<(usize, usize, f64)>, FitError> {
        let n_w = self.cache.n_weighted();
        let mut out = Vec::new();
        let mut acc = vec![0.0; n_w];
        for v in voxels {
            for visit in incidence.visits(v) {
                let tangents = self
                    .tangents
                    .get(visit.streamline)
                    .filter(|_| visit.streamline < n_streamlines)
                    .ok_or_else(|| {
                        FitError::new(
                            ErrorKind::InputShape,
                            format!("Streamline {} has no tangents.", visit.streamline),
                        )
                    })?;

                acc.iter_mut().for_each(|a| *a = 0.0);
                for &node in &visit.nodes {
                    let signal = self.cache.signal(&tangents[node]);
                    for (a, s) in acc.iter_mut().zip(signal.iter()) {
                        *a += s;
                    }
                }
                for (d, &val) in acc.iter().enumerate() {
                    if val != 0.0 {
                        out.push((v * n_w + d, visit.streamline, val));
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::domain::{GradientTable, DEFAULT_B0_THRESHOLD};
    use crate::geometry::Sphere;
    use crate::signal::SignalMode;

    fn gtab() -> Arc<GradientTable> {
        let mut bvals = vec![0.0];
        let mut bvecs = vec![Vector3::zeros()];
        for v in Sphere::icosahedral(1).vertices().iter().filter(|v| v.z > 0.0) {
            bvals.push(1000.0);
            bvecs.push(*v);
        }
        Arc::new(GradientTable::new(bvals, bvecs, DEFAULT_B0_THRESHOLD).unwrap())
    }

    fn bundle() -> Vec<Streamline> {
        vec![
            Streamline::from_coords(&[[1.1, 2.4, 2.9], [4.0, 5.0, 3.0], [5.0, 6.0, 3.0], [6.0, 7.0, 3.0]]),
            Streamline::from_coords(&[[1.0, 2.0, 3.0], [4.0, 5.0, 3.0], [5.0, 6.0, 3.0]]),
        ]
    }

    #[test]
    fn shape_and_sparsity_follow_incidence() {
        let g = gtab();
        let n_w = g.n_weighted();
        for mode in [SignalMode::Exact, SignalMode::Discretized(Arc::new(Sphere::symmetric362()))] {
            let cache = TensorSignalCache::new(g.clone(), [0.001, 0.0, 0.0], mode);
            let streamlines = bundle();
            let tangents = tangent_field(&streamlines);
            let inc = Incidence::build(&streamlines).unwrap();
            let a = DesignMatrixBuilder::new(&cache, &tangents).assemble(&inc, 2).unwrap();
            assert_eq!(a.shape(), (4 * n_w, 2));
            // Voxel (6,7,3) is visited by streamline 0 only.
            for d in 0..n_w {
                assert_eq!(a.get(3 * n_w + d, 1), None);
            }
            assert!(a.nnz() <= inc.n_pairs() * n_w);
        }
    }

    #[test]
    fn nodes_sharing_a_voxel_are_summed() {
        let g = gtab();
        let cache = TensorSignalCache::new(g.clone(), [0.001, 0.0, 0.0], SignalMode::Exact);
        // Three collinear nodes in one voxel, then one in the next.
        let streamlines = vec![Streamline::from_coords(&[
            [0.0, 0.0, 0.0],
            [0.2, 0.0, 0.0],
            [0.4, 0.0, 0.0],
            [1.0, 0.0, 0.0],
        ])];
        let tangents = tangent_field(&streamlines);
        let inc = Incidence::build(&streamlines).unwrap();
        let a = DesignMatrixBuilder::new(&cache, &tangents).assemble(&inc, 1).unwrap();

        let single = cache.signal(&Vector3::x());
        for d in 0..g.n_weighted() {
            let first = a.get(d, 0).copied().unwrap_or(0.0);
            let second = a.get(g.n_weighted() + d, 0).copied().unwrap_or(0.0);
            assert!((first - 3.0 * single[d]).abs() < 1e-12);
            assert!((second - single[d]).abs() < 1e-12);
        }
    }

    #[test]
    fn chunking_does_not_change_the_matrix() {
        let g = gtab();
        let cache = TensorSignalCache::new(g, [0.0015, 0.0005, 0.0005], SignalMode::Exact);
        let streamlines = bundle();
        let tangents = tangent_field(&streamlines);
        let inc = Incidence::build(&streamlines).unwrap();
        let a = DesignMatrixBuilder::new(&cache, &tangents).with_voxel_chunk(1).assemble(&inc, 2).unwrap();
        let b = DesignMatrixBuilder::new(&cache, &tangents).assemble(&inc, 2).unwrap();
        assert_eq!(a, b);
    }
}
