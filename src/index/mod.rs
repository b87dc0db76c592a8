//! Spatial join between streamlines and the voxel grid.
//!
//! Streamlines are expected in voxel-index space already (the affine has been
//! applied). A node belongs to the voxel obtained by rounding each coordinate
//! to the nearest integer, ties away from zero (`f64::round`). The same rule is
//! used by every consumer of voxel coordinates in the crate.
//!
//! - `incidence`: eager voxel → streamline → node map for a whole bundle
//! - `batches`: streaming, fixed-size voxel batches for the out-of-core path
//! - `spill`: write batch incidence to disk once and read it back later

pub mod batches;
pub mod incidence;
pub mod spill;

pub use batches::*;
pub use incidence::*;
pub use spill::*;

use nalgebra::Point3;

use crate::domain::{Streamline, Voxel};
use crate::error::{ErrorKind, FitError};

/// Voxel containing `p`.
pub fn voxel_of(p: &Point3<f64>) -> Voxel {
    [p.x.round() as i64, p.y.round() as i64, p.z.round() as i64]
}

/// Reject bundles the design matrix cannot be built from.
pub fn validate_streamlines(streamlines: &[Streamline]) -> Result<(), FitError> {
    if streamlines.is_empty() {
        return Err(FitError::new(ErrorKind::InputShape, "No streamlines to index."));
    }
    for (i, s) in streamlines.iter().enumerate() {
        if s.len() < 2 {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Streamline {i} has {} node(s); at least 2 are required.", s.len()),
            ));
        }
        if s.points().iter().any(|p| !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite())) {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Streamline {i} has non-finite coordinates."),
            ));
        }
    }
    Ok(())
}

/// Sorted, deduplicated voxels visited by any node of any streamline.
pub fn unique_voxels(streamlines: &[Streamline]) -> Vec<Voxel> {
    let mut voxels: Vec<Voxel> = streamlines
        .iter()
        .flat_map(|s| s.points().iter().map(voxel_of))
        .collect();
    voxels.sort_unstable();
    voxels.dedup();
    voxels
}
