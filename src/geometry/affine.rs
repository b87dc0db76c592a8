//! Homogeneous 4×4 affine transforms between coordinate frames.

use nalgebra::{Matrix4, Point3};

use crate::domain::Streamline;
use crate::error::{ErrorKind, FitError};

/// An affine map in homogeneous coordinates.
///
/// The fit affine maps streamline coordinates into voxel-index space. Callers
/// holding the usual voxel-to-world affine of an image pass its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine(Matrix4<f64>);

impl Affine {
    pub fn identity() -> Self {
        Self(Matrix4::identity())
    }

    /// Build from row-major rows. The last row must be `[0, 0, 0, 1]`.
    pub fn from_rows(rows: [[f64; 4]; 4]) -> Result<Self, FitError> {
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(FitError::new(ErrorKind::InputShape, "Affine contains non-finite entries."));
        }
        let last = rows[3];
        if last != [0.0, 0.0, 0.0, 1.0] {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("Affine last row must be [0, 0, 0, 1], got {last:?}."),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Ok(Self(Matrix4::from_row_slice(&flat)))
    }

    pub fn to_rows(&self) -> [[f64; 4]; 4] {
        let mut out = [[0.0; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, v) in row.iter_mut().enumerate() {
                *v = self.0[(r, c)];
            }
        }
        out
    }

    pub fn matrix(&self) -> &Matrix4<f64> {
        &self.0
    }

    pub fn try_inverse(&self) -> Result<Self, FitError> {
        self.0
            .try_inverse()
            .map(Self)
            .ok_or_else(|| FitError::new(ErrorKind::InputShape, "Affine is singular."))
    }

    pub fn apply(&self, p: &Point3<f64>) -> Point3<f64> {
        let h = self.0 * p.to_homogeneous();
        Point3::new(h.x, h.y, h.z)
    }

    pub fn transform_streamline(&self, streamline: &Streamline) -> Streamline {
        Streamline::new(streamline.points().iter().map(|p| self.apply(p)).collect())
    }

    pub fn transform_streamlines(&self, streamlines: &[Streamline]) -> Vec<Streamline> {
        if self.0 == Matrix4::identity() {
            return streamlines.to_vec();
        }
        streamlines.iter().map(|s| self.transform_streamline(s)).collect()
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}
