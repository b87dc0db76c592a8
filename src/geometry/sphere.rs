//! Discretization spheres for snapping tangent directions.
//!
//! The built-in spheres are geodesic icosahedra: every icosahedron face is
//! split into `f²` triangles and the new vertices are pushed out to the unit
//! sphere, giving `10 f² + 2` vertices (`f = 6` → 362, `f = 8` → 642).

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::error::{ErrorKind, FitError};

/// Grid used to merge vertices shared between neighbouring faces.
const MERGE_SCALE: f64 = 1e9;

#[derive(Debug, Clone, PartialEq)]
pub struct Sphere {
    vertices: Vec<Vector3<f64>>,
}

impl Sphere {
    /// Use an externally supplied vertex set (normalized to unit length).
    pub fn from_vertices(vertices: Vec<Vector3<f64>>) -> Result<Self, FitError> {
        if vertices.is_empty() {
            return Err(FitError::new(ErrorKind::InputShape, "Sphere has no vertices."));
        }
        let mut unit = Vec::with_capacity(vertices.len());
        for (i, v) in vertices.iter().enumerate() {
            let n = v.norm();
            if !(n.is_finite() && n > 0.0) {
                return Err(FitError::new(
                    ErrorKind::InputShape,
                    format!("Sphere vertex {i} has zero or non-finite length."),
                ));
            }
            unit.push(v / n);
        }
        Ok(Self { vertices: unit })
    }

    pub fn symmetric362() -> Self {
        Self::icosahedral(6)
    }

    pub fn symmetric642() -> Self {
        Self::icosahedral(8)
    }

    /// Geodesic icosahedron with `frequency` subdivisions per edge.
    pub fn icosahedral(frequency: usize) -> Self {
        let f = frequency.max(1);
        let (base, faces) = icosahedron();

        let mut vertices = Vec::with_capacity(10 * f * f + 2);
        let mut seen: HashMap<[i64; 3], usize> = HashMap::new();

        for [a, b, c] in faces {
            let (va, vb, vc) = (base[a], base[b], base[c]);
            for i in 0..=f {
                for j in 0..=(f - i) {
                    let k = f - i - j;
                    // Integer weights keep shared edge points bit-identical across faces.
                    let p = (va * k as f64 + vb * i as f64 + vc * j as f64).normalize();
                    let key = [
                        (p.x * MERGE_SCALE).round() as i64,
                        (p.y * MERGE_SCALE).round() as i64,
                        (p.z * MERGE_SCALE).round() as i64,
                    ];
                    seen.entry(key).or_insert_with(|| {
                        vertices.push(p);
                        vertices.len() - 1
                    });
                }
            }
        }

        Self { vertices }
    }

    pub fn vertices(&self) -> &[Vector3<f64>] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Index of the vertex nearest to `direction` (Euclidean distance after
    /// normalizing `direction`; ties resolve to the lowest index).
    pub fn find_closest(&self, direction: &Vector3<f64>) -> usize {
        let norm = direction.norm();
        let d = if norm > 0.0 { direction / norm } else { Vector3::x() };
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (i, v) in self.vertices.iter().enumerate() {
            let dist = (v - d).norm_squared();
            if dist < best_dist {
                best_dist = dist;
                best = i;
            }
        }
        best
    }
}

fn icosahedron() -> (Vec<Vector3<f64>>, Vec<[usize; 3]>) {
    let phi = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let raw = [
        [-1.0, phi, 0.0],
        [1.0, phi, 0.0],
        [-1.0, -phi, 0.0],
        [1.0, -phi, 0.0],
        [0.0, -1.0, phi],
        [0.0, 1.0, phi],
        [0.0, -1.0, -phi],
        [0.0, 1.0, -phi],
        [phi, 0.0, -1.0],
        [phi, 0.0, 1.0],
        [-phi, 0.0, -1.0],
        [-phi, 0.0, 1.0],
    ];
    let vertices = raw
        .iter()
        .map(|v| Vector3::new(v[0], v[1], v[2]).normalize())
        .collect();
    let faces = vec![
        [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
        [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
        [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
        [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
    ];
    (vertices, faces)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geodesic_vertex_counts() {
        assert_eq!(Sphere::icosahedral(1).len(), 12);
        assert_eq!(Sphere::icosahedral(2).len(), 42);
        assert_eq!(Sphere::symmetric362().len(), 362);
        assert_eq!(Sphere::symmetric642().len(), 642);
    }

    #[test]
    fn vertices_are_unit_and_symmetric() {
        let s = Sphere::symmetric362();
        for v in s.vertices() {
            assert!((v.norm() - 1.0).abs() < 1e-12);
            let antipode = s.find_closest(&-v);
            assert!((s.vertices()[antipode] + v).norm() < 1e-9);
        }
    }

    #[test]
    fn find_closest_returns_the_vertex_itself() {
        let s = Sphere::icosahedral(3);
        for (i, v) in s.vertices().iter().enumerate() {
            assert_eq!(s.find_closest(&(v * 3.5)), i);
        }
    }

    #[test]
    fn from_vertices_rejects_zero_vectors() {
        let err = Sphere::from_vertices(vec![Vector3::x(), Vector3::zeros()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
    }
}
