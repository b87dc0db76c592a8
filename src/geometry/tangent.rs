//! Local tangents along a streamline.
//!
//! Tangents are central differences in the interior and one-sided differences
//! at the two endpoints:
//!
//! - `t[0]     = p[1] - p[0]`
//! - `t[i]     = (p[i+1] - p[i-1]) / 2`
//! - `t[n-1]   = p[n-1] - p[n-2]`
//!
//! Repeated nodes produce zero-length tangents. Those cannot orient a tensor,
//! so they are replaced with the nearest non-zero tangent along the streamline
//! (ties prefer the earlier node). A streamline whose nodes all coincide has no
//! usable direction at all and falls back to the canonical x axis.

use nalgebra::{Point3, Vector3};
use tracing::debug;

/// Tangents shorter than this are treated as degenerate.
const MIN_TANGENT_NORM: f64 = 1e-12;

/// Raw finite-difference tangents, one per node.
///
/// Requires at least two points; callers validate streamlines first.
pub fn streamline_gradients(points: &[Point3<f64>]) -> Vec<Vector3<f64>> {
    let n = points.len();
    if n < 2 {
        return vec![Vector3::zeros(); n];
    }
    let mut out = Vec::with_capacity(n);
    out.push(points[1] - points[0]);
    for i in 1..n - 1 {
        out.push((points[i + 1] - points[i - 1]) / 2.0);
    }
    out.push(points[n - 1] - points[n - 2]);
    out
}

/// Tangents with degenerate entries repaired.
pub fn streamline_tangents(points: &[Point3<f64>]) -> Vec<Vector3<f64>> {
    let mut tangents = streamline_gradients(points);
    repair_degenerate(&mut tangents);
    tangents
}

fn repair_degenerate(tangents: &mut [Vector3<f64>]) {
    let valid: Vec<usize> = tangents
        .iter()
        .enumerate()
        .filter(|(_, t)| t.norm() > MIN_TANGENT_NORM)
        .map(|(i, _)| i)
        .collect();

    if valid.len() == tangents.len() {
        return;
    }
    if valid.is_empty() {
        debug!(nodes = tangents.len(), "streamline has no usable tangent; using the x axis");
        tangents.iter_mut().for_each(|t| *t = Vector3::x());
        return;
    }

    debug!(
        degenerate = tangents.len() - valid.len(),
        "substituting neighbouring tangents for zero-length segments"
    );
    for i in 0..tangents.len() {
        if tangents[i].norm() > MIN_TANGENT_NORM {
            continue;
        }
        // `valid` is sorted; the nearest valid index is at the partition point or just before it.
        let pos = valid.partition_point(|&v| v < i);
        let after = valid.get(pos).copied();
        let before = pos.checked_sub(1).map(|p| valid[p]);
        let source = match (before, after) {
            (Some(b), Some(a)) if a - i < i - b => a,
            (Some(b), _) => b,
            (None, Some(a)) => a,
            (None, None) => continue,
        };
        tangents[i] = tangents[source];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(coords: &[[f64; 3]]) -> Vec<Point3<f64>> {
        coords.iter().map(|c| Point3::new(c[0], c[1], c[2])).collect()
    }

    #[test]
    fn gradients_use_central_and_one_sided_differences() {
        let p = pts(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [5.0, 6.0, 7.0], [8.0, 9.0, 10.0]]);
        let g = streamline_gradients(&p);
        let expected = [[3.0, 3.0, 3.0], [2.0, 2.0, 2.0], [2.0, 2.0, 2.0], [3.0, 3.0, 3.0]];
        for (got, want) in g.iter().zip(expected.iter()) {
            assert_eq!([got.x, got.y, got.z], *want);
        }
    }

    #[test]
    fn repeated_endpoint_takes_neighbouring_tangent() {
        // Last two nodes coincide: endpoint tangent is zero, the interior one is not.
        let p = pts(&[[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [2.0, 0.0, 0.0], [2.0, 0.0, 0.0]]);
        let raw = streamline_gradients(&p);
        assert_eq!(raw[3].norm(), 0.0);
        let t = streamline_tangents(&p);
        assert_eq!(t[3], raw[2]);
        assert!(t.iter().all(|v| v.norm() > 0.0));
    }

    #[test]
    fn fully_collapsed_streamline_falls_back_to_x_axis() {
        let p = pts(&[[1.0, 1.0, 1.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]);
        let t = streamline_tangents(&p);
        assert!(t.iter().all(|v| *v == Vector3::x()));
    }
}
