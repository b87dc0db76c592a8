//! Memoized per-direction response signals.
//!
//! Every node of every streamline needs the demeaned signal of a tensor
//! oriented along its tangent. Two modes:
//!
//! - `Exact`: the tangent itself (normalized) is the key. Identical
//!   directions are computed once, but the number of entries grows with the
//!   number of distinct tangents.
//! - `Discretized`: the tangent is snapped to the nearest sphere vertex and the
//!   vertex index is the key, so at most `sphere.len()` signals are ever
//!   computed no matter how dense the bundle is.
//!
//! Entries are append-only. Vertex slots use `OnceLock` (computed once, then
//! lock-free reads); exact entries sit behind an `RwLock`. The cache can be
//! shared by reference across rayon workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use nalgebra::Vector3;

use crate::domain::GradientTable;
use crate::geometry::{demeaned_signal, response_tensor, Sphere};

/// A shared, immutable signal vector (one value per weighted measurement).
pub type Signal = Arc<[f64]>;

/// How tangents are keyed.
#[derive(Debug, Clone)]
pub enum SignalMode {
    Exact,
    Discretized(Arc<Sphere>),
}

#[derive(Debug)]
pub struct TensorSignalCache {
    gtab: Arc<GradientTable>,
    evals: [f64; 3],
    mode: SignalMode,
    vertex_slots: Vec<OnceLock<Signal>>,
    exact: RwLock<HashMap<[u64; 3], Signal>>,
    computed: AtomicUsize,
}

impl TensorSignalCache {
    pub fn new(gtab: Arc<GradientTable>, evals: [f64; 3], mode: SignalMode) -> Self {
        let n_slots = match &mode {
            SignalMode::Exact => 0,
            SignalMode::Discretized(sphere) => sphere.len(),
        };
        Self {
            gtab,
            evals,
            mode,
            vertex_slots: (0..n_slots).map(|_| OnceLock::new()).collect(),
            exact: RwLock::new(HashMap::new()),
            computed: AtomicUsize::new(0),
        }
    }

    pub fn gradient_table(&self) -> &GradientTable {
        &self.gtab
    }

    pub fn evals(&self) -> [f64; 3] {
        self.evals
    }

    pub fn mode(&self) -> &SignalMode {
        &self.mode
    }

    pub fn n_weighted(&self) -> usize {
        self.gtab.n_weighted()
    }

    /// Number of distinct tensor-to-signal computations performed so far.
    pub fn computed_count(&self) -> usize {
        self.computed.load(Ordering::Relaxed)
    }

    /// Demeaned signal for a tensor aligned with `direction` (non-zero).
    pub fn signal(&self, direction: &Vector3<f64>) -> Signal {
        match &self.mode {
            SignalMode::Discretized(sphere) => {
                let idx = sphere.find_closest(direction);
                self.vertex_slots[idx]
                    .get_or_init(|| self.compute(&sphere.vertices()[idx]))
                    .clone()
            }
            SignalMode::Exact => self.exact_signal(direction),
        }
    }

    fn exact_signal(&self, direction: &Vector3<f64>) -> Signal {
        let unit = direction.normalize();
        let key = [unit.x.to_bits(), unit.y.to_bits(), unit.z.to_bits()];

        // A poisoned lock only means another worker panicked mid-insert; the
        // map itself is still a valid memo.
        {
            let map = self.exact.read().unwrap_or_else(|e| e.into_inner());
            if let Some(sig) = map.get(&key) {
                return sig.clone();
            }
        }

        let tensor = response_tensor(&unit, &self.evals);
        let fresh: Signal = demeaned_signal(&tensor, &self.gtab).into();

        let mut map = self.exact.write().unwrap_or_else(|e| e.into_inner());
        map.entry(key)
            .or_insert_with(|| {
                self.computed.fetch_add(1, Ordering::Relaxed);
                fresh
            })
            .clone()
    }

    fn compute(&self, direction: &Vector3<f64>) -> Signal {
        self.computed.fetch_add(1, Ordering::Relaxed);
        let tensor = response_tensor(direction, &self.evals);
        demeaned_signal(&tensor, &self.gtab).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_B0_THRESHOLD;
    use rayon::prelude::*;

    fn gtab() -> Arc<GradientTable> {
        let sphere = Sphere::icosahedral(2);
        let mut bvals = vec![0.0];
        let mut bvecs = vec![Vector3::zeros()];
        for v in sphere.vertices().iter().filter(|v| v.z >= 0.0) {
            bvals.push(1000.0);
            bvecs.push(*v);
        }
        Arc::new(GradientTable::new(bvals, bvecs, DEFAULT_B0_THRESHOLD).unwrap())
    }

    #[test]
    fn discretized_cache_is_bounded_by_vertex_count() {
        let sphere = Arc::new(Sphere::symmetric362());
        let cache = TensorSignalCache::new(gtab(), [0.0015, 0.0005, 0.0005], SignalMode::Discretized(sphere));

        // A dense fan of directions, far more than 362.
        let dirs: Vec<Vector3<f64>> = (0..20_000)
            .map(|i| {
                let t = i as f64 * 0.017;
                let u = i as f64 * 0.0031;
                Vector3::new(t.cos() * u.sin(), t.sin() * u.sin(), u.cos())
            })
            .collect();
        dirs.par_iter().for_each(|d| {
            cache.signal(d);
        });

        let n = cache.computed_count();
        assert!(n > 0 && n <= 362, "computed {n} signals");
        // Lookups after the fact never compute again.
        cache.signal(&dirs[0]);
        assert_eq!(cache.computed_count(), n);
    }

    #[test]
    fn exact_cache_memoizes_identical_directions() {
        let cache = TensorSignalCache::new(gtab(), [0.001, 0.0, 0.0], SignalMode::Exact);
        let a = cache.signal(&Vector3::new(1.0, 1.0, 0.0));
        let b = cache.signal(&Vector3::new(2.0, 2.0, 0.0));
        assert_eq!(cache.computed_count(), 1);
        assert_eq!(a, b);
        cache.signal(&Vector3::new(0.0, 1.0, 0.0));
        assert_eq!(cache.computed_count(), 2);
    }

    #[test]
    fn snapped_signal_is_close_to_exact() {
        let g = gtab();
        let exact = TensorSignalCache::new(g.clone(), [0.0015, 0.0005, 0.0005], SignalMode::Exact);
        let snapped = TensorSignalCache::new(
            g,
            [0.0015, 0.0005, 0.0005],
            SignalMode::Discretized(Arc::new(Sphere::symmetric362())),
        );
        let d = Vector3::new(0.3, -0.5, 0.81);
        let a = exact.signal(&d);
        let b = snapped.signal(&d);
        let max_diff = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max);
        assert!(max_diff < 0.15, "max diff {max_diff}");
        assert_eq!(a.len(), exact.n_weighted());
    }
}
