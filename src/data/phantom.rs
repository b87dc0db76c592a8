//! Synthetic crossing-bundle phantom.
//!
//! Two bundles cross in the mid plane of a small grid: one runs along `x`,
//! the other along `y`, each streamline on its own grid line with a little
//! jitter. Each streamline gets a random "true" weight; the volume is the
//! forward model of those weights (plus optional Gaussian noise), so a fit
//! on a noiseless phantom should give the true weights back.
//!
//! Everything is driven by a seeded `StdRng`, so the same spec always yields
//! the same phantom.

use std::sync::Arc;

use nalgebra::{Point3, Vector3};
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{DiffusionVolume, GradientTable, SphereChoice, Streamline, DEFAULT_B0_THRESHOLD};
use crate::error::{ErrorKind, FitError};
use crate::geometry::{Affine, Sphere};
use crate::index::Incidence;
use crate::io::Problem;
use crate::matrix::{mul_vec, tangent_field, DesignMatrixBuilder};
use crate::signal::{SignalMode, TensorSignalCache};

#[derive(Debug, Clone, PartialEq)]
pub struct PhantomSpec {
    /// In-plane grid size; the volume is `grid x grid x 3`.
    pub grid: usize,
    pub streamlines_per_bundle: usize,
    /// Subdivision frequency of the sphere whose upper hemisphere gives the
    /// weighted directions.
    pub direction_frequency: usize,
    pub n_b0: usize,
    pub bval: f64,
    pub evals: [f64; 3],
    pub sphere: SphereChoice,
    pub s0: f64,
    /// Mean relative signal added back in every voxel.
    pub base_signal: f64,
    /// Maximum absolute in-plane jitter of each node, in voxels (< 0.5).
    pub jitter: f64,
    pub weight_range: (f64, f64),
    /// Standard deviation of additive noise, in signal units.
    pub noise_sd: f64,
    /// World size of a voxel edge.
    pub voxel_size: f64,
    pub seed: u64,
}

impl Default for PhantomSpec {
    fn default() -> Self {
        Self {
            grid: 10,
            streamlines_per_bundle: 4,
            direction_frequency: 2,
            n_b0: 2,
            bval: 1000.0,
            evals: [0.0015, 0.0005, 0.0005],
            sphere: SphereChoice::Exact,
            s0: 100.0,
            base_signal: 0.6,
            jitter: 0.2,
            weight_range: (0.2, 0.8),
            noise_sd: 0.5,
            voxel_size: 2.0,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Phantom {
    pub spec: PhantomSpec,
    pub problem: Problem,
    pub true_weights: Vec<f64>,
}

pub fn generate_phantom(spec: &PhantomSpec) -> Result<Phantom, FitError> {
    validate(spec)?;
    let mut rng = StdRng::seed_from_u64(spec.seed);

    let gtab = gradient_table(spec)?;
    let voxel_streamlines = bundles(spec, &mut rng);
    let (lo, hi) = spec.weight_range;
    let true_weights: Vec<f64> = voxel_streamlines.iter().map(|_| rng.gen_range(lo..=hi)).collect();

    // Forward model on the voxel-space streamlines.
    let mode = match spec.sphere {
        SphereChoice::Exact => SignalMode::Exact,
        SphereChoice::Symmetric362 => SignalMode::Discretized(Arc::new(Sphere::symmetric362())),
        SphereChoice::Symmetric642 => SignalMode::Discretized(Arc::new(Sphere::symmetric642())),
    };
    let gtab_arc = Arc::new(gtab.clone());
    let cache = TensorSignalCache::new(gtab_arc, spec.evals, mode);
    let tangents = tangent_field(&voxel_streamlines);
    let incidence = Incidence::build(&voxel_streamlines)?;
    let a = DesignMatrixBuilder::new(&cache, &tangents).assemble(&incidence, voxel_streamlines.len())?;
    let fiber = mul_vec(&a, &true_weights);

    let dims = [spec.grid, spec.grid, 3];
    let n_dir = gtab.n_directions();
    let n_w = gtab.n_weighted();
    let mut volume = DiffusionVolume::zeros(dims, n_dir);
    let weighted: Vec<usize> = gtab.weighted_indices().collect();
    let baseline: Vec<usize> = gtab.baseline_indices().collect();

    for z in 0..dims[2] as i64 {
        for y in 0..dims[1] as i64 {
            for x in 0..dims[0] as i64 {
                let voxel = [x, y, z];
                let row = incidence.voxel_index(&voxel);
                let Some(dst) = volume.voxel_mut(&voxel) else {
                    continue;
                };
                for &i in &baseline {
                    dst[i] = spec.s0;
                }
                for (d, &i) in weighted.iter().enumerate() {
                    let fiber_part = row.map_or(0.0, |v| fiber[v * n_w + d]);
                    dst[i] = (fiber_part + spec.base_signal) * spec.s0;
                }
            }
        }
    }

    if spec.noise_sd > 0.0 {
        let normal = Normal::new(0.0, spec.noise_sd)
            .map_err(|e| FitError::new(ErrorKind::InputShape, format!("Noise distribution error: {e}")))?;
        let noisy: Vec<f64> = volume.data().iter().map(|x| x + normal.sample(&mut rng)).collect();
        volume = DiffusionVolume::new(dims, n_dir, noisy)?;
    }

    let affine = world_affine(spec)?;
    let streamlines = affine.transform_streamlines(&voxel_streamlines);

    tracing::debug!(
        streamlines = streamlines.len(),
        voxels = incidence.n_voxels(),
        directions = n_dir,
        "phantom generated"
    );

    Ok(Phantom {
        spec: spec.clone(),
        problem: Problem {
            gtab,
            affine,
            streamlines,
            volume,
        },
        true_weights,
    })
}

fn validate(spec: &PhantomSpec) -> Result<(), FitError> {
    if spec.grid < 4 {
        return Err(FitError::new(ErrorKind::InputShape, "Phantom grid must be at least 4."));
    }
    if spec.streamlines_per_bundle == 0 || spec.streamlines_per_bundle > spec.grid - 2 {
        return Err(FitError::new(
            ErrorKind::InputShape,
            format!("Streamlines per bundle must be in 1..={}.", spec.grid - 2),
        ));
    }
    if spec.n_b0 == 0 {
        return Err(FitError::new(ErrorKind::InputShape, "Phantom needs at least one b0."));
    }
    if !(0.0..0.5).contains(&spec.jitter) {
        return Err(FitError::new(ErrorKind::InputShape, "Jitter must be in [0, 0.5)."));
    }
    let (lo, hi) = spec.weight_range;
    if !(lo >= 0.0 && hi >= lo && hi.is_finite()) {
        return Err(FitError::new(ErrorKind::InputShape, "Invalid weight range."));
    }
    if !(spec.s0 > 0.0 && spec.voxel_size > 0.0 && spec.noise_sd >= 0.0) {
        return Err(FitError::new(
            ErrorKind::InputShape,
            "S0 and voxel size must be > 0 and noise must be >= 0.",
        ));
    }
    Ok(())
}

/// `n_b0` baselines followed by the upper hemisphere of an icosahedral sphere.
fn gradient_table(spec: &PhantomSpec) -> Result<GradientTable, FitError> {
    let sphere = Sphere::icosahedral(spec.direction_frequency);
    let mut bvals = vec![0.0; spec.n_b0];
    let mut bvecs = vec![Vector3::zeros(); spec.n_b0];
    for v in sphere.vertices().iter().filter(|v| v.z > 1e-9) {
        bvals.push(spec.bval);
        bvecs.push(*v);
    }
    GradientTable::new(bvals, bvecs, DEFAULT_B0_THRESHOLD)
}

/// Two orthogonal bundles in the `z = 1` plane, in voxel coordinates.
///
/// Nodes sit every half voxel, offset by a quarter so no node lies on a
/// rounding boundary along the streamline.
fn bundles(spec: &PhantomSpec, rng: &mut StdRng) -> Vec<Streamline> {
    let n_nodes = 2 * (spec.grid - 1);
    let first_line = (spec.grid - spec.streamlines_per_bundle) / 2;
    let jitter = |rng: &mut StdRng| {
        if spec.jitter > 0.0 {
            rng.gen_range(-spec.jitter..spec.jitter)
        } else {
            0.0
        }
    };

    let mut out = Vec::with_capacity(2 * spec.streamlines_per_bundle);
    for axis in 0..2 {
        for k in 0..spec.streamlines_per_bundle {
            let line = (first_line + k) as f64;
            let points = (0..n_nodes)
                .map(|n| {
                    let along = 0.25 + 0.5 * n as f64;
                    let across = line + jitter(rng);
                    let z = 1.0 + jitter(rng);
                    if axis == 0 {
                        Point3::new(along, across, z)
                    } else {
                        Point3::new(across, along, z)
                    }
                })
                .collect();
            out.push(Streamline::new(points));
        }
    }
    out
}

fn world_affine(spec: &PhantomSpec) -> Result<Affine, FitError> {
    let s = spec.voxel_size;
    let half = spec.grid as f64 * s / 2.0;
    Affine::from_rows([
        [s, 0.0, 0.0, -half],
        [0.0, s, 0.0, -half],
        [0.0, 0.0, s, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_phantom() {
        let a = generate_phantom(&PhantomSpec::default()).unwrap();
        let b = generate_phantom(&PhantomSpec::default()).unwrap();
        assert_eq!(a.true_weights, b.true_weights);
        assert_eq!(a.problem, b.problem);

        let c = generate_phantom(&PhantomSpec {
            seed: 8,
            ..PhantomSpec::default()
        })
        .unwrap();
        assert_ne!(a.true_weights, c.true_weights);
    }

    #[test]
    fn layout_and_signal_levels() {
        let spec = PhantomSpec {
            noise_sd: 0.0,
            ..PhantomSpec::default()
        };
        let p = generate_phantom(&spec).unwrap();
        assert_eq!(p.problem.streamlines.len(), 8);
        assert_eq!(p.problem.volume.dims(), [10, 10, 3]);
        assert!(p.true_weights.iter().all(|w| (0.2..=0.8).contains(w)));

        // A corner voxel no streamline reaches carries only the base signal.
        let corner = p.problem.volume.voxel(&[0, 0, 0]).unwrap();
        assert_eq!(corner[0], 100.0);
        assert!((corner[spec.n_b0] - 60.0).abs() < 1e-9);
        assert!(p.problem.volume.data().iter().all(|x| *x > 0.0));
    }

    #[test]
    fn world_streamlines_map_back_to_the_grid() {
        let p = generate_phantom(&PhantomSpec::default()).unwrap();
        let to_vox = p.problem.affine.try_inverse().unwrap();
        let back = to_vox.transform_streamlines(&p.problem.streamlines);
        let inc = Incidence::build(&back).unwrap();
        assert!(inc.voxels().iter().all(|v| p.problem.volume.contains(v)));
        // 4 rows and 4 columns of 10 voxels, crossing in 16.
        assert_eq!(inc.n_voxels(), 64);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        assert!(generate_phantom(&PhantomSpec { grid: 2, ..PhantomSpec::default() }).is_err());
        assert!(generate_phantom(&PhantomSpec { jitter: 0.6, ..PhantomSpec::default() }).is_err());
    }
}
