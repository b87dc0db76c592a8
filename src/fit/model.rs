//! Fit orchestration.
//!
//! `FiberModel` holds what does not depend on the data (gradient table,
//! response tensor, discretization sphere, solver settings). `fit` joins a
//! bundle with an observed volume and returns a self-contained `FiberFit`.

use std::sync::Arc;

use sprs::CsMat;

use crate::domain::{DiffusionVolume, FitConfig, FitStrategy, GradientTable, SphereChoice, Streamline, Voxel};
use crate::error::{ErrorKind, FitError};
use crate::fit::fiber_fit::{FiberFit, FitParts};
use crate::fit::VoxelSignals;
use crate::geometry::{Affine, Sphere};
use crate::index::{unique_voxels, validate_streamlines, Incidence, VoxelBatches};
use crate::matrix::{tangent_field, DesignMatrixBuilder};
use crate::signal::{SignalMode, TensorSignalCache};
use crate::solve::{solve, ChunkedOperator, ChunkedProblem, CsrProblem, SolveOutcome, SolveReport};

#[derive(Debug, Clone)]
pub struct FiberModel {
    gtab: Arc<GradientTable>,
    config: FitConfig,
    mode: SignalMode,
}

impl FiberModel {
    pub fn new(gtab: GradientTable, config: FitConfig) -> Result<Self, FitError> {
        config.validate()?;
        let mode = match config.sphere {
            SphereChoice::Exact => SignalMode::Exact,
            SphereChoice::Symmetric362 => SignalMode::Discretized(Arc::new(Sphere::symmetric362())),
            SphereChoice::Symmetric642 => SignalMode::Discretized(Arc::new(Sphere::symmetric642())),
        };
        Ok(Self {
            gtab: Arc::new(gtab),
            config,
            mode,
        })
    }

    /// Snap tangents to a caller-supplied sphere instead of the configured one.
    pub fn with_sphere(mut self, sphere: Sphere) -> Self {
        self.mode = SignalMode::Discretized(Arc::new(sphere));
        self
    }

    pub fn gradient_table(&self) -> &GradientTable {
        &self.gtab
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn signal_mode(&self) -> &SignalMode {
        &self.mode
    }

    fn cache(&self) -> TensorSignalCache {
        TensorSignalCache::new(self.gtab.clone(), self.config.evals, self.mode.clone())
    }

    /// Design matrix and voxel list for `streamlines` without fitting.
    pub fn setup(&self, streamlines: &[Streamline], affine: &Affine) -> Result<(CsMat<f64>, Vec<Voxel>), FitError> {
        let streamlines = affine.transform_streamlines(streamlines);
        let incidence = Incidence::build(&streamlines)?;
        let cache = self.cache();
        let tangents = tangent_field(&streamlines);
        let a = DesignMatrixBuilder::new(&cache, &tangents).assemble(&incidence, streamlines.len())?;
        Ok((a, incidence.into_voxels()))
    }

    /// Fit with a fully materialized design matrix.
    ///
    /// Fails with `ResourceExhaustion` when `n_voxels * n_streamlines`
    /// exceeds the configured budget; use [`FiberModel::fit_out_of_core`]
    /// for such bundles.
    pub fn fit(&self, volume: &DiffusionVolume, streamlines: &[Streamline], affine: &Affine) -> Result<FiberFit, FitError> {
        let streamlines = Arc::new(affine.transform_streamlines(streamlines));
        let incidence = Incidence::build(&streamlines)?;

        let cells = incidence.n_voxels() as u64 * streamlines.len() as u64;
        let budget = self.config.out_of_core.materialization_budget;
        if cells > budget {
            return Err(FitError::new(
                ErrorKind::ResourceExhaustion,
                format!(
                    "{} voxels x {} streamlines = {cells} cells exceeds the in-memory budget of {budget}; \
                     use the out-of-core fit.",
                    incidence.n_voxels(),
                    streamlines.len()
                ),
            ));
        }

        let signals = VoxelSignals::extract(volume, incidence.voxels(), &self.gtab)?;
        let cache = self.cache();
        let tangents = tangent_field(&streamlines);
        let a = DesignMatrixBuilder::new(&cache, &tangents).assemble(&incidence, streamlines.len())?;
        tracing::info!(
            voxels = incidence.n_voxels(),
            streamlines = streamlines.len(),
            nnz = a.nnz(),
            signals = cache.computed_count(),
            "design matrix assembled"
        );

        let outcome = {
            let problem = CsrProblem::new(&a, &signals.demeaned)?;
            solve(&problem, &self.config.solver)?
        };

        Ok(FiberFit::from_parts(FitParts {
            gtab: self.gtab.clone(),
            evals: self.config.evals,
            mode: self.mode.clone(),
            streamlines,
            voxels: incidence.into_voxels(),
            volume_dims: volume.dims(),
            signals,
            nnz: a.nnz(),
            matrix: Some(a),
            outcome,
            strategy: FitStrategy::InMemory,
            chunk_voxels: self.config.out_of_core.chunk_voxels,
        }))
    }

    /// Fit without materializing the design matrix: rows are rebuilt per
    /// voxel chunk on every solver iteration.
    pub fn fit_out_of_core(
        &self,
        volume: &DiffusionVolume,
        streamlines: &[Streamline],
        affine: &Affine,
    ) -> Result<FiberFit, FitError> {
        let streamlines = Arc::new(affine.transform_streamlines(streamlines));
        validate_streamlines(&streamlines)?;
        let voxels = unique_voxels(&streamlines);
        let signals = VoxelSignals::extract(volume, &voxels, &self.gtab)?;

        let ooc = &self.config.out_of_core;
        let (nnz, outcome) = {
            let cache = self.cache();
            let tangents = tangent_field(&streamlines);
            let mut op = ChunkedOperator::new(VoxelBatches::new(&streamlines, ooc.chunk_voxels)?, &cache, &tangents)?;
            if let Some(dir) = &ooc.spill_dir {
                op = op.with_spill(dir)?;
            }
            let nnz = op.nnz()?;
            tracing::info!(
                voxels = voxels.len(),
                streamlines = streamlines.len(),
                chunks = op.n_chunks(),
                nnz,
                "out-of-core problem ready"
            );
            let problem = ChunkedProblem::new(op, &signals.demeaned)?;
            (nnz, solve(&problem, &self.config.solver)?)
        };

        Ok(FiberFit::from_parts(FitParts {
            gtab: self.gtab.clone(),
            evals: self.config.evals,
            mode: self.mode.clone(),
            streamlines,
            voxels,
            volume_dims: volume.dims(),
            signals,
            nnz,
            matrix: None,
            outcome,
            strategy: FitStrategy::OutOfCore,
            chunk_voxels: ooc.chunk_voxels,
        }))
    }

    /// Rebuild a fit from previously estimated weights against `volume`,
    /// without solving. Prediction then rebuilds the matrix on demand.
    pub fn restore(
        &self,
        volume: &DiffusionVolume,
        streamlines: &[Streamline],
        affine: &Affine,
        weights: Vec<f64>,
        report: SolveReport,
    ) -> Result<FiberFit, FitError> {
        if weights.len() != streamlines.len() {
            return Err(FitError::new(
                ErrorKind::InputShape,
                format!("{} weights for {} streamlines.", weights.len(), streamlines.len()),
            ));
        }
        if weights.iter().any(|w| !(w.is_finite() && *w >= 0.0)) {
            return Err(FitError::new(ErrorKind::Numerical, "Weights must be finite and >= 0."));
        }
        let streamlines = Arc::new(affine.transform_streamlines(streamlines));
        validate_streamlines(&streamlines)?;
        let voxels = unique_voxels(&streamlines);
        let signals = VoxelSignals::extract(volume, &voxels, &self.gtab)?;

        Ok(FiberFit::from_parts(FitParts {
            gtab: self.gtab.clone(),
            evals: self.config.evals,
            mode: self.mode.clone(),
            streamlines,
            voxels,
            volume_dims: volume.dims(),
            signals,
            nnz: 0,
            matrix: None,
            outcome: SolveOutcome { weights, report },
            strategy: FitStrategy::InMemory,
            chunk_voxels: self.config.out_of_core.chunk_voxels,
        }))
    }

    /// Dispatch on `strategy`.
    pub fn fit_with(
        &self,
        strategy: FitStrategy,
        volume: &DiffusionVolume,
        streamlines: &[Streamline],
        affine: &Affine,
    ) -> Result<FiberFit, FitError> {
        match strategy {
            FitStrategy::InMemory => self.fit(volume, streamlines, affine),
            FitStrategy::OutOfCore => self.fit_out_of_core(volume, streamlines, affine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{generate_phantom, PhantomSpec};
    use crate::solve::Termination;

    fn report() -> SolveReport {
        SolveReport {
            iterations: 0,
            checkpoints: 0,
            best_sse: 0.0,
            termination: Termination::Converged,
        }
    }

    #[test]
    fn setup_returns_matrix_and_sorted_voxels() {
        let phantom = generate_phantom(&PhantomSpec::default()).unwrap();
        let p = &phantom.problem;
        let model = FiberModel::new(p.gtab.clone(), FitConfig::default()).unwrap();
        let (a, voxels) = model.setup(&p.streamlines, &p.affine.try_inverse().unwrap()).unwrap();
        assert_eq!(a.shape(), (voxels.len() * p.gtab.n_weighted(), p.streamlines.len()));
        assert!(voxels.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn restored_fit_predicts_like_the_original() {
        let phantom = generate_phantom(&PhantomSpec::default()).unwrap();
        let p = &phantom.problem;
        let config = FitConfig {
            evals: phantom.spec.evals,
            sphere: phantom.spec.sphere,
            ..FitConfig::default()
        };
        let model = FiberModel::new(p.gtab.clone(), config).unwrap();
        let to_vox = p.affine.try_inverse().unwrap();
        let fit = model.fit(&p.volume, &p.streamlines, &to_vox).unwrap();
        let restored = model
            .restore(&p.volume, &p.streamlines, &to_vox, fit.weights().to_vec(), fit.report().clone())
            .unwrap();

        let a = fit.predict(None, None).unwrap();
        let b = restored.predict(None, None).unwrap();
        assert!((&a - &b).abs().max() < 1e-9);
    }

    #[test]
    fn restore_rejects_bad_weights() {
        let phantom = generate_phantom(&PhantomSpec::default()).unwrap();
        let p = &phantom.problem;
        let model = FiberModel::new(p.gtab.clone(), FitConfig::default()).unwrap();
        let to_vox = p.affine.try_inverse().unwrap();
        let err = model.restore(&p.volume, &p.streamlines, &to_vox, vec![1.0], report()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InputShape);
        let mut w = vec![0.5; p.streamlines.len()];
        w[0] = -1.0;
        let err = model.restore(&p.volume, &p.streamlines, &to_vox, w, report()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Numerical);
    }

    #[test]
    fn custom_sphere_replaces_the_configured_one() {
        let phantom = generate_phantom(&PhantomSpec::default()).unwrap();
        let model = FiberModel::new(phantom.problem.gtab.clone(), FitConfig::default())
            .unwrap()
            .with_sphere(Sphere::icosahedral(4));
        match model.signal_mode() {
            SignalMode::Discretized(sphere) => assert_eq!(sphere.len(), 162),
            SignalMode::Exact => panic!("expected a discretized mode"),
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let phantom = generate_phantom(&PhantomSpec::default()).unwrap();
        let mut config = FitConfig::default();
        config.solver.step_size = 0.0;
        assert!(FiberModel::new(phantom.problem.gtab.clone(), config).is_err());
    }
}
