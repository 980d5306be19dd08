// Principal component analysis (PCA) of trajectory frames

use log::{debug, info, warn};
use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::accumulate::{covariance_pass, mean_pass, DEFAULT_FRAME_BLOCK_SIZE};
use crate::align::{AlignmentPrimitive, AlignmentReference, FramePreparer};
use crate::components::{degenerate_variance_tolerance, extract_components};
use crate::error::{PcaError, Result};
use crate::progress::{LogProgress, ProgressSink, ProgressTicker};
use crate::trajectory::{unflatten_positions, FrameRange, FrameSource};

/// Configuration of a trajectory PCA fit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PcaConfig {
    /// Superpose every frame onto the first frame of the trajectory before
    /// computing the mean, the covariance, and projections.
    pub align: bool,
    /// Number of leading components to keep. `None` keeps all `3 * n_atoms`.
    pub n_components: Option<usize>,
    /// First frame used for the fit. `None` means frame 0.
    pub start: Option<usize>,
    /// Frame to stop before. `None` means the end of the trajectory.
    pub stop: Option<usize>,
    /// Stride between frames. `None` means 1.
    pub step: Option<usize>,
    /// Number of centered frames folded into the covariance matrix at once.
    pub frame_block_size: usize,
}

impl Default for PcaConfig {
    fn default() -> Self {
        PcaConfig {
            align: false,
            n_components: None,
            start: None,
            stop: None,
            step: None,
            frame_block_size: DEFAULT_FRAME_BLOCK_SIZE,
        }
    }
}

impl PcaConfig {
    /// Checks values that are invalid regardless of the trajectory.
    pub fn validate(&self) -> Result<()> {
        if self.step == Some(0) {
            return Err(PcaError::invalid_input("step must be at least 1"));
        }
        if self.n_components == Some(0) {
            return Err(PcaError::invalid_input("n_components must be greater than 0"));
        }
        if self.frame_block_size == 0 {
            return Err(PcaError::invalid_input("frame_block_size must be at least 1"));
        }
        Ok(())
    }
}

/// Non-fatal findings reported alongside a projection.
#[derive(Clone, Debug, PartialEq)]
pub enum ProjectionAdvisory {
    /// Target atom types differ from the ones the model was fit on.
    /// Coordinates are still projected.
    AtomTypeMismatch {
        /// Index of the first atom whose type differs.
        first_mismatch: usize,
        /// Number of atoms whose type differs.
        n_mismatched: usize,
    },
    /// The model was fit on typed atoms but the target reports no types,
    /// so they could not be compared.
    AtomTypesUnavailable,
}

/// Result of [`TrajectoryPCA::transform`].
#[derive(Clone, Debug)]
pub struct Projection {
    /// Projected coordinates, one row per frame of the requested range.
    /// Shape: `(n_frames, n_components)`
    pub space: Array2<f64>,
    /// Frame range of the target the rows correspond to.
    pub frame_range: FrameRange,
    pub advisories: Vec<ProjectionAdvisory>,
}

/// Principal component analysis over the frames of a trajectory.
///
/// A fit makes one pass over the selected frames to compute the mean structure
/// (skipped when a mean is supplied with [`TrajectoryPCA::with_mean`]) and a second
/// pass accumulating the covariance of the mean-centered, flattened coordinates.
/// The covariance is then diagonalized and its eigenvectors, sorted by decreasing
/// eigenvalue, are the principal components.
///
/// When `align` is set, every frame is superposed onto the first frame of the
/// trajectory before it is used, in both passes and in [`TrajectoryPCA::transform`].
///
/// # Examples
///
/// ```no_run
/// use trajectory_pca::{InMemoryTrajectory, PcaConfig, TrajectoryPCA};
/// # fn demo(trajectory: &InMemoryTrajectory) -> trajectory_pca::Result<()> {
/// let mut pca = TrajectoryPCA::new(PcaConfig::default());
/// pca.run(trajectory, None)?;
/// let projection = pca.transform(trajectory, None, Some(2), None, None, None)?;
/// println!("{:?}", projection.space.dim());
/// # Ok(())
/// # }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TrajectoryPCA {
    config: PcaConfig,
    /// Mean coordinates, flattened. Shape: (3 * n_atoms)
    mean: Option<Array1<f64>>,
    /// Whether `mean` was supplied by the caller rather than computed.
    mean_supplied: bool,
    /// Shape: (3 * n_atoms, 3 * n_atoms)
    covariance: Option<Array2<f64>>,
    /// Principal components, one per column. Shape: (3 * n_atoms, k_components)
    components: Option<Array2<f64>>,
    /// Eigenvalue of each kept component. Shape: (k_components)
    variance: Option<Array1<f64>>,
    /// Shape: (k_components)
    cumulated_variance: Option<Array1<f64>>,
    /// Structure frames are superposed onto. Present exactly when the fit aligns.
    reference: Option<AlignmentReference>,
    n_atoms: Option<usize>,
    atom_types: Option<Vec<String>>,
    frame_range: Option<FrameRange>,
}

impl TrajectoryPCA {
    /// Creates an unfitted model. Call [`TrajectoryPCA::run`] to fit it.
    pub fn new(config: PcaConfig) -> Self {
        Self {
            config,
            mean: None,
            mean_supplied: false,
            covariance: None,
            components: None,
            variance: None,
            cumulated_variance: None,
            reference: None,
            n_atoms: None,
            atom_types: None,
            frame_range: None,
        }
    }

    /// Uses `mean` (flattened, length `3 * n_atoms`) instead of computing it.
    ///
    /// Saves one pass over the trajectory. The mean is used verbatim, so a mean
    /// from a different reference biases the covariance.
    pub fn with_mean(mut self, mean: Array1<f64>) -> Self {
        self.mean = Some(mean);
        self.mean_supplied = true;
        self
    }

    /// Same as [`TrajectoryPCA::with_mean`] for `(n_atoms, 3)` positions.
    pub fn with_mean_positions(self, positions: ArrayView2<f64>) -> Self {
        let flat = Array1::from_iter(positions.iter().copied());
        self.with_mean(flat)
    }

    pub fn config(&self) -> &PcaConfig {
        &self.config
    }

    /// Returns `true` once [`TrajectoryPCA::run`] has completed.
    pub fn is_fitted(&self) -> bool {
        self.components.is_some()
    }

    /// Flattened mean coordinates used for centering, shape `(3 * n_atoms)`.
    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    /// Mean structure, shape `(n_atoms, 3)`.
    pub fn mean_positions(&self) -> Option<Array2<f64>> {
        self.mean
            .as_ref()
            .and_then(|mean| unflatten_positions(mean.view()).ok())
    }

    /// Covariance matrix, shape `(3 * n_atoms, 3 * n_atoms)`.
    pub fn covariance(&self) -> Option<&Array2<f64>> {
        self.covariance.as_ref()
    }

    /// Principal components, one per column, shape `(3 * n_atoms, k_components)`.
    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    /// Variance (eigenvalue) explained by each kept component, descending.
    pub fn variance(&self) -> Option<&Array1<f64>> {
        self.variance.as_ref()
    }

    /// Fraction of the total variance explained by components `0..=k`.
    /// Ends at 1.0 when all components are kept.
    pub fn cumulated_variance(&self) -> Option<&Array1<f64>> {
        self.cumulated_variance.as_ref()
    }

    pub fn n_atoms(&self) -> Option<usize> {
        self.n_atoms
    }

    pub fn n_components(&self) -> Option<usize> {
        self.components.as_ref().map(|c| c.ncols())
    }

    /// Frames the model was fit on.
    pub fn frame_range(&self) -> Option<FrameRange> {
        self.frame_range
    }

    pub fn n_frames_used(&self) -> Option<usize> {
        self.frame_range.map(|r| r.len())
    }

    /// Fits the model, reporting progress through the `log` facade.
    ///
    /// See [`TrajectoryPCA::run_with_progress`].
    pub fn run<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        aligner: Option<&dyn AlignmentPrimitive>,
    ) -> Result<()> {
        self.run_with_progress(source, aligner, &mut LogProgress::default())
    }

    /// Fits the model on the configured frame range of `source`.
    ///
    /// A successful run replaces any previous fit; a supplied mean is kept.
    /// On error the model is left exactly as it was.
    ///
    /// * `aligner` - Required when `config.align` is set, ignored otherwise.
    ///
    /// # Errors
    /// - `InvalidInput` / `InvalidFrameRange` for a bad configuration, or a supplied
    ///   mean whose length is not `3 * n_atoms`.
    /// - `InsufficientData` if the range holds fewer than 2 frames.
    /// - `AlignerRequired` if alignment is enabled without an aligner.
    /// - `FrameSource` / `Alignment` if a collaborator fails.
    /// - `DegenerateCovariance` if the frames carry no variance.
    pub fn run_with_progress<S: FrameSource + ?Sized>(
        &mut self,
        source: &S,
        aligner: Option<&dyn AlignmentPrimitive>,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.config.validate()?;

        let range = source.validate_slice(self.config.start, self.config.stop, self.config.step)?;
        let n_frames = range.len();
        if n_frames < 2 {
            return Err(PcaError::InsufficientData { n_frames });
        }
        let n_atoms = source.n_atoms();
        let n_features = n_atoms * 3;
        if n_features == 0 {
            return Err(PcaError::invalid_input("frame source has no atoms"));
        }
        let supplied_mean = if self.mean_supplied {
            self.mean.as_ref()
        } else {
            None
        };
        if let Some(mean) = supplied_mean {
            if mean.len() != n_features {
                return Err(PcaError::invalid_input(format!(
                    "supplied mean has length {}, expected 3 * {} atoms = {}",
                    mean.len(),
                    n_atoms,
                    n_features
                )));
            }
        }
        if self.config.align && aligner.is_none() {
            return Err(PcaError::AlignerRequired);
        }

        info!(
            "Starting trajectory PCA. Atoms={}, Frames={} (start={}, stop={}, step={}), align={}",
            n_atoms, n_frames, range.start, range.stop, range.step, self.config.align
        );
        let overall_start_time = std::time::Instant::now();

        // The reference is always the first frame of the trajectory, not of the range.
        let reference = if self.config.align {
            Some(AlignmentReference::from_source(source, 0)?)
        } else {
            None
        };
        let preparer = FramePreparer::new(reference.as_ref(), aligner)?;

        let mean = match supplied_mean {
            Some(mean) => {
                debug!("Using supplied mean; skipping the mean pass.");
                mean.clone()
            }
            None => {
                warn!(
                    "No mean supplied: the frames are iterated twice to demean the covariance. \
                     Supply a mean to avoid the extra pass."
                );
                mean_pass(source, &range, &preparer, progress)?
            }
        };

        let covariance = covariance_pass(
            source,
            &range,
            &preparer,
            &mean,
            self.config.frame_block_size,
            progress,
        )?;

        let decomposition_start_time = std::time::Instant::now();
        let tolerance = degenerate_variance_tolerance(&covariance, mean.view());
        let component_set = extract_components(&covariance, self.config.n_components, tolerance)?;
        info!(
            "Diagonalized {}x{} covariance in {:?}",
            n_features,
            n_features,
            decomposition_start_time.elapsed()
        );

        self.mean = Some(mean);
        self.covariance = Some(covariance);
        self.components = Some(component_set.components);
        self.variance = Some(component_set.variance);
        self.cumulated_variance = Some(component_set.cumulated_variance);
        self.reference = reference;
        self.n_atoms = Some(n_atoms);
        self.atom_types = source.atom_types().map(|types| types.to_vec());
        self.frame_range = Some(range);

        info!(
            "Finished trajectory PCA with {} components in {:?}",
            self.n_components().unwrap_or(0),
            overall_start_time.elapsed()
        );
        Ok(())
    }

    /// Projects frames of `source` onto the leading principal components.
    ///
    /// Reports progress through the `log` facade; see [`TrajectoryPCA::transform_with_progress`].
    pub fn transform<S: FrameSource + ?Sized>(
        &self,
        source: &S,
        aligner: Option<&dyn AlignmentPrimitive>,
        n_components: Option<usize>,
        start: Option<usize>,
        stop: Option<usize>,
        step: Option<usize>,
    ) -> Result<Projection> {
        self.transform_with_progress(
            source,
            aligner,
            n_components,
            start,
            stop,
            step,
            &mut LogProgress::default(),
        )
    }

    /// Projects frames `start..stop` (stride `step`) of `source` onto the first
    /// `n_components` principal components (all when `None`).
    ///
    /// Each frame is prepared exactly like during the fit: superposed onto the fit's
    /// reference when the model aligns, then centered with the fitted mean.
    /// Row `i` of the result is the `i`-th frame of the range.
    ///
    /// # Errors
    /// - `FitRequired` if the model has not been fit.
    /// - `AtomCountMismatch` if `source` has a different number of atoms.
    /// - `InvalidInput` if `n_components` is 0 or exceeds the fitted components.
    /// - `AlignerRequired` if the model aligns and `aligner` is `None`.
    #[allow(clippy::too_many_arguments)]
    pub fn transform_with_progress<S: FrameSource + ?Sized>(
        &self,
        source: &S,
        aligner: Option<&dyn AlignmentPrimitive>,
        n_components: Option<usize>,
        start: Option<usize>,
        stop: Option<usize>,
        step: Option<usize>,
        progress: &mut dyn ProgressSink,
    ) -> Result<Projection> {
        let components = self.components.as_ref().ok_or(PcaError::FitRequired)?;
        let mean = self.mean.as_ref().ok_or(PcaError::FitRequired)?;
        let fitted_atoms = self.n_atoms.ok_or(PcaError::FitRequired)?;

        if source.n_atoms() != fitted_atoms {
            return Err(PcaError::AtomCountMismatch {
                expected: fitted_atoms,
                actual: source.n_atoms(),
            });
        }
        let advisories = self.check_atom_types(source);

        let available = components.ncols();
        let k_components = n_components.unwrap_or(available);
        if k_components == 0 || k_components > available {
            return Err(PcaError::invalid_input(format!(
                "requested {} components, the model has {}",
                k_components, available
            )));
        }

        let preparer = FramePreparer::new(self.reference.as_ref(), aligner)?;
        let range = source.validate_slice(start, stop, step)?;
        let selected = components.slice(s![.., ..k_components]);

        let start_time = std::time::Instant::now();
        let mut space = Array2::<f64>::zeros((range.len(), k_components));
        let mut ticker = ProgressTicker::start(progress, "Projection", range.len());
        for (i, frame_index) in range.indices().enumerate() {
            let mut coordinates = preparer.prepare(source, frame_index)?;
            coordinates -= mean;
            space.row_mut(i).assign(&coordinates.dot(&selected));
            ticker.tick(i + 1);
        }
        debug!(
            "Projected {} frames onto {} components in {:?}",
            range.len(),
            k_components,
            start_time.elapsed()
        );

        Ok(Projection {
            space,
            frame_range: range,
            advisories,
        })
    }

    fn check_atom_types<S: FrameSource + ?Sized>(&self, source: &S) -> Vec<ProjectionAdvisory> {
        let Some(fitted) = self.atom_types.as_ref() else {
            return Vec::new();
        };
        let Some(target) = source.atom_types() else {
            warn!("The PCA was fit on typed atoms but the target reports no atom types; types are not checked.");
            return vec![ProjectionAdvisory::AtomTypesUnavailable];
        };
        // Labels past the end of the shorter list count as mismatched.
        let n_labels = fitted.len().max(target.len());
        let mismatched: Vec<usize> = (0..n_labels)
            .filter(|&i| fitted.get(i) != target.get(i))
            .collect();
        match mismatched.first() {
            Some(&first_mismatch) => {
                warn!(
                    "Atom types do not match the types used to fit the PCA ({} atoms differ, first at index {}).",
                    mismatched.len(),
                    first_mismatch
                );
                vec![ProjectionAdvisory::AtomTypeMismatch {
                    first_mismatch,
                    n_mismatched: mismatched.len(),
                }]
            }
            None => Vec::new(),
        }
    }

    /// Maps projected coordinates back to flattened frames: `mean + space · componentsᵀ`.
    ///
    /// * `space` - Shape `(n_frames, k)` with `k` no larger than the fitted components;
    ///   the first `k` components are used.
    ///
    /// # Returns
    /// Flattened coordinates, shape `(n_frames, 3 * n_atoms)`. With all components this
    /// recovers the (aligned) frames that were projected.
    pub fn inverse_transform(&self, space: ArrayView2<f64>) -> Result<Array2<f64>> {
        let components = self.components.as_ref().ok_or(PcaError::FitRequired)?;
        let mean = self.mean.as_ref().ok_or(PcaError::FitRequired)?;
        let k_components = space.ncols();
        if k_components > components.ncols() {
            return Err(PcaError::invalid_input(format!(
                "projection has {} components, the model has {}",
                k_components,
                components.ncols()
            )));
        }
        let selected = components.slice(s![.., ..k_components]);
        let mut reconstructed = space.dot(&selected.t());
        reconstructed += &mean.view().insert_axis(Axis(0));
        Ok(reconstructed)
    }

    /// Saves the fitted model to a file using bincode.
    ///
    /// # Errors
    /// Returns an error if the model is not fitted, or if file I/O or serialization fails.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if !self.is_fitted() {
            return Err(PcaError::FitRequired);
        }
        let file = File::create(path.as_ref()).map_err(|e| {
            PcaError::model(format!("Failed to create file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut writer = BufWriter::new(file);
        bincode::serde::encode_into_std_write(self, &mut writer, bincode::config::standard())
            .map_err(|e| PcaError::model(format!("Failed to serialize PCA model: {}", e)))?;
        Ok(())
    }

    /// Loads a model previously saved with [`TrajectoryPCA::save_model`].
    ///
    /// # Errors
    /// Returns an error if file I/O or deserialization fails, or if the loaded
    /// model is incomplete or has inconsistent dimensions.
    pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            PcaError::model(format!("Failed to open file at {:?}: {}", path.as_ref(), e))
        })?;
        let mut reader = BufReader::new(file);
        let model: TrajectoryPCA =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| PcaError::model(format!("Failed to deserialize PCA model: {}", e)))?;
        model.validate_loaded()?;
        Ok(model)
    }

    fn validate_loaded(&self) -> Result<()> {
        let components = self
            .components
            .as_ref()
            .ok_or_else(|| PcaError::model("Loaded PCA model is missing components."))?;
        let mean = self
            .mean
            .as_ref()
            .ok_or_else(|| PcaError::model("Loaded PCA model is missing the mean vector."))?;
        let n_atoms = self
            .n_atoms
            .ok_or_else(|| PcaError::model("Loaded PCA model is missing the atom count."))?;
        let n_features = n_atoms * 3;
        if mean.len() != n_features || components.nrows() != n_features {
            return Err(PcaError::model(format!(
                "Loaded PCA model has inconsistent feature dimensions: atoms={}, mean={}, components={}",
                n_atoms,
                mean.len(),
                components.nrows()
            )));
        }
        let k_components = components.ncols();
        let variance_ok = self.variance.as_ref().is_some_and(|v| v.len() == k_components);
        let cumulated_ok = self
            .cumulated_variance
            .as_ref()
            .is_some_and(|v| v.len() == k_components);
        if !variance_ok || !cumulated_ok {
            return Err(PcaError::model(
                "Loaded PCA model's variance vectors do not match its component count.",
            ));
        }
        if let Some(reference) = self.reference.as_ref() {
            if reference.centered_positions.dim() != (n_atoms, 3) || reference.center.len() != 3 {
                return Err(PcaError::model(
                    "Loaded PCA model's alignment reference does not match its atom count.",
                ));
            }
        }
        Ok(())
    }
}
