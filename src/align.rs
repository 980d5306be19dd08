// src/align.rs

use log::{debug, trace};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result, ThreadSafeStdError};
use crate::trajectory::{center_of_geometry, flatten_positions, read_positions, FrameSource};

/// Output of a rigid superposition.
#[derive(Debug, Clone)]
pub struct SuperpositionOutput {
    /// Mobile positions after the best-fit rotation and translation, shape `(n_atoms, 3)`.
    pub aligned_positions: Array2<f64>,
    /// Residual error of the fit (typically the RMSD before or after fitting,
    /// as defined by the implementor). Only used for logging.
    pub residual: f64,
}

/// Rigid-body superposition of one coordinate set onto another.
///
/// `reference` is already centered on `reference_center`. Implementors remove the
/// translation of `mobile` using `mobile_center`, rotate it onto `reference`, and
/// place the result at `reference_center`.
pub trait AlignmentPrimitive {
    fn superpose(
        &self,
        mobile: ArrayView2<f64>,
        reference: ArrayView2<f64>,
        mobile_center: ArrayView1<f64>,
        reference_center: ArrayView1<f64>,
    ) -> std::result::Result<SuperpositionOutput, ThreadSafeStdError>;
}

/// The structure every frame is superposed onto when alignment is enabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentReference {
    /// Reference positions translated so their center of geometry is at the origin.
    /// Shape: `(n_atoms, 3)`
    pub centered_positions: Array2<f64>,
    /// Center of geometry of the untranslated reference.
    pub center: Array1<f64>,
}

impl AlignmentReference {
    /// Builds a reference from raw positions, centering them on their own center of geometry.
    pub fn from_positions(mut positions: Array2<f64>) -> Self {
        let center = center_of_geometry(positions.view());
        positions -= &center;
        Self {
            centered_positions: positions,
            center,
        }
    }

    /// Reads frame `frame_index` of `source` and centers it.
    pub fn from_source<S: FrameSource + ?Sized>(source: &S, frame_index: usize) -> Result<Self> {
        Ok(Self::from_positions(read_positions(source, frame_index)?))
    }
}

/// Turns raw frames into flattened coordinate vectors, aligned or not.
///
/// One preparer is built per fit and shared by the mean pass, the covariance pass,
/// and projection, so every stage applies the same procedure.
pub(crate) enum FramePreparer<'a> {
    Raw,
    Aligned {
        reference: &'a AlignmentReference,
        aligner: &'a dyn AlignmentPrimitive,
    },
}

impl<'a> FramePreparer<'a> {
    /// Chooses the procedure for a model. `reference` is `Some` exactly when the model aligns.
    pub(crate) fn new(
        reference: Option<&'a AlignmentReference>,
        aligner: Option<&'a dyn AlignmentPrimitive>,
    ) -> Result<Self> {
        match (reference, aligner) {
            (Some(reference), Some(aligner)) => Ok(Self::Aligned { reference, aligner }),
            (Some(_), None) => Err(PcaError::AlignerRequired),
            (None, Some(_)) => {
                debug!("Alignment primitive supplied but alignment is disabled; frames are used as read.");
                Ok(Self::Raw)
            }
            (None, None) => Ok(Self::Raw),
        }
    }

    pub(crate) fn is_aligned(&self) -> bool {
        matches!(self, Self::Aligned { .. })
    }

    /// Reads frame `frame_index` and returns its flattened (optionally aligned) coordinates.
    pub(crate) fn prepare<S: FrameSource + ?Sized>(
        &self,
        source: &S,
        frame_index: usize,
    ) -> Result<Array1<f64>> {
        let positions = read_positions(source, frame_index)?;
        match self {
            Self::Raw => Ok(flatten_positions(positions.view())),
            Self::Aligned { reference, aligner } => {
                let mobile_center = center_of_geometry(positions.view());
                let fit = aligner
                    .superpose(
                        positions.view(),
                        reference.centered_positions.view(),
                        mobile_center.view(),
                        reference.center.view(),
                    )
                    .map_err(PcaError::Alignment)?;
                trace!("Frame {} superposed onto reference, residual {:.4}", frame_index, fit.residual);
                if fit.aligned_positions.dim() != positions.dim() {
                    return Err(PcaError::Alignment(
                        format!(
                            "aligned frame {} has shape {:?}, expected {:?}",
                            frame_index,
                            fit.aligned_positions.dim(),
                            positions.dim()
                        )
                        .into(),
                    ));
                }
                Ok(flatten_positions(fit.aligned_positions.view()))
            }
        }
    }
}
