// src/trajectory.rs

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{PcaError, Result, ThreadSafeStdError};

// --- Frame Range ---

/// A validated `(start, stop, step)` selection of frame indices.
/// `stop` is exclusive. Invariants: `start <= stop <= n_frames` and `step >= 1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: usize,
    pub stop: usize,
    pub step: usize,
}

impl FrameRange {
    /// Number of frames the range visits.
    pub fn len(&self) -> usize {
        if self.stop <= self.start {
            0
        } else {
            (self.stop - self.start).div_ceil(self.step)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame indices in visiting order.
    pub fn indices(&self) -> impl Iterator<Item = usize> {
        (self.start..self.stop).step_by(self.step)
    }

    /// Normalizes an optional slice against a trajectory of `n_frames` frames.
    ///
    /// Missing values default to `0`, `n_frames`, and `1`. A `stop` past the end is
    /// clamped to `n_frames`. A zero step or a `start` past `stop` is rejected.
    pub fn from_slice(
        start: Option<usize>,
        stop: Option<usize>,
        step: Option<usize>,
        n_frames: usize,
    ) -> Result<Self> {
        let invalid = |reason: &'static str| PcaError::InvalidFrameRange {
            start,
            stop,
            step,
            n_frames,
            reason,
        };

        let step_value = step.unwrap_or(1);
        if step_value == 0 {
            return Err(invalid("step must be at least 1"));
        }
        let stop_value = stop.unwrap_or(n_frames).min(n_frames);
        let start_value = start.unwrap_or(0);
        if start_value > stop_value {
            return Err(invalid("start lies beyond stop"));
        }

        Ok(Self {
            start: start_value,
            stop: stop_value,
            step: step_value,
        })
    }
}

// --- Trait for Abstracting Trajectory Access ---

/// Defines how the PCA passes read coordinates from a trajectory.
///
/// The implementor is responsible for the file format and for atom selection:
/// every frame it returns holds the same, stably ordered subset of atoms.
/// Frames are addressed by index so independent passes never share a read cursor.
pub trait FrameSource {
    /// Total number of frames in the trajectory.
    fn n_frames(&self) -> usize;

    /// Number of atoms in every frame.
    fn n_atoms(&self) -> usize;

    /// Reads the positions of frame `frame_index`.
    ///
    /// # Returns
    /// An `Array2<f32>` of shape `(n_atoms, 3)`.
    fn read_frame(&self, frame_index: usize) -> std::result::Result<Array2<f32>, ThreadSafeStdError>;

    /// Per-atom type labels, if the source knows them.
    fn atom_types(&self) -> Option<&[String]> {
        None
    }

    /// Normalizes `(start, stop, step)` against this trajectory. See [`FrameRange::from_slice`].
    fn validate_slice(
        &self,
        start: Option<usize>,
        stop: Option<usize>,
        step: Option<usize>,
    ) -> Result<FrameRange> {
        FrameRange::from_slice(start, stop, step, self.n_frames())
    }
}

/// Reads one frame, checks its shape, and widens it to `f64`.
pub(crate) fn read_positions<S: FrameSource + ?Sized>(
    source: &S,
    frame_index: usize,
) -> Result<Array2<f64>> {
    let frame = source
        .read_frame(frame_index)
        .map_err(|source_error| PcaError::FrameSource {
            frame_index,
            source: source_error,
        })?;
    let expected_shape = (source.n_atoms(), 3);
    if frame.dim() != expected_shape {
        return Err(PcaError::FrameSource {
            frame_index,
            source: format!(
                "frame has shape {:?}, expected {:?}",
                frame.dim(),
                expected_shape
            )
            .into(),
        });
    }
    Ok(frame.mapv(f64::from))
}

// --- Geometry Helpers ---

/// Unweighted centroid of a set of positions, shape `(n_atoms, 3)`.
pub fn center_of_geometry(positions: ArrayView2<f64>) -> Array1<f64> {
    positions
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(3))
}

/// Flattens `(n_atoms, 3)` positions into `x0, y0, z0, x1, ...` order.
pub fn flatten_positions(positions: ArrayView2<f64>) -> Array1<f64> {
    Array1::from_iter(positions.iter().copied())
}

/// Inverse of [`flatten_positions`].
pub fn unflatten_positions(flat: ArrayView1<f64>) -> Result<Array2<f64>> {
    if flat.len() % 3 != 0 {
        return Err(PcaError::invalid_input(format!(
            "flat coordinate vector of length {} is not a multiple of 3",
            flat.len()
        )));
    }
    Array2::from_shape_vec((flat.len() / 3, 3), flat.to_vec())
        .map_err(|e| PcaError::invalid_input(format!("cannot reshape coordinates: {}", e)))
}

// --- In-Memory Source ---

/// A trajectory held fully in memory, shape `(n_frames, n_atoms, 3)`.
#[derive(Clone, Debug)]
pub struct InMemoryTrajectory {
    coordinates: Array3<f32>,
    atom_types: Option<Vec<String>>,
}

impl InMemoryTrajectory {
    /// Wraps an `(n_frames, n_atoms, 3)` coordinate array.
    ///
    /// # Errors
    /// Returns an error if the last axis is not of length 3.
    pub fn new(coordinates: Array3<f32>) -> Result<Self> {
        if coordinates.len_of(Axis(2)) != 3 {
            return Err(PcaError::invalid_input(format!(
                "coordinates must have shape (n_frames, n_atoms, 3), got {:?}",
                coordinates.dim()
            )));
        }
        Ok(Self {
            coordinates,
            atom_types: None,
        })
    }

    /// Builds a trajectory from a list of `(n_atoms, 3)` frames.
    pub fn from_frames(frames: &[Array2<f32>]) -> Result<Self> {
        let n_atoms = frames.first().map_or(0, |f| f.nrows());
        if let Some((index, frame)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.dim() != (n_atoms, 3))
        {
            return Err(PcaError::invalid_input(format!(
                "frame {} has shape {:?}, expected ({}, 3)",
                index,
                frame.dim(),
                n_atoms
            )));
        }
        let views: Vec<ArrayView2<f32>> = frames.iter().map(|f| f.view()).collect();
        let coordinates = if views.is_empty() {
            Array3::zeros((0, 0, 3))
        } else {
            ndarray::stack(Axis(0), &views)
                .map_err(|e| PcaError::invalid_input(format!("cannot stack frames: {}", e)))?
        };
        Self::new(coordinates)
    }

    /// Attaches per-atom type labels.
    ///
    /// # Errors
    /// Returns an error if the number of labels differs from the atom count.
    pub fn with_atom_types(mut self, atom_types: Vec<String>) -> Result<Self> {
        if atom_types.len() != self.coordinates.len_of(Axis(1)) {
            return Err(PcaError::invalid_input(format!(
                "{} atom types given for {} atoms",
                atom_types.len(),
                self.coordinates.len_of(Axis(1))
            )));
        }
        self.atom_types = Some(atom_types);
        Ok(self)
    }

    pub fn coordinates(&self) -> &Array3<f32> {
        &self.coordinates
    }
}

impl FrameSource for InMemoryTrajectory {
    fn n_frames(&self) -> usize {
        self.coordinates.len_of(Axis(0))
    }

    fn n_atoms(&self) -> usize {
        self.coordinates.len_of(Axis(1))
    }

    fn read_frame(&self, frame_index: usize) -> std::result::Result<Array2<f32>, ThreadSafeStdError> {
        if frame_index >= self.n_frames() {
            return Err(format!(
                "frame index {} out of bounds for trajectory with {} frames",
                frame_index,
                self.n_frames()
            )
            .into());
        }
        Ok(self.coordinates.index_axis(Axis(0), frame_index).to_owned())
    }

    fn atom_types(&self) -> Option<&[String]> {
        self.atom_types.as_deref()
    }
}
