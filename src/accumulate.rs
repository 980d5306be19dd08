// src/accumulate.rs

use log::{debug, info};
use ndarray::linalg::general_mat_mul;
use ndarray::{s, Array1, Array2, ArrayView1};

use crate::align::FramePreparer;
use crate::error::{PcaError, Result};
use crate::progress::{ProgressSink, ProgressTicker};
use crate::trajectory::{FrameRange, FrameSource};

/// Default number of centered frames buffered before they are folded into the covariance matrix.
pub const DEFAULT_FRAME_BLOCK_SIZE: usize = 64;

fn check_length(expected: usize, actual: usize, what: &str) -> Result<()> {
    if expected != actual {
        return Err(PcaError::invalid_input(format!(
            "{} has length {}, expected {}",
            what, actual, expected
        )));
    }
    Ok(())
}

// --- Mean ---

/// Streaming arithmetic mean of flattened frame vectors, summed in `f64`.
#[derive(Debug, Clone)]
pub struct MeanAccumulator {
    sum: Array1<f64>,
    n_frames: usize,
}

impl MeanAccumulator {
    pub fn new(dimension: usize) -> Self {
        Self {
            sum: Array1::zeros(dimension),
            n_frames: 0,
        }
    }

    pub fn push(&mut self, frame: ArrayView1<f64>) -> Result<()> {
        check_length(self.sum.len(), frame.len(), "frame vector")?;
        self.sum += &frame;
        self.n_frames += 1;
        Ok(())
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Returns the mean of every pushed frame.
    ///
    /// # Errors
    /// `InsufficientData` if nothing was pushed.
    pub fn finish(self) -> Result<Array1<f64>> {
        if self.n_frames == 0 {
            return Err(PcaError::InsufficientData { n_frames: 0 });
        }
        Ok(self.sum / self.n_frames as f64)
    }
}

// --- Covariance ---

/// Streaming sample covariance of flattened frame vectors around a fixed mean.
///
/// Centered frames are buffered in a block of `block_size` rows and folded into the
/// `dim x dim` sum with one rank-`block_size` update, so memory stays at
/// `dim^2 + block_size * dim` no matter how many frames are pushed.
#[derive(Debug, Clone)]
pub struct CovarianceAccumulator {
    mean: Array1<f64>,
    sum: Array2<f64>,
    block: Array2<f64>,
    filled: usize,
    n_frames: usize,
}

impl CovarianceAccumulator {
    /// # Errors
    /// Returns an error if `block_size` is zero.
    pub fn new(mean: Array1<f64>, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(PcaError::invalid_input("frame block size must be at least 1"));
        }
        let dimension = mean.len();
        Ok(Self {
            mean,
            sum: Array2::zeros((dimension, dimension)),
            block: Array2::zeros((block_size, dimension)),
            filled: 0,
            n_frames: 0,
        })
    }

    pub fn push(&mut self, frame: ArrayView1<f64>) -> Result<()> {
        check_length(self.mean.len(), frame.len(), "frame vector")?;
        let mut row = self.block.row_mut(self.filled);
        row.assign(&frame);
        row -= &self.mean;
        self.filled += 1;
        self.n_frames += 1;
        if self.filled == self.block.nrows() {
            self.flush();
        }
        Ok(())
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn flush(&mut self) {
        if self.filled == 0 {
            return;
        }
        let centered = self.block.slice(s![..self.filled, ..]);
        // sum += centered^T @ centered
        general_mat_mul(1.0, &centered.t(), &centered, 1.0, &mut self.sum);
        self.filled = 0;
    }

    /// Returns the Bessel-corrected covariance, the outer-product sum divided by `n_frames - 1`.
    ///
    /// # Errors
    /// `InsufficientData` if fewer than 2 frames were pushed.
    pub fn finish(mut self) -> Result<Array2<f64>> {
        if self.n_frames < 2 {
            return Err(PcaError::InsufficientData {
                n_frames: self.n_frames,
            });
        }
        self.flush();
        let denominator = (self.n_frames - 1) as f64;
        Ok(self.sum / denominator)
    }
}

// --- Passes over a frame source ---

/// One pass over `range` computing the mean of the prepared frames.
pub(crate) fn mean_pass<S: FrameSource + ?Sized>(
    source: &S,
    range: &FrameRange,
    preparer: &FramePreparer<'_>,
    progress: &mut dyn ProgressSink,
) -> Result<Array1<f64>> {
    let start_time = std::time::Instant::now();
    let mut accumulator = MeanAccumulator::new(source.n_atoms() * 3);
    let mut ticker = ProgressTicker::start(progress, "Mean calculation", range.len());
    for (i, frame_index) in range.indices().enumerate() {
        let frame = preparer.prepare(source, frame_index)?;
        accumulator.push(frame.view())?;
        ticker.tick(i + 1);
    }
    let n_frames = accumulator.n_frames();
    let mean = accumulator.finish()?;
    info!(
        "Computed mean over {} frames (aligned={}) in {:?}",
        n_frames,
        preparer.is_aligned(),
        start_time.elapsed()
    );
    Ok(mean)
}

/// One pass over `range` accumulating the covariance of the prepared frames around `mean`.
pub(crate) fn covariance_pass<S: FrameSource + ?Sized>(
    source: &S,
    range: &FrameRange,
    preparer: &FramePreparer<'_>,
    mean: &Array1<f64>,
    block_size: usize,
    progress: &mut dyn ProgressSink,
) -> Result<Array2<f64>> {
    let start_time = std::time::Instant::now();
    debug!(
        "Accumulating {}x{} covariance over {} frames, block size {}",
        mean.len(),
        mean.len(),
        range.len(),
        block_size
    );
    let mut accumulator = CovarianceAccumulator::new(mean.clone(), block_size)?;
    let mut ticker = ProgressTicker::start(progress, "Covariance accumulation", range.len());
    for (i, frame_index) in range.indices().enumerate() {
        let frame = preparer.prepare(source, frame_index)?;
        accumulator.push(frame.view())?;
        ticker.tick(i + 1);
    }
    let n_frames = accumulator.n_frames();
    let covariance = accumulator.finish()?;
    info!(
        "Accumulated covariance over {} frames in {:?}",
        n_frames,
        start_time.elapsed()
    );
    Ok(covariance)
}
