// Principal component analysis (PCA) of molecular dynamics trajectories

#![doc = include_str!("../README.md")]

pub mod accumulate;
pub mod align;
pub mod components;
pub mod cosine;
pub mod error;
pub mod linalg_backends;
pub mod pca;
pub mod progress;
pub mod trajectory;

pub use accumulate::{CovarianceAccumulator, MeanAccumulator};
pub use align::{AlignmentPrimitive, AlignmentReference, SuperpositionOutput};
pub use components::{degenerate_variance_tolerance, extract_components, ComponentSet};
pub use cosine::{cosine_content, simpson};
pub use error::{PcaError, Result, ThreadSafeStdError};
pub use pca::{PcaConfig, Projection, ProjectionAdvisory, TrajectoryPCA};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use trajectory::{
    center_of_geometry, flatten_positions, unflatten_positions, FrameRange, FrameSource,
    InMemoryTrajectory,
};
