use rand_distr::NormalError;
use rayon::ThreadPoolBuildError;
use thiserror::Error;

/// Errors that can occur while building the metacell affinity graph.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum MetacellGraphError {
    /// The point set has no rows
    #[error("The point set is empty")]
    EmptyInput,

    /// A matrix does not have the shape the point set implies
    #[error("{what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        /// Which input is malformed
        what: &'static str,
        /// Shape implied by the number of points
        expected: (usize, usize),
        /// Shape that was supplied
        found: (usize, usize),
    },

    /// The bandwidth vector does not cover every point
    #[error("Bandwidth vector has length {found}, expected {expected}")]
    BandwidthLength { expected: usize, found: usize },

    /// The number of neighbours cannot be served by the point set
    #[error("Invalid number of neighbours: k = {k} for {n} points")]
    InvalidNeighbourCount { k: usize, n: usize },

    /// A neighbour index points outside of the point set
    #[error("Neighbour index {index} of row {row} is out of bounds for {n} points")]
    NeighbourOutOfBounds { row: usize, index: usize, n: usize },

    /// Two sparse matrices cannot be combined
    #[error("Incompatible matrix dimensions: {left:?} and {right:?}")]
    IncompatibleDims {
        left: (usize, usize),
        right: (usize, usize),
    },

    /// Evaluation of a single kernel row failed; aborts the whole construction
    #[error("Kernel evaluation failed for row {row}: {cause}")]
    RowEvaluation { row: usize, cause: String },

    /// Unknown symmetrisation method in the parameters
    #[error("Invalid graph building method: {0}")]
    InvalidGraphBuilding(String),

    /// A worker pool needs at least one thread
    #[error("The worker pool size must be at least 1")]
    InvalidPoolSize,

    /// The worker pool could not be started
    #[error(transparent)]
    ThreadPool(#[from] ThreadPoolBuildError),

    /// A synthetic data parameter is out of range
    #[error("Invalid synthetic data parameter: {0}")]
    InvalidSyntheticParams(String),

    /// Normal distribution creation failed
    #[error(transparent)]
    Normal(#[from] NormalError),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MetacellGraphError>;
