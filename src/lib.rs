//! Adaptive bandwidth RBF affinity graphs for metacell (SEACells) detection.
//!
//! Given a low dimensional embedding of cells, `MetacellGraph` builds a kNN
//! graph, estimates a per-cell bandwidth from the distance to the `k / 2`-th
//! neighbour, evaluates the Gaussian kernel on the symmetrised graph and
//! returns the diffusion graph `M @ M^T` as a sparse CSR matrix.
//!
//! ```no_run
//! use faer::Mat;
//! use metacell_graph::{ExactKnn, MetacellGraph, MetacellGraphParams};
//!
//! let points = Mat::<f32>::from_fn(100, 10, |i, j| ((i * 7 + j * 3) % 11) as f32);
//! let params = MetacellGraphParams::default();
//!
//! let mut graph = MetacellGraph::new(points.as_ref(), &params).unwrap();
//! let kernel = graph.rbf(&ExactKnn).unwrap();
//! ```

pub mod core;
pub mod single_cell;
pub mod utils;

pub use crate::core::data::sparse_structures::{CompressedSparseData, CompressedSparseFormat};
pub use crate::core::graph::knn::{ExactKnn, KnnGraph, KnnSymmetrisation, NeighbourSearch};
pub use crate::single_cell::metacell_graph::{GraphSummary, MetacellGraph, MetacellGraphParams};
pub use crate::utils::errors::{MetacellGraphError, Result};
