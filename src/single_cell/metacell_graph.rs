use faer::MatRef;
use log::{log, warn, Level};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thousands::Separable;

use crate::core::base::rbf::*;
use crate::core::base::sparse_math::*;
use crate::core::data::sparse_structures::*;
use crate::core::graph::knn::*;
use crate::utils::errors::{MetacellGraphError, Result};

////////////
// Params //
////////////

/// Structure to store the metacell graph parameters
///
/// Missing fields fall back to the defaults when the parameters are
/// deserialised.
///
/// ### Fields
///
/// * `k` - Number of neighbours for the kNN graph. The adaptive bandwidth
///   of a point is the distance to its `k / 2`-th neighbour.
/// * `n_cores` - Size of the worker pool. `None` uses all available cores.
/// * `verbose` - Report progress at `info` level instead of `debug`. Has no
///   effect on the result.
/// * `graph_building` - How the kNN graph is symmetrised. One of `"union"`
///   or `"intersection"`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetacellGraphParams {
    pub k: usize,
    pub n_cores: Option<usize>,
    pub verbose: bool,
    pub graph_building: String,
}

impl Default for MetacellGraphParams {
    fn default() -> Self {
        Self {
            k: 15,
            n_cores: None,
            verbose: false,
            graph_building: "union".to_string(),
        }
    }
}

/// Summary statistics of a constructed graph
///
/// ### Fields
///
/// * `n_points` - Number of points.
/// * `n_edges` - Undirected off-diagonal edges in the symmetrised kNN graph.
/// * `nnz_similarity` - Stored entries of the similarity matrix `M`.
/// * `nnz_diffusion` - Stored entries of `M @ M^T`.
/// * `density` - `nnz_similarity / n²`.
/// * `n_degenerate` - Points whose bandwidth could not be estimated.
/// * `frobenius_norm` - Frobenius norm of `M`.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphSummary {
    pub n_points: usize,
    pub n_edges: usize,
    pub nnz_similarity: usize,
    pub nnz_diffusion: usize,
    pub density: f64,
    pub n_degenerate: usize,
    pub frobenius_norm: f32,
}

/////////////
// Helpers //
/////////////

/// Build the worker pool
///
/// ### Params
///
/// * `n_cores` - Number of threads. `None` uses the available parallelism
///   of the host.
///
/// ### Returns
///
/// A dedicated rayon `ThreadPool`.
fn build_worker_pool(n_cores: Option<usize>) -> Result<ThreadPool> {
    let n_threads = match n_cores {
        Some(0) => return Err(MetacellGraphError::InvalidPoolSize),
        Some(n) => n,
        None => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
    };

    let pool = ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .thread_name(|i| format!("metacell-graph-{}", i))
        .build()?;

    Ok(pool)
}

/// Evaluate the adaptive RBF kernel for every row
///
/// Rows are a pure function of the shared inputs and run in parallel on the
/// current rayon pool. The result is indexed by row, independent of the
/// order in which workers finish. The first failing row aborts the batch.
///
/// ### Params
///
/// * `sym_graph` - Symmetrised binary kNN graph.
/// * `points` - The embedding (n × d).
/// * `bandwidths` - Adaptive bandwidth per point.
///
/// ### Returns
///
/// One `SparseRow` per point, in point order.
pub fn compute_kernel_rows(
    sym_graph: &CompressedSparseData<f32>,
    points: MatRef<f32>,
    bandwidths: &[f32],
) -> Result<Vec<SparseRow>> {
    let n = points.nrows();
    if bandwidths.len() != n {
        return Err(MetacellGraphError::BandwidthLength {
            expected: n,
            found: bandwidths.len(),
        });
    }
    if sym_graph.shape() != (n, n) {
        return Err(MetacellGraphError::ShapeMismatch {
            what: "symmetrised kNN graph",
            expected: (n, n),
            found: sym_graph.shape(),
        });
    }

    (0..n)
        .into_par_iter()
        .map(|i| rbf_adaptive_row(i, sym_graph, points, bandwidths))
        .collect()
}

/// Assemble the similarity matrix from its rows
///
/// One-shot CSR construction: the row lengths give the index pointers
/// directly.
///
/// ### Params
///
/// * `rows` - The kernel rows, in point order.
///
/// ### Returns
///
/// The `n × n` similarity matrix `M`.
pub fn assemble_similarity(rows: Vec<SparseRow>) -> CompressedSparseData<f32> {
    let n = rows.len();
    csr_from_rows(
        rows.into_iter().map(|r| (r.indices, r.data)).collect(),
        (n, n),
    )
}

/// Two-hop diffusion graph `M @ M^T`
pub fn diffusion_graph(similarity: &CompressedSparseData<f32>) -> Result<CompressedSparseData<f32>> {
    csr_matmul_csr(similarity, &similarity.transpose_and_convert())
}

//////////
// Main //
//////////

/// Adaptive bandwidth RBF graph for metacell detection
///
/// Builds the kernel matrix consumed by kernel archetypal analysis
/// (SEACells):
///
/// 1. kNN graph on the embedding (through a `NeighbourSearch`)
/// 2. adaptive bandwidth `σᵢ` = distance to the `k / 2`-th neighbour
/// 3. symmetrisation of the kNN graph
/// 4. `M[i,j] = exp(-||xᵢ - xⱼ||² / (σᵢ σⱼ))` on the symmetrised graph
/// 5. the diffusion graph `M @ M^T`
///
/// Steps 2, 4 and 5 run on a worker pool that is owned by this structure.
///
/// ### Fields
///
/// * `points` - The embedding (n × d), e.g. a PCA or SVD projection.
/// * `n` - Number of points.
/// * `params` - Graph parameters.
/// * `symmetrisation` - Parsed `graph_building` parameter.
/// * `pool` - Worker pool for the parallel phases.
/// * `log_level` - Level of the progress messages.
/// * `bandwidths` - Adaptive bandwidths once computed.
/// * `sym_graph` - Symmetrised kNN graph once computed.
/// * `similarity` - Similarity matrix `M` once computed.
/// * `summary` - Summary of the last construction.
pub struct MetacellGraph<'a> {
    points: MatRef<'a, f32>,
    n: usize,
    params: &'a MetacellGraphParams,
    symmetrisation: KnnSymmetrisation,
    pool: ThreadPool,
    log_level: Level,
    bandwidths: Option<AdaptiveBandwidths>,
    sym_graph: Option<CompressedSparseData<f32>>,
    similarity: Option<CompressedSparseData<f32>>,
    summary: Option<GraphSummary>,
}

impl<'a> MetacellGraph<'a> {
    /// Create a new MetacellGraph instance
    ///
    /// ### Params
    ///
    /// * `points` - The embedding (n × d)
    /// * `params` - Graph parameters
    ///
    /// ### Returns
    ///
    /// New `MetacellGraph` without any computed matrices, or an error if the
    /// input is empty or the parameters are invalid.
    pub fn new(points: MatRef<'a, f32>, params: &'a MetacellGraphParams) -> Result<Self> {
        if points.nrows() == 0 {
            return Err(MetacellGraphError::EmptyInput);
        }

        let symmetrisation = parse_knn_symmetrisation(&params.graph_building)
            .ok_or_else(|| MetacellGraphError::InvalidGraphBuilding(params.graph_building.clone()))?;

        let pool = build_worker_pool(params.n_cores)?;

        let log_level = if params.verbose {
            Level::Info
        } else {
            Level::Debug
        };

        Ok(Self {
            points,
            n: points.nrows(),
            params,
            symmetrisation,
            pool,
            log_level,
            bandwidths: None,
            sym_graph: None,
            similarity: None,
            summary: None,
        })
    }

    /// Construct the adaptive bandwidth RBF kernel
    ///
    /// Runs the neighbour search with `k` from the parameters and continues
    /// with `rbf_from_knn()`.
    ///
    /// ### Params
    ///
    /// * `search` - The neighbour search to use, e.g. `ExactKnn`.
    ///
    /// ### Returns
    ///
    /// The diffusion graph `M @ M^T`.
    pub fn rbf<S>(&mut self, search: &S) -> Result<CompressedSparseData<f32>>
    where
        S: NeighbourSearch + Sync + ?Sized,
    {
        let k = self.params.k;
        if k == 0 || k >= self.n {
            return Err(MetacellGraphError::InvalidNeighbourCount { k, n: self.n });
        }

        log!(self.log_level, "Computing kNN graph with k = {}...", k);
        let start = Instant::now();

        let points = self.points;
        let knn = self.pool.install(|| search.search(points, k))?;

        log!(self.log_level, "kNN graph done in {:.2?}", start.elapsed());

        self.rbf_from_knn(&knn)
    }

    /// Construct the adaptive bandwidth RBF kernel from a precomputed kNN graph
    ///
    /// Every stage produces a new matrix; nothing is stored on `self` unless
    /// the whole construction succeeds.
    ///
    /// ### Params
    ///
    /// * `knn` - kNN graph over the same points.
    ///
    /// ### Returns
    ///
    /// The diffusion graph `M @ M^T`.
    pub fn rbf_from_knn(&mut self, knn: &KnnGraph) -> Result<CompressedSparseData<f32>> {
        knn.validate(self.n)?;
        let points = self.points;
        let start = Instant::now();

        log!(self.log_level, "Computing radius for adaptive bandwidth kernel...");
        let bandwidths = self
            .pool
            .install(|| adaptive_bandwidths(&knn.distances, knn.k))?;

        if !bandwidths.degenerate.is_empty() {
            warn!(
                "{} points have fewer than {} positive neighbour distances; their off-diagonal affinities are set to 0",
                bandwidths.degenerate.len().separate_with_underscores(),
                bandwidths.rank
            );
        }

        log!(self.log_level, "Making graph symmetric...");
        let method = self.symmetrisation;
        let sym_graph = self
            .pool
            .install(|| symmetrise_knn_graph(&knn.connectivity, method))?;

        log!(self.log_level, "Computing RBF kernel...");
        let rows = self
            .pool
            .install(|| compute_kernel_rows(&sym_graph, points, &bandwidths.bandwidths))?;

        let similarity = assemble_similarity(rows);

        log!(
            self.log_level,
            "Built kernel with {} non-zeros",
            similarity.get_nnz().separate_with_underscores()
        );

        let diffusion = self.pool.install(|| diffusion_graph(&similarity))?;

        log!(
            self.log_level,
            "Diffusion graph has {} non-zeros (total {:.2?})",
            diffusion.get_nnz().separate_with_underscores(),
            start.elapsed()
        );

        self.summary = Some(GraphSummary {
            n_points: self.n,
            n_edges: count_undirected_edges(&sym_graph),
            nnz_similarity: similarity.get_nnz(),
            nnz_diffusion: diffusion.get_nnz(),
            density: similarity.get_nnz() as f64 / (self.n as f64 * self.n as f64),
            n_degenerate: bandwidths.degenerate.len(),
            frobenius_norm: frobenius_norm(&similarity),
        });
        self.bandwidths = Some(bandwidths);
        self.sym_graph = Some(sym_graph);
        self.similarity = Some(similarity);

        Ok(diffusion)
    }

    /// Number of points
    pub fn n_points(&self) -> usize {
        self.n
    }

    /// Number of embedding dimensions
    pub fn n_dims(&self) -> usize {
        self.points.ncols()
    }

    /// Number of threads in the worker pool
    pub fn n_cores(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// The similarity matrix `M`, if constructed
    pub fn similarity_matrix(&self) -> Option<&CompressedSparseData<f32>> {
        self.similarity.as_ref()
    }

    /// The symmetrised kNN graph, if constructed
    pub fn sym_graph(&self) -> Option<&CompressedSparseData<f32>> {
        self.sym_graph.as_ref()
    }

    /// The adaptive bandwidths, if computed
    pub fn bandwidths(&self) -> Option<&AdaptiveBandwidths> {
        self.bandwidths.as_ref()
    }

    /// Summary of the last successful construction
    pub fn summary(&self) -> Option<&GraphSummary> {
        self.summary.as_ref()
    }
}

///////////
// Tests //
///////////
