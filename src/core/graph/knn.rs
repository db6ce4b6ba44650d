use faer::MatRef;
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::core::base::sparse_math::*;
use crate::core::data::sparse_structures::*;
use crate::ensure_square;
use crate::utils::errors::{MetacellGraphError, Result};

///////////
// Enums //
///////////

/// How the directed kNN graph is made undirected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KnnSymmetrisation {
    /// Keep an edge if it exists in either direction (logical OR)
    Union,
    /// Keep an edge only if it exists in both directions (logical AND)
    Intersection,
}

/// Parsing the kNN symmetrisation
///
/// ### Params
///
/// * `s` - String to transform into `KnnSymmetrisation`
///
/// ### Returns
///
/// Returns the `KnnSymmetrisation` or `None` if unknown.
pub fn parse_knn_symmetrisation(s: &str) -> Option<KnnSymmetrisation> {
    match s.to_lowercase().as_str() {
        "union" => Some(KnnSymmetrisation::Union),
        "intersection" => Some(KnnSymmetrisation::Intersection),
        _ => None,
    }
}

////////////////
// Structures //
////////////////

/// kNN graph as handed over by a neighbour search
///
/// ### Fields
///
/// * `connectivity` - Binary `n × n` CSR matrix. Row `i` flags the `k`
///   neighbours of `i` plus the self-loop `(i, i)`.
/// * `distances` - `n × n` CSR matrix with the Euclidean distance to each
///   neighbour. No diagonal. Distances of `0` (duplicate points) are stored
///   explicitly.
/// * `k` - Number of neighbours per point.
#[derive(Clone, Debug)]
pub struct KnnGraph {
    pub connectivity: CompressedSparseData<f32>,
    pub distances: CompressedSparseData<f32>,
    pub k: usize,
}

impl KnnGraph {
    /// Build the sparse kNN graph from neighbour lists
    ///
    /// This is the layout most neighbour search libraries return: for every
    /// point a vector of neighbour indices and a matching vector of
    /// distances. Self matches in the lists are skipped.
    ///
    /// ### Params
    ///
    /// * `knn_indices` - Neighbour indices for each point.
    /// * `knn_distances` - Distances (not squared) for each neighbour.
    ///
    /// ### Returns
    ///
    /// The `KnnGraph` or an error if the lists are malformed.
    pub fn from_neighbours(knn_indices: &[Vec<usize>], knn_distances: &[Vec<f32>]) -> Result<Self> {
        let n = knn_indices.len();
        if n == 0 {
            return Err(MetacellGraphError::EmptyInput);
        }
        if knn_distances.len() != n {
            return Err(MetacellGraphError::ShapeMismatch {
                what: "kNN distance lists",
                expected: (n, knn_indices[0].len()),
                found: (knn_distances.len(), knn_distances.first().map_or(0, |d| d.len())),
            });
        }


        let mut conn_rows = Vec::with_capacity(n);
        let mut dist_rows = Vec::with_capacity(n);
        let mut k = 0;

        for (i, (neighbours, dists)) in knn_indices.iter().zip(knn_distances).enumerate() {
            if neighbours.len() != dists.len() {
                return Err(MetacellGraphError::ShapeMismatch {
                    what: "kNN row",
                    expected: (1, neighbours.len()),
                    found: (1, dists.len()),
                });
            }

            let mut pairs: Vec<(usize, f32)> = Vec::with_capacity(neighbours.len());
            for (&j, &d) in neighbours.iter().zip(dists) {
                if j >= n {
                    return Err(MetacellGraphError::NeighbourOutOfBounds {
                        row: i,
                        index: j,
                        n,
                    });
                }
                if j != i {
                    pairs.push((j, d));
                }
            }
            pairs.sort_by_key(|&(j, _)| j);
            pairs.dedup_by_key(|&mut (j, _)| j);

            let (dist_idx, dist_val): (Vec<usize>, Vec<f32>) = pairs.iter().copied().unzip();
            // self matches and duplicates do not count towards k
            k = k.max(dist_idx.len());

            let mut conn_idx = dist_idx.clone();
            let pos = conn_idx.partition_point(|&j| j < i);
            conn_idx.insert(pos, i);
            let conn_val = vec![1.0_f32; conn_idx.len()];

            conn_rows.push((conn_idx, conn_val));
            dist_rows.push((dist_idx, dist_val));
        }

        Ok(Self {
            connectivity: csr_from_rows(conn_rows, (n, n)),
            distances: csr_from_rows(dist_rows, (n, n)),
            k,
        })
    }

    /// Number of points in the graph
    pub fn n_points(&self) -> usize {
        self.connectivity.shape.0
    }

    /// Check that both matrices are `n × n` CSR matrices
    pub fn validate(&self, n: usize) -> Result<()> {
        ensure_square!(self.connectivity, n, "kNN connectivity graph");
        ensure_square!(self.distances, n, "kNN distance matrix");
        if self.k == 0 || self.k >= n {
            return Err(MetacellGraphError::InvalidNeighbourCount { k: self.k, n });
        }
        Ok(())
    }
}

//////////////////////
// Neighbour search //
//////////////////////

/// Narrow interface to a nearest neighbour search
///
/// Maps `(points, k)` to the connectivity and distance graphs. Any function
/// or closure with the signature `Fn(MatRef<f32>, usize) -> Result<KnnGraph>`
/// is a `NeighbourSearch` as well.
pub trait NeighbourSearch {
    fn search(&self, points: MatRef<f32>, k: usize) -> Result<KnnGraph>;
}

impl<F> NeighbourSearch for F
where
    F: Fn(MatRef<f32>, usize) -> Result<KnnGraph>,
{
    fn search(&self, points: MatRef<f32>, k: usize) -> Result<KnnGraph> {
        self(points, k)
    }
}

/// Helper struct for kNN with heap
///
/// Ordered by squared distance and then by index, so ties are resolved
/// deterministically in favour of the lower index.
#[derive(Debug)]
struct NeighbourItem {
    index: usize,
    sq_dist: f32,
}

impl Eq for NeighbourItem {}

impl PartialEq for NeighbourItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// Max-heap on the distance; the farthest retained neighbour sits on top
impl Ord for NeighbourItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sq_dist
            .total_cmp(&other.sq_dist)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for NeighbourItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Exact Euclidean kNN search
///
/// Brute force over all pairs, parallelised over the query points with
/// rayon. `O(n² · d)`; meant for small to medium data sets and as the
/// reference for approximate searches.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactKnn;

impl NeighbourSearch for ExactKnn {
    fn search(&self, points: MatRef<f32>, k: usize) -> Result<KnnGraph> {
        let n = points.nrows();
        if n == 0 {
            return Err(MetacellGraphError::EmptyInput);
        }
        if k == 0 || k >= n {
            return Err(MetacellGraphError::InvalidNeighbourCount { k, n });
        }

        let (knn_indices, knn_distances): (Vec<Vec<usize>>, Vec<Vec<f32>>) = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut heap = BinaryHeap::with_capacity(k + 1);

                for j in 0..n {
                    if i == j {
                        continue;
                    }
                    heap.push(NeighbourItem {
                        index: j,
                        sq_dist: squared_euclidean(points, i, j),
                    });
                    if heap.len() > k {
                        heap.pop();
                    }
                }

                // need to square root here, the heap works on squared distances
                let (indices, dists): (Vec<usize>, Vec<f32>) = heap
                    .into_sorted_vec()
                    .into_iter()
                    .map(|item| (item.index, item.sq_dist.sqrt()))
                    .unzip();
                (indices, dists)
            })
            .unzip();

        KnnGraph::from_neighbours(&knn_indices, &knn_distances)
    }
}

/// Squared Euclidean distance between two rows of the point matrix
#[inline]
pub fn squared_euclidean(points: MatRef<f32>, i: usize, j: usize) -> f32 {
    let mut sum = 0_f32;
    for dim in 0..points.ncols() {
        let diff = points[(i, dim)] - points[(j, dim)];
        sum += diff * diff;
    }
    sum
}

//////////////////////
// Graph operations //
//////////////////////

/// Distance to the k-th nearest neighbour of one point
///
/// Looks only at the strictly positive distances stored in row `i` and
/// selects the k-th smallest (1-indexed) with a partial sort.
///
/// ### Params
///
/// * `distances` - Sparse kNN distance matrix (CSR).
/// * `k` - Rank of the neighbour, 1-indexed.
/// * `i` - Row index.
///
/// ### Returns
///
/// The distance, or `None` if `k == 0` or the row holds fewer than `k`
/// positive distances. The caller decides how to treat that case.
pub fn kth_neighbour_distance(
    distances: &CompressedSparseData<f32>,
    k: usize,
    i: usize,
) -> Option<f32> {
    if k == 0 {
        return None;
    }
    let (_, values) = distances.row(i);
    let mut positive: Vec<f32> = values.iter().copied().filter(|&d| d > 0.0).collect();
    if positive.len() < k {
        return None;
    }
    let (_, kth, _) = positive.select_nth_unstable_by(k - 1, |a, b| a.total_cmp(b));
    Some(*kth)
}

/// Make the directed kNN connectivity graph undirected
///
/// * `Union`: `sym = (G + G^T) > 0`
/// * `Intersection`: `sym = (G ∘ G^T) > 0`
///
/// Both return a binary, symmetric CSR matrix with every self-loop set,
/// also when the input connectivity has no diagonal.
///
/// ### Params
///
/// * `connectivity` - The directed binary kNN graph.
/// * `method` - Symmetrisation method.
///
/// ### Returns
///
/// The symmetrised graph.
pub fn symmetrise_knn_graph(
    connectivity: &CompressedSparseData<f32>,
    method: KnnSymmetrisation,
) -> Result<CompressedSparseData<f32>> {
    let n = connectivity.shape.0;
    ensure_square!(connectivity, n, "kNN connectivity graph");

    let transposed = connectivity.transpose_and_convert();

    let combined = match method {
        KnnSymmetrisation::Union => sparse_add_csr(connectivity, &transposed)?,
        KnnSymmetrisation::Intersection => sparse_hadamard_csr(connectivity, &transposed)?,
    };
    let self_loops = CompressedSparseData::identity_csr(n, 1.0_f32);

    Ok(binarise_csr(&sparse_add_csr(&combined, &self_loops)?))
}

/// Count the undirected edges (off-diagonal pairs) of a symmetric graph
pub fn count_undirected_edges(graph: &CompressedSparseData<f32>) -> usize {
    let mut edges = FxHashSet::default();
    for i in 0..graph.n_major() {
        for &j in graph.row(i).0 {
            if i != j {
                edges.insert((i.min(j), i.max(j)));
            }
        }
    }
    edges.len()
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn line_points(n: usize) -> faer::Mat<f32> {
        faer::Mat::from_fn(n, 1, |i, _| i as f32)
    }

    #[test]
    fn test_parse_symmetrisation() {
        assert_eq!(
            parse_knn_symmetrisation("Union"),
            Some(KnnSymmetrisation::Union)
        );
        assert_eq!(
            parse_knn_symmetrisation("intersection"),
            Some(KnnSymmetrisation::Intersection)
        );
        assert_eq!(parse_knn_symmetrisation("xor"), None);
    }

    #[test]
    fn test_exact_knn_pairs() {
        let points = mat![[0.0_f32, 0.0], [0.0, 1.0], [10.0, 0.0], [10.0, 1.0]];

        let knn = ExactKnn.search(points.as_ref(), 1).unwrap();

        assert_eq!(knn.k, 1);
        assert_eq!(knn.distances.row(0), (&[1_usize][..], &[1.0_f32][..]));
        assert_eq!(knn.distances.row(2).0, &[3]);
        assert_eq!(knn.connectivity.row(0).0, &[0, 1]);
        assert_eq!(knn.connectivity.row(3).0, &[2, 3]);
        assert!(knn.connectivity.data.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn test_exact_knn_ties_prefer_lower_index() {
        let knn = ExactKnn.search(line_points(5).as_ref(), 2).unwrap();

        // point 2 has neighbours 1 and 3 at distance 1
        assert_eq!(knn.distances.row(2).0, &[1, 3]);
        // point 0 has neighbours 1 and 2
        assert_eq!(knn.distances.row(0), (&[1_usize, 2][..], &[1.0_f32, 2.0][..]));
    }

    #[test]
    fn test_exact_knn_rejects_bad_k() {
        let points = line_points(3);
        assert!(matches!(
            ExactKnn.search(points.as_ref(), 3),
            Err(MetacellGraphError::InvalidNeighbourCount { k: 3, n: 3 })
        ));
        assert!(matches!(
            ExactKnn.search(points.as_ref(), 0),
            Err(MetacellGraphError::InvalidNeighbourCount { .. })
        ));
    }

    fn two_point_search(_: MatRef<f32>, _: usize) -> Result<KnnGraph> {
        KnnGraph::from_neighbours(&[vec![1], vec![0]], &[vec![2.0], vec![2.0]])
    }

    #[test]
    fn test_function_as_neighbour_search() {
        let points = line_points(2);

        let knn = two_point_search.search(points.as_ref(), 1).unwrap();

        assert_eq!(knn.n_points(), 2);
        assert_eq!(knn.distances.get(1, 0), 2.0);
    }

    #[test]
    fn test_from_neighbours_validation() {
        let err = KnnGraph::from_neighbours(&[vec![5]], &[vec![1.0]]).unwrap_err();
        assert!(matches!(
            err,
            MetacellGraphError::NeighbourOutOfBounds { row: 0, index: 5, n: 1 }
        ));

        let err = KnnGraph::from_neighbours(&[vec![1], vec![0]], &[vec![1.0]]).unwrap_err();
        assert!(matches!(err, MetacellGraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_from_neighbours_keeps_zero_distances() {
        let knn = KnnGraph::from_neighbours(
            &[vec![1, 2], vec![0, 2], vec![1, 0]],
            &[vec![0.0, 3.0], vec![0.0, 3.0], vec![3.0, 3.0]],
        )
        .unwrap();

        assert_eq!(knn.distances.row(0), (&[1_usize, 2][..], &[0.0_f32, 3.0][..]));
        assert_eq!(knn.connectivity.row(0).0, &[0, 1, 2]);
        assert!(knn.validate(3).is_ok());
        assert!(matches!(
            knn.validate(4),
            Err(MetacellGraphError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_from_neighbours_self_inclusive_lists() {
        // self listed first, as many search libraries return it
        let knn = KnnGraph::from_neighbours(
            &[vec![0, 1, 2], vec![1, 0, 2], vec![2, 1, 0]],
            &[vec![0.0, 1.0, 2.0], vec![0.0, 1.0, 1.0], vec![0.0, 1.0, 2.0]],
        )
        .unwrap();

        assert_eq!(knn.k, 2);
        assert!(knn.validate(3).is_ok());
        assert_eq!(knn.distances.row(0), (&[1_usize, 2][..], &[1.0_f32, 2.0][..]));
        assert_eq!(knn.connectivity.row(1).0, &[0, 1, 2]);

        let points = line_points(6);
        let plain = ExactKnn.search(points.as_ref(), 3).unwrap();
        let (indices, dists): (Vec<Vec<usize>>, Vec<Vec<f32>>) = (0..6)
            .map(|i| {
                let (idx, val) = plain.distances.row(i);
                let mut idx = idx.to_vec();
                let mut val = val.to_vec();
                idx.insert(0, i);
                val.insert(0, 0.0);
                (idx, val)
            })
            .unzip();
        let with_self = KnnGraph::from_neighbours(&indices, &dists).unwrap();

        assert_eq!(with_self.k, 3);
        assert_eq!(with_self.distances, plain.distances);
        assert_eq!(with_self.connectivity, plain.connectivity);
    }

    #[test]
    fn test_kth_neighbour_distance() {
        let distances = CompressedSparseData::new_csr(
            vec![3.0, 0.0, 1.0, 2.0, 5.0],
            vec![0, 1, 2, 3, 4],
            vec![0, 5, 5],
            (2, 5),
        );

        assert_eq!(kth_neighbour_distance(&distances, 1, 0), Some(1.0));
        assert_eq!(kth_neighbour_distance(&distances, 2, 0), Some(2.0));
        assert_eq!(kth_neighbour_distance(&distances, 4, 0), Some(5.0));
        // explicit zero is not a neighbour distance
        assert_eq!(kth_neighbour_distance(&distances, 5, 0), None);
        assert_eq!(kth_neighbour_distance(&distances, 0, 0), None);
        // empty row
        assert_eq!(kth_neighbour_distance(&distances, 1, 1), None);
    }

    #[test]
    fn test_symmetrise_union_and_intersection() {
        // 0 -> 1, 1 -> 2, 2 -> 1 plus self-loops
        let knn = KnnGraph::from_neighbours(
            &[vec![1], vec![2], vec![1]],
            &[vec![1.0], vec![1.0], vec![1.0]],
        )
        .unwrap();

        let union = symmetrise_knn_graph(&knn.connectivity, KnnSymmetrisation::Union).unwrap();
        assert_eq!(union.row(0).0, &[0, 1]);
        assert_eq!(union.row(1).0, &[0, 1, 2]);
        assert_eq!(union.row(2).0, &[1, 2]);
        assert!(union.data.iter().all(|&v| v == 1.0));
        assert!(union.is_symmetric(0.0));
        assert_eq!(count_undirected_edges(&union), 2);

        let inter =
            symmetrise_knn_graph(&knn.connectivity, KnnSymmetrisation::Intersection).unwrap();
        assert_eq!(inter.row(0).0, &[0]);
        assert_eq!(inter.row(1).0, &[1, 2]);
        assert_eq!(inter.row(2).0, &[1, 2]);
        assert!(inter.is_symmetric(0.0));
        assert_eq!(count_undirected_edges(&inter), 1);
    }

    #[test]
    fn test_symmetrise_restores_self_loops() {
        // directed line 0 -> 1 -> 2 -> 3 without a diagonal
        let connectivity = CompressedSparseData::new_csr(
            vec![1.0_f32; 3],
            vec![1, 2, 3],
            vec![0, 1, 2, 3, 3],
            (4, 4),
        );

        for method in [KnnSymmetrisation::Union, KnnSymmetrisation::Intersection] {
            let sym = symmetrise_knn_graph(&connectivity, method).unwrap();
            for i in 0..4 {
                assert_eq!(sym.get(i, i), 1.0);
            }
            assert!(sym.data.iter().all(|&v| v == 1.0));
        }

        let union = symmetrise_knn_graph(&connectivity, KnnSymmetrisation::Union).unwrap();
        assert_eq!(union.row(1).0, &[0, 1, 2]);
        assert_eq!(union.row(3).0, &[2, 3]);
    }
}
