use faer::MatRef;
use rayon::prelude::*;

use crate::core::base::sparse_math::as_csr;
use crate::core::data::sparse_structures::CompressedSparseData;
use crate::core::graph::knn::{kth_neighbour_distance, squared_euclidean};
use crate::utils::errors::{MetacellGraphError, Result};

////////////////
// Structures //
////////////////

/// Per-point adaptive bandwidths
///
/// ### Fields
///
/// * `bandwidths` - Distance of each point to its `rank`-th nearest
///   neighbour. `0.0` for degenerate points.
/// * `rank` - The neighbour rank that was used (1-indexed).
/// * `degenerate` - Points without `rank` positive neighbour distances.
#[derive(Clone, Debug)]
pub struct AdaptiveBandwidths {
    pub bandwidths: Vec<f32>,
    pub rank: usize,
    pub degenerate: Vec<usize>,
}

/// One sparse row of the affinity matrix
///
/// ### Fields
///
/// * `indices` - Sorted column indices.
/// * `data` - Affinities in `(0, 1]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseRow {
    pub indices: Vec<usize>,
    pub data: Vec<f32>,
}

////////////////
// Bandwidths //
////////////////

/// Neighbour rank used for the bandwidth of a `k`-NN graph
///
/// `k / 2`, but at least the nearest neighbour.
pub fn bandwidth_rank(k: usize) -> usize {
    (k / 2).max(1)
}

/// Compute the adaptive bandwidth for every point
///
/// Uses the distance to the `k / 2`-th nearest neighbour (C-isomap style
/// radius). Rows are independent and run on the current rayon pool. Points
/// that do not have enough positive distances get a bandwidth of `0.0` and
/// are listed in `degenerate`. A CSC distance matrix is converted to CSR
/// first.
///
/// ### Params
///
/// * `distances` - Sparse kNN distance matrix.
/// * `k` - Number of neighbours the distance matrix was built with.
///
/// ### Returns
///
/// The `AdaptiveBandwidths` in point order, or an error carrying the row
/// index if a stored distance is not finite.
pub fn adaptive_bandwidths(
    distances: &CompressedSparseData<f32>,
    k: usize,
) -> Result<AdaptiveBandwidths> {
    let rank = bandwidth_rank(k);
    let distances = as_csr(distances);
    let n = distances.shape.0;

    let estimates: Vec<Option<f32>> = (0..n)
        .into_par_iter()
        .map(|i| {
            if let Some(d) = distances.row(i).1.iter().find(|d| !d.is_finite()) {
                return Err(MetacellGraphError::RowEvaluation {
                    row: i,
                    cause: format!("non-finite neighbour distance {}", d),
                });
            }
            Ok(kth_neighbour_distance(&distances, rank, i))
        })
        .collect::<Result<_>>()?;

    let degenerate = estimates
        .iter()
        .enumerate()
        .filter_map(|(i, est)| est.is_none().then_some(i))
        .collect();

    Ok(AdaptiveBandwidths {
        bandwidths: estimates.into_iter().map(|e| e.unwrap_or(0.0)).collect(),
        rank,
        degenerate,
    })
}

/////////
// RBF //
/////////

/// Adaptive Gaussian radial basis function
///
/// ```text
/// φ(r) = e^(-r² / (σᵢ σⱼ))
/// ```
///
/// Coincident points (`r² = 0`) get an affinity of exactly `1`. A
/// non-positive or non-finite `σᵢ σⱼ` (degenerate bandwidth) gives `0`.
///
/// ### Params
///
/// * `sq_dist` - Squared distance between the two points
/// * `sigma_i` - Bandwidth of the first point
/// * `sigma_j` - Bandwidth of the second point
///
/// ### Returns
///
/// The affinity in `[0, 1]`.
#[inline]
pub fn rbf_gaussian_adaptive(sq_dist: f32, sigma_i: f32, sigma_j: f32) -> f32 {
    if sq_dist == 0.0 {
        return 1.0;
    }
    let denom = sigma_i * sigma_j;
    if !(denom > 0.0 && denom.is_finite()) {
        return 0.0;
    }
    (-sq_dist / denom).exp()
}

/// Adaptive RBF kernel for one row
///
/// Evaluates `exp(-||xᵢ - xⱼ||² / (σᵢ σⱼ)) · sym[i, j]`. Only the columns in
/// the symmetrised graph can be non-zero, so only those are evaluated.
/// Values that underflow to zero are not stored.
///
/// ### Params
///
/// * `i` - Row index.
/// * `sym_graph` - Symmetrised binary kNN graph (CSR).
/// * `points` - The embedding (n × d).
/// * `bandwidths` - Adaptive bandwidth per point.
///
/// ### Returns
///
/// The `SparseRow`, or an error carrying the row index if a distance or
/// affinity is not finite.
pub fn rbf_adaptive_row(
    i: usize,
    sym_graph: &CompressedSparseData<f32>,
    points: MatRef<f32>,
    bandwidths: &[f32],
) -> Result<SparseRow> {
    let (cols, mask) = sym_graph.row(i);
    let mut row = SparseRow {
        indices: Vec::with_capacity(cols.len()),
        data: Vec::with_capacity(cols.len()),
    };

    for (&j, &m) in cols.iter().zip(mask) {
        if m == 0.0 {
            continue;
        }
        let sq_dist = squared_euclidean(points, i, j);
        if !sq_dist.is_finite() {
            return Err(MetacellGraphError::RowEvaluation {
                row: i,
                cause: format!("non-finite distance to point {}", j),
            });
        }

        let val = rbf_gaussian_adaptive(sq_dist, bandwidths[i], bandwidths[j]) * m;
        if !val.is_finite() {
            return Err(MetacellGraphError::RowEvaluation {
                row: i,
                cause: format!("non-finite affinity to point {}", j),
            });
        }
        if val > 0.0 {
            row.indices.push(j);
            row.data.push(val);
        }
    }

    Ok(row)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use faer::mat;

    #[test]
    fn test_bandwidth_rank() {
        assert_eq!(bandwidth_rank(15), 7);
        assert_eq!(bandwidth_rank(4), 2);
        assert_eq!(bandwidth_rank(1), 1);
    }

    #[test]
    fn test_rbf_gaussian_adaptive() {
        assert_eq!(rbf_gaussian_adaptive(0.0, 0.5, 2.0), 1.0);
        assert_relative_eq!(rbf_gaussian_adaptive(1.0, 1.0, 1.0), (-1.0_f32).exp());
        assert_relative_eq!(rbf_gaussian_adaptive(4.0, 1.0, 2.0), (-2.0_f32).exp());
        // symmetric in the bandwidths
        assert_eq!(
            rbf_gaussian_adaptive(3.0, 0.7, 1.3),
            rbf_gaussian_adaptive(3.0, 1.3, 0.7)
        );
    }

    #[test]
    fn test_rbf_degenerate_bandwidth() {
        assert_eq!(rbf_gaussian_adaptive(1.0, 0.0, 1.0), 0.0);
        assert_eq!(rbf_gaussian_adaptive(1.0, 0.0, 0.0), 0.0);
        assert_eq!(rbf_gaussian_adaptive(1.0, f32::INFINITY, 1.0), 0.0);
        assert_eq!(rbf_gaussian_adaptive(0.0, 0.0, 0.0), 1.0);
    }

    #[test]
    fn test_adaptive_bandwidths() {
        // row 0: distances 1, 2, 3; row 1: 0 and 4; rows 2 and 3: empty
        let distances = CompressedSparseData::new_csr(
            vec![1.0, 2.0, 3.0, 0.0, 4.0],
            vec![1, 2, 3, 0, 2],
            vec![0, 3, 5, 5, 5],
            (4, 4),
        );

        let res = adaptive_bandwidths(&distances, 4).unwrap();

        assert_eq!(res.rank, 2);
        assert_eq!(res.bandwidths, vec![2.0, 0.0, 0.0, 0.0]);
        assert_eq!(res.degenerate, vec![1, 2, 3]);

        // same matrix stored column-major
        let from_csc = adaptive_bandwidths(&distances.transform(), 4).unwrap();
        assert_eq!(from_csc.bandwidths, res.bandwidths);
        assert_eq!(from_csc.degenerate, res.degenerate);
    }

    #[test]
    fn test_adaptive_bandwidths_non_finite_distance() {
        let distances = CompressedSparseData::new_csr(
            vec![1.0, 2.0, f32::NAN, 3.0],
            vec![1, 2, 0, 2],
            vec![0, 2, 4, 4],
            (3, 3),
        );

        let err = adaptive_bandwidths(&distances, 2).unwrap_err();

        assert!(matches!(err, MetacellGraphError::RowEvaluation { row: 1, .. }));
    }

    #[test]
    fn test_rbf_adaptive_row() {
        let points = mat![[0.0_f32], [1.0], [3.0]];
        let sym = CompressedSparseData::new_csr(
            vec![1.0; 7],
            vec![0, 1, 0, 1, 2, 1, 2],
            vec![0, 2, 5, 7],
            (3, 3),
        );
        let bandwidths = vec![1.0, 1.0, 2.0];

        let row = rbf_adaptive_row(1, &sym, points.as_ref(), &bandwidths).unwrap();

        assert_eq!(row.indices, vec![0, 1, 2]);
        assert_relative_eq!(row.data[0], (-1.0_f32).exp());
        assert_eq!(row.data[1], 1.0);
        assert_relative_eq!(row.data[2], (-2.0_f32).exp());

        // point 2 is not a neighbour of point 0
        let row = rbf_adaptive_row(0, &sym, points.as_ref(), &bandwidths).unwrap();
        assert_eq!(row.indices, vec![0, 1]);
    }

    #[test]
    fn test_rbf_adaptive_row_drops_degenerate_pairs() {
        let points = mat![[0.0_f32], [1.0]];
        let sym =
            CompressedSparseData::new_csr(vec![1.0; 4], vec![0, 1, 0, 1], vec![0, 2, 4], (2, 2));

        let row = rbf_adaptive_row(0, &sym, points.as_ref(), &[0.0, 1.0]).unwrap();

        assert_eq!(row.indices, vec![0]);
        assert_eq!(row.data, vec![1.0]);
    }

    #[test]
    fn test_rbf_adaptive_row_nan_is_an_error() {
        let points = mat![[0.0_f32], [f32::NAN]];
        let sym =
            CompressedSparseData::new_csr(vec![1.0; 4], vec![0, 1, 0, 1], vec![0, 2, 4], (2, 2));

        let err = rbf_adaptive_row(0, &sym, points.as_ref(), &[1.0, 1.0]).unwrap_err();

        assert!(matches!(err, MetacellGraphError::RowEvaluation { row: 0, .. }));
    }
}
