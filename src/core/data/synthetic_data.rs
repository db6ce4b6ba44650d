use faer::Mat;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

use crate::utils::errors::{MetacellGraphError, Result};

////////////////
// Structures //
////////////////

/// Structure for a synthetic point cloud
///
/// ### Fields
///
/// * `points` - The embedding, one row per point.
/// * `labels` - Index of the cluster each point was drawn from.
/// * `centres` - The cluster centres, one row per cluster.
#[derive(Clone, Debug)]
pub struct SyntheticPointCloud {
    pub points: Mat<f32>,
    pub labels: Vec<usize>,
    pub centres: Mat<f32>,
}

/////////////////////
// Synthetic blobs //
/////////////////////

/// Generate isotropic Gaussian blobs
///
/// Cluster centres are drawn uniformly from `[-centre_range, centre_range]`
/// in every dimension, and the points of each cluster are normally
/// distributed around their centre with standard deviation `cluster_sd`.
/// Points are stored cluster by cluster.
///
/// ### Params
///
/// * `cluster_sizes` - Number of points per cluster.
/// * `n_dims` - Dimensionality of the embedding.
/// * `cluster_sd` - Standard deviation within a cluster.
/// * `centre_range` - Half-width of the box the centres are drawn from.
/// * `seed` - Seed for reproducibility purposes.
///
/// ### Returns
///
/// The `SyntheticPointCloud`.
pub fn generate_gaussian_blobs(
    cluster_sizes: &[usize],
    n_dims: usize,
    cluster_sd: f32,
    centre_range: f32,
    seed: u64,
) -> Result<SyntheticPointCloud> {
    if !(cluster_sd >= 0.0 && cluster_sd.is_finite()) {
        return Err(MetacellGraphError::InvalidSyntheticParams(format!(
            "cluster_sd must be finite and non-negative, got {}",
            cluster_sd
        )));
    }
    if !(centre_range >= 0.0 && centre_range.is_finite()) {
        return Err(MetacellGraphError::InvalidSyntheticParams(format!(
            "centre_range must be finite and non-negative, got {}",
            centre_range
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0_f32, cluster_sd)?;

    let n_clusters = cluster_sizes.len();
    let n_points: usize = cluster_sizes.iter().sum();

    let centres = Mat::from_fn(n_clusters, n_dims, |_, _| {
        rng.random_range(-centre_range..=centre_range)
    });

    let labels: Vec<usize> = cluster_sizes
        .iter()
        .enumerate()
        .flat_map(|(cluster, &size)| std::iter::repeat(cluster).take(size))
        .collect();

    let points = Mat::from_fn(n_points, n_dims, |i, j| {
        centres[(labels[i], j)] + noise.sample(&mut rng)
    });

    Ok(SyntheticPointCloud {
        points,
        labels,
        centres,
    })
}

///////////
// Tests //
///////////
