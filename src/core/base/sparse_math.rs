use rayon::prelude::*;
use std::borrow::Cow;

use crate::core::data::sparse_structures::*;
use crate::ensure_same_dims;
use crate::utils::errors::{MetacellGraphError, Result};

/////////////
// Helpers //
/////////////

/// Borrow a CSR matrix as is, convert a CSC one
pub fn as_csr(mat: &CompressedSparseData<f32>) -> Cow<'_, CompressedSparseData<f32>> {
    match mat.cs_type {
        CompressedSparseFormat::Csr => Cow::Borrowed(mat),
        CompressedSparseFormat::Csc => Cow::Owned(mat.transform()),
    }
}

/// Stitch independently computed CSR rows into one matrix
///
/// ### Params
///
/// * `rows` - `(column indices, values)` per row, in row order.
/// * `shape` - `(nrow, ncol)` of the result.
///
/// ### Returns
///
/// The CSR matrix.
pub fn csr_from_rows(
    rows: Vec<(Vec<usize>, Vec<f32>)>,
    shape: (usize, usize),
) -> CompressedSparseData<f32> {
    let nnz: usize = rows.iter().map(|(idx, _)| idx.len()).sum();

    let mut data = Vec::with_capacity(nnz);
    let mut indices = Vec::with_capacity(nnz);
    let mut indptr = Vec::with_capacity(rows.len() + 1);
    indptr.push(0);

    for (row_indices, row_data) in rows {
        crate::assert_same_len!(row_indices, row_data);
        indices.extend(row_indices);
        data.extend(row_data);
        indptr.push(indices.len());
    }

    CompressedSparseData::new_csr(data, indices, indptr, shape)
}

/// Merge two sorted sparse rows
///
/// `combine` receives `Some` for each side that holds the column. Results
/// equal to zero are not stored.
fn merge_rows<F>(
    (a_idx, a_val): (&[usize], &[f32]),
    (b_idx, b_val): (&[usize], &[f32]),
    combine: F,
) -> (Vec<usize>, Vec<f32>)
where
    F: Fn(Option<f32>, Option<f32>) -> f32,
{
    let mut indices = Vec::with_capacity(a_idx.len() + b_idx.len());
    let mut data = Vec::with_capacity(a_idx.len() + b_idx.len());
    let (mut p, mut q) = (0, 0);

    while p < a_idx.len() || q < b_idx.len() {
        let (col, val) = if q >= b_idx.len() || (p < a_idx.len() && a_idx[p] < b_idx[q]) {
            p += 1;
            (a_idx[p - 1], combine(Some(a_val[p - 1]), None))
        } else if p >= a_idx.len() || b_idx[q] < a_idx[p] {
            q += 1;
            (b_idx[q - 1], combine(None, Some(b_val[q - 1])))
        } else {
            p += 1;
            q += 1;
            (a_idx[p - 1], combine(Some(a_val[p - 1]), Some(b_val[q - 1])))
        };
        if val != 0.0 {
            indices.push(col);
            data.push(val);
        }
    }

    (indices, data)
}

////////////////////
// Sparse algebra //
////////////////////

/// Sparse matrix addition `A + B`
///
/// ### Params
///
/// * `a` - First matrix
/// * `b` - Second matrix
///
/// ### Returns
///
/// CSR matrix of the sum. Entries that cancel to zero are dropped.
pub fn sparse_add_csr(
    a: &CompressedSparseData<f32>,
    b: &CompressedSparseData<f32>,
) -> Result<CompressedSparseData<f32>> {
    ensure_same_dims!(a, b);
    let (a, b) = (as_csr(a), as_csr(b));

    let rows = (0..a.shape.0)
        .into_par_iter()
        .map(|i| {
            merge_rows(a.row(i), b.row(i), |x, y| {
                x.unwrap_or(0.0) + y.unwrap_or(0.0)
            })
        })
        .collect();

    Ok(csr_from_rows(rows, a.shape))
}

/// Element-wise (Hadamard) product `A ∘ B`
///
/// Only positions present in both matrices survive.
pub fn sparse_hadamard_csr(
    a: &CompressedSparseData<f32>,
    b: &CompressedSparseData<f32>,
) -> Result<CompressedSparseData<f32>> {
    ensure_same_dims!(a, b);
    let (a, b) = (as_csr(a), as_csr(b));

    let rows = (0..a.shape.0)
        .into_par_iter()
        .map(|i| {
            merge_rows(a.row(i), b.row(i), |x, y| match (x, y) {
                (Some(x), Some(y)) => x * y,
                _ => 0.0,
            })
        })
        .collect();

    Ok(csr_from_rows(rows, a.shape))
}

/// Binarise a sparse matrix
///
/// Every stored non-zero becomes `1.0`; explicit zeros are removed.
pub fn binarise_csr(mat: &CompressedSparseData<f32>) -> CompressedSparseData<f32> {
    let mat = as_csr(mat);
    let rows = (0..mat.shape.0)
        .map(|i| {
            let (idx, vals) = mat.row(i);
            idx.iter()
                .zip(vals)
                .filter(|(_, v)| **v != 0.0)
                .map(|(&j, _)| (j, 1.0_f32))
                .unzip()
        })
        .collect();

    csr_from_rows(rows, mat.shape)
}

/// Sparse matrix multiplication `A @ B`
///
/// Row-wise Gustavson product. Each row of the result is computed
/// independently on the current rayon pool with a per-thread dense
/// accumulator, so the output does not depend on the scheduling order.
///
/// ### Params
///
/// * `a` - Left matrix
/// * `b` - Right matrix
///
/// ### Returns
///
/// The CSR product with sorted column indices.
pub fn csr_matmul_csr(
    a: &CompressedSparseData<f32>,
    b: &CompressedSparseData<f32>,
) -> Result<CompressedSparseData<f32>> {
    if a.shape.1 != b.shape.0 {
        return Err(MetacellGraphError::IncompatibleDims {
            left: a.shape,
            right: b.shape,
        });
    }
    let (a, b) = (as_csr(a), as_csr(b));
    let (nrow, ncol) = (a.shape.0, b.shape.1);

    let rows: Vec<(Vec<usize>, Vec<f32>)> = (0..nrow)
        .into_par_iter()
        .map_init(
            || (vec![0_f32; ncol], vec![false; ncol]),
            |(acc, seen), i| {
                let mut touched: Vec<usize> = Vec::new();
                let (a_idx, a_val) = a.row(i);

                for (&k, &a_ik) in a_idx.iter().zip(a_val) {
                    let (b_idx, b_val) = b.row(k);
                    for (&j, &b_kj) in b_idx.iter().zip(b_val) {
                        if !seen[j] {
                            seen[j] = true;
                            touched.push(j);
                        }
                        acc[j] += a_ik * b_kj;
                    }
                }

                touched.sort_unstable();
                let mut indices = Vec::with_capacity(touched.len());
                let mut data = Vec::with_capacity(touched.len());
                for j in touched {
                    if acc[j] != 0.0 {
                        indices.push(j);
                        data.push(acc[j]);
                    }
                    acc[j] = 0.0;
                    seen[j] = false;
                }

                (indices, data)
            },
        )
        .collect();

    Ok(csr_from_rows(rows, (nrow, ncol)))
}

/// Frobenius norm of a sparse matrix
pub fn frobenius_norm(mat: &CompressedSparseData<f32>) -> f32 {
    mat.data.iter().map(|v| v * v).sum::<f32>().sqrt()
}

///////////
// Tests //
///////////
