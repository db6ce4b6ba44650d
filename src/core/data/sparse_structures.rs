use faer::Mat;

//////////////////////////////
// Sparse format conversion //
//////////////////////////////

/// Type to describe the CompressedSparseFormat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedSparseFormat {
    /// CSC-formatted data
    Csc,
    /// CSR-formatted data
    Csr,
}

/// Compressed sparse matrix
///
/// Depending on `cs_type`, `indptr` points into the rows (CSR) or the columns
/// (CSC) and `indices` holds the respective minor index. All constructors in
/// this crate keep the minor indices sorted within each major slice.
///
/// ### Fields
///
/// * `data` - The non-zero values.
/// * `indices` - Minor index (column for CSR, row for CSC) of each value.
/// * `indptr` - Start position of each major slice in `data`.
/// * `cs_type` - Is the data stored in CSR or CSC.
/// * `shape` - `(nrow, ncol)` of the matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressedSparseData<T>
where
    T: Clone + Default,
{
    pub data: Vec<T>,
    pub indices: Vec<usize>,
    pub indptr: Vec<usize>,
    pub cs_type: CompressedSparseFormat,
    pub shape: (usize, usize),
}

impl<T> CompressedSparseData<T>
where
    T: Clone + Default,
{
    /// Generate a new CSC version of the matrix
    ///
    /// ### Params
    ///
    /// * `data` - The underlying data
    /// * `indices` - The index positions (in this case row indices)
    /// * `indptr` - The index pointer (in this case the column index pointers)
    /// * `shape` - `(nrow, ncol)` of the matrix
    pub fn new_csc(
        data: Vec<T>,
        indices: Vec<usize>,
        indptr: Vec<usize>,
        shape: (usize, usize),
    ) -> Self {
        Self {
            data,
            indices,
            indptr,
            cs_type: CompressedSparseFormat::Csc,
            shape,
        }
    }

    /// Generate a new CSR version of the matrix
    ///
    /// ### Params
    ///
    /// * `data` - The underlying data
    /// * `indices` - The index positions (in this case column indices)
    /// * `indptr` - The index pointer (in this case the row index pointers)
    /// * `shape` - `(nrow, ncol)` of the matrix
    pub fn new_csr(
        data: Vec<T>,
        indices: Vec<usize>,
        indptr: Vec<usize>,
        shape: (usize, usize),
    ) -> Self {
        Self {
            data,
            indices,
            indptr,
            cs_type: CompressedSparseFormat::Csr,
            shape,
        }
    }

    /// Transform from CSC to CSR or vice versa
    ///
    /// ### Returns
    ///
    /// The same matrix in the other storage format.
    pub fn transform(&self) -> Self {
        match self.cs_type {
            CompressedSparseFormat::Csc => csc_to_csr(self),
            CompressedSparseFormat::Csr => csr_to_csc(self),
        }
    }

    /// Transpose the matrix and keep the storage format
    ///
    /// A CSC matrix of `A` is bitwise the CSR matrix of `A^T`, so this is a
    /// format conversion followed by a reinterpretation of the buffers.
    ///
    /// ### Returns
    ///
    /// `A^T` in the storage format of `self`.
    pub fn transpose_and_convert(&self) -> Self {
        let converted = self.transform();
        Self {
            data: converted.data,
            indices: converted.indices,
            indptr: converted.indptr,
            cs_type: self.cs_type,
            shape: (self.shape.1, self.shape.0),
        }
    }

    /// Returns the shape of the matrix
    ///
    /// ### Returns
    ///
    /// A tuple of `(nrow, ncol)`
    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Returns the NNZ
    ///
    /// ### Returns
    ///
    /// The number of stored values
    pub fn get_nnz(&self) -> usize {
        self.data.len()
    }

    /// Number of major slices (rows for CSR, columns for CSC)
    pub fn n_major(&self) -> usize {
        self.indptr.len() - 1
    }

    /// Minor indices and values of one major slice
    ///
    /// For a CSR matrix this is row `i`.
    ///
    /// ### Params
    ///
    /// * `i` - Index of the row (CSR) or column (CSC).
    ///
    /// ### Returns
    ///
    /// Tuple of `(indices, values)`.
    pub fn row(&self, i: usize) -> (&[usize], &[T]) {
        let start = self.indptr[i];
        let end = self.indptr[i + 1];
        (&self.indices[start..end], &self.data[start..end])
    }

    /// Stored value at `(row, col)`, or `T::default()` if absent
    pub fn get(&self, row: usize, col: usize) -> T {
        let (major, minor) = match self.cs_type {
            CompressedSparseFormat::Csr => (row, col),
            CompressedSparseFormat::Csc => (col, row),
        };
        let (indices, values) = self.row(major);
        match indices.binary_search(&minor) {
            Ok(pos) => values[pos].clone(),
            Err(_) => T::default(),
        }
    }

    /// Checks whether `(row, col)` is part of the sparsity pattern
    pub fn contains(&self, row: usize, col: usize) -> bool {
        let (major, minor) = match self.cs_type {
            CompressedSparseFormat::Csr => (row, col),
            CompressedSparseFormat::Csc => (col, row),
        };
        self.row(major).0.binary_search(&minor).is_ok()
    }

    /// Sparse `n × n` identity in CSR
    pub fn identity_csr(n: usize, one: T) -> Self {
        Self::new_csr(vec![one; n], (0..n).collect(), (0..=n).collect(), (n, n))
    }

    /// To a dense faer matrix
    ///
    /// Only meant for inspection of small matrices.
    ///
    /// ### Returns
    ///
    /// Returns a dense faer matrix.
    pub fn to_dense_matrix(&self) -> Mat<T> {
        let (nrow, ncol) = self.shape;
        let mut dense = Mat::from_fn(nrow, ncol, |_, _| T::default());

        for major in 0..self.n_major() {
            let (indices, values) = self.row(major);
            for (&minor, value) in indices.iter().zip(values) {
                let (r, c) = match self.cs_type {
                    CompressedSparseFormat::Csr => (major, minor),
                    CompressedSparseFormat::Csc => (minor, major),
                };
                dense[(r, c)] = value.clone();
            }
        }

        dense
    }
}

impl CompressedSparseData<f32> {
    /// Checks if the matrix is symmetric within an absolute tolerance
    ///
    /// ### Params
    ///
    /// * `tol` - Absolute tolerance per entry.
    ///
    /// ### Returns
    ///
    /// `true` if `|A[i,j] - A[j,i]| <= tol` for every stored entry.
    pub fn is_symmetric(&self, tol: f32) -> bool {
        if self.shape.0 != self.shape.1 {
            return false;
        }
        (0..self.n_major()).all(|i| {
            let (indices, values) = self.row(i);
            indices
                .iter()
                .zip(values)
                .all(|(&j, &v)| (v - self.get(j, i)).abs() <= tol)
        })
    }
}

/// Transforms a CompressedSparseData that is CSC to CSR
///
/// ### Params
///
/// * `sparse_data` - The CompressedSparseData you want to transform
///
/// ### Returns
///
/// The same matrix stored as CSR.
pub fn csc_to_csr<T>(sparse_data: &CompressedSparseData<T>) -> CompressedSparseData<T>
where
    T: Clone + Default,
{
    let (nrow, _) = sparse_data.shape();
    let (data, indices, indptr) = swap_major(sparse_data, nrow);
    CompressedSparseData::new_csr(data, indices, indptr, sparse_data.shape())
}

/// Transform CSR stored data into CSC stored data
///
/// This version does a full memory copy of the data.
///
/// ### Params
///
/// * `sparse_data` - The CompressedSparseData you want to transform
///
/// ### Returns
///
/// The same matrix stored as CSC.
pub fn csr_to_csc<T>(sparse_data: &CompressedSparseData<T>) -> CompressedSparseData<T>
where
    T: Clone + Default,
{
    let (_, ncol) = sparse_data.shape();
    let (data, indices, indptr) = swap_major(sparse_data, ncol);
    CompressedSparseData::new_csc(data, indices, indptr, sparse_data.shape())
}

/// Counting-sort the entries by their minor index
///
/// Iterating the major slices in order keeps the new minor indices sorted.
fn swap_major<T>(
    sparse_data: &CompressedSparseData<T>,
    n_minor: usize,
) -> (Vec<T>, Vec<usize>, Vec<usize>)
where
    T: Clone + Default,
{
    let nnz = sparse_data.get_nnz();
    let mut ptr = vec![0_usize; n_minor + 1];

    for &m in &sparse_data.indices {
        ptr[m + 1] += 1;
    }
    for i in 0..n_minor {
        ptr[i + 1] += ptr[i];
    }

    let mut new_data = vec![T::default(); nnz];
    let mut new_indices = vec![0_usize; nnz];
    let mut next = ptr[..n_minor].to_vec();

    for major in 0..sparse_data.n_major() {
        for idx in sparse_data.indptr[major]..sparse_data.indptr[major + 1] {
            let minor = sparse_data.indices[idx];
            let pos = next[minor];
            new_data[pos] = sparse_data.data[idx].clone();
            new_indices[pos] = major;
            next[minor] += 1;
        }
    }

    (new_data, new_indices, ptr)
}

///////////
// Tests //
///////////

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    fn example_csr() -> CompressedSparseData<i32> {
        // [1 0 2]
        // [0 3 0]
        // [4 0 5]
        CompressedSparseData::new_csr(
            vec![1, 2, 3, 4, 5],
            vec![0, 2, 1, 0, 2],
            vec![0, 2, 3, 5],
            (3, 3),
        )
    }

    #[test]
    fn test_csc_to_csr_conversion() {
        let csc_matrix = CompressedSparseData::new_csc(
            vec![1, 4, 3, 2, 5],
            vec![0, 2, 1, 0, 2],
            vec![0, 2, 3, 5],
            (3, 3),
        );

        let csr_matrix = csc_to_csr(&csc_matrix);

        assert_eq!(csr_matrix.data, vec![1, 2, 3, 4, 5]);
        assert_eq!(csr_matrix.indices, vec![0, 2, 1, 0, 2]);
        assert_eq!(csr_matrix.indptr, vec![0, 2, 3, 5]);
        assert_eq!(csr_matrix.shape, (3, 3));
        assert_eq!(csr_matrix.cs_type, CompressedSparseFormat::Csr);
    }

    #[test]
    fn test_csr_to_csc_conversion() {
        let csc_matrix = csr_to_csc(&example_csr());

        assert_eq!(csc_matrix.data, vec![1, 4, 3, 2, 5]);
        assert_eq!(csc_matrix.indices, vec![0, 2, 1, 0, 2]);
        assert_eq!(csc_matrix.indptr, vec![0, 2, 3, 5]);
        assert_eq!(csc_matrix.cs_type, CompressedSparseFormat::Csc);
    }

    #[test]
    fn test_transpose_rectangular() {
        // [1 0 2 0]
        // [0 0 0 3]
        let csr =
            CompressedSparseData::new_csr(vec![1, 2, 3], vec![0, 2, 3], vec![0, 2, 3], (2, 4));

        let t = csr.transpose_and_convert();

        assert_eq!(t.shape(), (4, 2));
        assert_eq!(t.cs_type, CompressedSparseFormat::Csr);
        assert_eq!(t.indptr, vec![0, 1, 1, 2, 3]);
        assert_eq!(t.get(0, 0), 1);
        assert_eq!(t.get(2, 0), 2);
        assert_eq!(t.get(3, 1), 3);
        assert_eq!(t.get(1, 0), 0);
    }

    #[test]
    fn test_to_dense_and_get() {
        let csr = CompressedSparseData::new_csr(
            vec![1.0_f64, 2.0, 3.0, 4.0, 5.0],
            vec![0, 2, 1, 0, 2],
            vec![0, 2, 3, 5],
            (3, 3),
        );
        let dense = csr.to_dense_matrix();
        let expected = mat![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0], [4.0, 0.0, 5.0]];

        assert_eq!(dense, expected);
        assert_eq!(csr.get(2, 2), 5.0);
        assert!(csr.contains(0, 2));
        assert!(!csr.contains(1, 0));

        let csc = csr.transform();
        assert_eq!(csc.to_dense_matrix(), expected);
        assert_eq!(csc.get(2, 0), 4.0);
    }

    #[test]
    fn test_is_symmetric() {
        let sym = CompressedSparseData::new_csr(
            vec![1.0_f32, 0.5, 0.5, 1.0],
            vec![0, 1, 0, 1],
            vec![0, 2, 4],
            (2, 2),
        );
        let asym = CompressedSparseData::new_csr(
            vec![1.0_f32, 0.5, 1.0],
            vec![0, 1, 1],
            vec![0, 2, 3],
            (2, 2),
        );

        assert!(sym.is_symmetric(0.0));
        assert!(!asym.is_symmetric(1e-6));
    }
}
