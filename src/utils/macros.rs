///////////////////
// Matrix macros //
///////////////////

/// Return a shape error unless a sparse matrix is `n × n`.
#[macro_export]
macro_rules! ensure_square {
    ($matrix:expr, $n:expr, $what:expr) => {
        if $matrix.shape() != ($n, $n) {
            return Err($crate::utils::errors::MetacellGraphError::ShapeMismatch {
                what: $what,
                expected: ($n, $n),
                found: $matrix.shape(),
            });
        }
    };
}

/// Return a dimension error unless two sparse matrices have the same shape.
#[macro_export]
macro_rules! ensure_same_dims {
    ($matrix1:expr, $matrix2:expr) => {
        if $matrix1.shape() != $matrix2.shape() {
            return Err($crate::utils::errors::MetacellGraphError::IncompatibleDims {
                left: $matrix1.shape(),
                right: $matrix2.shape(),
            });
        }
    };
}

///////////////////
// Vector macros //
///////////////////

/// Assertion that all vectors have the same length.
#[macro_export]
macro_rules! assert_same_len {
    ($($vec:expr),+ $(,)?) => {
        {
            let lengths: Vec<usize> = vec![$($vec.len()),+];
            let first_len = lengths[0];

            if !lengths.iter().all(|&len| len == first_len) {
                panic!(
                    "Vectors have different lengths: {:?}",
                    lengths
                );
            }
        }
    };
}
