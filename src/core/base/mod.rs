pub mod rbf;
pub mod sparse_math;
