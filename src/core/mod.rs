//! Building blocks of the graph construction: sparse structures and
//! algebra, the kNN graph and the adaptive RBF kernel.

pub mod base;
pub mod data;
pub mod graph;
