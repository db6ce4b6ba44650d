pub mod sparse_structures;
pub mod synthetic_data;
