//! Error types and helper macros shared across the crate

pub mod errors;
pub mod macros;
