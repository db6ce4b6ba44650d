//! Single cell methods built on top of the core graph functionality,
//! specifically the affinity graph for SEACells metacells.

pub mod metacell_graph;
