//! Small helpers shared by the cloud function crates.

pub mod chunk;

pub use chunk::chunk_str;
