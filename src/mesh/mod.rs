//! Input carriers for the externally supplied mesh tables.

pub mod block;

pub use block::{ElementBlock, MeshParts, NodeBlock};
