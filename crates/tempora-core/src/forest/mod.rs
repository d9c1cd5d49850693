//! Random projection forest for approximate nearest neighbor search

mod index;
mod node;
mod serialize;

pub use index::{Forest, ForestError, ForestStats, DEFAULT_LEAF_SIZE};
pub use node::Node;
pub use serialize::SerializeError;
