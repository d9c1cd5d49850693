//! Tempora Core: vector kernels, codecs and the ANN forest
//!
//! Everything in here is independent of years, identifiers and the on-disk
//! store layout. Those live in the `tempora` crate.
//!
//! ```
//! use tempora_core::{Forest, Metric};
//!
//! let mut forest = Forest::new_with_seed(3, Metric::Angular, 7);
//! forest.add_item(0, &[1.0, 0.0, 0.0]).unwrap();
//! forest.add_item(1, &[0.0, 1.0, 0.0]).unwrap();
//! forest.build(10).unwrap();
//!
//! let nearest = forest.nns_by_vector(&[0.9, 0.1, 0.0], 1, None).unwrap();
//! assert_eq!(nearest[0].0, 0);
//! ```

pub mod forest;
pub mod format;
pub mod metric;
pub mod simd;

pub use forest::{Forest, ForestError, ForestStats, SerializeError};
pub use format::{FormatError, VectorFormat};
pub use metric::Metric;
