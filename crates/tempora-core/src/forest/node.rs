//! Node representation in a random projection tree

use serde::{Deserialize, Serialize};

use crate::simd::dot_product;

/// A node in one of the forest's trees
///
/// All trees share one node arena; trees are identified by their root index.
/// Children are always pushed before their parent, so a child's index is
/// strictly smaller than the parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Terminal bucket of item indices
    Leaf { items: Vec<u32> },

    /// Hyperplane `normal · x + offset = 0`; positive margin goes right
    Split {
        normal: Vec<f32>,
        offset: f32,
        left: u32,
        right: u32,
    },
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Signed distance of `v` from the hyperplane `normal · x + offset = 0`
#[inline]
pub(crate) fn plane_margin(normal: &[f32], offset: f32, v: &[f32]) -> f32 {
    dot_product(normal, v) + offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_and_split() {
        let leaf = Node::Leaf { items: vec![1, 2] };
        assert!(leaf.is_leaf());
        let split = Node::Split {
            normal: vec![1.0, 0.0],
            offset: -0.5,
            left: 0,
            right: 1,
        };
        assert!(!split.is_leaf());
    }

    #[test]
    fn test_plane_margin_sign() {
        let normal = [1.0, 0.0];
        assert!(plane_margin(&normal, -0.5, &[1.0, 3.0]) > 0.0);
        assert!(plane_margin(&normal, -0.5, &[0.0, 3.0]) < 0.0);
        assert_eq!(plane_margin(&normal, -0.5, &[0.5, 9.0]), 0.0);
    }
}
