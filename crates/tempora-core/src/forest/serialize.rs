//! Forest persistence
//!
//! File layout: 8-byte magic followed by a bincode-encoded [`ForestData`].
//! Saves go through a sibling `.tmp` file and a rename, so a reader never
//! observes a half-written index.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::index::Forest;
use super::node::Node;
use crate::metric::Metric;

const MAGIC: &[u8; 8] = b"TMPFRST1";

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("Invalid magic bytes (expected TMPFRST1)")]
    InvalidMagic,

    #[error("Forest has not been built")]
    NotBuilt,

    #[error("Corrupt forest: {0}")]
    Corrupt(String),
}

#[derive(Serialize, Deserialize)]
struct ForestData {
    dim: usize,
    metric: Metric,
    leaf_size: usize,
    items: Vec<f32>,
    nodes: Vec<Node>,
    roots: Vec<u32>,
}

impl Forest {
    /// Write the built forest to `writer`
    pub fn save_to_writer<W: Write>(&self, writer: W) -> Result<(), SerializeError> {
        if !self.is_built() {
            return Err(SerializeError::NotBuilt);
        }

        let data = ForestData {
            dim: self.dim(),
            metric: self.metric(),
            leaf_size: self.leaf_size(),
            items: self.raw_items().to_vec(),
            nodes: self.nodes().to_vec(),
            roots: self.roots().to_vec(),
        };

        let mut writer = BufWriter::new(writer);
        writer.write_all(MAGIC)?;
        bincode::serialize_into(&mut writer, &data)?;
        writer.flush()?;
        Ok(())
    }

    /// Atomically save the forest to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SerializeError> {
        let path = path.as_ref();
        let tmp = tmp_path(path);

        let file = File::create(&tmp)?;
        if let Err(e) = self.save_to_writer(&file) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e);
        }
        file.sync_all()?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Read a forest previously written with [`Forest::save_to_writer`]
    pub fn load_from_reader<R: Read>(reader: R) -> Result<Self, SerializeError> {
        let mut reader = BufReader::new(reader);

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SerializeError::InvalidMagic);
        }

        let data: ForestData = bincode::deserialize_from(&mut reader)?;
        if let Err(e) = validate(&data) {
            tracing::warn!("Rejecting forest: {}", e);
            return Err(e);
        }

        Ok(Forest::from_parts(
            data.dim,
            data.metric,
            data.leaf_size,
            data.items,
            data.nodes,
            data.roots,
        ))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SerializeError> {
        let file = File::open(path.as_ref())?;
        Self::load_from_reader(file)
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reject structurally invalid data before it can be searched.
///
/// Child indices must be smaller than their parent's, which rules out cycles.
fn validate(data: &ForestData) -> Result<(), SerializeError> {
    if data.dim == 0 {
        return Err(SerializeError::Corrupt("dimension is zero".into()));
    }
    if data.leaf_size == 0 {
        return Err(SerializeError::Corrupt("leaf size is zero".into()));
    }
    if data.items.len() % data.dim != 0 {
        return Err(SerializeError::Corrupt(format!(
            "{} floats is not a multiple of dimension {}",
            data.items.len(),
            data.dim
        )));
    }

    let count = data.items.len() / data.dim;
    let node_count = data.nodes.len();

    for (id, node) in data.nodes.iter().enumerate() {
        match node {
            Node::Leaf { items } => {
                if let Some(bad) = items.iter().find(|&&i| i as usize >= count) {
                    return Err(SerializeError::Corrupt(format!(
                        "leaf {} references item {} of {}",
                        id, bad, count
                    )));
                }
            }
            Node::Split {
                normal,
                left,
                right,
                ..
            } => {
                if normal.len() != data.dim {
                    return Err(SerializeError::Corrupt(format!(
                        "split {} normal has {} dims, expected {}",
                        id,
                        normal.len(),
                        data.dim
                    )));
                }
                if *left as usize >= id || *right as usize >= id {
                    return Err(SerializeError::Corrupt(format!(
                        "split {} has out-of-order children {} / {}",
                        id, left, right
                    )));
                }
            }
        }
    }

    if let Some(bad) = data.roots.iter().find(|&&r| r as usize >= node_count) {
        return Err(SerializeError::Corrupt(format!(
            "root {} out of bounds for {} nodes",
            bad, node_count
        )));
    }
    if count > 0 && data.roots.is_empty() {
        return Err(SerializeError::Corrupt("items present but no trees".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample_forest(count: usize) -> Forest {
        let mut rng = StdRng::seed_from_u64(5);
        let mut forest = Forest::new_with_seed(8, Metric::Euclidean, 11).with_leaf_size(4);
        for i in 0..count {
            let v: Vec<f32> = (0..8).map(|_| rng.gen::<f32>()).collect();
            forest.add_item(i, &v).unwrap();
        }
        forest.build(4).unwrap();
        forest
    }

    #[test]
    fn test_save_load_preserves_results() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1990.ann");

        let forest = sample_forest(100);
        forest.save(&path).unwrap();
        assert!(!dir.path().join("1990.ann.tmp").exists());

        let loaded = Forest::load(&path).unwrap();
        assert_eq!(loaded.len(), 100);
        assert_eq!(loaded.n_trees(), 4);
        assert_eq!(loaded.metric(), Metric::Euclidean);

        let query = forest.item_vector(3).unwrap().to_vec();
        let before = forest.nns_by_vector(&query, 10, Some(200)).unwrap();
        let after = loaded.nns_by_vector(&query, 10, Some(200)).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_empty_forest_round_trip() {
        let mut forest = Forest::new_with_seed(3, Metric::Angular, 0);
        forest.build(5).unwrap();

        let mut buf = Vec::new();
        forest.save_to_writer(&mut buf).unwrap();
        let loaded = Forest::load_from_reader(Cursor::new(buf)).unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.nns_by_vector(&[0.0, 0.0, 1.0], 3, None).unwrap().is_empty());
    }

    #[test]
    fn test_unbuilt_forest_is_not_saved() {
        let forest = Forest::new_with_seed(3, Metric::Angular, 0);
        let mut buf = Vec::new();
        assert!(matches!(
            forest.save_to_writer(&mut buf),
            Err(SerializeError::NotBuilt)
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let err = Forest::load_from_reader(Cursor::new(b"NOTAFRST\0\0\0\0".to_vec()));
        assert!(matches!(err, Err(SerializeError::InvalidMagic)));
    }

    #[test]
    fn test_truncated_file_fails() {
        let mut buf = Vec::new();
        sample_forest(20).save_to_writer(&mut buf).unwrap();
        buf.truncate(buf.len() / 2);
        assert!(Forest::load_from_reader(Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_rejects_cyclic_children() {
        let data = ForestData {
            dim: 2,
            metric: Metric::Angular,
            leaf_size: 1,
            items: vec![1.0, 0.0],
            nodes: vec![Node::Split {
                normal: vec![1.0, 0.0],
                offset: 0.0,
                left: 0,
                right: 0,
            }],
            roots: vec![0],
        };
        let mut buf = MAGIC.to_vec();
        bincode::serialize_into(&mut buf, &data).unwrap();

        assert!(matches!(
            Forest::load_from_reader(Cursor::new(buf)),
            Err(SerializeError::Corrupt(_))
        ));
    }

    #[test]
    fn test_rejects_leaf_out_of_bounds() {
        let data = ForestData {
            dim: 2,
            metric: Metric::Angular,
            leaf_size: 4,
            items: vec![1.0, 0.0],
            nodes: vec![Node::Leaf { items: vec![0, 9] }],
            roots: vec![0],
        };
        assert!(matches!(validate(&data), Err(SerializeError::Corrupt(_))));
    }
}
