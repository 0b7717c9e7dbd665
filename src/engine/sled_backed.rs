use std::path::Path;

use super::{Engine, RangeIter};
use crate::error::{Error, Result};

/// A `sled`-backed ordered map: a single tree holds every collection's
/// physical keyspace, distinguished by their catalog-allocated prefixes.
pub struct SledEngine {
    tree: sled::Tree,
}

impl SledEngine {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path).map_err(Error::engine)?;
        let tree = db.open_tree("tuplestore").map_err(Error::engine)?;
        Ok(Self { tree })
    }

    /// Temporary, flush-free store for tests, mirroring
    /// `SledStorageEngine::new_test`.
    pub fn new_test() -> Result<Self> {
        let db = sled::Config::new().temporary(true).flush_every_ms(None).open().map_err(Error::engine)?;
        let tree = db.open_tree("tuplestore").map_err(Error::engine)?;
        Ok(Self { tree })
    }

    pub fn from_tree(tree: sled::Tree) -> Self { Self { tree } }
}

impl Engine for SledEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.tree.get(key).map_err(Error::engine)?.map(|iv| iv.to_vec())) }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.tree.insert(key, value).map_err(Error::engine)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.tree.remove(key).map_err(Error::engine)?;
        Ok(())
    }

    fn range<'a>(&'a self, start_key: &[u8], reverse: bool) -> RangeIter<'a> {
        let tree = self.tree.clone();
        if reverse {
            let iter: Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> = if start_key.is_empty() {
                Box::new(tree.range(..).rev())
            } else {
                Box::new(tree.range(..=start_key.to_vec()).rev())
            };
            Box::new(iter.map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Error::engine)))
        } else {
            let iter = tree.range(start_key.to_vec()..);
            Box::new(iter.map(|r| r.map(|(k, v)| (k.to_vec(), v.to_vec())).map_err(Error::engine)))
        }
    }

    fn txn_id(&self) -> Option<u64> { None }
}
