use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use super::{Engine, RangeIter};
use crate::error::Result;

/// An in-memory ordered map, used for the crate's own tests and as a
/// reference engine implementation: a cheap, always-available, isolated
/// store per test.
#[derive(Default)]
pub struct MemEngine {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemEngine {
    pub fn new() -> Self { Self::default() }
}

impl Engine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> { Ok(self.data.read().unwrap().get(key).cloned()) }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.data.write().unwrap().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    fn range<'a>(&'a self, start_key: &[u8], reverse: bool) -> RangeIter<'a> {
        let snapshot = self.data.read().unwrap();
        let items: Vec<(Vec<u8>, Vec<u8>)> = if reverse {
            let bound = if start_key.is_empty() {
                (Bound::Unbounded, Bound::Unbounded)
            } else {
                (Bound::Unbounded, Bound::Included(start_key.to_vec()))
            };
            snapshot.range(bound).rev().map(|(k, v)| (k.clone(), v.clone())).collect()
        } else {
            snapshot.range(start_key.to_vec()..).map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        Box::new(items.into_iter().map(Ok))
    }
}
