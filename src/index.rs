//! Secondary indices: derived, continuously-maintained mappings from an
//! entry tuple back to the owning record's key. Maintained synchronously on
//! every `put`/`delete`; a newly registered index is backfilled inline for
//! whatever records already exist rather than through an async pipeline.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, RwLock};

use crate::engine::Engine;
use crate::error::Result;
use crate::tuple::{self, Tuple};

/// Derives zero or more entry tuples from a value. Most indices derive
/// exactly one; returning several lets a single record appear under
/// multiple index entries (e.g. one per tag in a tag list).
pub type EntryFn<V> = Arc<dyn Fn(&V) -> Vec<Tuple> + Send + Sync>;

pub struct IndexSpec<V: Send + Sync + 'static> {
    pub name: String,
    pub idx: u64,
    pub entry_fn: EntryFn<V>,
}

/// An index's backfill state, tracked so `add_index` is safely idempotent
/// even though the core is otherwise single-threaded: a second registration
/// of the same name observes `Ready` (or `Building`) rather than re-running
/// the backfill scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    NotBuilt,
    Building,
    Ready,
}

/// Maintains one secondary index's physical entries:
/// `prefix(idx) ++ encode_seq([entry, record_key], closed)`. The entry
/// tuple and the owning record's key are encoded together, separator-joined
/// (§4.B multi-tuple encoding), so distinct records sharing an entry sort
/// next to each other ordered by their own key.
pub struct Index<V: Send + Sync + 'static> {
    spec: IndexSpec<V>,
    engine: Arc<dyn Engine>,
    prefix: Vec<u8>,
    status: Mutex<BuildStatus>,
}

impl<V: Send + Sync + 'static> Index<V> {
    pub fn new(spec: IndexSpec<V>, engine: Arc<dyn Engine>, root_prefix: &[u8]) -> Self {
        let mut prefix = root_prefix.to_vec();
        prefix.extend(tuple::prefix_for_idx(spec.idx));
        Self { spec, engine, prefix, status: Mutex::new(BuildStatus::NotBuilt) }
    }

    pub fn name(&self) -> &str { &self.spec.name }

    pub fn status(&self) -> BuildStatus { *self.status.lock().unwrap() }

    pub fn set_status(&self, status: BuildStatus) { *self.status.lock().unwrap() = status; }

    fn entry_key(&self, entry: &Tuple, record_key: &Tuple) -> Result<Vec<u8>> {
        let mut key = self.prefix.clone();
        key.extend(tuple::encode_seq(&[entry.as_slice(), record_key.as_slice()], false)?);
        Ok(key)
    }

    /// Applies the old-value/new-value diff of derived entries (§4.F
    /// maintenance rule): entries present before but absent after are
    /// removed, entries newly present are added. Passing `old = None`
    /// treats it as an insert; `new = None` as a delete.
    pub fn apply(&self, record_key: &Tuple, old: Option<&V>, new: Option<&V>) -> Result<()> {
        let old_entries: HashSet<Tuple> = old.map(|v| (self.spec.entry_fn)(v)).unwrap_or_default().into_iter().collect();
        let new_entries: HashSet<Tuple> = new.map(|v| (self.spec.entry_fn)(v)).unwrap_or_default().into_iter().collect();

        for entry in old_entries.difference(&new_entries) {
            self.engine.delete(&self.entry_key(entry, record_key)?)?;
        }
        for entry in new_entries.difference(&old_entries) {
            self.engine.put(&self.entry_key(entry, record_key)?, &[])?;
        }
        Ok(())
    }

    /// Returns the record keys of every record whose derived entry equals
    /// or is prefixed by `entry_prefix`, in index order.
    pub fn lookup(&self, entry_prefix: &Tuple) -> Result<Vec<Tuple>> {
        let open_enc = tuple::encode(entry_prefix, true)?;
        let mut scan_prefix = self.prefix.clone();
        scan_prefix.extend(&open_enc);

        let mut out = Vec::new();
        for item in self.engine.range(&scan_prefix, false) {
            let (k, _) = item?;
            if !k.starts_with(&self.prefix) {
                break;
            }
            let rest = &k[self.prefix.len()..];
            if !rest.starts_with(&open_enc) {
                break;
            }
            let tuples = tuple::decode_seq(rest)?;
            if let Some(record_key) = tuples.into_iter().nth(1) {
                out.push(record_key);
            }
        }
        Ok(out)
    }

    /// Single-result lookup (§4.F `get`): the first record whose derived
    /// entry equals `entry`, or `Ok(None)` if no record has that entry.
    pub fn get(&self, entry: &Tuple) -> Result<Option<Tuple>> {
        Ok(self.lookup(entry)?.into_iter().next())
    }
}

pub struct IndexSet<V: Send + Sync + 'static> {
    indices: RwLock<Vec<Index<V>>>,
}

impl<V: Send + Sync + 'static> Default for IndexSet<V> {
    fn default() -> Self { Self { indices: RwLock::new(Vec::new()) } }
}

impl<V: Send + Sync + 'static> IndexSet<V> {
    pub fn push(&self, index: Index<V>) { self.indices.write().unwrap().push(index); }

    pub fn apply_all(&self, record_key: &Tuple, old: Option<&V>, new: Option<&V>) -> Result<()> {
        for index in self.indices.read().unwrap().iter() {
            index.apply(record_key, old, new)?;
        }
        Ok(())
    }

    pub fn with<R>(&self, name: &str, f: impl FnOnce(&Index<V>) -> R) -> Option<R> {
        self.indices.read().unwrap().iter().find(|i| i.name() == name).map(f)
    }
}
