//! Typed record collections (§4.E), the crate's main user-facing surface:
//! CRUD plus ordered iteration over one catalog-allocated keyspace,
//! transparently reading through the batch-compaction layer and keeping
//! secondary indices in sync on every mutation.

use std::sync::{Arc, RwLock};

use crate::batch;
use crate::catalog::Catalog;
use crate::encoding::{CompressorRegistry, ValueEncoder, PLAIN_ENCODER_ID};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::index::{BuildStatus, EntryFn, Index, IndexSet, IndexSpec};
use crate::store::TxnFunc;
use crate::tuple::{self, Tuple, Value};

/// How a record's key is derived on `put` (§4.E "key function").
pub enum KeyMode<V: Send + Sync + 'static> {
    /// The caller supplies the key on every `put`.
    Pure,
    /// The key is computed from the value. `derived_keys` controls what
    /// happens when a caller-supplied key disagrees with the freshly
    /// re-derived one: `false` (the default) rejects the put with
    /// `Error::KeyMismatch`; `true` relocates the record, deleting it (and
    /// its index entries) at the supplied key and re-inserting it at the
    /// derived one (§3 "derived-keys flag", §4.E "derived keys").
    Derived { key_fn: Arc<dyn Fn(&V) -> Tuple + Send + Sync>, derived_keys: bool },
    /// The key is a fresh value from the collection's `key:<name>` counter
    /// (§4.H); `put` rejects an explicit key.
    AutoIncrement,
}

pub struct Collection<V: Send + Sync + 'static> {
    name: String,
    root_prefix: Vec<u8>,
    prefix: Vec<u8>,
    engine: Arc<dyn Engine>,
    catalog: Arc<Catalog>,
    compressors: Arc<RwLock<CompressorRegistry>>,
    value_encoder: Arc<dyn ValueEncoder<V>>,
    key_mode: KeyMode<V>,
    default_compressor_id: u64,
    indices: IndexSet<V>,
    txn_func: TxnFunc,
}

impl<V: Send + Sync + 'static> Collection<V> {
    pub fn open(
        engine: Arc<dyn Engine>,
        catalog: Arc<Catalog>,
        compressors: Arc<RwLock<CompressorRegistry>>,
        root_prefix: &[u8],
        name: &str,
        value_encoder: Arc<dyn ValueEncoder<V>>,
        key_mode: KeyMode<V>,
        txn_func: TxnFunc,
    ) -> Result<Self> {
        let descriptor = catalog.add_collection(name, None, None, Some(value_encoder.name()), None)?;
        let mut prefix = root_prefix.to_vec();
        prefix.extend(tuple::prefix_for_idx(descriptor.idx));
        Ok(Self {
            name: name.to_string(),
            root_prefix: root_prefix.to_vec(),
            prefix,
            engine,
            catalog,
            compressors,
            value_encoder,
            key_mode,
            default_compressor_id: PLAIN_ENCODER_ID,
            indices: IndexSet::default(),
            txn_func,
        })
    }

    pub fn name(&self) -> &str { &self.name }

    /// Registers a derived secondary index (§4.F), allocating its own
    /// catalog prefix as a child of this collection and backfilling entries
    /// for every record already present. Idempotent: a second call under
    /// the same name is a no-op, checked via the index's build status
    /// rather than re-running the backfill scan.
    pub fn with_index(&self, index_name: &str, entry_fn: impl Fn(&V) -> Vec<Tuple> + Send + Sync + 'static) -> Result<()> {
        if self.indices.with(index_name, |_| ()).is_some() {
            return Ok(());
        }
        let full_name = format!("{}.{}", self.name, index_name);
        let descriptor = self.catalog.add_collection(&full_name, Some(self.name.as_str()), None, None, None)?;
        let spec = IndexSpec { name: index_name.to_string(), idx: descriptor.idx, entry_fn: Arc::new(entry_fn) as EntryFn<V> };
        // Indices live beside the collection's own prefix, not nested under
        // it, so a full-collection scan never walks into index entries.
        let index = Index::new(spec, self.engine.clone(), &self.root_prefix);
        index.set_status(BuildStatus::Building);
        for (key, value) in self.scan(None, None, false, false, None)? {
            index.apply(&key, None, Some(&value))?;
        }
        index.set_status(BuildStatus::Ready);
        tracing::debug!(collection = self.name.as_str(), index = index_name, "index built");
        self.indices.push(index);
        Ok(())
    }

    fn physical_key(&self, key: &Tuple) -> Result<Vec<u8>> {
        let mut k = self.prefix.clone();
        k.extend(tuple::encode(key, false)?);
        Ok(k)
    }

    /// Resolves the key a `put` will write to. Returns the key actually used
    /// and, when a derived-keys relocation is in play, the previous key the
    /// record must be deleted out from under.
    fn resolve_key(&self, explicit: Option<Tuple>, value: &V) -> Result<(Tuple, Option<Tuple>)> {
        match &self.key_mode {
            KeyMode::Pure => Ok((explicit.ok_or_else(|| Error::ConstraintError("pure key mode requires an explicit key".into()))?, None)),
            KeyMode::Derived { key_fn, derived_keys } => {
                let derived = key_fn(value);
                match explicit {
                    None => Ok((derived, None)),
                    Some(k) if k == derived => Ok((k, None)),
                    Some(k) if *derived_keys => Ok((derived, Some(k))),
                    Some(_) => Err(Error::KeyMismatch),
                }
            }
            KeyMode::AutoIncrement => match explicit {
                Some(_) => Err(Error::ConstraintError("auto-increment key mode does not accept an explicit key".into())),
                None => {
                    // `count` returns the counter's value *before* stepping,
                    // so the first key is `init + step`, not `init`.
                    let n = self.catalog.count(&format!("key:{}", self.name), 0, 1)?;
                    Ok((vec![Value::Int((n + 1) as i128)], None))
                }
            },
        }
    }

    /// Deletes whatever record currently lives at `key`, splitting it out of
    /// a batch first and removing its index entries. A no-op if `key` is
    /// absent. Returns the value that was removed, if any.
    fn remove_physical(&self, key: &Tuple) -> Result<Option<V>> {
        let old = self.get(key)?;
        if old.is_none() {
            return Ok(None);
        }
        batch::explode_if_needed(self.engine.as_ref(), &self.prefix, key)?;
        self.engine.delete(&self.physical_key(key)?)?;
        self.indices.apply_all(key, old.as_ref(), None)?;
        Ok(old)
    }

    /// Writes `value` under `key` (or a derived/auto-increment key),
    /// compressing with `compressor_id` (defaulting to `plain`). Returns the
    /// key actually used. Splits the record back out of any batch it was
    /// folded into before overwriting it (§4.G). If `blind`, skips reading
    /// the prior record at the target key before overwriting it, so its
    /// index entries are not diffed (§4.E `blind` parameter) — appropriate
    /// when the caller already knows no prior record can exist there, e.g. a
    /// fresh auto-increment key. A derived-keys relocation (see `KeyMode`)
    /// always reads and removes the record at its previous key regardless of
    /// `blind`, since that is a distinct record location, not the same-key
    /// diff `blind` is about. The whole operation runs inside the
    /// collection's `txn_func` (§6), so its several engine calls commit as
    /// one transaction.
    pub fn put(&self, key: Option<Tuple>, value: &V, compressor_id: Option<u64>, blind: bool) -> Result<Tuple> {
        let compressor_id = compressor_id.unwrap_or(self.default_compressor_id);
        let mut written: Option<Tuple> = None;

        (self.txn_func)(&mut || {
            let (resolved_key, relocate_from) = self.resolve_key(key.clone(), value)?;

            if let Some(old_key) = &relocate_from {
                self.remove_physical(old_key)?;
            }

            let old = if blind || relocate_from.is_some() { None } else { self.get(&resolved_key)? };
            batch::explode_if_needed(self.engine.as_ref(), &self.prefix, &resolved_key)?;

            let packed = self.value_encoder.pack(value)?;
            let compressed = {
                let registry = self.compressors.read().unwrap();
                registry.get(compressor_id)?.pack(&packed)
            };
            let physical_value = batch::wrap_singleton(compressor_id, &compressed);
            self.engine.put(&self.physical_key(&resolved_key)?, &physical_value)?;
            self.indices.apply_all(&resolved_key, old.as_ref(), Some(value))?;
            written = Some(resolved_key);
            Ok(())
        })?;

        // A `txn_func` that returns `Ok(())` without the body ever running
        // to completion (e.g. an external transaction silently rolled back)
        // surfaces as an abort rather than a panic.
        written.ok_or(Error::TxnAborted)
    }

    pub fn get(&self, key: &Tuple) -> Result<Option<V>> {
        let registry = self.compressors.read().unwrap();
        match batch::find(self.engine.as_ref(), &self.prefix, key, &registry)? {
            Some(bytes) => Ok(Some(self.value_encoder.unpack(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes the record at `key`, if any, inside the collection's
    /// `txn_func` (§6), so the physical delete and its index cleanup commit
    /// as one transaction.
    pub fn delete(&self, key: &Tuple) -> Result<()> {
        (self.txn_func)(&mut || {
            self.remove_physical(key)?;
            Ok(())
        })
    }

    /// Named counter scoped to this collection (§4.H), distinct from the
    /// key-allocation counter used by `KeyMode::AutoIncrement`.
    pub fn count(&self, name: &str, init: i64, step: i64) -> Result<i64> {
        self.catalog.count(&format!("counter:{}:{}", self.name, name), init, step)
    }

    fn collection_upper_bound(&self) -> Vec<u8> {
        tuple::successor(self.prefix.clone()).unwrap_or_else(|| vec![0xFF; self.prefix.len() + 8])
    }

    /// Ordered range scan over `[start, end)` (ascending) or, when
    /// `reverse`, over `(end, start]` descending; either bound may be
    /// omitted to mean "edge of the collection". `include` makes `end`
    /// itself part of the result instead of an exclusive bound (§4.E
    /// `keys/values/items(lo, hi, reverse, include, max, prefix)`). Reads
    /// through batch records transparently, materializing decoded pairs
    /// eagerly rather than as a lazy stream, which keeps this synchronous,
    /// single-threaded layer simple (§5: only single-operation atomicity is
    /// assumed).
    pub fn scan(&self, start: Option<&Tuple>, end: Option<&Tuple>, reverse: bool, include: bool, limit: Option<usize>) -> Result<Vec<(Tuple, V)>> {
        let start_phys = match start {
            Some(k) => self.physical_key(k)?,
            None => {
                if reverse {
                    self.collection_upper_bound()
                } else {
                    self.prefix.clone()
                }
            }
        };
        let end_phys = match end {
            Some(k) => {
                let phys = self.physical_key(k)?;
                Some(if include { tuple::successor(phys.clone()).unwrap_or_else(|| vec![0xFF; phys.len() + 8]) } else { phys })
            }
            None => None,
        };

        self.scan_phys(start_phys, end_phys, reverse, limit)
    }

    /// Prefix shorthand (§4.E `prefix` parameter): every record whose key
    /// extends `prefix`, equivalent to `lo = encode(prefix, open), hi =
    /// successor(encode(prefix, open))`.
    pub fn scan_prefix(&self, prefix: &Tuple, reverse: bool, limit: Option<usize>) -> Result<Vec<(Tuple, V)>> {
        let mut lo_phys = self.prefix.clone();
        lo_phys.extend(tuple::encode(prefix, true)?);
        let hi_phys = tuple::successor(lo_phys.clone());

        let (start_phys, end_phys) = if reverse { (hi_phys.clone().unwrap_or_else(|| vec![0xFF; lo_phys.len() + 8]), Some(lo_phys)) } else { (lo_phys, hi_phys) };
        self.scan_phys(start_phys, end_phys, reverse, limit)
    }

    fn scan_phys(&self, start_phys: Vec<u8>, end_phys: Option<Vec<u8>>, reverse: bool, limit: Option<usize>) -> Result<Vec<(Tuple, V)>> {
        let registry = self.compressors.read().unwrap();
        let mut out: Vec<(Tuple, Vec<u8>)> = Vec::new();

        'outer: for item in self.engine.range(&start_phys, reverse) {
            let (k, v) = item?;
            if !k.starts_with(&self.prefix) {
                break;
            }
            let candidates = batch::decode_for_scan(&k, &v, &self.prefix, &registry)?;
            let mut ordered = candidates;
            if reverse {
                ordered.reverse();
            }
            for (member_key, payload) in ordered {
                let member_phys = self.physical_key(&member_key)?;
                if reverse {
                    if member_phys > start_phys {
                        continue;
                    }
                    if let Some(end_phys) = &end_phys {
                        if &member_phys <= end_phys {
                            break 'outer;
                        }
                    }
                } else {
                    if member_phys < start_phys {
                        continue;
                    }
                    if let Some(end_phys) = &end_phys {
                        if &member_phys >= end_phys {
                            break 'outer;
                        }
                    }
                }
                out.push((member_key, payload));
                if let Some(limit) = limit {
                    if out.len() >= limit {
                        break 'outer;
                    }
                }
            }
        }

        out.into_iter().map(|(k, bytes)| Ok((k, self.value_encoder.unpack(&bytes)?))).collect()
    }

    pub fn keys(&self, start: Option<&Tuple>, end: Option<&Tuple>, reverse: bool, include: bool, limit: Option<usize>) -> Result<Vec<Tuple>> {
        Ok(self.scan(start, end, reverse, include, limit)?.into_iter().map(|(k, _)| k).collect())
    }

    pub fn values(&self, start: Option<&Tuple>, end: Option<&Tuple>, reverse: bool, include: bool, limit: Option<usize>) -> Result<Vec<V>> {
        Ok(self.scan(start, end, reverse, include, limit)?.into_iter().map(|(_, v)| v).collect())
    }

    /// Records whose derived entry for index `index_name` equals or extends
    /// `entry_prefix`, in index order.
    pub fn find(&self, index_name: &str, entry_prefix: &Tuple) -> Result<Vec<(Tuple, V)>> {
        let keys = self
            .indices
            .with(index_name, |idx| idx.lookup(entry_prefix))
            .ok_or_else(|| Error::Other(format!("no such index '{index_name}' on collection '{}'", self.name)))??;
        keys.into_iter().map(|k| Ok((k.clone(), self.get(&k)?.expect("index entry must reference a live record")))).collect()
    }

    /// Single-result index lookup (§4.F `get`): the first record whose
    /// derived entry equals `entry`, resolved against this collection, or
    /// `Ok(None)` if no record has that entry.
    pub fn get_by_index(&self, index_name: &str, entry: &Tuple) -> Result<Option<(Tuple, V)>> {
        let key = self
            .indices
            .with(index_name, |idx| idx.get(entry))
            .ok_or_else(|| Error::Other(format!("no such index '{index_name}' on collection '{}'", self.name)))??;
        match key {
            Some(k) => {
                let value = self.get(&k)?.expect("index entry must reference a live record");
                Ok(Some((k, value)))
            }
            None => Ok(None),
        }
    }

    /// Folds consecutive records in `[lo, hi)` into batch records (§4.G).
    pub fn compact(&self, lo: &Tuple, hi: Option<&Tuple>, max_records: usize, max_bytes: usize, compressor_id: u64) -> Result<usize> {
        let registry = self.compressors.read().unwrap();
        batch::compact(self.engine.as_ref(), &self.prefix, lo, hi, max_records, max_bytes, compressor_id, &registry, None)
    }
}
