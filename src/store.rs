//! Top-level wiring: ties an `Engine` to the catalog and compressor registry
//! and hands out typed `Collection`s.

use std::sync::{Arc, RwLock};

use crate::catalog::Catalog;
use crate::collection::{Collection, KeyMode};
use crate::encoding::{Compressor, CompressorRegistry, ValueEncoder};
use crate::engine::Engine;
use crate::error::Result;

/// A caller-supplied callable that opens/commits an engine transaction
/// around a collection operation's body (§6 `txn_func`), so that `put`'s or
/// `delete`'s several independent engine calls commit atomically instead of
/// each being its own implicit transaction. Invoked exactly once per
/// operation; the default (no `txn_func` configured) simply runs the body,
/// appropriate for engines with no transaction boundary narrower than a
/// single `put`/`delete`/`range` call of their own.
pub type TxnFunc = Arc<dyn Fn(&mut dyn FnMut() -> Result<()>) -> Result<()> + Send + Sync>;

fn passthrough_txn_func() -> TxnFunc { Arc::new(|body| body()) }

/// Opening knobs for a `Store`. `root_prefix` lets several independent
/// stores share one physical engine by namespacing their keyspaces.
#[derive(Clone, Default)]
pub struct StoreConfig {
    pub root_prefix: Vec<u8>,
    pub txn_func: Option<TxnFunc>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig").field("root_prefix", &self.root_prefix).field("txn_func", &self.txn_func.is_some()).finish()
    }
}

pub struct Store {
    engine: Arc<dyn Engine>,
    catalog: Arc<Catalog>,
    compressors: Arc<RwLock<CompressorRegistry>>,
    root_prefix: Vec<u8>,
    txn_func: TxnFunc,
}

impl Store {
    pub fn open(engine: Arc<dyn Engine>, config: StoreConfig) -> Result<Self> {
        tracing::info!(root_prefix_len = config.root_prefix.len(), "opening store");
        let catalog = Arc::new(Catalog::open(engine.clone(), config.root_prefix.clone())?);
        Ok(Self {
            engine,
            catalog,
            compressors: Arc::new(RwLock::new(CompressorRegistry::default())),
            root_prefix: config.root_prefix,
            txn_func: config.txn_func.unwrap_or_else(passthrough_txn_func),
        })
    }

    /// An in-memory store for tests, mirroring `SledStorageEngine::new_test`.
    pub fn open_mem() -> Result<Self> {
        Self::open(Arc::new(crate::engine::MemEngine::new()), StoreConfig::default())
    }

    #[cfg(feature = "sled-engine")]
    pub fn open_sled(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::open(Arc::new(crate::engine::SledEngine::open(path)?), StoreConfig::default())
    }

    #[cfg(feature = "sled-engine")]
    pub fn open_sled_test() -> Result<Self> {
        Self::open(Arc::new(crate::engine::SledEngine::new_test()?), StoreConfig::default())
    }

    pub fn collection<V: Send + Sync + 'static>(
        &self,
        name: &str,
        value_encoder: Arc<dyn ValueEncoder<V>>,
        key_mode: KeyMode<V>,
    ) -> Result<Collection<V>> {
        Collection::open(self.engine.clone(), self.catalog.clone(), self.compressors.clone(), &self.root_prefix, name, value_encoder, key_mode, self.txn_func.clone())
    }

    pub fn collection_names(&self) -> Vec<String> { self.catalog.collection_names() }

    /// Registers a user compressor under `name`, allocating a catalog id on
    /// first use (§4.D); idempotent for a name already registered.
    pub fn register_compressor(&self, name: &str, compressor: Arc<dyn Compressor>) -> Result<u64> {
        let descriptor = self.catalog.add_encoder(name)?;
        self.compressors.write().unwrap().register(descriptor.idx, compressor);
        Ok(descriptor.idx)
    }

    pub fn engine(&self) -> &Arc<dyn Engine> { &self.engine }
}
