//! An ordered, indexed, batch-compressible record store layered over any
//! sorted key/value engine.
//!
//! Records are addressed by order-preserving tuple keys (`tuple`), laid out
//! in catalog-allocated keyspaces (`catalog`), grouped into typed
//! `Collection`s with optional secondary `index`es, and transparently
//! folded into space-saving `batch` records for ranges that are rarely
//! mutated. `engine` is the seam to the underlying sorted map; `sled` is
//! wired in by default, with an in-memory engine for tests.

pub mod batch;
pub mod catalog;
pub mod collection;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod index;
pub mod store;
pub mod tuple;
mod varint;

pub use collection::{Collection, KeyMode};
pub use encoding::{BincodeEncoder, Compressor, CompressorRegistry, PlainCompressor, PlainEncoder, ValueEncoder, ZlibCompressor};
pub use engine::{Engine, MemEngine};
#[cfg(feature = "sled-engine")]
pub use engine::SledEngine;
pub use error::{Error, Result};
pub use store::{Store, StoreConfig, TxnFunc};
pub use tuple::{Tuple, Value};
