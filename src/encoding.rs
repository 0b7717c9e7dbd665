//! Value encoders and compressors (§4.D, §6 "value encoder contract").
//!
//! Two distinct roles share one catalog id-space (§4.D: "Built-in encoders
//! (key, pickle, plain, zlib) occupy fixed ids 1..4"):
//!
//! - a **value encoder** turns a typed application value into bytes, fixed
//!   per collection at creation time (the collection owns an
//!   `Arc<dyn ValueEncoder<V>>` directly, since `V` is monomorphized and
//!   can't be recovered from a numeric id alone);
//! - a **compressor** is a bytes-to-bytes transform, selectable per `put`
//!   call (the `compressor` parameter in §4.E) and looked up by registry id
//!   at record-access time, exactly the way the catalog is consulted for
//!   everything else.
//!
//! id 2 (`pickle`) happens to varint-encode to a single byte, which is why
//! a stored `0x15` prefix byte is unambiguous between "non-negative int
//! varint" and "pickle id" contexts.

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub const KEY_ENCODER_ID: u64 = 1;
pub const PICKLE_ENCODER_ID: u64 = 2;
pub const PLAIN_ENCODER_ID: u64 = 3;
pub const ZLIB_ENCODER_ID: u64 = 4;

pub const KEY_ENCODER_NAME: &str = "key";
pub const PICKLE_ENCODER_NAME: &str = "pickle";
pub const PLAIN_ENCODER_NAME: &str = "plain";
pub const ZLIB_ENCODER_NAME: &str = "zlib";

/// bytes ⇄ typed application value, fixed per collection.
pub trait ValueEncoder<V>: Send + Sync {
    fn name(&self) -> &str;
    fn pack(&self, value: &V) -> Result<Vec<u8>>;
    fn unpack(&self, bytes: &[u8]) -> Result<V>;
}

/// The `pickle`-equivalent default structural encoder: any
/// `Serialize + DeserializeOwned` value via `bincode`.
pub struct BincodeEncoder;

impl<V: serde::Serialize + serde::de::DeserializeOwned> ValueEncoder<V> for BincodeEncoder {
    fn name(&self) -> &str { PICKLE_ENCODER_NAME }
    fn pack(&self, value: &V) -> Result<Vec<u8>> { Ok(bincode::serialize(value)?) }
    fn unpack(&self, bytes: &[u8]) -> Result<V> { Ok(bincode::deserialize(bytes)?) }
}

/// Identity encoder for collections whose value type already is bytes.
pub struct PlainEncoder;

impl ValueEncoder<Vec<u8>> for PlainEncoder {
    fn name(&self) -> &str { PLAIN_ENCODER_NAME }
    fn pack(&self, value: &Vec<u8>) -> Result<Vec<u8>> { Ok(value.clone()) }
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>> { Ok(bytes.to_vec()) }
}

/// bytes ⇄ bytes, selectable per `put` call and resolved by catalog id.
pub trait Compressor: Send + Sync {
    fn name(&self) -> &str;
    fn pack(&self, bytes: &[u8]) -> Vec<u8>;
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>>;
}

pub struct PlainCompressor;
impl Compressor for PlainCompressor {
    fn name(&self) -> &str { PLAIN_ENCODER_NAME }
    fn pack(&self, bytes: &[u8]) -> Vec<u8> { bytes.to_vec() }
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>> { Ok(bytes.to_vec()) }
}

pub struct ZlibCompressor;
impl Compressor for ZlibCompressor {
    fn name(&self) -> &str { ZLIB_ENCODER_NAME }
    fn pack(&self, bytes: &[u8]) -> Vec<u8> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(bytes).expect("writing to an in-memory encoder cannot fail");
        enc.finish().expect("finishing an in-memory encoder cannot fail")
    }
    fn unpack(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let mut dec = flate2::read::ZlibDecoder::new(bytes);
        let mut out = Vec::new();
        dec.read_to_end(&mut out).map_err(|e| Error::CorruptValue(e.to_string()))?;
        Ok(out)
    }
}

/// Runtime table mapping catalog encoder ids to live `Compressor`
/// instances. The catalog itself only tracks id/name descriptors (so it can
/// be loaded before any encoder implementations exist); this registry
/// supplies the actual behavior, populated with built-ins at `Store::open`
/// and extendable via `add_encoder`.
pub struct CompressorRegistry {
    by_id: std::collections::HashMap<u64, std::sync::Arc<dyn Compressor>>,
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        let mut by_id: std::collections::HashMap<u64, std::sync::Arc<dyn Compressor>> = std::collections::HashMap::new();
        by_id.insert(PLAIN_ENCODER_ID, std::sync::Arc::new(PlainCompressor));
        by_id.insert(ZLIB_ENCODER_ID, std::sync::Arc::new(ZlibCompressor));
        Self { by_id }
    }
}

impl CompressorRegistry {
    pub fn register(&mut self, id: u64, compressor: std::sync::Arc<dyn Compressor>) { self.by_id.insert(id, compressor); }

    pub fn get(&self, id: u64) -> Result<std::sync::Arc<dyn Compressor>> {
        self.by_id.get(&id).cloned().ok_or(Error::UnknownEncoder(id))
    }
}
