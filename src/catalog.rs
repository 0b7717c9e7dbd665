//! The metadata catalog (§4.D): a self-describing registry of collections,
//! counters, and encoder/compressor registrations, bootstrapped from the
//! same keyspace it describes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::encoding::{KEY_ENCODER_ID, KEY_ENCODER_NAME, PICKLE_ENCODER_ID, PICKLE_ENCODER_NAME, PLAIN_ENCODER_ID, PLAIN_ENCODER_NAME, ZLIB_ENCODER_ID, ZLIB_ENCODER_NAME};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::tuple::{self, Value};

const SUB_COLLECTIONS: u8 = 0x00;
const SUB_COUNTERS: u8 = 0x01;
const SUB_ENCODERS: u8 = 0x02;

const COLLECTIONS_IDX_COUNTER: &str = "\x00collections_idx";
const ENCODINGS_IDX_COUNTER: &str = "\x00encodings_idx";

/// First numeric prefix available to user collections/indices; 0-9 are
/// reserved for metadata (§3 Collection invariants).
const FIRST_COLLECTION_IDX: u64 = 10;
/// First id available to user-registered encoders/compressors; 1-4 are the
/// built-ins.
const FIRST_ENCODER_IDX: u64 = 5;

/// A catalog record for a collection, an index (a collection with
/// `parent` set), or an encoder/compressor registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub idx: u64,
    pub parent: Option<String>,
    pub key_scheme: Option<String>,
    pub value_scheme: Option<String>,
    pub packer_scheme: Option<String>,
}

impl Descriptor {
    fn to_tuple(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Int(self.idx as i128),
            opt_text(&self.parent),
            opt_text(&self.key_scheme),
            opt_text(&self.value_scheme),
            opt_text(&self.packer_scheme),
        ]
    }

    fn from_tuple(t: Vec<Value>) -> Result<Self> {
        let mut it = t.into_iter();
        let name = expect_text(it.next())?;
        let idx = expect_int(it.next())? as u64;
        let parent = expect_opt_text(it.next())?;
        let key_scheme = expect_opt_text(it.next())?;
        let value_scheme = expect_opt_text(it.next())?;
        let packer_scheme = expect_opt_text(it.next())?;
        Ok(Self { name, idx, parent, key_scheme, value_scheme, packer_scheme })
    }
}

fn opt_text(v: &Option<String>) -> Value { v.clone().map(Value::Text).unwrap_or(Value::Null) }

fn expect_text(v: Option<Value>) -> Result<String> {
    match v {
        Some(Value::Text(s)) => Ok(s),
        _ => Err(Error::CorruptValue("expected text in descriptor".into())),
    }
}

fn expect_int(v: Option<Value>) -> Result<i128> {
    match v {
        Some(Value::Int(i)) => Ok(i),
        _ => Err(Error::CorruptValue("expected int in descriptor".into())),
    }
}

fn expect_opt_text(v: Option<Value>) -> Result<Option<String>> {
    match v {
        Some(Value::Text(s)) => Ok(Some(s)),
        Some(Value::Null) => Ok(None),
        _ => Err(Error::CorruptValue("expected text-or-null in descriptor".into())),
    }
}

pub struct Catalog {
    engine: Arc<dyn Engine>,
    root_prefix: Vec<u8>,
    collections: RwLock<HashMap<String, Descriptor>>,
    encoders: RwLock<HashMap<String, Descriptor>>,
}

impl Catalog {
    pub fn open(engine: Arc<dyn Engine>, root_prefix: Vec<u8>) -> Result<Self> {
        let cat = Self { engine, root_prefix, collections: RwLock::new(HashMap::new()), encoders: RwLock::new(HashMap::new()) };

        for name in [KEY_ENCODER_NAME, PICKLE_ENCODER_NAME, PLAIN_ENCODER_NAME, ZLIB_ENCODER_NAME] {
            let idx = match name {
                KEY_ENCODER_NAME => KEY_ENCODER_ID,
                PICKLE_ENCODER_NAME => PICKLE_ENCODER_ID,
                PLAIN_ENCODER_NAME => PLAIN_ENCODER_ID,
                ZLIB_ENCODER_NAME => ZLIB_ENCODER_ID,
                _ => unreachable!(),
            };
            cat.encoders.write().unwrap().insert(
                name.to_string(),
                Descriptor { name: name.to_string(), idx, parent: None, key_scheme: None, value_scheme: None, packer_scheme: None },
            );
        }

        cat.load_namespace(SUB_COLLECTIONS, &cat.collections)?;
        cat.load_namespace(SUB_ENCODERS, &cat.encoders)?;
        Ok(cat)
    }

    fn load_namespace(&self, sub: u8, into: &RwLock<HashMap<String, Descriptor>>) -> Result<()> {
        let mut prefix = self.root_prefix.clone();
        prefix.push(sub);
        let mut guard = into.write().unwrap();
        for item in self.engine.range(&prefix, false) {
            let (k, v) = item?;
            if !k.starts_with(&prefix) {
                break;
            }
            let descriptor = Descriptor::from_tuple(tuple::decode(&v)?)?;
            guard.insert(descriptor.name.clone(), descriptor);
        }
        Ok(())
    }

    fn descriptor_key(&self, sub: u8, name: &str) -> Result<Vec<u8>> {
        let mut key = self.root_prefix.clone();
        key.push(sub);
        key.extend(tuple::encode(&[Value::Text(name.to_string())], false)?);
        Ok(key)
    }

    fn put_descriptor(&self, sub: u8, d: &Descriptor) -> Result<()> {
        let key = self.descriptor_key(sub, &d.name)?;
        let value = tuple::encode(&d.to_tuple(), false)?;
        self.engine.put(&key, &value)
    }

    pub fn get_collection(&self, name: &str) -> Option<Descriptor> { self.collections.read().unwrap().get(name).cloned() }

    pub fn collection_names(&self) -> Vec<String> { self.collections.read().unwrap().keys().cloned().collect() }

    /// Idempotent: allocates a fresh prefix on first use, otherwise returns
    /// the existing descriptor (§3 Lifecycle).
    pub fn add_collection(
        &self,
        name: &str,
        parent: Option<&str>,
        key_scheme: Option<&str>,
        value_scheme: Option<&str>,
        packer_scheme: Option<&str>,
    ) -> Result<Descriptor> {
        if let Some(existing) = self.get_collection(name) {
            return Ok(existing);
        }
        let idx = self.next_collection_idx()?;
        let descriptor = Descriptor {
            name: name.to_string(),
            idx,
            parent: parent.map(str::to_string),
            key_scheme: key_scheme.map(str::to_string),
            value_scheme: value_scheme.map(str::to_string),
            packer_scheme: packer_scheme.map(str::to_string),
        };
        self.put_descriptor(SUB_COLLECTIONS, &descriptor)?;
        self.collections.write().unwrap().insert(name.to_string(), descriptor.clone());
        tracing::debug!(collection = name, idx, "allocated collection prefix");
        Ok(descriptor)
    }

    pub fn get_encoder(&self, name: &str) -> Option<Descriptor> { self.encoders.read().unwrap().get(name).cloned() }

    pub fn encoder_id_for_name(&self, name: &str) -> Result<u64> {
        self.get_encoder(name).map(|d| d.idx).ok_or_else(|| Error::Other(format!("encoder '{name}' not registered")))
    }

    pub fn encoder_name_for_id(&self, id: u64) -> Option<String> {
        self.encoders.read().unwrap().values().find(|d| d.idx == id).map(|d| d.name.clone())
    }

    /// Idempotent registration of a user-supplied encoder/compressor name.
    /// Built-ins (ids 1-4) are never written; user names are allocated from
    /// `encodings_idx` and persisted.
    pub fn add_encoder(&self, name: &str) -> Result<Descriptor> {
        if let Some(existing) = self.get_encoder(name) {
            return Ok(existing);
        }
        let idx = self.next_encoder_idx()?;
        let descriptor = Descriptor { name: name.to_string(), idx, parent: None, key_scheme: None, value_scheme: None, packer_scheme: None };
        self.put_descriptor(SUB_ENCODERS, &descriptor)?;
        self.encoders.write().unwrap().insert(name.to_string(), descriptor.clone());
        tracing::debug!(encoder = name, idx, "allocated encoder id");
        Ok(descriptor)
    }

    fn next_collection_idx(&self) -> Result<u64> {
        let v = self.count(COLLECTIONS_IDX_COUNTER, FIRST_COLLECTION_IDX as i64, 1)?;
        Ok(v as u64)
    }

    fn next_encoder_idx(&self) -> Result<u64> {
        let v = self.count(ENCODINGS_IDX_COUNTER, FIRST_ENCODER_IDX as i64, 1)?;
        Ok(v as u64)
    }

    fn counter_key(&self, name: &str) -> Result<Vec<u8>> {
        let mut key = self.root_prefix.clone();
        key.push(SUB_COUNTERS);
        key.extend(tuple::encode(&[Value::Text(name.to_string())], false)?);
        Ok(key)
    }

    /// Atomic (within a single call) read-modify-write of a named counter:
    /// `read(name) -> v; write(name, v+step); return v` (§4.H).
    pub fn count(&self, name: &str, init: i64, step: i64) -> Result<i64> {
        let key = self.counter_key(name)?;
        let current = match self.engine.get(&key)? {
            Some(bytes) => match tuple::decode(&bytes)?.into_iter().next() {
                Some(Value::Int(i)) => i as i64,
                _ => return Err(Error::CorruptValue(format!("counter '{name}' holds a non-integer value"))),
            },
            None => init,
        };
        let next = current + step;
        self.engine.put(&key, &tuple::encode(&[Value::Int(next as i128)], false)?)?;
        Ok(current)
    }
}
