//! Batch compaction (§4.G): groups several consecutive records' packed
//! values under one physical key to cut per-record key overhead for
//! rarely-mutated ranges. A batch's physical key is the *reversed* list of
//! its member keys, `TAG_SEP`-joined (§4.G rationale: a forward scan from
//! `encode([K])` lands on a batch's key iff the batch's maximum member is
//! `≥ K`, because that maximum sorts first in the reversed list). Whether a
//! physical key is a singleton or a batch is a property of the key alone —
//! one decoded tuple vs. several — never of the value.
//!
//! Keyed physical records periodically get rewritten as fewer, denser
//! records covering several logical entries each.

use crate::encoding::CompressorRegistry;
use crate::error::{Error, Result};
use crate::tuple::{self, Tuple};
use crate::varint;

/// The decoded shape of one physical record under a collection's prefix:
/// either a single logical record, or a batch covering several, in
/// ascending key order.
enum Physical {
    Singleton(Tuple),
    Batch(Vec<Tuple>),
}

fn classify(physical_key_rel: &[u8]) -> Result<Physical> {
    let mut tuples = tuple::decode_seq(physical_key_rel)?;
    if tuples.len() == 1 {
        Ok(Physical::Singleton(tuples.pop().unwrap()))
    } else {
        tuples.reverse(); // stored Kn..K1, ascending is K1..Kn
        Ok(Physical::Batch(tuples))
    }
}

fn batch_physical_key(prefix: &[u8], ascending_keys: &[Tuple]) -> Result<Vec<u8>> {
    let mut key = prefix.to_vec();
    let reversed: Vec<&[crate::tuple::Value]> = ascending_keys.iter().rev().map(|t| t.as_slice()).collect();
    key.extend(tuple::encode_seq(&reversed, false)?);
    Ok(key)
}

fn singleton_physical_key(prefix: &[u8], key: &Tuple) -> Result<Vec<u8>> {
    let mut k = prefix.to_vec();
    k.extend(tuple::encode(key, false)?);
    Ok(k)
}

pub fn wrap_singleton(compressor_id: u64, packed: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(packed.len() + 9);
    varint::encode_into(compressor_id, &mut out);
    out.extend_from_slice(packed);
    out
}

pub(crate) fn unwrap_singleton(bytes: &[u8]) -> Result<(u64, &[u8])> {
    let (id, n) = varint::decode(bytes)?;
    Ok((id, &bytes[n..]))
}

struct BatchValue {
    compressor_id: u64,
    members: Vec<Vec<u8>>, // still-compressed, ascending key order
}

impl BatchValue {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        varint::encode_into(self.members.len() as u64, &mut out);
        for m in &self.members {
            varint::encode_into(m.len() as u64, &mut out);
        }
        varint::encode_into(self.compressor_id, &mut out);
        for m in &self.members {
            out.extend_from_slice(m);
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0;
        let (n, used) = varint::decode(bytes)?;
        pos += used;
        let mut lens = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (len, used) = varint::decode(&bytes[pos..])?;
            pos += used;
            lens.push(len as usize);
        }
        let (compressor_id, used) = varint::decode(&bytes[pos..])?;
        pos += used;
        let mut members = Vec::with_capacity(n as usize);
        for len in lens {
            let end = pos + len;
            members.push(bytes[pos..end].to_vec());
            pos = end;
        }
        Ok(Self { compressor_id, members })
    }
}

/// Looks up `key`'s physical record, whether stored as a standalone
/// singleton or folded into a batch. Returns the still-encoder-packed bytes
/// (after compressor decompression); callers run the value encoder on it.
pub fn find(
    engine: &dyn crate::engine::Engine,
    prefix: &[u8],
    key: &Tuple,
    compressors: &CompressorRegistry,
) -> Result<Option<Vec<u8>>> {
    let direct = singleton_physical_key(prefix, key)?;
    if let Some(v) = engine.get(&direct)? {
        let (compressor_id, payload) = unwrap_singleton(&v)?;
        return Ok(Some(compressors.get(compressor_id)?.unpack(payload)?));
    }

    let mut scan_key = prefix.to_vec();
    scan_key.extend(tuple::encode(key, false)?);
    let Some(item) = engine.range(&scan_key, false).next().transpose()? else { return Ok(None) };
    let (k, v) = item;
    if !k.starts_with(prefix) {
        return Ok(None);
    }
    match classify(&k[prefix.len()..])? {
        Physical::Singleton(_) => Ok(None), // a different singleton, not ours
        Physical::Batch(members) => {
            let Some(idx) = members.iter().position(|m| m == key) else { return Ok(None) };
            let batch = BatchValue::decode(&v)?;
            let compressed = &batch.members[idx];
            Ok(Some(compressors.get(batch.compressor_id)?.unpack(compressed)?))
        }
    }
}

/// If `key` is currently folded into a batch, rewrites every member of that
/// batch as an independent singleton record and removes the batch's
/// physical key, so a subsequent `put`/`delete` can address `key` directly
/// (§4.G "on write into a batch range"). A no-op when `key` is already a
/// singleton or absent.
pub fn explode_if_needed(engine: &dyn crate::engine::Engine, prefix: &[u8], key: &Tuple) -> Result<()> {
    let direct = singleton_physical_key(prefix, key)?;
    if engine.get(&direct)?.is_some() {
        return Ok(());
    }

    let mut scan_key = prefix.to_vec();
    scan_key.extend(tuple::encode(key, false)?);
    let Some((k, v)) = engine.range(&scan_key, false).next().transpose()? else { return Ok(()) };
    if !k.starts_with(prefix) {
        return Ok(());
    }
    let Physical::Batch(members) = classify(&k[prefix.len()..])? else { return Ok(()) };
    if !members.contains(key) {
        return Ok(());
    }

    let batch = BatchValue::decode(&v)?;
    engine.delete(&k)?;
    for (member_key, compressed) in members.iter().zip(batch.members.iter()) {
        let phys = singleton_physical_key(prefix, member_key)?;
        engine.put(&phys, &wrap_singleton(batch.compressor_id, compressed))?;
    }
    Ok(())
}

/// Expands a batch's physical record into its member `(key, decompressed
/// payload)` pairs, in ascending key order, for use by range scans.
pub fn decode_batch_for_scan(key_rel: &[u8], v: &[u8], compressors: &CompressorRegistry) -> Result<Vec<(Tuple, Vec<u8>)>> {
    let Physical::Batch(members) = classify(key_rel)? else {
        return Err(Error::CorruptValue("expected a batch physical key".into()));
    };
    let batch = BatchValue::decode(v)?;
    let compressor = compressors.get(batch.compressor_id)?;
    members.into_iter().zip(batch.members.iter()).map(|(k, m)| Ok((k, compressor.unpack(m)?))).collect()
}

/// Classifies a raw `(key, value)` pair from a collection-prefixed range
/// scan, decoding it into logical `(key, still-compressed payload,
/// compressor id)` members. Used by `Collection::scan`.
pub fn decode_for_scan(k: &[u8], v: &[u8], prefix: &[u8], compressors: &CompressorRegistry) -> Result<Vec<(Tuple, Vec<u8>)>> {
    match classify(&k[prefix.len()..])? {
        Physical::Singleton(key) => {
            let (compressor_id, payload) = unwrap_singleton(v)?;
            Ok(vec![(key, compressors.get(compressor_id)?.unpack(payload)?)])
        }
        Physical::Batch(_) => decode_batch_for_scan(&k[prefix.len()..], v, compressors),
    }
}

/// Groups consecutive singleton records in `[lo, hi)` into batch records of
/// at most `max_records` members or `max_bytes` of uncompressed payload,
/// compressing each group with `compressor_id`. `same_group`, when
/// supplied, may veto joining the next record to the group in progress
/// (run-length grouping, §4.G); `None` groups purely by the size limits.
/// Never crosses an existing batch boundary. Returns the number of batch
/// records written.
#[allow(clippy::too_many_arguments)]
pub fn compact(
    engine: &dyn crate::engine::Engine,
    prefix: &[u8],
    lo: &Tuple,
    hi: Option<&Tuple>,
    max_records: usize,
    max_bytes: usize,
    compressor_id: u64,
    compressors: &CompressorRegistry,
    same_group: Option<&(dyn Fn(&Tuple, &Tuple) -> bool + Sync)>,
) -> Result<usize> {
    let start = singleton_physical_key(prefix, lo)?;
    let hi_phys = hi.map(|h| singleton_physical_key(prefix, h)).transpose()?;
    let compressor = compressors.get(compressor_id)?;

    let mut pending: Vec<(Tuple, Vec<u8>)> = Vec::new(); // (key, uncompressed encoder-packed bytes)
    let mut pending_bytes = 0usize;
    let mut written = 0usize;

    let mut flush = |pending: &mut Vec<(Tuple, Vec<u8>)>, written: &mut usize| -> Result<()> {
        if pending.len() < 2 {
            for (key, unpacked) in pending.drain(..) {
                // A lone record just ends the run; leave it as-is (it's
                // already a singleton on disk).
                let _ = (key, unpacked);
            }
            return Ok(());
        }
        let keys: Vec<Tuple> = pending.iter().map(|(k, _)| k.clone()).collect();
        let members: Vec<Vec<u8>> = pending.iter().map(|(_, v)| compressor.pack(v)).collect();
        let batch_key = batch_physical_key(prefix, &keys)?;
        let batch_value = BatchValue { compressor_id, members };
        engine.put(&batch_key, &batch_value.encode())?;
        for key in &keys {
            engine.delete(&singleton_physical_key(prefix, key)?)?;
        }
        *written += 1;
        pending.clear();
        Ok(())
    };

    for item in engine.range(&start, false) {
        let (k, v) = item?;
        if !k.starts_with(prefix) {
            break;
        }
        if let Some(hi_phys) = &hi_phys {
            if &k >= hi_phys {
                break;
            }
        }
        let rel = &k[prefix.len()..];
        let record_key = match classify(rel)? {
            Physical::Batch(_) => {
                flush(&mut pending, &mut written)?;
                pending_bytes = 0;
                continue;
            }
            Physical::Singleton(key) => key,
        };
        let (member_compressor_id, payload) = unwrap_singleton(&v)?;
        let unpacked = compressors.get(member_compressor_id)?.unpack(payload)?;

        let fits = pending.len() < max_records && pending_bytes + unpacked.len() <= max_bytes;
        let allowed = pending.last().map(|(pk, _)| same_group.map(|f| f(pk, &record_key)).unwrap_or(true)).unwrap_or(true);
        if !fits || !allowed {
            flush(&mut pending, &mut written)?;
            pending_bytes = 0;
        }
        pending_bytes += unpacked.len();
        pending.push((record_key, unpacked));
    }
    flush(&mut pending, &mut written)?;
    Ok(written)
}
