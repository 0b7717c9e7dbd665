//! Order-preserving, self-delimiting tuple key codec.
//!
//! Each element is prefixed with a tag byte (high bit always clear, so tags
//! never collide with escaped byte-string continuation bytes). Elements sort
//! by tag class first, then by value; the byte-string/text escaping and the
//! open/closed terminator convention make the resulting byte strings
//! self-delimiting and order-preserving at the same time.

use crate::error::{Error, Result};
use crate::varint;

pub const TAG_NULL: u8 = 0x0F;
pub const TAG_NEG_INT: u8 = 0x14;
pub const TAG_NONNEG_INT: u8 = 0x15;
pub const TAG_BOOL: u8 = 0x1E;
pub const TAG_BYTES: u8 = 0x28;
pub const TAG_TEXT: u8 = 0x32;
pub const TAG_UUID: u8 = 0x5A;
pub const TAG_SEP: u8 = 0x66;

/// A single element of the primitive value domain (§3). Floats are
/// deliberately absent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Value {
    Null,
    /// Magnitude bounded to `±(2^64 - 1)`.
    Int(i128),
    Bool(bool),
    Bytes(Vec<u8>),
    Text(String),
    Uuid(uuid::Uuid),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Uuid(_) => "uuid",
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Value::Int(v as i128) }
}
impl From<u64> for Value {
    fn from(v: u64) -> Self { Value::Int(v as i128) }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self { Value::Bool(v) }
}
impl From<String> for Value {
    fn from(v: String) -> Self { Value::Text(v) }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self { Value::Text(v.to_string()) }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self { Value::Bytes(v) }
}
impl From<uuid::Uuid> for Value {
    fn from(v: uuid::Uuid) -> Self { Value::Uuid(v) }
}

pub type Tuple = Vec<Value>;

/// The physical key prefix for a catalog-allocated numeric `idx` (§3): a
/// bare varint, not a tagged tuple element, so it can never collide with a
/// key element's tag byte range and stays as short as possible.
pub fn prefix_for_idx(idx: u64) -> Vec<u8> { varint::encode(idx) }

/// Encodes one element. `open` only has effect on byte-string/text elements
/// (omits the terminator); callers must only pass `open = true` for the
/// final element of the final tuple in an encoding.
fn encode_element(v: &Value, open: bool, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Value::Null => out.push(TAG_NULL),
        Value::Int(i) => {
            if *i < 0 {
                let magnitude = i.unsigned_abs();
                if magnitude > u64::MAX as u128 {
                    return Err(Error::TypeError(format!("integer magnitude {magnitude} exceeds the ±(2^64-1) domain")));
                }
                out.push(TAG_NEG_INT);
                // Complement against u64::MAX so that larger magnitude (more
                // negative) maps to a *smaller* varint, restoring the abstract
                // order within the single TAG_NEG_INT class. This is the
                // variable-length analogue of a DESC byte inversion trick.
                varint::encode_into(u64::MAX - magnitude as u64, out);
            } else {
                let magnitude = *i as u128;
                if magnitude > u64::MAX as u128 {
                    return Err(Error::TypeError(format!("integer {i} exceeds the ±(2^64-1) domain")));
                }
                out.push(TAG_NONNEG_INT);
                varint::encode_into(magnitude as u64, out);
            }
        }
        Value::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(if *b { 1 } else { 0 });
        }
        Value::Bytes(b) => {
            out.push(TAG_BYTES);
            escape_into(b, open, out);
        }
        Value::Text(s) => {
            out.push(TAG_TEXT);
            escape_into(s.as_bytes(), open, out);
        }
        Value::Uuid(u) => {
            out.push(TAG_UUID);
            out.extend_from_slice(u.as_bytes());
        }
    }
    Ok(())
}

/// 0x00 -> 0x01 0x01, 0x01 -> 0x01 0x02, terminated by a literal 0x00 unless
/// `open`. Order-preserving: original 0x00 < 0x01 < 0x02.. maps to
/// 0x01 0x01 < 0x01 0x02 < 0x02.. (property 5).
fn escape_into(bytes: &[u8], open: bool, out: &mut Vec<u8>) {
    for &b in bytes {
        match b {
            0x00 => out.extend_from_slice(&[0x01, 0x01]),
            0x01 => out.extend_from_slice(&[0x01, 0x02]),
            _ => out.push(b),
        }
    }
    if !open {
        out.push(0x00);
    }
}

fn unescape(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        match buf[i] {
            0x00 => return Ok((out, i + 1)),
            0x01 => {
                let esc = *buf.get(i + 1).ok_or_else(|| Error::DecodeError("truncated escape".into()))?;
                match esc {
                    0x01 => out.push(0x00),
                    0x02 => out.push(0x01),
                    other => return Err(Error::CorruptKey(format!("invalid escape byte 0x{other:02x}"))),
                }
                i += 2;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Err(Error::DecodeError("unterminated string element".into()))
}

fn decode_element(buf: &[u8]) -> Result<(Value, usize)> {
    let tag = *buf.first().ok_or_else(|| Error::DecodeError("empty element".into()))?;
    let rest = &buf[1..];
    match tag {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_NEG_INT => {
            let (enc, n) = varint::decode(rest)?;
            let magnitude = u64::MAX - enc;
            Ok((Value::Int(-(magnitude as i128)), 1 + n))
        }
        TAG_NONNEG_INT => {
            let (v, n) = varint::decode(rest)?;
            Ok((Value::Int(v as i128), 1 + n))
        }
        TAG_BOOL => {
            let b = *rest.first().ok_or_else(|| Error::DecodeError("truncated bool".into()))?;
            Ok((Value::Bool(b != 0), 2))
        }
        TAG_BYTES => {
            let (bytes, n) = unescape(rest)?;
            Ok((Value::Bytes(bytes), 1 + n))
        }
        TAG_TEXT => {
            let (bytes, n) = unescape(rest)?;
            let s = String::from_utf8(bytes).map_err(|e| Error::CorruptKey(e.to_string()))?;
            Ok((Value::Text(s), 1 + n))
        }
        TAG_UUID => {
            if rest.len() < 16 {
                return Err(Error::DecodeError("truncated uuid".into()));
            }
            let mut u = [0u8; 16];
            u.copy_from_slice(&rest[..16]);
            Ok((Value::Uuid(uuid::Uuid::from_bytes(u)), 17))
        }
        TAG_SEP => Err(Error::CorruptKey("unexpected tuple separator".into())),
        other => Err(Error::CorruptKey(format!("unknown tag byte 0x{other:02x}"))),
    }
}

/// Encodes a single tuple. When `open` is true the final element's
/// terminator is omitted, producing a prefix suitable as an inclusive lower
/// range bound (§4.B "open vs closed encoding"). Fails with `TypeError` if
/// any integer element falls outside the ±(2^64-1) domain.
pub fn encode(tuple: &[Value], open: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, v) in tuple.iter().enumerate() {
        let last = i + 1 == tuple.len();
        encode_element(v, open && last, &mut out)?;
    }
    Ok(out)
}

/// Encodes a sequence of tuples separated by `TAG_SEP`, as used for index
/// entries (`[index_tuple, record_key]`) and batch record keys. Every tuple
/// is closed except possibly the last, controlled by `open`.
pub fn encode_seq(tuples: &[&[Value]], open: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for (i, t) in tuples.iter().enumerate() {
        let last = i + 1 == tuples.len();
        if i > 0 {
            out.push(TAG_SEP);
        }
        for (j, v) in t.iter().enumerate() {
            let last_elem = last && open && (j + 1 == t.len());
            encode_element(v, last_elem, &mut out)?;
        }
    }
    Ok(out)
}

/// Decodes a single closed tuple, requiring the whole buffer to be consumed.
pub fn decode(buf: &[u8]) -> Result<Tuple> {
    let (tuple, n) = decode_prefix(buf)?;
    if n != buf.len() {
        return Err(Error::CorruptKey("trailing bytes after tuple".into()));
    }
    Ok(tuple)
}

/// Decodes one closed tuple from the front of `buf`, stopping at a
/// `TAG_SEP` byte or end of input. Returns the tuple and bytes consumed
/// (the separator itself, if present, is not consumed).
pub fn decode_prefix(buf: &[u8]) -> Result<(Tuple, usize)> {
    let mut tuple = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if buf[pos] == TAG_SEP {
            break;
        }
        let (v, n) = decode_element(&buf[pos..])?;
        tuple.push(v);
        pos += n;
    }
    Ok((tuple, pos))
}

/// Decodes a `TAG_SEP`-joined sequence of closed tuples.
pub fn decode_seq(buf: &[u8]) -> Result<Vec<Tuple>> {
    let mut tuples = Vec::new();
    let mut pos = 0;
    loop {
        let (t, n) = decode_prefix(&buf[pos..])?;
        tuples.push(t);
        pos += n;
        if pos == buf.len() {
            return Ok(tuples);
        }
        if buf[pos] != TAG_SEP {
            return Err(Error::CorruptKey("expected tuple separator".into()));
        }
        pos += 1;
    }
}

/// Lexicographic successor of a byte string: increments as a big-endian
/// counter. Returns `None` if `key` is all-0xFF (no successor exists, i.e.
/// the upper bound is unbounded).
pub fn successor(mut key: Vec<u8>) -> Option<Vec<u8>> {
    for i in (0..key.len()).rev() {
        if key[i] != 0xFF {
            key[i] += 1;
            key.truncate(i + 1);
            return Some(key);
        }
    }
    None
}

/// Abstract comparison of two tuples per §3's ordering: element-wise by tag
/// class then value, shorter tuple sorts before a longer tuple sharing its
/// prefix. Used by tests to check the codec against the abstract model
/// independently of `memcmp`.
pub fn compare_abstract(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let c = compare_value(x, y);
        if c != std::cmp::Ordering::Equal {
            return c;
        }
    }
    a.len().cmp(&b.len())
}

fn class(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Int(i) if *i < 0 => 1,
        Value::Int(_) => 2,
        Value::Bool(false) => 3,
        Value::Bool(true) => 4,
        Value::Bytes(_) => 5,
        Value::Text(_) => 6,
        Value::Uuid(_) => 7,
    }
}

fn compare_value(a: &Value, b: &Value) -> std::cmp::Ordering {
    let (ca, cb) = (class(a), class(b));
    if ca != cb {
        return ca.cmp(&cb);
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Bytes(x), Value::Bytes(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(vs: Vec<Value>) -> Tuple { vs }

    #[test]
    fn round_trip_each_kind() {
        let cases = vec![
            t(vec![Value::Null]),
            t(vec![Value::Int(-1)]),
            t(vec![Value::Int(0)]),
            t(vec![Value::Int(i64::MAX as i128)]),
            t(vec![Value::Int(-(u64::MAX as i128))]),
            t(vec![Value::Bool(true), Value::Bool(false)]),
            t(vec![Value::Bytes(vec![0, 1, 2, 0xff])]),
            t(vec![Value::Text("hello".into())]),
            t(vec![Value::Uuid(uuid::Uuid::from_bytes([7u8; 16]))]),
        ];
        for c in cases {
            let enc = encode(&c, false).unwrap();
            assert_eq!(decode(&enc).unwrap(), c);
        }
    }

    #[test]
    fn out_of_range_integer_is_rejected() {
        assert!(matches!(encode(&[Value::Int(1i128 << 64)], false), Err(Error::TypeError(_))));
        assert!(matches!(encode(&[Value::Int(-(1i128 << 64))], false), Err(Error::TypeError(_))));
        assert!(encode(&[Value::Int(u64::MAX as i128)], false).is_ok());
        assert!(encode(&[Value::Int(-(u64::MAX as i128))], false).is_ok());
    }

    #[test]
    fn order_preservation() {
        let pairs: Vec<(Tuple, Tuple)> = vec![
            (t(vec![Value::Null]), t(vec![Value::Int(-1)])),
            (t(vec![Value::Int(-100)]), t(vec![Value::Int(-1)])),
            (t(vec![Value::Int(-1)]), t(vec![Value::Int(0)])),
            (t(vec![Value::Int(5)]), t(vec![Value::Bool(false)])),
            (t(vec![Value::Bool(false)]), t(vec![Value::Bool(true)])),
            (t(vec![Value::Bool(true)]), t(vec![Value::Bytes(vec![0])])),
            (t(vec![Value::Bytes(vec![1])]), t(vec![Value::Text("".into())])),
            (t(vec![Value::Text("a".into())]), t(vec![Value::Uuid(uuid::Uuid::from_bytes([0; 16]))])),
            (t(vec![Value::Text("a".into())]), t(vec![Value::Text("a".into()), Value::Text("b".into())])),
        ];
        for (a, b) in pairs {
            assert_eq!(compare_abstract(&a, &b), std::cmp::Ordering::Less);
            assert!(encode(&a, false).unwrap() < encode(&b, false).unwrap(), "{a:?} should encode less than {b:?}");
        }
    }

    #[test]
    fn negative_integers_sort_correctly() {
        let mut vals: Vec<i128> = vec![-1, -2, -100, -1000, -(u64::MAX as i128), -50, -9, i64::MIN as i128];
        let mut encs: Vec<Vec<u8>> = vals.iter().map(|&v| encode(&[Value::Int(v)], false).unwrap()).collect();
        let mut zipped: Vec<(i128, Vec<u8>)> = vals.drain(..).zip(encs.drain(..)).collect();
        zipped.sort_by(|a, b| a.1.cmp(&b.1));
        let sorted_vals: Vec<i128> = zipped.into_iter().map(|(v, _)| v).collect();
        let mut expected = sorted_vals.clone();
        expected.sort();
        assert_eq!(sorted_vals, expected);
    }

    #[test]
    fn prefix_match() {
        let prefix = t(vec![Value::Text("a".into())]);
        let open_enc = encode(&prefix, true).unwrap();
        let full = t(vec![Value::Text("a".into()), Value::Int(1)]);
        let full_enc = encode(&full, false).unwrap();
        assert!(full_enc.starts_with(&open_enc));

        let unrelated = t(vec![Value::Text("b".into())]);
        let unrelated_enc = encode(&unrelated, false).unwrap();
        assert!(!unrelated_enc.starts_with(&open_enc));
    }

    #[test]
    fn string_escape_examples() {
        assert_eq!(encode(&[Value::Bytes(vec![0x00])], false).unwrap(), vec![TAG_BYTES, 0x01, 0x01, 0x00]);
        assert_eq!(encode(&[Value::Bytes(vec![0x01])], false).unwrap(), vec![TAG_BYTES, 0x01, 0x02, 0x00]);
        assert_eq!(encode(&[Value::Bytes(vec![0x61])], false).unwrap(), vec![TAG_BYTES, 0x61, 0x00]);

        let mut encs = vec![
            encode(&[Value::Bytes(vec![0x00])], false).unwrap(),
            encode(&[Value::Bytes(vec![0x01])], false).unwrap(),
            encode(&[Value::Bytes(vec![0x61])], false).unwrap(),
        ];
        let sorted = {
            let mut s = encs.clone();
            s.sort();
            s
        };
        assert_eq!(encs, sorted);
        encs.clear();
    }

    #[test]
    fn multi_tuple_sequence() {
        let a = t(vec![Value::Text("idx".into())]);
        let b = t(vec![Value::Int(7)]);
        let enc = encode_seq(&[&a, &b], false).unwrap();
        let decoded = decode_seq(&enc).unwrap();
        assert_eq!(decoded, vec![a, b]);
    }

    #[test]
    fn successor_examples() {
        assert_eq!(successor(vec![0x00]), Some(vec![0x01]));
        assert_eq!(successor(vec![0x00, 0xFF]), Some(vec![0x01]));
        assert_eq!(successor(vec![0xFF, 0xFF]), None);
    }

    #[test]
    fn corrupt_tag_is_rejected() {
        assert!(decode(&[0x99]).is_err());
    }
}
