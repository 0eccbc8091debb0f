// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! The mailbox serialization format.
//!
//! Tag byte then payload; integers and floats in host byte order,
//! lengths as native `usize`. Only value types exist on the wire —
//! functions and foreign handles are rejected before encoding so a
//! worker can never capture a reference into the parent state.
//!
//! | tag | payload |
//! |-----|---------|
//! | 0   | nil, none |
//! | 1   | bool, one byte |
//! | 2   | integer, native i64 |
//! | 3   | float, native f64 |
//! | 4   | string, usize length + bytes |
//! | 5   | table, usize count + count × (key, value) |

/// Nesting bound for tables, to keep encode/decode stack use flat.
pub const MAX_DEPTH: usize = 100;

const TAG_NIL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_TABLE: u8 = 5;

/// A value in wire form.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Table(Vec<(WireValue, WireValue)>),
}

/// Wire format errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WireError {
    #[error("table nesting too deep for serialization")]
    TooDeep,
    #[error("truncated message")]
    Truncated,
    #[error("bad message tag {0}")]
    BadTag(u8),
    #[error("message string is not valid UTF-8")]
    BadString,
}

/// Encode a value into a fresh byte buffer.
pub fn encode(value: &WireValue) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::with_capacity(64);
    encode_into(value, &mut out, 0)?;
    Ok(out)
}

fn encode_into(value: &WireValue, out: &mut Vec<u8>, depth: usize) -> Result<(), WireError> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep);
    }
    match value {
        WireValue::Nil => out.push(TAG_NIL),
        WireValue::Bool(b) => {
            out.push(TAG_BOOL);
            out.push(u8::from(*b));
        }
        WireValue::Int(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_ne_bytes());
        }
        WireValue::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_ne_bytes());
        }
        WireValue::Str(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&s.len().to_ne_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        WireValue::Table(pairs) => {
            out.push(TAG_TABLE);
            out.extend_from_slice(&pairs.len().to_ne_bytes());
            for (key, value) in pairs {
                encode_into(key, out, depth + 1)?;
                encode_into(value, out, depth + 1)?;
            }
        }
    }
    Ok(())
}

/// Decode one value from `bytes`, which must hold exactly one
/// message.
pub fn decode(bytes: &[u8]) -> Result<WireValue, WireError> {
    let mut reader = Reader { bytes, pos: 0 };
    decode_from(&mut reader, 0)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated)?;
        if end > self.bytes.len() {
            return Err(WireError::Truncated);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn usize(&mut self) -> Result<usize, WireError> {
        let raw = self.take(std::mem::size_of::<usize>())?;
        Ok(usize::from_ne_bytes(raw.try_into().expect("sized read")))
    }
}

fn decode_from(reader: &mut Reader, depth: usize) -> Result<WireValue, WireError> {
    if depth > MAX_DEPTH {
        return Err(WireError::TooDeep);
    }
    match reader.byte()? {
        TAG_NIL => Ok(WireValue::Nil),
        TAG_BOOL => Ok(WireValue::Bool(reader.byte()? != 0)),
        TAG_INT => {
            let raw = reader.take(8)?;
            Ok(WireValue::Int(i64::from_ne_bytes(
                raw.try_into().expect("sized read"),
            )))
        }
        TAG_FLOAT => {
            let raw = reader.take(8)?;
            Ok(WireValue::Float(f64::from_ne_bytes(
                raw.try_into().expect("sized read"),
            )))
        }
        TAG_STRING => {
            let len = reader.usize()?;
            let raw = reader.take(len)?;
            let s = std::str::from_utf8(raw).map_err(|_| WireError::BadString)?;
            Ok(WireValue::Str(s.to_string()))
        }
        TAG_TABLE => {
            let count = reader.usize()?;
            let mut pairs = Vec::new();
            for _ in 0..count {
                let key = decode_from(reader, depth + 1)?;
                let value = decode_from(reader, depth + 1)?;
                pairs.push((key, value));
            }
            Ok(WireValue::Table(pairs))
        }
        tag => Err(WireError::BadTag(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: WireValue) {
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn scalar_round_trips() {
        round_trip(WireValue::Nil);
        round_trip(WireValue::Bool(true));
        round_trip(WireValue::Bool(false));
        round_trip(WireValue::Int(0));
        round_trip(WireValue::Int(i64::MIN));
        round_trip(WireValue::Int(i64::MAX));
        round_trip(WireValue::Str(String::new()));
        round_trip(WireValue::Str("héllo wörld".to_string()));
    }

    #[test]
    fn floats_round_trip_bit_exact() {
        for f in [0.0, -0.0, 1.5, f64::MIN_POSITIVE, f64::INFINITY, 1e300] {
            let bytes = encode(&WireValue::Float(f)).unwrap();
            match decode(&bytes).unwrap() {
                WireValue::Float(g) => assert_eq!(f.to_bits(), g.to_bits()),
                other => panic!("expected float, got {other:?}"),
            }
        }
        // NaN keeps its payload too.
        let bytes = encode(&WireValue::Float(f64::NAN)).unwrap();
        match decode(&bytes).unwrap() {
            WireValue::Float(g) => assert!(g.is_nan()),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn tables_round_trip() {
        round_trip(WireValue::Table(vec![
            (WireValue::Str("a".into()), WireValue::Int(1)),
            (WireValue::Int(2), WireValue::Bool(false)),
            (
                WireValue::Str("nested".into()),
                WireValue::Table(vec![(WireValue::Str("x".into()), WireValue::Float(0.5))]),
            ),
        ]));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut value = WireValue::Int(1);
        for _ in 0..(MAX_DEPTH + 2) {
            value = WireValue::Table(vec![(WireValue::Int(0), value)]);
        }
        assert!(matches!(encode(&value), Err(WireError::TooDeep)));
    }

    #[test]
    fn truncated_input_is_rejected() {
        let bytes = encode(&WireValue::Str("hello".into())).unwrap();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(WireError::Truncated)
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(matches!(decode(&[99]), Err(WireError::BadTag(99))));
    }
}
