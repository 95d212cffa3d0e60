//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use std::cmp::Ordering;

/// Tag for a 16-byte binary UUID (RFC 9562 registration).
pub const TAG_UUID: u64 = 37;

/// Tag for extended time (RFC 9581): a map with key 1 holding whole
/// seconds and key -9 holding the nanosecond fraction.
pub const TAG_EXTENDED_TIME: u64 = 1001;

pub(crate) const MAJOR_UNSIGNED: u8 = 0;
pub(crate) const MAJOR_NEGATIVE: u8 = 1;
pub(crate) const MAJOR_BYTES: u8 = 2;
pub(crate) const MAJOR_TEXT: u8 = 3;
pub(crate) const MAJOR_ARRAY: u8 = 4;
pub(crate) const MAJOR_MAP: u8 = 5;
pub(crate) const MAJOR_TAG: u8 = 6;
pub(crate) const MAJOR_SIMPLE: u8 = 7;

const FALSE: u8 = 0xf4;
const TRUE: u8 = 0xf5;
const NULL: u8 = 0xf6;
const FLOAT64: u8 = 0xfb;

/// Extended-time map keys.
pub(crate) const TIME_SECONDS: i64 = 1;
pub(crate) const TIME_NANOS: i64 = -9;

/// Order of two encoded map keys: shorter first, then bytewise.
pub(crate) fn key_order(a: &[u8], b: &[u8]) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// Encode a value to canonical CBOR bytes.
///
/// Output is deterministic:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - Floats always use the 64-bit form
/// - No indefinite-length encoding
///
/// # Errors
///
/// Returns an error if the value contains a NaN float.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// Writes values into a growing buffer.
///
/// Several values may be written back to back; the export bundle encoder
/// writes one top-level map.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    out: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    /// Append one value.
    ///
    /// # Errors
    ///
    /// Fails on NaN. Bytes already written for the enclosing value are
    /// left in the buffer.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.out.push(NULL),
            Value::Bool(flag) => self.out.push(if *flag { TRUE } else { FALSE }),
            Value::Integer(n) => self.write_integer(*n),
            Value::Float(x) => {
                if x.is_nan() {
                    return Err(CodecError::NaNForbidden);
                }
                self.out.push(FLOAT64);
                self.out.extend_from_slice(&x.to_be_bytes());
            }
            Value::Bytes(bytes) => self.write_string(MAJOR_BYTES, bytes),
            Value::Text(text) => self.write_string(MAJOR_TEXT, text.as_bytes()),
            Value::DateTime(dt) => {
                let nanos = dt.timestamp_subsec_nanos();
                self.write_head(MAJOR_TAG, TAG_EXTENDED_TIME);
                // 1 encodes before -9, so the pair is already sorted.
                self.write_head(MAJOR_MAP, if nanos == 0 { 1 } else { 2 });
                self.write_integer(TIME_SECONDS);
                self.write_integer(dt.timestamp());
                if nanos != 0 {
                    self.write_integer(TIME_NANOS);
                    self.write_integer(i64::from(nanos));
                }
            }
            Value::Guid(guid) => {
                self.write_head(MAJOR_TAG, TAG_UUID);
                self.write_string(MAJOR_BYTES, guid.as_bytes());
            }
            Value::Array(items) => {
                self.write_head(MAJOR_ARRAY, items.len() as u64);
                for item in items {
                    self.encode(item)?;
                }
            }
            Value::Map(pairs) => self.write_map(pairs)?,
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.out
    }

    /// Writes the initial byte and the shortest argument for `arg`.
    #[allow(clippy::cast_possible_truncation)]
    fn write_head(&mut self, major: u8, arg: u64) {
        let major = major << 5;
        match arg {
            0..=23 => self.out.push(major | arg as u8),
            24..=0xff => self.out.extend_from_slice(&[major | 24, arg as u8]),
            0x100..=0xffff => {
                self.out.push(major | 25);
                self.out.extend_from_slice(&(arg as u16).to_be_bytes());
            }
            0x1_0000..=0xffff_ffff => {
                self.out.push(major | 26);
                self.out.extend_from_slice(&(arg as u32).to_be_bytes());
            }
            _ => {
                self.out.push(major | 27);
                self.out.extend_from_slice(&arg.to_be_bytes());
            }
        }
    }

    fn write_integer(&mut self, n: i64) {
        match u64::try_from(n) {
            Ok(unsigned) => self.write_head(MAJOR_UNSIGNED, unsigned),
            // -1 - n never overflows for negative n and lands in 0..=i64::MAX.
            Err(_) => self.write_head(MAJOR_NEGATIVE, (-1 - n).unsigned_abs()),
        }
    }

    fn write_string(&mut self, major: u8, bytes: &[u8]) {
        self.write_head(major, bytes.len() as u64);
        self.out.extend_from_slice(bytes);
    }

    fn write_map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut keyed = pairs
            .iter()
            .map(|(key, value)| Ok((to_canonical_cbor(key)?, value)))
            .collect::<CodecResult<Vec<_>>>()?;
        keyed.sort_by(|a, b| key_order(&a.0, &b.0));

        self.write_head(MAJOR_MAP, keyed.len() as u64);
        for (key, value) in keyed {
            self.out.extend_from_slice(&key);
            self.encode(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn bytes_of(value: impl Into<Value>) -> Vec<u8> {
        to_canonical_cbor(&value.into()).unwrap()
    }

    #[test]
    fn scalars_use_single_bytes() {
        assert_eq!(bytes_of(Value::Null), [0xf6]);
        assert_eq!(bytes_of(false), [0xf4]);
        assert_eq!(bytes_of(true), [0xf5]);
        assert_eq!(bytes_of(0), [0x00]);
        assert_eq!(bytes_of(23), [0x17]);
    }

    #[test]
    fn integer_arguments_are_shortest() {
        // Order ids, quantities and row counts cross each width boundary.
        assert_eq!(bytes_of(24), [0x18, 0x18]);
        assert_eq!(bytes_of(10_248), [0x19, 0x28, 0x08]);
        assert_eq!(bytes_of(70_000), [0x1a, 0x00, 0x01, 0x11, 0x70]);
        assert_eq!(
            bytes_of(Value::Integer(1 << 40)),
            [0x1b, 0, 0, 0x01, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn temporary_keys_encode_as_negatives() {
        assert_eq!(bytes_of(-1), [0x20]);
        assert_eq!(bytes_of(-25), [0x38, 0x18]);
        assert_eq!(
            bytes_of(Value::Integer(i64::MIN)),
            [0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn freight_is_a_double() {
        let bytes = bytes_of(32.38);
        assert_eq!(bytes[0], 0xfb);
        assert_eq!(&bytes[1..], &32.38f64.to_be_bytes());
        assert!(matches!(
            to_canonical_cbor(&Value::Float(f64::NAN)),
            Err(CodecError::NaNForbidden)
        ));
    }

    #[test]
    fn guid_and_datetime_are_tagged() {
        let guid = bytes_of(Uuid::from_bytes([7u8; 16]));
        assert_eq!(&guid[..3], &[0xd8, 0x25, 0x50]);
        assert_eq!(&guid[3..], &[7u8; 16]);

        let whole = bytes_of(Utc.timestamp_opt(100, 0).unwrap());
        assert_eq!(whole, [0xd9, 0x03, 0xe9, 0xa1, 0x01, 0x18, 100]);

        let fractional = bytes_of(Utc.timestamp_opt(100, 5).unwrap());
        assert_eq!(
            fractional,
            [0xd9, 0x03, 0xe9, 0xa2, 0x01, 0x18, 100, 0x28, 0x05]
        );
    }

    #[test]
    fn map_keys_sort_by_encoded_length_first() {
        let row = Value::Map(vec![
            (Value::from("shipName"), Value::Null),
            (Value::from("orderID"), Value::Integer(1)),
            (Value::from("freight"), Value::Integer(2)),
        ]);
        let bytes = bytes_of(row);
        assert_eq!(bytes[0], 0xa3);
        // "freight" and "orderID" share a length and sort bytewise;
        // the longer "shipName" comes last.
        assert_eq!(&bytes[1..9], b"\x67freight");
        assert_eq!(&bytes[10..18], b"\x67orderID");
        assert_eq!(&bytes[19..28], b"\x68shipName");
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = Value::Map(vec![
            (Value::from("city"), Value::from("Reims")),
            (Value::from("country"), Value::from("France")),
        ]);
        let b = Value::Map(vec![
            (Value::from("country"), Value::from("France")),
            (Value::from("city"), Value::from("Reims")),
        ]);
        assert_eq!(bytes_of(a), bytes_of(b));
    }

    #[test]
    fn encoder_appends_values() {
        let mut encoder = CanonicalEncoder::with_capacity(8);
        encoder.encode(&Value::from("a")).unwrap();
        encoder.encode(&Value::Bytes(vec![1, 2])).unwrap();
        assert_eq!(encoder.as_bytes(), &[0x61, b'a', 0x42, 1, 2]);
    }
}
