//! Canonical CBOR decoder.

use crate::encoder::{
    key_order, MAJOR_ARRAY, MAJOR_BYTES, MAJOR_MAP, MAJOR_NEGATIVE, MAJOR_SIMPLE, MAJOR_TAG,
    MAJOR_TEXT, MAJOR_UNSIGNED, TAG_EXTENDED_TIME, TAG_UUID, TIME_NANOS, TIME_SECONDS,
};
use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use chrono::{TimeZone, Utc};
use std::cmp::Ordering;
use uuid::Uuid;

/// Upper bound on array and map element counts read from input.
const MAX_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Upper bound on byte and text string lengths read from input.
const MAX_STRING_BYTES: u64 = 256 * 1024 * 1024;

/// Deepest nesting of arrays, maps and tags read from input.
pub const MAX_DEPTH: usize = 512;

/// Decode a value from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not valid CBOR or contain
/// forbidden constructs (NaN, indefinite-length, half floats).
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    CanonicalDecoder::new(bytes).decode()
}

/// Reads values written by [`CanonicalEncoder`](crate::CanonicalEncoder).
///
/// Non-shortest arguments and unsorted map keys are rejected, so any
/// accepted input re-encodes to the same bytes. Tags other than the UUID
/// and extended-time tags are skipped and their content returned as is.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    ///
    /// # Errors
    ///
    /// Fails on malformed or non-canonical input, and on arrays, maps or
    /// tags nested more than [`MAX_DEPTH`] deep.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial = self.take(1)?[0];
        let (major, info) = (initial >> 5, initial & 0x1f);
        if major == MAJOR_SIMPLE {
            return self.simple(info);
        }
        let arg = self.argument(info)?;
        match major {
            MAJOR_UNSIGNED => i64::try_from(arg)
                .map(Value::Integer)
                .map_err(|_| CodecError::IntegerOverflow),
            MAJOR_NEGATIVE => i64::try_from(arg)
                .map(|n| Value::Integer(-1 - n))
                .map_err(|_| CodecError::IntegerOverflow),
            MAJOR_BYTES => {
                let len = bounded(arg, MAX_STRING_BYTES)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_TEXT => {
                let len = bounded(arg, MAX_STRING_BYTES)?;
                let text = std::str::from_utf8(self.take(len)?)
                    .map_err(|_| CodecError::InvalidUtf8)?;
                Ok(Value::Text(text.to_owned()))
            }
            MAJOR_ARRAY => {
                let len = bounded(arg, MAX_ELEMENTS)?;
                self.nested(|this| {
                    let mut items = Vec::with_capacity(this.capacity_for(len));
                    for _ in 0..len {
                        items.push(this.decode()?);
                    }
                    Ok(Value::Array(items))
                })
            }
            MAJOR_MAP => {
                let len = bounded(arg, MAX_ELEMENTS)?;
                self.nested(|this| this.map(len))
            }
            MAJOR_TAG => self.nested(|this| this.tagged(arg)),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    fn nested(&mut self, read: impl FnOnce(&mut Self) -> CodecResult<Value>) -> CodecResult<Value> {
        if self.depth >= MAX_DEPTH {
            return Err(CodecError::DepthExceeded {
                max_depth: MAX_DEPTH,
            });
        }
        self.depth += 1;
        let value = read(self);
        self.depth -= 1;
        value
    }

    /// Every element takes at least one byte, so a claimed count never
    /// needs more room than the input has left.
    fn capacity_for(&self, len: usize) -> usize {
        len.min(self.data.len().saturating_sub(self.pos))
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut raw = [0u8; N];
        raw.copy_from_slice(self.take(N)?);
        Ok(raw)
    }

    /// Reads the argument that follows an initial byte and checks that no
    /// shorter form could have carried it.
    fn argument(&mut self, info: u8) -> CodecResult<u64> {
        let (value, floor) = match info {
            0..=23 => return Ok(u64::from(info)),
            24 => (u64::from(self.take_array::<1>()?[0]), 24),
            25 => (u64::from(u16::from_be_bytes(self.take_array()?)), 0x100),
            26 => (u64::from(u32::from_be_bytes(self.take_array()?)), 0x1_0000),
            27 => (u64::from_be_bytes(self.take_array()?), 0x1_0000_0000),
            31 => return Err(CodecError::IndefiniteLengthForbidden),
            _ => return Err(CodecError::invalid_structure("reserved additional info")),
        };
        if value < floor {
            return Err(CodecError::invalid_structure(
                "non-canonical: value could be encoded in fewer bytes",
            ));
        }
        Ok(value)
    }

    fn map(&mut self, len: usize) -> CodecResult<Value> {
        let data = self.data;
        let mut pairs = Vec::with_capacity(self.capacity_for(len));
        let mut previous: Option<&'a [u8]> = None;
        for _ in 0..len {
            let start = self.pos;
            let key = self.decode()?;
            let encoded = &data[start..self.pos];
            if previous.is_some_and(|prev| key_order(prev, encoded) != Ordering::Less) {
                return Err(CodecError::invalid_structure(
                    "non-canonical: map keys not in sorted order",
                ));
            }
            previous = Some(encoded);
            pairs.push((key, self.decode()?));
        }
        Ok(Value::Map(pairs))
    }

    fn simple(&mut self, info: u8) -> CodecResult<Value> {
        match info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            // undefined reads as null
            22 | 23 => Ok(Value::Null),
            24 => {
                let simple = self.take(1)?[0];
                if simple < 32 {
                    Err(CodecError::invalid_structure(
                        "non-canonical: simple value should use direct encoding",
                    ))
                } else {
                    Err(CodecError::unsupported_type(format!("simple value {simple}")))
                }
            }
            25 => Err(CodecError::unsupported_type("half-precision float")),
            26 => finite(f64::from(f32::from_be_bytes(self.take_array()?))),
            27 => finite(f64::from_be_bytes(self.take_array()?)),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::unsupported_type(format!("simple value {info}"))),
        }
    }

    fn tagged(&mut self, tag: u64) -> CodecResult<Value> {
        let content = self.decode()?;
        match tag {
            TAG_UUID => content
                .as_bytes()
                .and_then(|bytes| <[u8; 16]>::try_from(bytes).ok())
                .map(|raw| Value::Guid(Uuid::from_bytes(raw)))
                .ok_or_else(|| CodecError::invalid_tag(tag, "expected a 16-byte string")),
            TAG_EXTENDED_TIME => {
                let field = |key: i64| {
                    content
                        .as_map()?
                        .iter()
                        .find(|(k, _)| k.as_integer() == Some(key))?
                        .1
                        .as_integer()
                };
                let seconds = field(TIME_SECONDS)
                    .ok_or_else(|| CodecError::invalid_tag(tag, "missing seconds"))?;
                let nanos = u32::try_from(field(TIME_NANOS).unwrap_or(0))
                    .map_err(|_| CodecError::invalid_tag(tag, "nanoseconds out of range"))?;
                Utc.timestamp_opt(seconds, nanos)
                    .single()
                    .map(Value::DateTime)
                    .ok_or(CodecError::TimestampOutOfRange { seconds })
            }
            _ => Ok(content),
        }
    }
}

fn bounded(claimed: u64, max_allowed: u64) -> CodecResult<usize> {
    if claimed > max_allowed {
        return Err(CodecError::SizeLimitExceeded {
            claimed,
            max_allowed,
        });
    }
    usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
        claimed,
        max_allowed,
    })
}

fn finite(x: f64) -> CodecResult<Value> {
    if x.is_nan() {
        Err(CodecError::NaNForbidden)
    } else {
        Ok(Value::Float(x))
    }
}
