//! # entitrack codec
//!
//! Property values and their binary encoding.
//!
//! [`Value`] is the dynamic value held by every data property of a tracked
//! entity. The canonical CBOR encoder turns values (and the export bundles
//! built from them) into deterministic bytes:
//! - Identical inputs produce identical bytes
//! - Map keys are sorted (length-first, then bytewise)
//! - Integers use shortest encoding, floats always use 64 bits
//! - Dates use tag 1001 (extended time), GUIDs use tag 37
//! - No indefinite-length items, no NaN
//!
//! ## Usage
//!
//! ```
//! use entitrack_codec::{to_canonical_cbor, from_cbor, Value};
//!
//! let value = Value::text_map([("shipName", Value::from("Barnum"))]);
//! let bytes = to_canonical_cbor(&value).unwrap();
//!
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder, MAX_DEPTH};
pub use encoder::{to_canonical_cbor, CanonicalEncoder, TAG_EXTENDED_TIME, TAG_UUID};
pub use error::{CodecError, CodecResult};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    fn roundtrip(value: &Value) -> Value {
        from_cbor(&to_canonical_cbor(value).unwrap()).unwrap()
    }

    #[test]
    fn roundtrip_property_values() {
        let values = [
            Value::Null,
            Value::Bool(true),
            Value::Integer(-100),
            Value::Float(-12.75),
            Value::from("hello world"),
            Value::Bytes(vec![1, 2, 3]),
            Value::Guid(Uuid::new_v4()),
        ];
        for value in &values {
            assert_eq!(&roundtrip(value), value);
        }
    }

    #[test]
    fn roundtrip_datetime_keeps_subsecond_precision() {
        let dt = Utc.timestamp_opt(1_600_000_000, 123_456_789).unwrap();
        assert_eq!(roundtrip(&Value::DateTime(dt)), Value::DateTime(dt));

        // Before the epoch, e.g. the default for non-null date properties.
        let old = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(roundtrip(&Value::DateTime(old)), Value::DateTime(old));
    }

    #[test]
    fn roundtrip_complex_value() {
        let location = Value::text_map([
            ("address", Value::from("111 Oak Street")),
            ("city", Value::from("Seattle")),
            ("postalCode", Value::Null),
        ]);
        let row = Value::text_map([
            ("location", location),
            ("tags", Value::Array(vec![Value::from("a"), Value::Integer(2)])),
        ]);
        assert_eq!(roundtrip(&row), row);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integers_roundtrip(n in any::<i64>()) {
                prop_assert_eq!(roundtrip(&Value::Integer(n)), Value::Integer(n));
            }

            #[test]
            fn finite_floats_roundtrip(x in any::<f64>().prop_filter("finite", |x| !x.is_nan())) {
                prop_assert_eq!(roundtrip(&Value::Float(x)), Value::Float(x));
            }

            #[test]
            fn text_maps_roundtrip(entries in prop::collection::btree_map("[a-zA-Z]{1,12}", any::<i32>(), 0..8)) {
                let map = Value::text_map(entries.into_iter().map(|(k, v)| (k, Value::from(v))));
                prop_assert_eq!(roundtrip(&map), map);
            }
        }
    }
}
