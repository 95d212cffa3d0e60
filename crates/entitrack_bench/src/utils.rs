//! Benchmark utilities.

use entitrack_codec::Value;
use entitrack_testkit::fixtures::row;
use rand::Rng;
use std::collections::BTreeMap;

/// Generate a random ASCII string of the specified length.
pub fn random_text(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect()
}

/// Generate a random order row with the given key.
pub fn random_order_row(order_id: i32) -> BTreeMap<String, Value> {
    let mut rng = rand::thread_rng();
    let freight = f64::from(rng.gen_range(0..100_000u32)) / 100.0;
    row([
        ("orderID", Value::from(order_id)),
        ("freight", Value::Float(freight)),
        ("shipName", Value::from(random_text(24))),
    ])
}

/// Generate `count` order rows keyed `1..=count`.
pub fn generate_order_rows(count: usize) -> Vec<BTreeMap<String, Value>> {
    (1..=count)
        .map(|i| random_order_row(i32::try_from(i).unwrap_or(i32::MAX)))
        .collect()
}

/// Generate a text-keyed map with `width` random text entries.
pub fn random_record(width: usize) -> Value {
    Value::text_map((0..width).map(|i| (format!("field_{i}"), Value::from(random_text(16)))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_keyed_in_order() {
        let rows = generate_order_rows(5);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[4]["orderID"], Value::Integer(5));
        assert_eq!(rows[0]["shipName"].as_text().map(str::len), Some(24));
    }
}
