//! Property-based test generators using proptest.
//!
//! Rows produced here always type-check against
//! [`northwind_metadata`](crate::fixtures::northwind_metadata).

use chrono::{DateTime, TimeZone, Utc};
use entitrack_core::{EntityState, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for company names within the 40 character limit.
pub fn company_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,12}( [A-Z][a-z]{1,10}){0,2}").expect("Invalid regex")
}

/// Strategy for ship names, sometimes absent.
pub fn ship_name_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[A-Za-z ]{1,40}").expect("Invalid regex"))
}

/// Strategy for UTC timestamps with millisecond precision between 1990 and 2040.
pub fn datetime_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (631_152_000_000_i64..2_208_988_800_000_i64)
        .prop_map(|millis| Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
}

/// Strategy for freight charges in cents.
pub fn freight_strategy() -> impl Strategy<Value = f64> {
    (0u32..1_000_000).prop_map(|cents| f64::from(cents) / 100.0)
}

/// Strategy for any non-detached state.
pub fn attached_state_strategy() -> impl Strategy<Value = EntityState> {
    prop::sample::select(vec![
        EntityState::Added,
        EntityState::Unchanged,
        EntityState::Modified,
        EntityState::Deleted,
    ])
}

/// Strategy for an Order row with the given id.
pub fn order_row_strategy(order_id: i32) -> impl Strategy<Value = BTreeMap<String, Value>> {
    (ship_name_strategy(), datetime_strategy(), freight_strategy()).prop_map(
        move |(ship_name, order_date, freight)| {
            let mut row = BTreeMap::new();
            row.insert("orderID".to_string(), Value::from(order_id));
            row.insert("orderDate".to_string(), Value::from(order_date));
            row.insert("freight".to_string(), Value::from(freight));
            row.insert(
                "shipName".to_string(),
                ship_name.map(Value::from).unwrap_or(Value::Null),
            );
            row
        },
    )
}

/// Strategy for a batch of Order rows with distinct ids starting at 1.
pub fn order_batch_strategy(max: usize) -> impl Strategy<Value = Vec<BTreeMap<String, Value>>> {
    (1..=max.max(1)).prop_flat_map(|len| {
        (1..=len)
            .map(|i| order_row_strategy(i as i32))
            .collect::<Vec<_>>()
    })
}

/// Strategy for a sequence of edits to an Order's ship name.
pub fn ship_name_edits_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        1..8,
    )
}
