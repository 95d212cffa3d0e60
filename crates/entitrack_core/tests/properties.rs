//! Property-based tests over the manager.

use entitrack_core::{EntityState, ExportBundle, ExportOptions, ImportOptions, MergeStrategy, Value};
use entitrack_testkit::prelude::*;
use proptest::prelude::*;
use std::collections::HashSet;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn temp_keys_are_distinct(count in 1usize..40) {
        let em = new_manager();
        let keys: HashSet<_> = (0..count)
            .map(|_| em.create_entity("Order", &[]).unwrap().key())
            .collect();
        prop_assert_eq!(keys.len(), count);
        for key in &keys {
            prop_assert!(em.is_temp_key(key));
            prop_assert!(key.values()[0].as_integer().unwrap() <= -1);
        }
    }

    #[test]
    fn states_stay_exclusive(states in prop::collection::vec(attached_state_strategy(), 1..12)) {
        let em = new_manager();
        for (i, state) in states.iter().enumerate() {
            em.create_entity_with(
                "Order",
                &[("orderID", (i as i32 + 1).into())],
                *state,
                MergeStrategy::Disallowed,
            )
            .unwrap();
        }
        let cached = em.get_entities(None, None).unwrap();
        prop_assert_eq!(cached.len(), states.len());
        for (entity, expected) in cached.iter().zip(&states) {
            let state = entity.aspect().entity_state();
            let holds = [
                state.is_detached(),
                state.is_added(),
                state.is_unchanged(),
                state.is_modified(),
                state.is_deleted(),
            ];
            prop_assert_eq!(holds.iter().filter(|h| **h).count(), 1);
            prop_assert_eq!(state, *expected);
        }
    }

    #[test]
    fn detach_then_attach_restores_the_entity(row in order_row_strategy(7)) {
        let em = new_manager();
        let order = em.merge_query_result("Order", &row, None).unwrap();
        let names = ["orderID", "orderDate", "freight", "shipName"];
        let before: Vec<Value> = names.iter().map(|n| order.get_value(n).unwrap()).collect();

        em.detach_entity(&order).unwrap();
        prop_assert!(em.get_entity_by_key("Order", vec![7.into()]).unwrap().is_none());
        em.attach_entity(&order, EntityState::Unchanged).unwrap();

        prop_assert_eq!(em.get_entity_by_key("Order", vec![7.into()]).unwrap(), Some(order.clone()));
        let after: Vec<Value> = names.iter().map(|n| order.get_value(n).unwrap()).collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn collection_edits_keep_both_sides_in_step(count in 1usize..6, remove_at in 0usize..6) {
        let em = new_manager();
        let customer = unchanged_customer(&em, "Acme");
        let customer_id = customer.get_value("customerID").unwrap();
        let orders = customer.get_collection("orders").unwrap();
        let children: Vec<_> = (0..count).map(|i| unchanged_order(&em, i as i32 + 1)).collect();
        for child in &children {
            orders.push(child).unwrap();
            prop_assert_eq!(child.get_entity("customer").unwrap(), Some(customer.clone()));
            prop_assert_eq!(child.get_value("customerID").unwrap(), customer_id.clone());
        }

        let removed = orders.remove_at(remove_at % count).unwrap().unwrap();

        prop_assert_eq!(removed.get_entity("customer").unwrap(), None);
        prop_assert_eq!(removed.get_value("customerID").unwrap(), Value::Null);
        prop_assert_eq!(orders.len(), count - 1);
        prop_assert!(!orders.contains(&removed));
    }

    #[test]
    fn reject_restores_after_any_edits(edits in ship_name_edits_strategy()) {
        let em = new_manager();
        let order = unchanged_order(&em, 1);
        for name in &edits {
            order.set_property("shipName", name.as_str()).unwrap();
        }
        prop_assert!(order.aspect().entity_state().is_modified());
        prop_assert_eq!(order.aspect().original_value("shipName"), Some(Value::Null));

        order.aspect().reject_changes().unwrap();

        prop_assert_eq!(order.get_value("shipName").unwrap(), Value::Null);
        prop_assert!(order.aspect().entity_state().is_unchanged());
    }

    #[test]
    fn batches_survive_export_and_import(batch in order_batch_strategy(8)) {
        let source = new_manager();
        source.merge_query_results("Order", &batch, None).unwrap();
        let bundle = source.export_entities(None, &ExportOptions::new()).unwrap();
        let decoded = ExportBundle::decode(&bundle.encode().unwrap()).unwrap();

        let target = new_manager();
        target.import_entities(&decoded, &ImportOptions::new()).unwrap();

        prop_assert_eq!(target.len(), batch.len());
        for entity in source.get_entities(None, None).unwrap() {
            let copy = target.find_entity_by_key(&entity.key()).unwrap();
            for name in ["orderDate", "freight", "shipName"] {
                prop_assert_eq!(entity.get_value(name).unwrap(), copy.get_value(name).unwrap());
            }
            prop_assert!(copy.aspect().entity_state().is_unchanged());
        }
    }
}
