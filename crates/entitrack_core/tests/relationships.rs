//! Navigation and foreign key fix-up between related entities.

use entitrack_core::{CoreError, EntityState, MergeStrategy, PropertyValue, Value};
use entitrack_testkit::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[test]
fn setting_a_reference_updates_the_foreign_key_and_the_collection() {
    let em = new_manager();
    let customer = unchanged_customer(&em, "Acme");
    let order = unchanged_order(&em, 1);

    order.set_property("customer", &customer).unwrap();

    assert_eq!(
        order.get_value("customerID").unwrap(),
        customer.get_value("customerID").unwrap()
    );
    assert!(customer.get_collection("orders").unwrap().contains(&order));
    assert!(order.aspect().entity_state().is_modified());
    assert_eq!(order.aspect().original_value("customerID"), Some(Value::Null));
    assert!(customer.aspect().entity_state().is_unchanged());
}

#[test]
fn changing_the_foreign_key_moves_the_child() {
    let em = new_manager();
    let a = unchanged_customer(&em, "A");
    let b = unchanged_customer(&em, "B");
    let order = unchanged_order(&em, 1);
    order.set_property("customer", &a).unwrap();

    order
        .set_property("customerID", b.get_value("customerID").unwrap())
        .unwrap();

    assert_eq!(order.get_entity("customer").unwrap(), Some(b.clone()));
    assert!(a.get_collection("orders").unwrap().is_empty());
    assert_eq!(b.get_collection("orders").unwrap().to_vec(), vec![order]);
}

#[test]
fn collection_push_and_remove_keep_both_sides_in_step() {
    let em = new_manager();
    let customer = unchanged_customer(&em, "Acme");
    let order = unchanged_order(&em, 1);
    let orders = customer.get_collection("orders").unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    orders
        .array_changed()
        .subscribe(move |args| sink.lock().unwrap().push((args.added.len(), args.removed.len())));

    orders.push(&order).unwrap();
    orders.push(&order).unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(order.get_entity("customer").unwrap(), Some(customer.clone()));

    assert!(orders.remove(&order).unwrap());
    assert!(!orders.remove(&order).unwrap());
    assert_eq!(order.get_entity("customer").unwrap(), None);
    assert_eq!(order.get_value("customerID").unwrap(), Value::Null);
    assert_eq!(*seen.lock().unwrap(), vec![(1, 0), (0, 1)]);
}

#[test]
fn children_link_when_their_parent_arrives_later() {
    let em = new_manager();
    let id = Uuid::new_v4();
    let order = em
        .merge_query_result(
            "Order",
            &row([("orderID", Value::from(1)), ("customerID", Value::from(id))]),
            None,
        )
        .unwrap();
    assert_eq!(order.get_entity("customer").unwrap(), None);

    let customer = em
        .merge_query_result(
            "Customer",
            &row([("customerID", Value::from(id)), ("companyName", Value::from("Acme"))]),
            None,
        )
        .unwrap();

    assert_eq!(order.get_entity("customer").unwrap(), Some(customer.clone()));
    assert!(customer.get_collection("orders").unwrap().contains(&order));
    assert!(order.aspect().entity_state().is_unchanged());
    assert!(customer.aspect().entity_state().is_unchanged());
}

#[test]
fn deleting_a_parent_releases_its_children() {
    let em = new_manager();
    let (customer, orders) = customer_with_orders(&em, 2, 1);
    let customer_id = customer.get_value("customerID").unwrap();

    customer.aspect().set_deleted().unwrap();

    assert!(customer.aspect().entity_state().is_deleted());
    assert!(customer.get_collection("orders").unwrap().is_empty());
    for order in &orders {
        assert_eq!(order.get_entity("customer").unwrap(), None);
        assert_eq!(order.get_value("customerID").unwrap(), customer_id);
        assert!(order.aspect().entity_state().is_modified());
    }

    customer.aspect().reject_changes().unwrap();
    assert!(customer.aspect().entity_state().is_unchanged());
    assert_eq!(customer.get_collection("orders").unwrap().len(), 2);
    for order in &orders {
        assert_eq!(order.get_entity("customer").unwrap(), Some(customer.clone()));
    }
}

#[test]
fn deleting_a_child_keeps_its_foreign_key() {
    let em = new_manager();
    let (customer, orders) = customer_with_orders(&em, 2, 1);

    orders[0].aspect().set_deleted().unwrap();

    assert!(orders[0].aspect().entity_state().is_deleted());
    assert_eq!(orders[0].get_entity("customer").unwrap(), None);
    assert_eq!(
        orders[0].get_value("customerID").unwrap(),
        customer.get_value("customerID").unwrap()
    );
    assert_eq!(customer.get_collection("orders").unwrap().to_vec(), vec![orders[1].clone()]);
    assert!(customer.aspect().entity_state().is_unchanged());
}

#[test]
fn linking_a_detached_child_adds_it() {
    let em = new_manager();
    let customer = unchanged_customer(&em, "Acme");
    let order = em.metadata_store().create_entity("Order", &[]).unwrap();
    assert!(order.aspect().entity_state().is_detached());

    customer.get_collection("orders").unwrap().push(&order).unwrap();

    assert!(order.aspect().entity_state().is_added());
    assert!(order.aspect().has_temp_key());
    assert_eq!(em.len(), 2);
    assert_eq!(
        order.get_value("customerID").unwrap(),
        customer.get_value("customerID").unwrap()
    );
}

#[test]
fn attaching_a_graph_attaches_every_member() {
    let em = new_manager();
    let store = em.metadata_store().clone();
    let customer = store
        .create_entity("Customer", &[("customerID", Uuid::new_v4().into())])
        .unwrap();
    let order = store.create_entity("Order", &[("orderID", 5.into())]).unwrap();
    customer.get_collection("orders").unwrap().push(&order).unwrap();
    assert!(em.is_empty());

    em.attach_entity(&customer, EntityState::Unchanged).unwrap();

    assert_eq!(em.len(), 2);
    assert!(order.aspect().entity_state().is_unchanged());
    assert_eq!(order.get_entity("customer").unwrap(), Some(customer.clone()));
    assert_eq!(customer.get_collection("orders").unwrap().len(), 1);
}

#[test]
fn self_references_follow_key_changes() {
    let em = new_manager();
    let boss = em
        .create_entity("Employee", &[("lastName", "Fuller".into()), ("firstName", "Andrew".into())])
        .unwrap();
    let report = em
        .create_entity("Employee", &[("lastName", "Davolio".into()), ("firstName", "Nancy".into())])
        .unwrap();

    report.set_property("manager", &boss).unwrap();
    assert!(boss.get_collection("directReports").unwrap().contains(&report));
    assert_eq!(
        report.get_value("reportsToEmployeeID").unwrap(),
        boss.get_value("employeeID").unwrap()
    );

    boss.set_property("employeeID", 2).unwrap();

    assert_eq!(report.get_value("reportsToEmployeeID").unwrap(), Value::Integer(2));
    assert_eq!(report.get_entity("manager").unwrap(), Some(boss.clone()));
    assert_eq!(em.get_entity_by_key("Employee", vec![2.into()]).unwrap(), Some(boss));
}

#[test]
fn composite_keys_keep_their_key_part_foreign_keys() {
    let em = new_manager();
    let (customer, orders) = customer_with_orders(&em, 1, 10);
    let product = em
        .merge_query_result(
            "Product",
            &row([("productID", Value::from(3)), ("productName", Value::from("Chai"))]),
            None,
        )
        .unwrap();
    let detail = em
        .merge_query_result(
            "OrderDetail",
            &row([
                ("orderID", Value::from(10)),
                ("productID", Value::from(3)),
                ("unitPrice", Value::from(18.0)),
                ("quantity", Value::from(12)),
            ]),
            None,
        )
        .unwrap();

    assert_eq!(detail.get_entity("order").unwrap(), Some(orders[0].clone()));
    assert_eq!(detail.get_entity("product").unwrap(), Some(product));
    assert_eq!(
        detail.get_property_path("order.customer.companyName").unwrap(),
        PropertyValue::Value(customer.get_value("companyName").unwrap())
    );

    let details = orders[0].get_collection("orderDetails").unwrap();
    assert!(details.remove(&detail).unwrap());
    assert_eq!(detail.get_entity("order").unwrap(), None);
    assert_eq!(detail.get_value("orderID").unwrap(), Value::Integer(10));
}

#[test]
fn links_across_managers_are_rejected() {
    let store = northwind_metadata();
    let em1 = manager_for(&store);
    let em2 = manager_for(&store);
    let customer = unchanged_customer(&em1, "Acme");
    let order = unchanged_order(&em2, 1);

    let err = customer.get_collection("orders").unwrap().push(&order).unwrap_err();

    assert!(matches!(err, CoreError::CrossManagerAttach { .. }));
    assert!(customer.get_collection("orders").unwrap().is_empty());
    assert_eq!(order.get_value("customerID").unwrap(), Value::Null);
    assert!(order.aspect().entity_state().is_unchanged());
}

#[test]
fn navigations_check_the_target_type() {
    let em = new_manager();
    let order = unchanged_order(&em, 1);
    let product = em
        .merge_query_result("Product", &row([("productID", Value::from(1))]), None)
        .unwrap();
    let err = order.set_property("customer", &product).unwrap_err();
    assert!(matches!(err, CoreError::InvalidValue { .. }));
    let err = order.set_property("orderDetails", Value::Null).unwrap_err();
    assert!(matches!(err, CoreError::InvalidOperation { .. }));
}

#[test]
fn complex_properties_read_and_write_by_path() {
    let em = new_manager();
    let supplier = em
        .merge_query_result(
            "Supplier",
            &row([("supplierID", Value::from(1)), ("companyName", Value::from("Exotic Liquids"))]),
            None,
        )
        .unwrap();

    supplier.set_property_path("location.city", "London").unwrap();

    assert_eq!(
        supplier.get_property_path("location.city").unwrap(),
        PropertyValue::Value(Value::from("London"))
    );
    assert!(supplier.aspect().entity_state().is_modified());
    let original = supplier.aspect().original_value("location").unwrap();
    assert_eq!(original.get("city"), Some(&Value::Null));
}

#[test]
fn initializers_run_once_per_created_entity() {
    let em = new_manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    em.metadata_store()
        .register_initializer("Order", move |order| {
            counter.fetch_add(1, Ordering::SeqCst);
            order.set_property("shipName", "Draft")
        })
        .unwrap();

    let added = em
        .create_entity("Order", &[("shipName", "Express".into())])
        .unwrap();
    let unchanged = em
        .create_entity_with(
            "Order",
            &[("orderID", 7.into())],
            EntityState::Unchanged,
            MergeStrategy::PreserveChanges,
        )
        .unwrap();
    let detached = em.metadata_store().create_entity("Order", &[]).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    em.attach_entity(&detached, EntityState::Added).unwrap();
    em.create_entity("Customer", &[("companyName", "Acme".into())])
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Initializers run after the initial values.
    for order in [&added, &unchanged, &detached] {
        assert_eq!(order.get_value("shipName").unwrap(), Value::from("Draft"));
    }
    assert!(unchanged.aspect().entity_state().is_unchanged());
    assert!(em
        .metadata_store()
        .register_initializer("Invoice", |_| Ok(()))
        .is_err());
}

#[test]
fn orders_added_by_an_initializer_follow_the_customer_key() {
    let em = new_manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    em.metadata_store()
        .register_initializer("Customer", move |customer| {
            counter.fetch_add(1, Ordering::SeqCst);
            let order = customer.metadata_store().create_entity("Order", &[])?;
            customer.get_collection("orders")?.push(&order)
        })
        .unwrap();

    let customer = em
        .create_entity("Customer", &[("companyName", "Acme".into())])
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let orders = customer.get_collection("orders").unwrap().to_vec();
    assert_eq!(orders.len(), 1);
    let order = &orders[0];
    assert_eq!(em.len(), 2);
    assert!(customer.aspect().entity_state().is_added());
    assert!(order.aspect().entity_state().is_added());
    assert!(customer.aspect().has_temp_key());
    assert!(order.aspect().has_temp_key());
    assert_eq!(em.find_entity_by_key(&order.key()), Some(order.clone()));

    let customer_id = customer.get_value("customerID").unwrap();
    assert!(!customer_id.is_null());
    assert_ne!(customer_id, Value::from(Uuid::nil()));
    assert_eq!(order.get_value("customerID").unwrap(), customer_id);
    assert_eq!(order.get_entity("customer").unwrap(), Some(customer.clone()));

    let regenerated = em.generate_temp_key_value(&customer).unwrap();
    assert_eq!(order.get_value("customerID").unwrap(), regenerated);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn a_customer_set_by_an_initializer_is_added_with_its_order() {
    let em = new_manager();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    em.metadata_store()
        .register_initializer("Order", move |order| {
            counter.fetch_add(1, Ordering::SeqCst);
            let customer = order
                .metadata_store()
                .create_entity("Customer", &[("companyName", "Walk-in".into())])?;
            order.set_property("customer", &customer)
        })
        .unwrap();

    let first = em.create_entity("Order", &[]).unwrap();
    let second = em.create_entity("Order", &[]).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(em.len(), 4);
    for order in [&first, &second] {
        let customer = order.get_entity("customer").unwrap().unwrap();
        assert!(customer.aspect().entity_state().is_added());
        assert_eq!(
            order.get_value("customerID").unwrap(),
            customer.get_value("customerID").unwrap()
        );
        assert_ne!(
            order.get_value("customerID").unwrap(),
            Value::from(Uuid::nil())
        );
        assert_eq!(customer.get_collection("orders").unwrap().to_vec(), vec![order.clone()]);
    }
}

#[test]
fn an_unchanged_child_pushed_into_a_new_parent_becomes_modified() {
    let em = new_manager();
    let order = unchanged_order(&em, 3);
    let customer = em
        .create_entity("Customer", &[("companyName", "Fresh".into())])
        .unwrap();

    customer.get_collection("orders").unwrap().push(&order).unwrap();

    assert!(order.aspect().entity_state().is_modified());
    assert_eq!(order.aspect().original_value("customerID"), Some(Value::Null));
    assert_eq!(
        order.get_value("customerID").unwrap(),
        customer.get_value("customerID").unwrap()
    );
    assert!(customer.aspect().entity_state().is_added());
}
