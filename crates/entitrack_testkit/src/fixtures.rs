//! Sample metadata and manager helpers.
//!
//! The Northwind-style model covers every relationship shape the engine
//! handles: one-to-many with a single foreign key (Customer/Order), a
//! self reference (Employee), a composite key whose parts are foreign keys
//! (OrderDetail), a complex property (Location) and an unmapped property.

use entitrack_core::{
    AutoGeneratedKeyType, ComplexType, DataProperty, DataType, Entity, EntityManager, EntityState,
    EntityType, ManagerConfig, MaxLengthValidator, MergeStrategy, MetadataStore,
    NavigationProperty, PropertyValue, RequiredValidator, Value,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Metadata version of [`northwind_metadata`].
pub const NORTHWIND_VERSION: &str = "northwind-1";

/// Builds the sample model.
pub fn northwind_metadata() -> Arc<MetadataStore> {
    let store = MetadataStore::new(NORTHWIND_VERSION);
    store
        .add_complex_type(
            ComplexType::new("Location")
                .data_property(DataProperty::new("address", DataType::String).max_length(60))
                .data_property(DataProperty::new("city", DataType::String).max_length(15))
                .data_property(DataProperty::new("region", DataType::String))
                .data_property(DataProperty::new("postalCode", DataType::String).max_length(10))
                .data_property(DataProperty::new("country", DataType::String)),
        )
        .expect("Location");

    let types = [
        EntityType::new("Customer")
            .auto_generated_key(AutoGeneratedKeyType::KeyGenerator)
            .data_property(DataProperty::new("customerID", DataType::Guid).key())
            .data_property(
                DataProperty::new("companyName", DataType::String)
                    .nullable(false)
                    .max_length(40),
            )
            .data_property(DataProperty::new("contactName", DataType::String).max_length(30))
            .data_property(DataProperty::new("city", DataType::String))
            .data_property(DataProperty::new("rowVersion", DataType::Int32).nullable(false))
            .data_property(
                DataProperty::new("isBeingEdited", DataType::Boolean)
                    .nullable(false)
                    .unmapped(),
            )
            .navigation_property(NavigationProperty::collection("orders", "Order").inverse("customer")),
        EntityType::new("Employee")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .data_property(DataProperty::new("employeeID", DataType::Int32).key())
            .data_property(
                DataProperty::new("lastName", DataType::String)
                    .nullable(false)
                    .max_length(30),
            )
            .data_property(DataProperty::new("firstName", DataType::String).nullable(false))
            .data_property(DataProperty::new("birthDate", DataType::DateTime).nullable(false))
            .data_property(DataProperty::new("hireDate", DataType::DateTime))
            .data_property(DataProperty::new("reportsToEmployeeID", DataType::Int32))
            .data_property(DataProperty::complex("location", "Location"))
            .navigation_property(
                NavigationProperty::scalar("manager", "Employee")
                    .foreign_keys(["reportsToEmployeeID"])
                    .inverse("directReports"),
            )
            .navigation_property(
                NavigationProperty::collection("directReports", "Employee").inverse("manager"),
            )
            .navigation_property(NavigationProperty::collection("orders", "Order").inverse("employee")),
        EntityType::new("Order")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .data_property(DataProperty::new("orderID", DataType::Int32).key())
            .data_property(DataProperty::new("customerID", DataType::Guid))
            .data_property(DataProperty::new("employeeID", DataType::Int32))
            .data_property(DataProperty::new("orderDate", DataType::DateTime))
            .data_property(DataProperty::new("freight", DataType::Decimal).with_default(0.0))
            .data_property(DataProperty::new("shipName", DataType::String).max_length(40))
            .data_property(DataProperty::complex("shipTo", "Location"))
            .navigation_property(
                NavigationProperty::scalar("customer", "Customer")
                    .foreign_keys(["customerID"])
                    .inverse("orders"),
            )
            .navigation_property(
                NavigationProperty::scalar("employee", "Employee")
                    .foreign_keys(["employeeID"])
                    .inverse("orders"),
            )
            .navigation_property(
                NavigationProperty::collection("orderDetails", "OrderDetail").inverse("order"),
            ),
        EntityType::new("OrderDetail")
            .data_property(DataProperty::new("orderID", DataType::Int32).key())
            .data_property(DataProperty::new("productID", DataType::Int32).key())
            .data_property(DataProperty::new("unitPrice", DataType::Decimal).nullable(false))
            .data_property(DataProperty::new("quantity", DataType::Int16).nullable(false))
            .navigation_property(
                NavigationProperty::scalar("order", "Order")
                    .foreign_keys(["orderID"])
                    .inverse("orderDetails"),
            )
            .navigation_property(
                NavigationProperty::scalar("product", "Product").foreign_keys(["productID"]),
            ),
        EntityType::new("Supplier")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .data_property(DataProperty::new("supplierID", DataType::Int32).key())
            .data_property(DataProperty::new("companyName", DataType::String).nullable(false))
            .data_property(DataProperty::complex("location", "Location"))
            .navigation_property(
                NavigationProperty::collection("products", "Product").inverse("supplier"),
            ),
        EntityType::new("Product")
            .auto_generated_key(AutoGeneratedKeyType::Identity)
            .data_property(DataProperty::new("productID", DataType::Int32).key())
            .data_property(DataProperty::new("productName", DataType::String).nullable(false))
            .data_property(DataProperty::new("supplierID", DataType::Int32))
            .data_property(DataProperty::new("discontinued", DataType::Boolean).nullable(false))
            .navigation_property(
                NavigationProperty::scalar("supplier", "Supplier")
                    .foreign_keys(["supplierID"])
                    .inverse("products"),
            ),
        EntityType::new("User")
            .data_property(DataProperty::new("userName", DataType::String).key())
            .data_property(DataProperty::new("email", DataType::String).max_length(80))
            .data_property(DataProperty::new("createdDate", DataType::DateTime).nullable(false)),
    ];
    for entity_type in types {
        let name = entity_type.name().to_string();
        store.add_entity_type(entity_type).expect("entity type");
        store
            .add_validator(&name, Arc::new(RequiredValidator))
            .expect("required validator");
        store
            .add_validator(&name, Arc::new(MaxLengthValidator))
            .expect("max length validator");
    }
    Arc::new(store)
}

/// Creates a manager over a fresh copy of the sample model.
pub fn new_manager() -> EntityManager {
    EntityManager::with_metadata(northwind_metadata())
}

/// Creates a manager sharing `store`.
pub fn manager_for(store: &Arc<MetadataStore>) -> EntityManager {
    EntityManager::new(ManagerConfig::new(Arc::clone(store)))
}

/// A server row: property name to value.
pub fn row<I, K>(entries: I) -> BTreeMap<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Attaches an Unchanged customer with a fresh id, as if queried.
pub fn unchanged_customer(em: &EntityManager, company_name: &str) -> Entity {
    em.create_entity_with(
        "Customer",
        &[
            ("customerID", PropertyValue::from(Uuid::new_v4())),
            ("companyName", company_name.into()),
        ],
        EntityState::Unchanged,
        MergeStrategy::Disallowed,
    )
    .expect("customer")
}

/// Attaches an Unchanged order with the given id.
pub fn unchanged_order(em: &EntityManager, order_id: i32) -> Entity {
    em.create_entity_with(
        "Order",
        &[("orderID", order_id.into())],
        EntityState::Unchanged,
        MergeStrategy::Disallowed,
    )
    .expect("order")
}

/// Attaches an Unchanged customer with `order_count` Unchanged orders,
/// numbered from `first_order_id`.
pub fn customer_with_orders(em: &EntityManager, order_count: usize, first_order_id: i32) -> (Entity, Vec<Entity>) {
    let customer = unchanged_customer(em, "Acme");
    let customer_id = customer.get_value("customerID").expect("customerID");
    let orders = (0..order_count)
        .map(|i| {
            let values = row([
                ("orderID", Value::Integer(i64::from(first_order_id) + i as i64)),
                ("customerID", customer_id.clone()),
                ("shipName", Value::from(format!("Ship {i}"))),
            ]);
            em.merge_query_result("Order", &values, None).expect("order row")
        })
        .collect();
    (customer, orders)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_registers() {
        let store = northwind_metadata();
        assert_eq!(store.name(), NORTHWIND_VERSION);
        assert_eq!(store.entity_types().len(), 7);
        let customer = store.entity_type("Customer").unwrap();
        let orders = customer.navigation_named("orders").unwrap();
        assert_eq!(orders.inverse_foreign_key_names(), ["customerID".to_string()]);
    }

    #[test]
    fn customer_with_orders_links() {
        let em = new_manager();
        let (customer, orders) = customer_with_orders(&em, 3, 100);
        assert_eq!(customer.get_collection("orders").unwrap().len(), 3);
        for order in &orders {
            assert_eq!(order.get_entity("customer").unwrap(), Some(customer.clone()));
            assert!(order.aspect().entity_state().is_unchanged());
        }
    }
}
