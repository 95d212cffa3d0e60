//! Small model shared by unit tests.

use crate::metadata::{
    AutoGeneratedKeyType, DataProperty, DataType, EntityType, MetadataStore, NavigationProperty,
};
use std::sync::Arc;

pub(crate) fn northwind() -> Arc<MetadataStore> {
    let store = MetadataStore::new("unit");
    store
        .add_entity_type(
            EntityType::new("Customer")
                .auto_generated_key(AutoGeneratedKeyType::KeyGenerator)
                .data_property(DataProperty::new("customerID", DataType::Guid).key())
                .data_property(DataProperty::new("companyName", DataType::String))
                .navigation_property(NavigationProperty::collection("orders", "Order").inverse("customer")),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Order")
                .auto_generated_key(AutoGeneratedKeyType::Identity)
                .data_property(DataProperty::new("orderID", DataType::Int32).key())
                .data_property(DataProperty::new("customerID", DataType::Guid))
                .data_property(DataProperty::new("orderDate", DataType::DateTime))
                .data_property(DataProperty::new("freight", DataType::Decimal))
                .data_property(DataProperty::new("shipName", DataType::String))
                .navigation_property(
                    NavigationProperty::scalar("customer", "Customer")
                        .foreign_keys(["customerID"])
                        .inverse("orders"),
                )
                .navigation_property(
                    NavigationProperty::collection("orderDetails", "OrderDetail").inverse("order"),
                ),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("OrderDetail")
                .data_property(DataProperty::new("orderID", DataType::Int32).key())
                .data_property(DataProperty::new("productID", DataType::Int32).key())
                .data_property(DataProperty::new("quantity", DataType::Int16))
                .navigation_property(
                    NavigationProperty::scalar("order", "Order")
                        .foreign_keys(["orderID"])
                        .inverse("orderDetails"),
                )
                .navigation_property(
                    NavigationProperty::scalar("product", "Product").foreign_keys(["productID"]),
                ),
        )
        .unwrap();
    store
        .add_entity_type(
            EntityType::new("Product")
                .auto_generated_key(AutoGeneratedKeyType::Identity)
                .data_property(DataProperty::new("productID", DataType::Int32).key())
                .data_property(DataProperty::new("productName", DataType::String)),
        )
        .unwrap();
    Arc::new(store)
}
