//! Entity metadata: data types, property descriptors, entity and complex
//! types, and the store that registers them.

mod complex_type;
mod data_type;
mod entity_type;
mod property;
mod store;

pub use complex_type::ComplexType;
pub use data_type::{default_date, DataType};
pub use entity_type::{AutoGeneratedKeyType, EntityType, PropertyRef};
pub use property::{DataProperty, NavigationProperty, PropertyDescriptor};
pub use store::{Initializer, MetadataSnapshot, MetadataStore};
