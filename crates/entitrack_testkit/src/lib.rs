//! # entitrack testkit
//!
//! Test utilities for entitrack.
//!
//! This crate provides:
//! - A sample Northwind-style model and manager helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entitrack_testkit::prelude::*;
//!
//! #[test]
//! fn orders_follow_their_customer() {
//!     let em = new_manager();
//!     let (customer, orders) = customer_with_orders(&em, 2, 1);
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
