//! Data models for the shipping schema.
//!
//! This module re-exports all model types used throughout the application.

pub mod entities;
pub mod page;

// Re-export commonly used types
pub use entities::{
    Customer, Driver, NewShipment, Package, Route, Shipment, ShipmentStatus, Vehicle, Warehouse,
};
pub use page::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, Page, PageRequest};
