//! Shipping schema row types.
//!
//! Column names are PascalCase in every dialect. DECIMAL columns may arrive as
//! numbers or as exact decimal text depending on the driver, so money-like and
//! measurement fields go through the decimal helpers.

use crate::db::types::{
    bool_from_flag, datetime_from_text, f64_from_decimal, opt_datetime_from_text,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(deserialize_with = "datetime_from_text")]
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Warehouse {
    pub id: i64,
    pub name: String,
    pub city: String,
    pub country: String,
    #[serde(rename = "MaxCapacityM3", deserialize_with = "f64_from_decimal")]
    pub max_capacity_m3: f64,
    #[serde(rename = "CurrentCapacityM3", deserialize_with = "f64_from_decimal")]
    pub current_capacity_m3: f64,
}

impl Warehouse {
    /// Capacity still free, never negative.
    pub fn free_capacity_m3(&self) -> f64 {
        (self.max_capacity_m3 - self.current_capacity_m3).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Route {
    pub id: i64,
    pub name: String,
    pub origin_warehouse_id: i64,
    pub destination_warehouse_id: i64,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub distance_km: f64,
    #[serde(deserialize_with = "bool_from_flag")]
    pub is_active: bool,
}

/// Lifecycle of a shipment, stored as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentStatus {
    Pending,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InTransit => "InTransit",
            Self::Delivered => "Delivered",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Delivered and cancelled shipments accept no further transitions.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Shipment {
    pub id: i64,
    pub customer_id: i64,
    #[serde(default)]
    pub route_id: Option<i64>,
    pub tracking_number: String,
    pub status: ShipmentStatus,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub weight_kg: f64,
    #[serde(deserialize_with = "datetime_from_text")]
    pub created_at: NaiveDateTime,
    #[serde(default, deserialize_with = "opt_datetime_from_text")]
    pub delivered_at: Option<NaiveDateTime>,
}

/// Values for a shipment that does not exist yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewShipment {
    pub customer_id: i64,
    pub route_id: Option<i64>,
    pub tracking_number: String,
    pub weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Package {
    pub id: i64,
    pub shipment_id: i64,
    pub description: String,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub weight_kg: f64,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub length_cm: f64,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub width_cm: f64,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub height_cm: f64,
}

impl Package {
    pub fn volume_m3(&self) -> f64 {
        self.length_cm * self.width_cm * self.height_cm / 1_000_000.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Vehicle {
    pub id: i64,
    pub registration_number: String,
    pub kind: String,
    #[serde(deserialize_with = "f64_from_decimal")]
    pub capacity_kg: f64,
    #[serde(default)]
    pub warehouse_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Driver {
    pub id: i64,
    pub name: String,
    pub license_number: String,
    #[serde(default)]
    pub vehicle_id: Option<i64>,
    #[serde(deserialize_with = "bool_from_flag")]
    pub is_active: bool,
}
