use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FieldError;
use crate::models::rider::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Assigned,
    PartiallyAssigned,
    InTransit,
    Delivered,
    Cancelled,
    /// Dispatch gave up; an operator has to resolve the order by hand.
    ManualResolution,
}

/// One delivery leg in need of a rider. For bulk orders there is one request
/// per destination, numbered by `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub weight: f64,
    pub fragile: bool,
    pub offered_price: Option<f64>,
    pub sequence: u32,
}

impl OrderRequest {
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if !self.pickup.is_valid() {
            errors.push(FieldError::new("pickup", "coordinates out of valid range"));
        }
        if !self.dropoff.is_valid() {
            errors.push(FieldError::new("dropoff", "coordinates out of valid range"));
        }
        if !(self.weight > 0.0) {
            errors.push(FieldError::new("weight", "must be greater than zero"));
        }
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

/// Persisted order aggregate. Bulk parents carry no dropoff of their own;
/// the destinations live on the per-leg assignments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: Uuid,
    pub customer: String,
    pub pickup: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub weight: f64,
    pub fragile: bool,
    pub offered_price: Option<f64>,
    pub status: OrderStatus,
    pub is_bulk: bool,
    pub created_at: DateTime<Utc>,
}

impl DeliveryOrder {
    pub fn request_for_leg(&self, dropoff: GeoPoint, weight: f64, sequence: u32) -> OrderRequest {
        OrderRequest {
            order_id: self.id,
            pickup: self.pickup,
            dropoff,
            weight,
            fragile: self.fragile,
            offered_price: self.offered_price,
            sequence,
        }
    }
}

/// One destination of a bulk order as submitted by the customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkDestination {
    pub location: GeoPoint,
    pub recipient_name: String,
    pub recipient_address: String,
    pub recipient_phone: Option<String>,
    pub package_name: String,
    pub weight: f64,
    pub fragile: bool,
}

impl BulkDestination {
    pub fn validate(&self, index: usize, errors: &mut Vec<FieldError>) {
        if !self.location.is_valid() {
            errors.push(FieldError::at(index, "location", "coordinates out of valid range"));
        }
        if self.recipient_name.trim().is_empty() {
            errors.push(FieldError::at(index, "recipient_name", "is required"));
        }
        if self.recipient_address.trim().is_empty() {
            errors.push(FieldError::at(index, "recipient_address", "is required"));
        }
        if self.package_name.trim().is_empty() {
            errors.push(FieldError::at(index, "package_name", "is required"));
        }
        if !(self.weight > 0.0) {
            errors.push(FieldError::at(index, "weight", "must be greater than zero"));
        }
    }
}

/// A bulk order aggregate: one pickup, many destinations, one customer.
/// Destinations are immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkOrder {
    pub id: Uuid,
    pub customer: String,
    pub pickup: GeoPoint,
    pub destinations: Vec<BulkDestination>,
    pub created_at: DateTime<Utc>,
}
