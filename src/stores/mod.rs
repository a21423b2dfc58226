pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::assignment::{Assignment, SupportTicket};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::models::rider::{GeoPoint, RiderProfile};

/// Live position row from the external location store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderLocation {
    pub key: String,
    pub location: GeoPoint,
}

/// Capability-store query. `capacity_at_least` bounds the rider's maximum
/// capacity from below, `capacity_at_most` bounds the minimum capacity from
/// above; passing the item weight for both selects riders whose range covers
/// the load.
#[derive(Debug, Clone, Default)]
pub struct RiderFilter {
    pub capacity_at_least: Option<f64>,
    pub capacity_at_most: Option<f64>,
    /// Restrict to riders that handle fragile items.
    pub fragile_required: bool,
    /// Restrict to this key set (the located riders, usually).
    pub keys: Option<Vec<String>>,
}

impl RiderFilter {
    /// Filter covering one delivery leg: capacity range around the item
    /// weight, fragile handling only when the item needs it.
    pub fn for_load(weight: f64, fragile: bool) -> Self {
        Self {
            capacity_at_least: Some(weight),
            capacity_at_most: Some(weight),
            fragile_required: fragile,
            keys: None,
        }
    }
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn rider_locations(
        &self,
        keys: Option<&[String]>,
    ) -> Result<Vec<RiderLocation>, DispatchError>;
}

#[async_trait]
pub trait RiderStore: Send + Sync {
    async fn riders(&self, filter: &RiderFilter) -> Result<Vec<RiderProfile>, DispatchError>;

    /// Bump the rider's decline counter.
    async fn record_decline(&self, key: &str) -> Result<(), DispatchError>;

    /// Mean per-km rate across known riders, used for bulk leg pricing.
    async fn average_rate_per_km(&self) -> Result<Option<f64>, DispatchError>;
}

/// Per-rider payload of a dispatch broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct RiderNotice {
    pub rider: String,
    pub distance_km: f64,
    pub duration: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastContext {
    pub order_id: Uuid,
    pub pickup: GeoPoint,
    pub price: Option<f64>,
    pub message: Option<String>,
}

/// Rider details shared with the customer once an assignment is accepted.
#[derive(Debug, Clone, Serialize)]
pub struct RiderInfo {
    pub key: String,
    pub name: String,
    pub distance_km: f64,
    pub duration: String,
    pub price: f64,
}

/// Fire-and-forget notification fan-out; delivery is at-least-once and no
/// return value is consumed by the dispatch core.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_riders(&self, riders: &[RiderNotice], context: &BroadcastContext);

    async fn notify_customer(&self, customer: &str, message: &str, rider_info: Option<&RiderInfo>);
}

/// How a Pending assignment resolves. Applied atomically by the store.
#[derive(Debug, Clone)]
pub enum AssignmentResolution {
    Accept {
        price: f64,
        distance_meters: f64,
        duration_secs: u64,
        duration_text: String,
    },
    Decline {
        reason: String,
    },
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn order(&self, id: Uuid) -> Result<Option<DeliveryOrder>, DispatchError>;

    async fn create_order(&self, order: DeliveryOrder) -> Result<(), DispatchError>;

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<(), DispatchError>;

    async fn assignment(&self, id: Uuid) -> Result<Option<Assignment>, DispatchError>;

    async fn assignments_for_order(&self, order_id: Uuid) -> Result<Vec<Assignment>, DispatchError>;

    /// Conditional insert: fails with `AssignmentConflict` when the rider
    /// already holds a live (Pending or Accepted) assignment on the order.
    async fn create_assignment(&self, assignment: Assignment) -> Result<(), DispatchError>;

    /// Insert a batch of sub-order assignments as one unit.
    async fn create_assignments(&self, batch: Vec<Assignment>) -> Result<(), DispatchError>;

    /// Conditional transition out of Pending; anything already terminal is
    /// an `AssignmentConflict`. Declining writes the `DeclinedOrder` audit
    /// row as part of the same operation.
    async fn resolve_assignment(
        &self,
        id: Uuid,
        resolution: AssignmentResolution,
    ) -> Result<Assignment, DispatchError>;

    async fn create_support_ticket(&self, ticket: SupportTicket) -> Result<(), DispatchError>;
}

#[async_trait]
pub trait Wallet: Send + Sync {
    async fn available_balance(&self, customer: &str) -> Result<f64, DispatchError>;
}
