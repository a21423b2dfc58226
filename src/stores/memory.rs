//! In-memory collaborator implementations backed by `DashMap`, used by the
//! test suite and local runs. Production deployments plug real stores into
//! the same traits.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::assignment::{Assignment, AssignmentStatus, DeclinedOrder, SupportTicket};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::models::rider::{GeoPoint, RiderProfile};
use crate::routing::ProviderKind;
use crate::routing::failover::ProviderStateStore;
use crate::stores::{
    AssignmentResolution, BroadcastContext, LocationStore, Notifier, OrderStore, RiderFilter,
    RiderInfo, RiderLocation, RiderNotice, RiderStore, Wallet,
};

#[derive(Default)]
pub struct InMemoryLocationStore {
    rows: DashMap<String, GeoPoint>,
}

impl InMemoryLocationStore {
    pub fn set_location(&self, key: &str, location: GeoPoint) {
        self.rows.insert(key.to_string(), location);
    }
}

#[async_trait]
impl LocationStore for InMemoryLocationStore {
    async fn rider_locations(
        &self,
        keys: Option<&[String]>,
    ) -> Result<Vec<RiderLocation>, DispatchError> {
        Ok(self
            .rows
            .iter()
            .filter(|entry| keys.is_none_or(|keys| keys.contains(entry.key())))
            .map(|entry| RiderLocation {
                key: entry.key().clone(),
                location: *entry.value(),
            })
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryRiderStore {
    riders: DashMap<String, RiderProfile>,
    declines: DashMap<String, u64>,
}

impl InMemoryRiderStore {
    pub fn upsert(&self, profile: RiderProfile) {
        self.riders.insert(profile.key.clone(), profile);
    }

    pub fn declined_count(&self, key: &str) -> u64 {
        self.declines.get(key).map(|entry| *entry.value()).unwrap_or(0)
    }
}

#[async_trait]
impl RiderStore for InMemoryRiderStore {
    async fn riders(&self, filter: &RiderFilter) -> Result<Vec<RiderProfile>, DispatchError> {
        Ok(self
            .riders
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|profile| {
                filter
                    .capacity_at_least
                    .is_none_or(|v| profile.max_capacity >= v)
                    && filter
                        .capacity_at_most
                        .is_none_or(|v| profile.min_capacity <= v)
                    && (!filter.fragile_required || profile.fragile_allowed)
                    && filter
                        .keys
                        .as_ref()
                        .is_none_or(|keys| keys.contains(&profile.key))
            })
            .collect())
    }

    async fn record_decline(&self, key: &str) -> Result<(), DispatchError> {
        *self.declines.entry(key.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn average_rate_per_km(&self) -> Result<Option<f64>, DispatchError> {
        let rates: Vec<f64> = self.riders.iter().map(|entry| entry.value().rate_per_km).collect();
        if rates.is_empty() {
            return Ok(None);
        }
        Ok(Some(rates.iter().sum::<f64>() / rates.len() as f64))
    }
}

#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: DashMap<Uuid, DeliveryOrder>,
    assignments: DashMap<Uuid, Assignment>,
    declined: DashMap<Uuid, DeclinedOrder>,
    tickets: DashMap<Uuid, SupportTicket>,
    // Serializes check-then-insert and resolve so the uniqueness invariant
    // holds without relying on caller-side locking.
    write_lock: Mutex<()>,
}

impl InMemoryOrderStore {
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    pub fn declined_orders(&self, order_id: Uuid) -> Vec<DeclinedOrder> {
        self.declined
            .iter()
            .filter(|entry| entry.value().order_id == order_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn support_tickets(&self, order_id: Uuid) -> Vec<SupportTicket> {
        self.tickets
            .iter()
            .filter(|entry| entry.value().order_id == order_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn order(&self, id: Uuid) -> Result<Option<DeliveryOrder>, DispatchError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn create_order(&self, order: DeliveryOrder) -> Result<(), DispatchError> {
        self.orders.insert(order.id, order);
        Ok(())
    }

    async fn update_order_status(&self, id: Uuid, status: OrderStatus) -> Result<(), DispatchError> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("order {id}")))?;
        order.status = status;
        Ok(())
    }

    async fn assignment(&self, id: Uuid) -> Result<Option<Assignment>, DispatchError> {
        Ok(self.assignments.get(&id).map(|entry| entry.value().clone()))
    }

    async fn assignments_for_order(&self, order_id: Uuid) -> Result<Vec<Assignment>, DispatchError> {
        let mut rows: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|entry| entry.value().order_id == order_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|a| (a.sequence, a.created_at));
        Ok(rows)
    }

    async fn create_assignment(&self, assignment: Assignment) -> Result<(), DispatchError> {
        let _guard = self.lock();

        if let Some(rider) = &assignment.rider {
            let conflicting = self.assignments.iter().any(|entry| {
                let existing = entry.value();
                existing.order_id == assignment.order_id
                    && existing.rider.as_deref() == Some(rider)
                    && existing.is_live()
            });
            if conflicting {
                return Err(DispatchError::AssignmentConflict(format!(
                    "rider {rider} already holds a live assignment on order {}",
                    assignment.order_id
                )));
            }
        }

        self.assignments.insert(assignment.id, assignment);
        Ok(())
    }

    async fn create_assignments(&self, batch: Vec<Assignment>) -> Result<(), DispatchError> {
        let _guard = self.lock();
        for assignment in batch {
            self.assignments.insert(assignment.id, assignment);
        }
        Ok(())
    }

    async fn resolve_assignment(
        &self,
        id: Uuid,
        resolution: AssignmentResolution,
    ) -> Result<Assignment, DispatchError> {
        let _guard = self.lock();

        let mut assignment = self
            .assignments
            .get_mut(&id)
            .ok_or_else(|| DispatchError::NotFound(format!("assignment {id}")))?;

        if assignment.status != AssignmentStatus::Pending {
            return Err(DispatchError::AssignmentConflict(format!(
                "assignment {id} is already {:?}",
                assignment.status
            )));
        }

        match resolution {
            AssignmentResolution::Accept {
                price,
                distance_meters,
                duration_secs,
                duration_text,
            } => {
                assignment.status = AssignmentStatus::Accepted;
                assignment.price = Some(price);
                assignment.distance_meters = Some(distance_meters);
                assignment.duration_secs = Some(duration_secs);
                assignment.duration_text = Some(duration_text);
            }
            AssignmentResolution::Decline { reason } => {
                assignment.status = AssignmentStatus::Declined;
                assignment.decline_reason = Some(reason.clone());
                // The audit row lands under the same write lock as the
                // transition, so a Declined row without its audit trail
                // cannot exist.
                if let Some(rider) = &assignment.rider {
                    let record = DeclinedOrder {
                        id: Uuid::new_v4(),
                        order_id: assignment.order_id,
                        rider: rider.clone(),
                        reason,
                        declined_at: Utc::now(),
                    };
                    self.declined.insert(record.id, record);
                }
            }
        }

        Ok(assignment.clone())
    }

    async fn create_support_ticket(&self, ticket: SupportTicket) -> Result<(), DispatchError> {
        self.tickets.insert(ticket.id, ticket);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryWallet {
    balances: DashMap<String, f64>,
}

impl InMemoryWallet {
    pub fn set_balance(&self, customer: &str, balance: f64) {
        self.balances.insert(customer.to_string(), balance);
    }
}

#[async_trait]
impl Wallet for InMemoryWallet {
    async fn available_balance(&self, customer: &str) -> Result<f64, DispatchError> {
        Ok(self
            .balances
            .get(customer)
            .map(|entry| *entry.value())
            .unwrap_or(0.0))
    }
}

/// Records every notification it is handed; the analog of the notification
/// tables the production system writes through.
#[derive(Default)]
pub struct InMemoryNotifier {
    rider_notices: Mutex<Vec<(RiderNotice, BroadcastContext)>>,
    customer_notices: Mutex<Vec<(String, String, Option<RiderInfo>)>>,
}

impl InMemoryNotifier {
    pub fn rider_notices(&self) -> Vec<(RiderNotice, BroadcastContext)> {
        match self.rider_notices.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn customer_notices(&self) -> Vec<(String, String, Option<RiderInfo>)> {
        match self.customer_notices.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify_riders(&self, riders: &[RiderNotice], context: &BroadcastContext) {
        debug!(order_id = %context.order_id, riders = riders.len(), "rider broadcast");
        if let Ok(mut guard) = self.rider_notices.lock() {
            for notice in riders {
                guard.push((notice.clone(), context.clone()));
            }
        }
    }

    async fn notify_customer(&self, customer: &str, message: &str, rider_info: Option<&RiderInfo>) {
        debug!(customer, message, "customer notification");
        if let Ok(mut guard) = self.customer_notices.lock() {
            guard.push((customer.to_string(), message.to_string(), rider_info.cloned()));
        }
    }
}

#[derive(Default)]
pub struct InMemoryProviderState {
    active: Mutex<Option<ProviderKind>>,
}

#[async_trait]
impl ProviderStateStore for InMemoryProviderState {
    async fn load_active(&self) -> Result<Option<ProviderKind>, DispatchError> {
        match self.active.lock() {
            Ok(guard) => Ok(*guard),
            Err(poisoned) => Ok(*poisoned.into_inner()),
        }
    }

    async fn save_active(&self, kind: ProviderKind) -> Result<(), DispatchError> {
        match self.active.lock() {
            Ok(mut guard) => {
                *guard = Some(kind);
                Ok(())
            }
            Err(_) => Err(DispatchError::Store("provider state lock poisoned".to_string())),
        }
    }
}
