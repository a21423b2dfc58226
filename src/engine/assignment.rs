use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::matcher::{DispatchMatcher, MatchOutcome};
use crate::error::DispatchError;
use crate::models::assignment::{Assignment, AssignmentStatus, EscalationKind, SupportTicket};
use crate::models::order::{DeliveryOrder, OrderStatus};
use crate::observability::metrics::Metrics;
use crate::routing::format_duration;
use crate::stores::{
    AssignmentResolution, Notifier, OrderStore, RiderFilter, RiderInfo, RiderStore, Wallet,
};

/// What happened after a decline was recorded.
#[derive(Debug)]
pub enum DeclineOutcome {
    /// A replacement rider was found and bound to a fresh Pending row.
    Replacement(Assignment),
    /// Nobody else qualified; the order went to manual resolution.
    Escalated(SupportTicket),
}

/// Drives Pending assignments to their terminal state. Accept and decline on
/// the same order are serialized through a per-order lock so concurrent rider
/// responses cannot interleave their read-check-write sequences.
pub struct AssignmentLifecycle {
    matcher: Arc<DispatchMatcher>,
    orders: Arc<dyn OrderStore>,
    riders: Arc<dyn RiderStore>,
    wallet: Arc<dyn Wallet>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<Metrics>,
    order_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AssignmentLifecycle {
    pub fn new(
        matcher: Arc<DispatchMatcher>,
        orders: Arc<dyn OrderStore>,
        riders: Arc<dyn RiderStore>,
        wallet: Arc<dyn Wallet>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            matcher,
            orders,
            riders,
            wallet,
            notifier,
            metrics,
            order_locks: DashMap::new(),
        }
    }

    fn order_lock(&self, order_id: Uuid) -> Arc<Mutex<()>> {
        self.order_locks.entry(order_id).or_default().clone()
    }

    /// Drop the per-order mutex once the order has left dispatch, unless
    /// another task still holds a handle to it.
    fn release_order_lock(&self, order_id: Uuid) {
        self.order_locks
            .remove_if(&order_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    #[cfg(test)]
    pub(crate) fn order_lock_count(&self) -> usize {
        self.order_locks.len()
    }

    pub async fn accept(
        &self,
        assignment_id: Uuid,
        rider: &str,
    ) -> Result<Assignment, DispatchError> {
        let assignment = self.load_assignment(assignment_id, rider).await?;
        let lock = self.order_lock(assignment.order_id);
        let _guard = lock.lock().await;

        let order = self.load_order(assignment.order_id).await?;
        if order.status == OrderStatus::Cancelled {
            return Err(DispatchError::InvalidRequest(format!(
                "order {} has been cancelled",
                order.id
            )));
        }

        let distance_meters = assignment.distance_meters.unwrap_or(0.0);
        let duration_secs = assignment.duration_secs.unwrap_or(0);
        let duration_text = assignment
            .duration_text
            .clone()
            .unwrap_or_else(|| format_duration(duration_secs));
        let price = self.price_for(&order, &assignment, rider, distance_meters).await?;

        let balance = self.wallet.available_balance(&order.customer).await?;
        if balance < price {
            return Err(DispatchError::InsufficientBalance(format!(
                "order {} needs {price:.2}, wallet holds {balance:.2}",
                order.id
            )));
        }

        let accepted = self
            .orders
            .resolve_assignment(
                assignment_id,
                AssignmentResolution::Accept {
                    price,
                    distance_meters,
                    duration_secs,
                    duration_text: duration_text.clone(),
                },
            )
            .await?;
        self.metrics
            .assignments_total
            .with_label_values(&["accepted"])
            .inc();
        info!(order_id = %order.id, rider, price, "assignment accepted");

        let rolled_up = self.roll_up_order_status(order.id).await?;

        let rider_info = RiderInfo {
            key: rider.to_string(),
            name: self.rider_name(rider).await.unwrap_or_else(|| rider.to_string()),
            distance_km: distance_meters / 1000.0,
            duration: duration_text,
            price,
        };
        let notifier = self.notifier.clone();
        let customer = order.customer.clone();
        tokio::spawn(async move {
            notifier
                .notify_customer(&customer, "A rider has accepted your delivery", Some(&rider_info))
                .await;
        });

        drop(_guard);
        drop(lock);
        if rolled_up == Some(OrderStatus::Assigned) {
            self.release_order_lock(order.id);
        }
        Ok(accepted)
    }

    pub async fn decline(
        &self,
        assignment_id: Uuid,
        rider: &str,
        reason: &str,
    ) -> Result<DeclineOutcome, DispatchError> {
        if reason.trim().is_empty() {
            return Err(DispatchError::InvalidRequest(
                "a decline requires a reason".to_string(),
            ));
        }

        let assignment = self.load_assignment(assignment_id, rider).await?;
        let lock = self.order_lock(assignment.order_id);
        let _guard = lock.lock().await;

        let order = self.load_order(assignment.order_id).await?;

        // The Declined transition and its audit row are one store operation;
        // the decline counter is a best-effort statistic and must not undo
        // an already-committed decline.
        let declined = self
            .orders
            .resolve_assignment(
                assignment_id,
                AssignmentResolution::Decline {
                    reason: reason.to_string(),
                },
            )
            .await?;
        self.metrics
            .assignments_total
            .with_label_values(&["declined"])
            .inc();

        if let Err(err) = self.riders.record_decline(rider).await {
            warn!(rider, error = %err, "decline counter update failed");
        }
        info!(order_id = %order.id, rider, reason, "assignment declined");

        let outcome = self.find_replacement(&order, &declined).await?;

        drop(_guard);
        drop(lock);
        if matches!(outcome, DeclineOutcome::Escalated(_)) {
            self.release_order_lock(order.id);
        }
        Ok(outcome)
    }

    /// Rerun the match for the declined leg, excluding everyone who already
    /// turned the order down or still holds a live assignment on it. No
    /// takers means a support ticket.
    async fn find_replacement(
        &self,
        order: &DeliveryOrder,
        declined: &Assignment,
    ) -> Result<DeclineOutcome, DispatchError> {
        let mut exclude: Vec<String> = self
            .orders
            .assignments_for_order(order.id)
            .await?
            .into_iter()
            .filter(|a| a.status == AssignmentStatus::Declined || a.is_live())
            .filter_map(|a| a.rider)
            .collect();
        exclude.sort();
        exclude.dedup();

        let dropoff = declined
            .destination
            .or(order.dropoff)
            .ok_or_else(|| DispatchError::Internal(format!("order {} has no destination", order.id)))?;
        let request = order.request_for_leg(dropoff, declined.weight, declined.sequence);

        match self.matcher.match_riders(&request, &exclude).await? {
            MatchOutcome::Matched(ranked) => {
                let replacement = self
                    .matcher
                    .create_assignment_for(&request, &ranked[0])
                    .await?;
                info!(
                    order_id = %order.id,
                    rider = %ranked[0].rider.key,
                    "replacement rider assigned"
                );
                Ok(DeclineOutcome::Replacement(replacement))
            }
            MatchOutcome::NoRidersInRadius => {
                warn!(order_id = %order.id, "no replacement rider available; escalating");
                let ticket = self
                    .escalate(
                        order.id,
                        EscalationKind::NoRidersAvailable,
                        format!(
                            "every qualified rider declined order {}; manual dispatch required",
                            order.id
                        ),
                    )
                    .await?;
                self.orders
                    .update_order_status(order.id, OrderStatus::ManualResolution)
                    .await?;

                let notifier = self.notifier.clone();
                let customer = order.customer.clone();
                tokio::spawn(async move {
                    notifier
                        .notify_customer(
                            &customer,
                            "We could not find a rider for your delivery; our support team is on it",
                            None,
                        )
                        .await;
                });

                Ok(DeclineOutcome::Escalated(ticket))
            }
        }
    }

    /// File a support ticket for a dispatch failure. Callers decide what the
    /// order status becomes.
    pub(crate) async fn escalate(
        &self,
        order_id: Uuid,
        kind: EscalationKind,
        description: String,
    ) -> Result<SupportTicket, DispatchError> {
        let ticket = SupportTicket {
            id: Uuid::new_v4(),
            order_id,
            ticket_type: kind.as_str().to_string(),
            priority: kind.priority(),
            description,
            created_at: Utc::now(),
        };
        self.orders.create_support_ticket(ticket.clone()).await?;
        self.metrics.support_tickets_total.inc();
        Ok(ticket)
    }

    /// Order-level status from its legs: every leg covered by an accepted
    /// assignment means Assigned, any covered leg among uncovered ones means
    /// PartiallyAssigned. Returns the status it settled on, if any.
    async fn roll_up_order_status(
        &self,
        order_id: Uuid,
    ) -> Result<Option<OrderStatus>, DispatchError> {
        let assignments = self.orders.assignments_for_order(order_id).await?;

        let legs: HashSet<u32> = assignments.iter().map(|a| a.sequence).collect();
        let covered: HashSet<u32> = assignments
            .iter()
            .filter(|a| a.status == AssignmentStatus::Accepted)
            .map(|a| a.sequence)
            .collect();

        if covered.is_empty() {
            return Ok(None);
        }
        let status = if covered.len() == legs.len() {
            OrderStatus::Assigned
        } else {
            OrderStatus::PartiallyAssigned
        };
        self.orders.update_order_status(order_id, status).await?;
        Ok(Some(status))
    }

    /// Customer offer wins; otherwise the rider's per-km rate over the
    /// measured road distance, falling back to the fleet average rate.
    async fn price_for(
        &self,
        order: &DeliveryOrder,
        assignment: &Assignment,
        rider: &str,
        distance_meters: f64,
    ) -> Result<f64, DispatchError> {
        if let Some(price) = assignment.price.or(order.offered_price) {
            return Ok(price);
        }

        let rate = match self.rider_rate(rider).await? {
            Some(rate) => rate,
            None => self.riders.average_rate_per_km().await?.ok_or_else(|| {
                DispatchError::InvalidRequest(format!(
                    "order {} has no offered price and no rate is known for rider {rider}",
                    order.id
                ))
            })?,
        };
        Ok(rate * distance_meters / 1000.0)
    }

    async fn rider_rate(&self, rider: &str) -> Result<Option<f64>, DispatchError> {
        Ok(self.rider_profile(rider).await?.map(|p| p.rate_per_km))
    }

    async fn rider_name(&self, rider: &str) -> Option<String> {
        self.rider_profile(rider).await.ok().flatten().map(|p| p.name)
    }

    async fn rider_profile(
        &self,
        rider: &str,
    ) -> Result<Option<crate::models::rider::RiderProfile>, DispatchError> {
        let filter = RiderFilter {
            keys: Some(vec![rider.to_string()]),
            ..RiderFilter::default()
        };
        Ok(self.riders.riders(&filter).await?.into_iter().next())
    }

    async fn load_assignment(
        &self,
        assignment_id: Uuid,
        rider: &str,
    ) -> Result<Assignment, DispatchError> {
        let assignment = self
            .orders
            .assignment(assignment_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("assignment {assignment_id}")))?;

        match assignment.rider.as_deref() {
            Some(owner) if owner == rider => Ok(assignment),
            _ => Err(DispatchError::InvalidRequest(format!(
                "assignment {assignment_id} does not belong to rider {rider}"
            ))),
        }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<DeliveryOrder, DispatchError> {
        self.orders
            .order(order_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("order {order_id}")))
    }
}
