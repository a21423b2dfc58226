use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::assignment::AssignmentLifecycle;
use crate::engine::matcher::DispatchMatcher;
use crate::error::{DispatchError, FieldError};
use crate::geo;
use crate::models::assignment::{Assignment, AssignmentStatus, EscalationKind};
use crate::models::order::{BulkDestination, BulkOrder, DeliveryOrder, OrderStatus};
use crate::models::rider::GeoPoint;
use crate::routing::RouteStop;
use crate::stores::{OrderStore, RiderFilter, RiderStore};

/// A destination that could not be planned, keyed by its 1-based sequence.
#[derive(Debug, Clone)]
pub struct LegFailure {
    pub sequence: u32,
    pub message: String,
}

/// Persisted result of a successful split: the parent order plus one
/// Pending, rider-less assignment per destination. Rider pairing happens
/// later through the assignment lifecycle, one rider per leg.
#[derive(Debug)]
pub struct BulkPlan {
    pub order: DeliveryOrder,
    pub bulk: BulkOrder,
    pub assignments: Vec<Assignment>,
    pub failures: Vec<LegFailure>,
}

#[derive(Debug)]
pub enum BulkOutcome {
    Created(BulkPlan),
    /// Nobody is positioned near the pickup; nothing was persisted.
    NoRidersNearPickup,
    /// One or more destinations exceed the delivery distance limit, by
    /// straight line or by measured route, collected across the whole
    /// batch; nothing was persisted.
    DistanceLimitExceeded(Vec<LegFailure>),
}

/// Decomposes a multi-destination order into sequence-numbered sub-order
/// assignments. Validation is fail-fast for the whole batch; cost
/// computation is itemized per destination.
pub struct BulkSplitter {
    matcher: Arc<DispatchMatcher>,
    lifecycle: Arc<AssignmentLifecycle>,
    orders: Arc<dyn OrderStore>,
    riders: Arc<dyn RiderStore>,
    config: DispatchConfig,
}

impl BulkSplitter {
    pub fn new(
        matcher: Arc<DispatchMatcher>,
        lifecycle: Arc<AssignmentLifecycle>,
        orders: Arc<dyn OrderStore>,
        riders: Arc<dyn RiderStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            matcher,
            lifecycle,
            orders,
            riders,
            config,
        }
    }

    pub async fn split_bulk_order(
        &self,
        customer: &str,
        pickup: GeoPoint,
        destinations: Vec<BulkDestination>,
    ) -> Result<BulkOutcome, DispatchError> {
        self.validate(&pickup, &destinations)?;

        let anyone_near = self
            .matcher
            .any_rider_near(&pickup, &RiderFilter::default(), self.config.search_radius_km)
            .await?;
        if !anyone_near {
            info!("no riders near bulk pickup; rejecting batch");
            return Ok(BulkOutcome::NoRidersNearPickup);
        }

        // Straight-line pass first: obviously-too-far destinations are
        // rejected without spending a routing call on them.
        let limit_km = self.config.max_delivery_distance_km;
        let too_far: Vec<LegFailure> = destinations
            .iter()
            .enumerate()
            .filter_map(|(i, dest)| {
                let km = geo::haversine_km(&pickup, &dest.location);
                (km > limit_km).then(|| LegFailure {
                    sequence: (i + 1) as u32,
                    message: format!(
                        "destination is {km:.1} km from pickup, limit is {limit_km} km"
                    ),
                })
            })
            .collect();
        if !too_far.is_empty() {
            return Ok(BulkOutcome::DistanceLimitExceeded(too_far));
        }

        let stops: Vec<RouteStop> = destinations
            .iter()
            .enumerate()
            .map(|(i, dest)| RouteStop {
                key: (i + 1).to_string(),
                location: dest.location,
            })
            .collect();
        let metrics: HashMap<String, _> = self
            .matcher
            .route_with_failover(&pickup, &stops)
            .await?
            .into_iter()
            .map(|m| (m.key.clone(), m))
            .collect();

        // The binding check is against the measured route distance; roads
        // are never shorter than the straight line.
        let over_by_road: Vec<LegFailure> = destinations
            .iter()
            .enumerate()
            .filter_map(|(i, _)| {
                let sequence = (i + 1) as u32;
                let leg = metrics.get(&sequence.to_string())?;
                let km = leg.distance_meters / 1000.0;
                (km > limit_km).then(|| LegFailure {
                    sequence,
                    message: format!("route is {km:.1} km from pickup, limit is {limit_km} km"),
                })
            })
            .collect();
        if !over_by_road.is_empty() {
            return Ok(BulkOutcome::DistanceLimitExceeded(over_by_road));
        }

        let average_rate = self.riders.average_rate_per_km().await?;

        let order = DeliveryOrder {
            id: Uuid::new_v4(),
            customer: customer.to_string(),
            pickup,
            dropoff: None,
            weight: destinations.iter().map(|d| d.weight).sum(),
            fragile: destinations.iter().any(|d| d.fragile),
            offered_price: None,
            status: OrderStatus::Pending,
            is_bulk: true,
            created_at: Utc::now(),
        };

        let mut assignments = Vec::with_capacity(destinations.len());
        let mut failures = Vec::new();
        for (i, dest) in destinations.iter().enumerate() {
            let sequence = (i + 1) as u32;
            let Some(leg) = metrics.get(&sequence.to_string()) else {
                failures.push(LegFailure {
                    sequence,
                    message: "no route between pickup and destination".to_string(),
                });
                continue;
            };
            let Some(rate) = average_rate else {
                failures.push(LegFailure {
                    sequence,
                    message: "no rider rate available for cost computation".to_string(),
                });
                continue;
            };

            assignments.push(Assignment {
                id: Uuid::new_v4(),
                order_id: order.id,
                rider: None,
                status: AssignmentStatus::Pending,
                weight: dest.weight,
                destination: Some(dest.location),
                distance_meters: Some(leg.distance_meters),
                duration_secs: Some(leg.duration_secs),
                duration_text: Some(leg.duration_text.clone()),
                price: Some(rate * leg.distance_meters / 1000.0),
                decline_reason: None,
                sequence,
                completed: false,
                created_at: Utc::now(),
            });
        }

        self.orders.create_order(order.clone()).await?;
        self.orders.create_assignments(assignments.clone()).await?;
        info!(
            order_id = %order.id,
            legs = assignments.len(),
            failed = failures.len(),
            "bulk order split into sub-orders"
        );

        if !failures.is_empty() {
            warn!(order_id = %order.id, failed = failures.len(), "bulk split left unplanned legs");
            let detail: Vec<String> = failures
                .iter()
                .map(|f| format!("leg {}: {}", f.sequence, f.message))
                .collect();
            self.lifecycle
                .escalate(
                    order.id,
                    EscalationKind::PartialAssignmentFailure,
                    format!("bulk order split failed for some legs: {}", detail.join("; ")),
                )
                .await?;
        }

        let bulk = BulkOrder {
            id: order.id,
            customer: customer.to_string(),
            pickup,
            destinations,
            created_at: order.created_at,
        };

        Ok(BulkOutcome::Created(BulkPlan {
            order,
            bulk,
            assignments,
            failures,
        }))
    }

    /// Whole-batch rejection: one bad destination fails everything, with
    /// every field error reported at once.
    fn validate(
        &self,
        pickup: &GeoPoint,
        destinations: &[BulkDestination],
    ) -> Result<(), DispatchError> {
        let mut errors = Vec::new();

        if !pickup.is_valid() {
            errors.push(FieldError::new("pickup", "coordinates out of valid range"));
        }
        if destinations.is_empty() {
            errors.push(FieldError::new("destinations", "at least one destination is required"));
        }
        for (i, dest) in destinations.iter().enumerate() {
            dest.validate(i, &mut errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DispatchError::ValidationFailed(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::{BulkOutcome, BulkSplitter};
    use crate::config::DispatchConfig;
    use crate::engine::assignment::AssignmentLifecycle;
    use crate::engine::candidates::RiderCandidatePool;
    use crate::engine::matcher::DispatchMatcher;
    use crate::error::DispatchError;
    use crate::geo::haversine_km;
    use crate::models::assignment::TicketPriority;
    use crate::models::order::BulkDestination;
    use crate::models::rider::{GeoPoint, RiderProfile};
    use crate::observability::metrics::Metrics;
    use crate::routing::failover::ProviderFailover;
    use crate::routing::{
        ProviderKind, RouteError, RouteMetrics, RouteProvider, RouteStop, format_duration,
    };
    use crate::stores::OrderStore;
    use crate::stores::memory::{
        InMemoryLocationStore, InMemoryNotifier, InMemoryOrderStore, InMemoryProviderState,
        InMemoryRiderStore, InMemoryWallet,
    };

    /// Routes over the straight-line distance scaled by a detour factor, and
    /// silently drops any stop whose key is in the skip list, the way
    /// vendors omit unroutable cells.
    struct SkippingProvider {
        kind: ProviderKind,
        skip: Vec<String>,
        detour: f64,
    }

    #[async_trait]
    impl RouteProvider for SkippingProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn distances_and_durations(
            &self,
            origin: &GeoPoint,
            stops: &[RouteStop],
        ) -> Result<Vec<RouteMetrics>, RouteError> {
            Ok(stops
                .iter()
                .filter(|stop| !self.skip.contains(&stop.key))
                .map(|stop| {
                    let km = haversine_km(origin, &stop.location) * self.detour;
                    let secs = (km / 25.0 * 3600.0).round() as u64;
                    RouteMetrics {
                        key: stop.key.clone(),
                        distance_meters: km * 1000.0,
                        duration_secs: secs,
                        duration_text: format_duration(secs),
                    }
                })
                .collect())
        }
    }

    struct Fixture {
        splitter: BulkSplitter,
        locations: Arc<InMemoryLocationStore>,
        riders: Arc<InMemoryRiderStore>,
        orders: Arc<InMemoryOrderStore>,
    }

    async fn fixture(skip: Vec<String>) -> Fixture {
        fixture_with_detour(skip, 1.0).await
    }

    async fn fixture_with_detour(skip: Vec<String>, detour: f64) -> Fixture {
        let locations = Arc::new(InMemoryLocationStore::default());
        let riders = Arc::new(InMemoryRiderStore::default());
        let orders = Arc::new(InMemoryOrderStore::default());
        let notifier = Arc::new(InMemoryNotifier::default());
        let wallet = Arc::new(InMemoryWallet::default());
        let metrics = Arc::new(Metrics::new());
        let config = DispatchConfig::default();

        let failover = Arc::new(
            ProviderFailover::new(
                vec![
                    Arc::new(SkippingProvider {
                        kind: ProviderKind::TomTom,
                        skip: skip.clone(),
                        detour,
                    }),
                    Arc::new(SkippingProvider {
                        kind: ProviderKind::Mapbox,
                        skip,
                        detour,
                    }),
                ],
                Arc::new(InMemoryProviderState::default()),
                ProviderKind::TomTom,
            )
            .await
            .unwrap(),
        );

        let matcher = Arc::new(DispatchMatcher::new(
            RiderCandidatePool::new(locations.clone(), riders.clone()),
            failover,
            orders.clone(),
            notifier.clone(),
            config.clone(),
            metrics.clone(),
        ));
        let lifecycle = Arc::new(AssignmentLifecycle::new(
            matcher.clone(),
            orders.clone(),
            riders.clone(),
            wallet,
            notifier,
            metrics,
        ));
        let splitter = BulkSplitter::new(matcher, lifecycle, orders.clone(), riders.clone(), config);

        Fixture {
            splitter,
            locations,
            riders,
            orders,
        }
    }

    fn add_rider(fx: &Fixture, key: &str, rate: f64) {
        fx.riders.upsert(RiderProfile {
            key: key.to_string(),
            name: key.to_string(),
            min_capacity: 0.0,
            max_capacity: 50.0,
            fragile_allowed: true,
            rate_per_km: rate,
            available: true,
        });
        fx.locations.set_location(key, GeoPoint::new(6.505, 3.305));
    }

    fn pickup() -> GeoPoint {
        GeoPoint::new(6.5, 3.3)
    }

    fn destination(lat: f64, lng: f64, weight: f64) -> BulkDestination {
        BulkDestination {
            location: GeoPoint::new(lat, lng),
            recipient_name: "Ada".to_string(),
            recipient_address: "12 Marina Rd".to_string(),
            recipient_phone: None,
            package_name: "parcel".to_string(),
            weight,
            fragile: false,
        }
    }

    #[tokio::test]
    async fn one_invalid_destination_rejects_the_whole_batch() {
        let fx = fixture(Vec::new()).await;
        add_rider(&fx, "ada", 100.0);

        let mut destinations = vec![
            destination(6.51, 3.31, 1.0),
            destination(6.52, 3.32, 1.0),
            destination(6.52, 3.33, 1.0),
            destination(6.51, 3.33, 1.0),
            destination(6.52, 3.31, 1.0),
        ];
        destinations[2].recipient_name = String::new();

        let result = fx
            .splitter
            .split_bulk_order("ada@example.com", pickup(), destinations)
            .await;

        let Err(DispatchError::ValidationFailed(errors)) = result else {
            panic!("expected whole-batch validation failure");
        };
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].index, Some(2));
        assert_eq!(errors[0].field, "recipient_name");
    }

    #[tokio::test]
    async fn valid_batch_creates_sequenced_unassigned_legs() {
        let fx = fixture(Vec::new()).await;
        add_rider(&fx, "ada", 100.0);
        add_rider(&fx, "grace", 200.0);

        let destinations = vec![
            destination(6.51, 3.31, 1.0),
            destination(6.52, 3.32, 2.0),
            destination(6.52, 3.33, 3.0),
        ];

        let outcome = fx
            .splitter
            .split_bulk_order("ada@example.com", pickup(), destinations)
            .await
            .unwrap();

        let BulkOutcome::Created(plan) = outcome else {
            panic!("expected a created plan");
        };
        assert!(plan.order.is_bulk);
        assert_eq!(plan.order.weight, 6.0);
        assert!(plan.failures.is_empty());

        let stored = fx.orders.assignments_for_order(plan.order.id).await.unwrap();
        assert_eq!(stored.len(), 3);
        for (i, assignment) in stored.iter().enumerate() {
            assert_eq!(assignment.sequence, (i + 1) as u32);
            assert!(assignment.rider.is_none());
            // Average of 100 and 200 per km over the measured distance.
            let expected = 150.0 * assignment.distance_meters.unwrap() / 1000.0;
            assert!((assignment.price.unwrap() - expected).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn empty_pickup_area_rejects_without_persisting() {
        let fx = fixture(Vec::new()).await;
        // A rider exists, but far from this pickup.
        fx.riders.upsert(RiderProfile {
            key: "remote".to_string(),
            name: "remote".to_string(),
            min_capacity: 0.0,
            max_capacity: 50.0,
            fragile_allowed: true,
            rate_per_km: 100.0,
            available: true,
        });
        fx.locations.set_location("remote", GeoPoint::new(9.0, 7.0));

        let outcome = fx
            .splitter
            .split_bulk_order("ada@example.com", pickup(), vec![destination(6.51, 3.31, 1.0)])
            .await
            .unwrap();

        assert!(matches!(outcome, BulkOutcome::NoRidersNearPickup));
    }

    #[tokio::test]
    async fn distance_violations_are_collected_across_the_batch() {
        let fx = fixture(Vec::new()).await;
        add_rider(&fx, "ada", 100.0);

        let destinations = vec![
            destination(6.51, 3.31, 1.0),
            destination(7.2, 3.31, 1.0),
            destination(6.51, 4.1, 1.0),
        ];

        let outcome = fx
            .splitter
            .split_bulk_order("ada@example.com", pickup(), destinations)
            .await
            .unwrap();

        let BulkOutcome::DistanceLimitExceeded(violations) = outcome else {
            panic!("expected distance violations");
        };
        let sequences: Vec<u32> = violations.iter().map(|v| v.sequence).collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test]
    async fn road_distance_over_the_limit_blocks_the_batch() {
        // Twisty roads: twice the straight-line distance.
        let fx = fixture_with_detour(Vec::new(), 2.0).await;
        add_rider(&fx, "ada", 100.0);

        // 3.5 km as the crow flies clears the pre-filter; 7 km by road
        // breaks the 5 km limit.
        let destinations = vec![
            destination(6.51, 3.31, 1.0),
            destination(6.5315, 3.3, 1.0),
        ];

        let outcome = fx
            .splitter
            .split_bulk_order("ada@example.com", pickup(), destinations)
            .await
            .unwrap();

        let BulkOutcome::DistanceLimitExceeded(violations) = outcome else {
            panic!("expected route distance violations");
        };
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].sequence, 2);
        assert!(violations[0].message.contains("route is"));
        assert_eq!(fx.orders.order_count(), 0);
    }

    #[tokio::test]
    async fn unroutable_leg_does_not_block_the_others() {
        let fx = fixture(vec!["2".to_string()]).await;
        add_rider(&fx, "ada", 100.0);

        let destinations = vec![
            destination(6.51, 3.31, 1.0),
            destination(6.52, 3.32, 1.0),
            destination(6.52, 3.33, 1.0),
        ];

        let outcome = fx
            .splitter
            .split_bulk_order("ada@example.com", pickup(), destinations)
            .await
            .unwrap();

        let BulkOutcome::Created(plan) = outcome else {
            panic!("expected a created plan");
        };
        assert_eq!(plan.assignments.len(), 2);
        assert_eq!(plan.failures.len(), 1);
        assert_eq!(plan.failures[0].sequence, 2);

        let tickets = fx.orders.support_tickets(plan.order.id);
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].priority, TicketPriority::Critical);
        assert_eq!(tickets[0].ticket_type, "partial_assignment_failure");
    }

    #[tokio::test]
    async fn bad_pickup_is_a_field_error() {
        let fx = fixture(Vec::new()).await;
        add_rider(&fx, "ada", 100.0);

        let result = fx
            .splitter
            .split_bulk_order(
                "ada@example.com",
                GeoPoint::new(95.0, 3.3),
                vec![destination(6.51, 3.31, 1.0)],
            )
            .await;

        let Err(DispatchError::ValidationFailed(errors)) = result else {
            panic!("expected validation failure");
        };
        assert_eq!(errors[0].field, "pickup");
    }
}
