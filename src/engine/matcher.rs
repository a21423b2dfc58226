use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::candidates::RiderCandidatePool;
use crate::error::DispatchError;
use crate::geo;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::order::{OrderRequest, OrderStatus};
use crate::models::rider::{GeoPoint, RiderCandidate};
use crate::observability::metrics::Metrics;
use crate::routing::failover::ProviderFailover;
use crate::routing::{RouteError, RouteMetrics, RouteProvider, RouteStop};
use crate::stores::{BroadcastContext, Notifier, OrderStore, RiderFilter, RiderNotice};

/// A candidate that survived every filter, with exact road metrics attached.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub rider: RiderCandidate,
    pub straight_line_km: f64,
    pub distance_meters: f64,
    pub duration_secs: u64,
    pub duration_text: String,
}

impl RankedCandidate {
    pub fn distance_km(&self) -> f64 {
        self.distance_meters / 1000.0
    }
}

/// "No riders" is an expected, reported outcome of a match, not a failure.
#[derive(Debug)]
pub enum MatchOutcome {
    Matched(Vec<RankedCandidate>),
    NoRidersInRadius,
}

/// Orchestrates one matching request: candidate pool, straight-line radius
/// pre-filter, exact routing behind the failover registry, deterministic
/// ranking, notification fan-out.
pub struct DispatchMatcher {
    pool: RiderCandidatePool,
    failover: Arc<ProviderFailover>,
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
    metrics: Arc<Metrics>,
}

impl DispatchMatcher {
    pub fn new(
        pool: RiderCandidatePool,
        failover: Arc<ProviderFailover>,
        orders: Arc<dyn OrderStore>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            pool,
            failover,
            orders,
            notifier,
            config,
            metrics,
        }
    }

    pub async fn match_riders(
        &self,
        request: &OrderRequest,
        exclude: &[String],
    ) -> Result<MatchOutcome, DispatchError> {
        self.match_riders_within(request, self.config.search_radius_km, exclude)
            .await
    }

    pub async fn match_riders_within(
        &self,
        request: &OrderRequest,
        radius_km: f64,
        exclude: &[String],
    ) -> Result<MatchOutcome, DispatchError> {
        let start = Instant::now();
        let outcome = self.run_match(request, radius_km, exclude).await;

        let label = match &outcome {
            Ok(MatchOutcome::Matched(_)) => "matched",
            Ok(MatchOutcome::NoRidersInRadius) => "no_riders",
            Err(_) => "error",
        };
        self.metrics.matches_total.with_label_values(&[label]).inc();
        self.metrics
            .match_latency_seconds
            .with_label_values(&[label])
            .observe(start.elapsed().as_secs_f64());

        outcome
    }

    async fn run_match(
        &self,
        request: &OrderRequest,
        radius_km: f64,
        exclude: &[String],
    ) -> Result<MatchOutcome, DispatchError> {
        request.validate().map_err(DispatchError::ValidationFailed)?;

        let filter = RiderFilter::for_load(request.weight, request.fragile);
        let mut candidates = self.pool.fetch_candidates(&filter).await?;
        candidates.retain(|candidate| !exclude.contains(&candidate.key));

        let within = geo::filter_within_radius(&request.pickup, candidates, radius_km);
        if within.is_empty() {
            info!(order_id = %request.order_id, radius_km, "no riders within search radius");
            return Ok(MatchOutcome::NoRidersInRadius);
        }

        let stops: Vec<RouteStop> = within
            .iter()
            .map(|(candidate, _)| RouteStop {
                key: candidate.key.clone(),
                location: candidate.location,
            })
            .collect();

        let metrics = self.route_with_failover(&request.pickup, &stops).await?;

        let mut by_key: HashMap<String, (RiderCandidate, f64)> = within
            .into_iter()
            .map(|(candidate, km)| (candidate.key.clone(), (candidate, km)))
            .collect();

        let mut ranked: Vec<RankedCandidate> = metrics
            .into_iter()
            .filter_map(|m| {
                by_key.remove(&m.key).map(|(rider, straight_line_km)| RankedCandidate {
                    rider,
                    straight_line_km,
                    distance_meters: m.distance_meters,
                    duration_secs: m.duration_secs,
                    duration_text: m.duration_text,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            a.distance_meters
                .total_cmp(&b.distance_meters)
                .then_with(|| a.duration_secs.cmp(&b.duration_secs))
                .then_with(|| a.rider.key.cmp(&b.rider.key))
        });

        if ranked.is_empty() {
            // Every in-radius candidate turned out unroutable.
            return Ok(MatchOutcome::NoRidersInRadius);
        }

        self.fan_out(request, &ranked).await;

        Ok(MatchOutcome::Matched(ranked))
    }

    /// One call against the active provider; on failure switch once and retry
    /// once on the new provider. A second failure surfaces as `RoutingFailed`.
    pub(crate) async fn route_with_failover(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, DispatchError> {
        let active = self.failover.client(None)?;

        match self.attempt_route(active.as_ref(), origin, stops).await {
            Ok(metrics) => Ok(metrics),
            Err(err) => {
                warn!(
                    provider = active.kind().as_str(),
                    error = %err,
                    "active provider failed; switching"
                );
                self.metrics.provider_failovers_total.inc();
                let next = self.failover.mark_unavailable(active.kind()).await?;
                let fallback = self.failover.provider(next)?;

                self.attempt_route(fallback.as_ref(), origin, stops)
                    .await
                    .map_err(|err| {
                        DispatchError::RoutingFailed(format!(
                            "both providers failed, last ({}): {err}",
                            next.as_str()
                        ))
                    })
            }
        }
    }

    async fn attempt_route(
        &self,
        provider: &dyn RouteProvider,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError> {
        let kind = provider.kind();
        let result = match timeout(
            self.config.routing_budget,
            provider.distances_and_durations(origin, stops),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(RouteError::Unavailable(format!(
                "routing budget of {:?} exhausted",
                self.config.routing_budget
            ))),
        };

        let outcome = if result.is_ok() { "ok" } else { "error" };
        self.metrics
            .routing_requests_total
            .with_label_values(&[kind.as_str(), outcome])
            .inc();
        result
    }

    /// Cheap existence probe used by bulk validation: is any capable rider
    /// within the radius of the pickup at all.
    pub async fn any_rider_near(
        &self,
        pickup: &GeoPoint,
        filter: &RiderFilter,
        radius_km: f64,
    ) -> Result<bool, DispatchError> {
        let candidates = self.pool.fetch_candidates(filter).await?;
        Ok(!geo::filter_within_radius(pickup, candidates, radius_km).is_empty())
    }

    /// Persist a Pending assignment binding `candidate` to the request's leg.
    pub async fn create_assignment_for(
        &self,
        request: &OrderRequest,
        candidate: &RankedCandidate,
    ) -> Result<Assignment, DispatchError> {
        let assignment = Assignment {
            id: Uuid::new_v4(),
            order_id: request.order_id,
            rider: Some(candidate.rider.key.clone()),
            status: AssignmentStatus::Pending,
            weight: request.weight,
            destination: Some(request.dropoff),
            distance_meters: Some(candidate.distance_meters),
            duration_secs: Some(candidate.duration_secs),
            duration_text: Some(candidate.duration_text.clone()),
            price: request.offered_price,
            decline_reason: None,
            sequence: request.sequence,
            completed: false,
            created_at: Utc::now(),
        };
        self.orders.create_assignment(assignment.clone()).await?;
        Ok(assignment)
    }

    /// Notification fan-out is decoupled from the caller: an order cancelled
    /// mid-search turns it into a no-op, and the send never blocks the match
    /// result.
    async fn fan_out(&self, request: &OrderRequest, ranked: &[RankedCandidate]) {
        match self.orders.order(request.order_id).await {
            Ok(Some(order)) if order.status == OrderStatus::Cancelled => {
                debug!(order_id = %request.order_id, "order cancelled; skipping rider broadcast");
                return;
            }
            Err(err) => {
                warn!(order_id = %request.order_id, error = %err, "order lookup failed before broadcast");
            }
            _ => {}
        }

        let notices: Vec<RiderNotice> = ranked
            .iter()
            .map(|candidate| RiderNotice {
                rider: candidate.rider.key.clone(),
                distance_km: candidate.distance_km(),
                duration: candidate.duration_text.clone(),
            })
            .collect();
        let context = BroadcastContext {
            order_id: request.order_id,
            pickup: request.pickup,
            price: request.offered_price,
            message: None,
        };

        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            notifier.notify_riders(&notices, &context).await;
        });
    }
}
