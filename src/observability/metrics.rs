use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub matches_total: IntCounterVec,
    pub match_latency_seconds: HistogramVec,
    pub routing_requests_total: IntCounterVec,
    pub provider_failovers_total: IntCounter,
    pub assignments_total: IntCounterVec,
    pub support_tickets_total: IntCounter,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let matches_total = IntCounterVec::new(
            Opts::new("matches_total", "Match attempts by outcome"),
            &["outcome"],
        )
        .expect("valid matches_total metric");

        let match_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "match_latency_seconds",
                "Latency of the match pipeline in seconds",
            ),
            &["outcome"],
        )
        .expect("valid match_latency_seconds metric");

        let routing_requests_total = IntCounterVec::new(
            Opts::new("routing_requests_total", "Routing vendor calls by provider and outcome"),
            &["provider", "outcome"],
        )
        .expect("valid routing_requests_total metric");

        let provider_failovers_total = IntCounter::new(
            "provider_failovers_total",
            "Number of active-provider switches",
        )
        .expect("valid provider_failovers_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment resolutions by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let support_tickets_total = IntCounter::new(
            "support_tickets_total",
            "Escalations converted into support tickets",
        )
        .expect("valid support_tickets_total metric");

        registry
            .register(Box::new(matches_total.clone()))
            .expect("register matches_total");
        registry
            .register(Box::new(match_latency_seconds.clone()))
            .expect("register match_latency_seconds");
        registry
            .register(Box::new(routing_requests_total.clone()))
            .expect("register routing_requests_total");
        registry
            .register(Box::new(provider_failovers_total.clone()))
            .expect("register provider_failovers_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(support_tickets_total.clone()))
            .expect("register support_tickets_total");

        Self {
            registry,
            matches_total,
            match_latency_seconds,
            routing_requests_total,
            provider_failovers_total,
            assignments_total,
            support_tickets_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
