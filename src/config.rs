use std::env;
use std::time::Duration;

use crate::error::DispatchError;
use crate::routing::ProviderKind;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Radius of the straight-line pre-filter around a pickup point.
    pub search_radius_km: f64,
    /// Maximum allowed road distance for a single delivery leg.
    pub max_delivery_distance_km: f64,
    /// Per-request timeout applied to every vendor HTTP call.
    pub provider_timeout: Duration,
    /// Upper bound on one full routing attempt, retries and pacing included.
    pub routing_budget: Duration,
    pub retry_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_multiplier: u32,
    /// Pause between consecutive matrix batches to stay under vendor rate limits.
    pub batch_pacing: Duration,
    pub default_provider: ProviderKind,
    pub mapbox_api_key: String,
    pub mapbox_base_url: String,
    pub tomtom_api_key: String,
    pub tomtom_base_url: String,
    pub tomtom_poll_interval: Duration,
    pub tomtom_poll_attempts: u32,
}

impl DispatchConfig {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        let default_provider = env::var("DEFAULT_ROUTE_PROVIDER")
            .ok()
            .map(|raw| {
                ProviderKind::parse(&raw).ok_or(DispatchError::UnknownProvider(raw))
            })
            .transpose()?
            .unwrap_or(ProviderKind::TomTom);

        Ok(Self {
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 5.0)?,
            max_delivery_distance_km: parse_or_default("MAX_DELIVERY_DISTANCE_KM", 5.0)?,
            provider_timeout: Duration::from_secs(parse_or_default("PROVIDER_TIMEOUT_SECS", 10)?),
            routing_budget: Duration::from_secs(parse_or_default("ROUTING_BUDGET_SECS", 60)?),
            retry_attempts: parse_or_default("PROVIDER_RETRY_ATTEMPTS", 3)?,
            retry_initial_delay: Duration::from_millis(parse_or_default(
                "PROVIDER_RETRY_INITIAL_DELAY_MS",
                1_000,
            )?),
            retry_multiplier: parse_or_default("PROVIDER_RETRY_MULTIPLIER", 2)?,
            batch_pacing: Duration::from_millis(parse_or_default("MATRIX_BATCH_PACING_MS", 6_000)?),
            default_provider,
            mapbox_api_key: env::var("MAPBOX_API_KEY").unwrap_or_default(),
            mapbox_base_url: env::var("MAPBOX_BASE_URL").unwrap_or_else(|_| {
                "https://api.mapbox.com/directions-matrix/v1/mapbox/driving-traffic".to_string()
            }),
            tomtom_api_key: env::var("TOMTOM_API_KEY").unwrap_or_default(),
            tomtom_base_url: env::var("TOMTOM_BASE_URL")
                .unwrap_or_else(|_| "https://api.tomtom.com/routing/matrix/2/async".to_string()),
            tomtom_poll_interval: Duration::from_millis(parse_or_default(
                "TOMTOM_POLL_INTERVAL_MS",
                1_000,
            )?),
            tomtom_poll_attempts: parse_or_default("TOMTOM_POLL_ATTEMPTS", 10)?,
        })
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            search_radius_km: 5.0,
            max_delivery_distance_km: 5.0,
            provider_timeout: Duration::from_secs(10),
            routing_budget: Duration::from_secs(60),
            retry_attempts: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_multiplier: 2,
            batch_pacing: Duration::from_secs(6),
            default_provider: ProviderKind::TomTom,
            mapbox_api_key: String::new(),
            mapbox_base_url: "https://api.mapbox.com/directions-matrix/v1/mapbox/driving-traffic"
                .to_string(),
            tomtom_api_key: String::new(),
            tomtom_base_url: "https://api.tomtom.com/routing/matrix/2/async".to_string(),
            tomtom_poll_interval: Duration::from_secs(1),
            tomtom_poll_attempts: 10,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
