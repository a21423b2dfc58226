pub mod failover;
pub mod mapbox;
pub mod tomtom;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::models::rider::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    TomTom,
    Mapbox,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::TomTom => "tomtom",
            ProviderKind::Mapbox => "mapbox",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "tomtom" => Some(ProviderKind::TomTom),
            "mapbox" => Some(ProviderKind::Mapbox),
            _ => None,
        }
    }

    pub(crate) fn index(self) -> u8 {
        match self {
            ProviderKind::TomTom => 0,
            ProviderKind::Mapbox => 1,
        }
    }

    pub(crate) fn from_index(index: u8) -> Self {
        match index % 2 {
            0 => ProviderKind::TomTom,
            _ => ProviderKind::Mapbox,
        }
    }

    /// Next provider in the fixed cyclic failover order.
    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }
}

#[derive(Debug, Error)]
pub enum RouteError {
    /// Network blip; retried inside the provider, never seen by callers
    /// unless the retry budget runs out.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Persistent vendor failure (auth, malformed response, exhausted
    /// retries). Triggers failover.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

/// One destination submitted to a matrix request, keyed so results can be
/// joined back to whatever the caller is routing against.
#[derive(Debug, Clone)]
pub struct RouteStop {
    pub key: String,
    pub location: GeoPoint,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteMetrics {
    pub key: String,
    pub distance_meters: f64,
    pub duration_secs: u64,
    pub duration_text: String,
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Road distance and travel time from `origin` to every stop, in the
    /// order the stops were given.
    async fn distances_and_durations(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError>;
}

/// The production vendor clients, in the fixed cyclic failover order.
pub fn vendor_providers(
    config: &DispatchConfig,
) -> Result<Vec<Arc<dyn RouteProvider>>, DispatchError> {
    Ok(vec![
        Arc::new(tomtom::TomTomMatrix::new(config)?),
        Arc::new(mapbox::MapboxMatrix::new(config)?),
    ])
}

/// Connection problems and timeouts are worth retrying; everything else from
/// the HTTP layer means the vendor integration itself is broken.
pub(crate) fn classify_transport(err: reqwest::Error) -> RouteError {
    if err.is_timeout() || err.is_connect() {
        RouteError::Transient(err.to_string())
    } else {
        RouteError::Unavailable(err.to_string())
    }
}

pub fn format_duration(secs: u64) -> String {
    let (minutes, seconds) = (secs / 60, secs % 60);
    if secs <= 60 {
        format!("{secs} secs")
    } else if seconds == 0 {
        format!("{minutes} minutes")
    } else {
        format!("{minutes} mins {seconds} secs")
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
        }
    }
}

/// Retries transient failures with exponential backoff. Exhausted retries
/// degrade into `Unavailable` so the failover registry takes over; anything
/// already non-transient passes straight through.
pub(crate) async fn retry_transient<F, Fut, T>(
    policy: RetryPolicy,
    provider: ProviderKind,
    op: F,
) -> Result<T, RouteError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, RouteError>>,
{
    let mut delay = policy.initial_delay;
    let mut attempt = 1u32;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(RouteError::Transient(msg)) => {
                if attempt >= policy.attempts.max(1) {
                    return Err(RouteError::Unavailable(format!(
                        "{} attempts exhausted: {msg}",
                        policy.attempts
                    )));
                }
                warn!(
                    provider = provider.as_str(),
                    attempt,
                    error = %msg,
                    "transient routing failure; retrying"
                );
                sleep(delay).await;
                delay *= policy.multiplier.max(1);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
