use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::models::rider::GeoPoint;
use crate::routing::{
    ProviderKind, RetryPolicy, RouteError, RouteMetrics, RouteStop, classify_transport,
    format_duration, retry_transient,
};

/// TomTom asynchronous Matrix API client: one batched job per request,
/// polled until the vendor reports the result ready.
pub struct TomTomMatrix {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    poll_attempts: u32,
    retry: RetryPolicy,
}

impl TomTomMatrix {
    pub fn new(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()
            .map_err(|err| DispatchError::Internal(format!("tomtom client: {err}")))?;

        Ok(Self {
            http,
            api_key: config.tomtom_api_key.clone(),
            base_url: config.tomtom_base_url.trim_end_matches('/').to_string(),
            poll_interval: config.tomtom_poll_interval,
            poll_attempts: config.tomtom_poll_attempts,
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                initial_delay: config.retry_initial_delay,
                multiplier: config.retry_multiplier,
            },
        })
    }

    async fn submit_job(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<String, RouteError> {
        let payload = MatrixJobRequest::new(origin, stops);
        let url = format!("{}?key={}", self.base_url, self.api_key);

        let response = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RouteError::Transient(format!("matrix job returned {status}")));
        }
        if status.as_u16() != 202 {
            return Err(RouteError::Unavailable(format!("matrix job returned {status}")));
        }

        let submission: JobSubmission = response
            .json()
            .await
            .map_err(|err| RouteError::Unavailable(format!("malformed job response: {err}")))?;
        debug!(job_id = %submission.job_id, "tomtom matrix job submitted");
        Ok(submission.job_id)
    }

    async fn poll_result(
        &self,
        job_id: &str,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError> {
        let url = format!("{}/{job_id}/result?key={}", self.base_url, self.api_key);

        for _ in 0..self.poll_attempts.max(1) {
            let response = self.http.get(&url).send().await.map_err(classify_transport)?;
            let status = response.status();

            if status.as_u16() == 202 {
                // Job still running.
                sleep(self.poll_interval).await;
                continue;
            }
            if status.is_server_error() {
                return Err(RouteError::Transient(format!("matrix result returned {status}")));
            }
            if !status.is_success() {
                return Err(RouteError::Unavailable(format!("matrix result returned {status}")));
            }

            let result: MatrixJobResult = response
                .json()
                .await
                .map_err(|err| RouteError::Unavailable(format!("malformed result body: {err}")))?;
            return parse_result(result, stops);
        }

        Err(RouteError::Transient(format!(
            "matrix job {job_id} not ready after {} polls",
            self.poll_attempts
        )))
    }

    async fn run_job(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError> {
        let job_id = self.submit_job(origin, stops).await?;
        self.poll_result(&job_id, stops).await
    }
}

#[async_trait::async_trait]
impl super::RouteProvider for TomTomMatrix {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TomTom
    }

    async fn distances_and_durations(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError> {
        if stops.is_empty() {
            return Ok(Vec::new());
        }

        retry_transient(self.retry, self.kind(), || self.run_job(origin, stops)).await
    }
}

#[derive(Debug, Serialize)]
struct MatrixJobRequest {
    origins: Vec<PointWrapper>,
    destinations: Vec<PointWrapper>,
    options: MatrixOptions,
}

impl MatrixJobRequest {
    fn new(origin: &GeoPoint, stops: &[RouteStop]) -> Self {
        Self {
            origins: vec![PointWrapper::from(origin)],
            destinations: stops.iter().map(|s| PointWrapper::from(&s.location)).collect(),
            options: MatrixOptions {
                route_type: "fastest",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct PointWrapper {
    point: Point,
}

impl From<&GeoPoint> for PointWrapper {
    fn from(p: &GeoPoint) -> Self {
        Self {
            point: Point {
                latitude: p.lat,
                longitude: p.lng,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Point {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatrixOptions {
    route_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSubmission {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixJobResult {
    data: Vec<MatrixCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MatrixCell {
    #[serde(default)]
    destination_index: Option<usize>,
    route_summary: Option<RouteSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RouteSummary {
    length_in_meters: f64,
    travel_time_in_seconds: u64,
}

/// Cells are joined back to stops through `destinationIndex` when the vendor
/// sends it, falling back to request order. There is no origin-to-self cell
/// in this shape; index 0 is always the first real destination.
fn parse_result(
    result: MatrixJobResult,
    stops: &[RouteStop],
) -> Result<Vec<RouteMetrics>, RouteError> {
    let mut metrics = Vec::with_capacity(stops.len());

    for (position, cell) in result.data.into_iter().enumerate() {
        let index = cell.destination_index.unwrap_or(position);
        let Some(stop) = stops.get(index) else {
            return Err(RouteError::Unavailable(format!(
                "matrix cell references unknown destination index {index}"
            )));
        };

        let Some(summary) = cell.route_summary else {
            warn!(stop = %stop.key, "unroutable destination dropped from matrix result");
            continue;
        };

        metrics.push(RouteMetrics {
            key: stop.key.clone(),
            distance_meters: summary.length_in_meters,
            duration_secs: summary.travel_time_in_seconds,
            duration_text: format_duration(summary.travel_time_in_seconds),
        });
    }

    Ok(metrics)
}
