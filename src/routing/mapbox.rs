use std::time::Duration;

use serde::Deserialize;
use tokio::time::sleep;
use tracing::warn;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::models::rider::GeoPoint;
use crate::routing::{
    ProviderKind, RetryPolicy, RouteError, RouteMetrics, RouteStop, classify_transport,
    format_duration, retry_transient,
};

/// The Matrix API allows 10 coordinates per request; one slot is the origin.
const MAX_BATCH: usize = 9;

/// Mapbox Matrix API client. Destinations are batched, with a pacing pause
/// between batches to stay under the vendor rate limit.
pub struct MapboxMatrix {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    batch_pacing: Duration,
    retry: RetryPolicy,
}

impl MapboxMatrix {
    pub fn new(config: &DispatchConfig) -> Result<Self, DispatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()
            .map_err(|err| DispatchError::Internal(format!("mapbox client: {err}")))?;

        Ok(Self {
            http,
            api_key: config.mapbox_api_key.clone(),
            base_url: config.mapbox_base_url.trim_end_matches('/').to_string(),
            batch_pacing: config.batch_pacing,
            retry: RetryPolicy {
                attempts: config.retry_attempts,
                initial_delay: config.retry_initial_delay,
                multiplier: config.retry_multiplier,
            },
        })
    }

    /// Matrix URL for one batch. The origin is coordinate 0 and is pinned as
    /// the only source, so row 0 of the response aligns 1:1 with `stops` —
    /// there is no origin-to-self entry to skip, for single-destination
    /// batches included.
    fn batch_url(&self, origin: &GeoPoint, stops: &[RouteStop]) -> String {
        let mut coords = format!("{:.6},{:.6}", origin.lng, origin.lat);
        for stop in stops {
            coords.push(';');
            coords.push_str(&format!("{:.6},{:.6}", stop.location.lng, stop.location.lat));
        }

        let destinations = (1..=stops.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(";");

        format!(
            "{}/{coords}?sources=0&destinations={destinations}&annotations=distance,duration&access_token={}",
            self.base_url, self.api_key
        )
    }

    async fn fetch_batch(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError> {
        let url = self.batch_url(origin, stops);
        let response = self.http.get(&url).send().await.map_err(classify_transport)?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(RouteError::Transient(format!("matrix returned {status}")));
        }
        if !status.is_success() {
            return Err(RouteError::Unavailable(format!("matrix returned {status}")));
        }

        let parsed: MatrixResponse = response
            .json()
            .await
            .map_err(|err| RouteError::Unavailable(format!("malformed matrix body: {err}")))?;

        parse_matrix(parsed, stops)
    }
}

#[async_trait::async_trait]
impl super::RouteProvider for MapboxMatrix {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mapbox
    }

    async fn distances_and_durations(
        &self,
        origin: &GeoPoint,
        stops: &[RouteStop],
    ) -> Result<Vec<RouteMetrics>, RouteError> {
        if stops.is_empty() {
            return Ok(Vec::new());
        }

        let batches: Vec<&[RouteStop]> = stops.chunks(MAX_BATCH).collect();
        let last = batches.len() - 1;
        let mut results = Vec::with_capacity(stops.len());

        for (i, batch) in batches.into_iter().enumerate() {
            let metrics =
                retry_transient(self.retry, self.kind(), || self.fetch_batch(origin, batch))
                    .await?;
            results.extend(metrics);

            if i < last {
                sleep(self.batch_pacing).await;
            }
        }

        Ok(results)
    }
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    code: String,
    durations: Option<Vec<Vec<Option<f64>>>>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

fn parse_matrix(
    response: MatrixResponse,
    stops: &[RouteStop],
) -> Result<Vec<RouteMetrics>, RouteError> {
    if response.code != "Ok" {
        return Err(RouteError::Unavailable(format!(
            "matrix response code {}",
            response.code
        )));
    }

    let durations = row(response.durations, "durations")?;
    let distances = row(response.distances, "distances")?;
    if durations.len() != stops.len() || distances.len() != stops.len() {
        return Err(RouteError::Unavailable(
            "matrix row length does not match destination count".to_string(),
        ));
    }

    let mut results = Vec::with_capacity(stops.len());
    for ((stop, duration), distance) in stops.iter().zip(durations).zip(distances) {
        let (Some(duration), Some(distance)) = (duration, distance) else {
            // Null cells mean the vendor could not route to this stop.
            warn!(stop = %stop.key, "unroutable destination dropped from matrix result");
            continue;
        };
        let secs = duration.round().max(0.0) as u64;
        results.push(RouteMetrics {
            key: stop.key.clone(),
            distance_meters: distance,
            duration_secs: secs,
            duration_text: format_duration(secs),
        });
    }

    Ok(results)
}

fn row(
    table: Option<Vec<Vec<Option<f64>>>>,
    name: &str,
) -> Result<Vec<Option<f64>>, RouteError> {
    table
        .and_then(|mut rows| if rows.is_empty() { None } else { Some(rows.remove(0)) })
        .ok_or_else(|| RouteError::Unavailable(format!("matrix response missing {name}")))
}

#[cfg(test)]
mod tests {
    use super::{MatrixResponse, parse_matrix};
    use crate::config::DispatchConfig;
    use crate::models::rider::GeoPoint;
    use crate::routing::{RouteError, RouteStop};

    fn stops(n: usize) -> Vec<RouteStop> {
        (0..n)
            .map(|i| RouteStop {
                key: format!("rider-{i}"),
                location: GeoPoint::new(6.5 + i as f64 * 0.01, 3.3),
            })
            .collect()
    }

    fn response(json: serde_json::Value) -> MatrixResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn batch_url_pins_origin_as_only_source() {
        let client = super::MapboxMatrix::new(&DispatchConfig {
            mapbox_api_key: "token".to_string(),
            ..DispatchConfig::default()
        })
        .unwrap();

        let url = client.batch_url(&GeoPoint::new(6.5, 3.3), &stops(3));

        assert!(url.contains("sources=0"));
        assert!(url.contains("destinations=1;2;3"));
        assert!(url.contains("annotations=distance,duration"));
        assert!(url.starts_with("https://api.mapbox.com/directions-matrix/v1/mapbox/driving-traffic/3.300000,6.500000;"));
    }

    #[test]
    fn single_destination_batch_has_one_destination_index() {
        let client = super::MapboxMatrix::new(&DispatchConfig::default()).unwrap();
        let url = client.batch_url(&GeoPoint::new(6.5, 3.3), &stops(1));
        assert!(url.contains("destinations=1&"));
    }

    #[test]
    fn parse_aligns_rows_with_stops() {
        let parsed = parse_matrix(
            response(serde_json::json!({
                "code": "Ok",
                "durations": [[45.0, 135.4]],
                "distances": [[850.0, 2400.0]]
            })),
            &stops(2),
        )
        .unwrap();

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].key, "rider-0");
        assert_eq!(parsed[0].distance_meters, 850.0);
        assert_eq!(parsed[0].duration_text, "45 secs");
        assert_eq!(parsed[1].duration_secs, 135);
        assert_eq!(parsed[1].duration_text, "2 mins 15 secs");
    }

    #[test]
    fn parse_drops_unroutable_cells() {
        let parsed = parse_matrix(
            response(serde_json::json!({
                "code": "Ok",
                "durations": [[45.0, null]],
                "distances": [[850.0, null]]
            })),
            &stops(2),
        )
        .unwrap();

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].key, "rider-0");
    }

    #[test]
    fn parse_rejects_row_length_mismatch() {
        let result = parse_matrix(
            response(serde_json::json!({
                "code": "Ok",
                "durations": [[45.0]],
                "distances": [[850.0]]
            })),
            &stops(2),
        );

        assert!(matches!(result, Err(RouteError::Unavailable(_))));
    }

    #[test]
    fn parse_rejects_vendor_error_code() {
        let result = parse_matrix(
            response(serde_json::json!({ "code": "InvalidInput" })),
            &stops(1),
        );
        assert!(matches!(result, Err(RouteError::Unavailable(_))));
    }
}
