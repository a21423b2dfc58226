use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::DispatchError;
use crate::models::rider::RiderCandidate;
use crate::stores::{LocationStore, RiderFilter, RiderStore};

/// Joins live location rows with capability records into per-request
/// candidates. A rider missing from either source is silently excluded.
pub struct RiderCandidatePool {
    locations: Arc<dyn LocationStore>,
    riders: Arc<dyn RiderStore>,
}

impl RiderCandidatePool {
    pub fn new(locations: Arc<dyn LocationStore>, riders: Arc<dyn RiderStore>) -> Self {
        Self { locations, riders }
    }

    pub async fn fetch_candidates(
        &self,
        filter: &RiderFilter,
    ) -> Result<Vec<RiderCandidate>, DispatchError> {
        let located = self
            .locations
            .rider_locations(filter.keys.as_deref())
            .await
            .map_err(|err| DispatchError::CandidateFetchFailed(format!("location store: {err}")))?;

        if located.is_empty() {
            return Ok(Vec::new());
        }

        let mut positions: HashMap<String, _> = located
            .into_iter()
            .map(|row| (row.key, row.location))
            .collect();

        let scoped = RiderFilter {
            keys: Some(positions.keys().cloned().collect()),
            ..filter.clone()
        };
        let profiles = self
            .riders
            .riders(&scoped)
            .await
            .map_err(|err| DispatchError::CandidateFetchFailed(format!("capability store: {err}")))?;

        let mut candidates = Vec::with_capacity(profiles.len());
        for profile in profiles {
            if !profile.available {
                continue;
            }
            if profile.min_capacity > profile.max_capacity {
                warn!(rider = %profile.key, "capacity range inverted; skipping rider");
                continue;
            }
            let Some(location) = positions.remove(&profile.key) else {
                continue;
            };
            candidates.push(RiderCandidate::from_profile(&profile, location));
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::RiderCandidatePool;
    use crate::models::rider::{GeoPoint, RiderProfile};
    use crate::stores::RiderFilter;
    use crate::stores::memory::{InMemoryLocationStore, InMemoryRiderStore};

    fn profile(key: &str) -> RiderProfile {
        RiderProfile {
            key: key.to_string(),
            name: key.to_string(),
            min_capacity: 0.0,
            max_capacity: 20.0,
            fragile_allowed: true,
            rate_per_km: 100.0,
            available: true,
        }
    }

    fn pool(
        locations: Arc<InMemoryLocationStore>,
        riders: Arc<InMemoryRiderStore>,
    ) -> RiderCandidatePool {
        RiderCandidatePool::new(locations, riders)
    }

    #[tokio::test]
    async fn joins_only_riders_present_in_both_sources() {
        let locations = Arc::new(InMemoryLocationStore::default());
        let riders = Arc::new(InMemoryRiderStore::default());

        riders.upsert(profile("located"));
        riders.upsert(profile("unlocated"));
        locations.set_location("located", GeoPoint::new(6.5, 3.3));
        locations.set_location("unknown-profile", GeoPoint::new(6.5, 3.3));

        let candidates = pool(locations, riders)
            .fetch_candidates(&RiderFilter::default())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].key, "located");
    }

    #[tokio::test]
    async fn unavailable_riders_are_excluded() {
        let locations = Arc::new(InMemoryLocationStore::default());
        let riders = Arc::new(InMemoryRiderStore::default());

        let mut off_shift = profile("off-shift");
        off_shift.available = false;
        riders.upsert(off_shift);
        locations.set_location("off-shift", GeoPoint::new(6.5, 3.3));

        let candidates = pool(locations, riders)
            .fetch_candidates(&RiderFilter::default())
            .await
            .unwrap();

        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn inverted_capacity_range_is_skipped() {
        let locations = Arc::new(InMemoryLocationStore::default());
        let riders = Arc::new(InMemoryRiderStore::default());

        let mut inverted = profile("inverted");
        inverted.min_capacity = 30.0;
        inverted.max_capacity = 10.0;
        riders.upsert(inverted);
        locations.set_location("inverted", GeoPoint::new(6.5, 3.3));

        let candidates = pool(locations, riders)
            .fetch_candidates(&RiderFilter::default())
            .await
            .unwrap();

        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn empty_location_store_short_circuits() {
        let locations = Arc::new(InMemoryLocationStore::default());
        let riders = Arc::new(InMemoryRiderStore::default());
        riders.upsert(profile("somebody"));

        let candidates = pool(locations, riders)
            .fetch_candidates(&RiderFilter::default())
            .await
            .unwrap();

        assert!(candidates.is_empty());
    }
}
