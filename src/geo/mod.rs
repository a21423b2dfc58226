use crate::models::rider::{GeoPoint, RiderCandidate};

const EARTH_RADIUS_KM: f64 = 6_371.0;

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().asin();

    EARTH_RADIUS_KM * central_angle
}

/// Straight-line pre-filter applied before any routing-API call. Keeps only
/// candidates within `radius_km` of the origin, each tagged with its
/// great-circle distance.
pub fn filter_within_radius(
    origin: &GeoPoint,
    candidates: Vec<RiderCandidate>,
    radius_km: f64,
) -> Vec<(RiderCandidate, f64)> {
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance = haversine_km(origin, &candidate.location);
            (distance <= radius_km).then_some((candidate, distance))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{filter_within_radius, haversine_km};
    use crate::models::rider::{GeoPoint, RiderCandidate};

    fn candidate(key: &str, lat: f64, lng: f64) -> RiderCandidate {
        RiderCandidate {
            key: key.to_string(),
            name: key.to_string(),
            location: GeoPoint::new(lat, lng),
            min_capacity: 0.0,
            max_capacity: 10.0,
            fragile_allowed: true,
            rate_per_km: 100.0,
        }
    }

    #[test]
    fn zero_distance_for_same_point() {
        let p = GeoPoint::new(53.5511, 9.9937);
        let distance = haversine_km(&p, &p);
        assert!(distance < 1e-9);
    }

    #[test]
    fn distance_is_symmetric() {
        let lagos = GeoPoint::new(6.5244, 3.3792);
        let ikeja = GeoPoint::new(6.6018, 3.3515);
        let forward = haversine_km(&lagos, &ikeja);
        let backward = haversine_km(&ikeja, &lagos);
        assert!((forward - backward).abs() < 1e-12);
    }

    #[test]
    fn london_to_paris_is_around_343_km() {
        let london = GeoPoint::new(51.5074, -0.1278);
        let paris = GeoPoint::new(48.8566, 2.3522);
        let distance = haversine_km(&london, &paris);
        assert!((distance - 343.0).abs() < 5.0);
    }

    #[test]
    fn radius_filter_never_exceeds_radius() {
        let origin = GeoPoint::new(6.5, 3.3);
        let candidates = vec![
            candidate("near", 6.51, 3.31),
            candidate("mid", 6.53, 3.33),
            candidate("far", 6.9, 3.9),
        ];

        let within = filter_within_radius(&origin, candidates, 5.0);

        assert_eq!(within.len(), 2);
        for (_, distance) in &within {
            assert!(*distance <= 5.0);
        }
    }

    #[test]
    fn radius_filter_tags_each_survivor_with_its_distance() {
        let origin = GeoPoint::new(6.5, 3.3);
        let near = candidate("near", 6.505, 3.305);
        let expected = haversine_km(&origin, &near.location);

        let within = filter_within_radius(&origin, vec![near], 5.0);

        assert_eq!(within.len(), 1);
        assert!((within[0].1 - expected).abs() < 1e-9);
    }
}
