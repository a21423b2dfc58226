use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Finite degrees within latitude [-90, 90] and longitude [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Capability record for a rider, as held by the account store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderProfile {
    pub key: String,
    pub name: String,
    /// Smallest load the rider will take, in load units.
    pub min_capacity: f64,
    /// Largest load the rider can carry, in load units.
    pub max_capacity: f64,
    pub fragile_allowed: bool,
    pub rate_per_km: f64,
    pub available: bool,
}

/// Ephemeral join of a capability record with a live location row,
/// assembled per matching request and discarded afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct RiderCandidate {
    pub key: String,
    pub name: String,
    pub location: GeoPoint,
    pub min_capacity: f64,
    pub max_capacity: f64,
    pub fragile_allowed: bool,
    pub rate_per_km: f64,
}

impl RiderCandidate {
    pub fn from_profile(profile: &RiderProfile, location: GeoPoint) -> Self {
        Self {
            key: profile.key.clone(),
            name: profile.name.clone(),
            location,
            min_capacity: profile.min_capacity,
            max_capacity: profile.max_capacity,
            fragile_allowed: profile.fragile_allowed,
            rate_per_km: profile.rate_per_km,
        }
    }
}
