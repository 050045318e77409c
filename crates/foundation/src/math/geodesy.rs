use serde::{Deserialize, Serialize};

/// Mean Earth radius (miles), matching the backend's geo-distance helpers.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;
/// Mean Earth radius (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Geographic coordinate in degrees (WGS84).
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180], both finite.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn distance_miles(&self, other: &GeoPoint) -> f64 {
        central_angle(self, other) * EARTH_RADIUS_MILES
    }

    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        central_angle(self, other) * EARTH_RADIUS_M
    }
}

/// Haversine central angle between two points (radians).
fn central_angle(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let dlat = lat_b - lat_a;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}
