//! Web-Mercator map plane.
//!
//! The world is a square of `MAP_WORLD_SIZE` map points per side. `x` grows
//! east starting at longitude -180°, `y` grows south starting at the northern
//! Mercator limit. Latitudes beyond `MAX_MERCATOR_LAT` are clamped.

use serde::{Deserialize, Serialize};

use super::GeoPoint;

/// Width and height of the whole world in map points (2^28).
pub const MAP_WORLD_SIZE: f64 = 268_435_456.0;

/// Latitude at which the Mercator square is cut off (degrees).
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapPoint {
    pub x: f64,
    pub y: f64,
}

impl MapPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn from_geo(geo: GeoPoint) -> Self {
        let lat = geo.latitude.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
        let x = (geo.longitude + 180.0) / 360.0 * MAP_WORLD_SIZE;

        let sin_lat = lat.to_radians().sin();
        let y = (0.5 - ((1.0 + sin_lat) / (1.0 - sin_lat)).ln() / (4.0 * std::f64::consts::PI))
            * MAP_WORLD_SIZE;

        Self::new(x, y)
    }

    pub fn to_geo(self) -> GeoPoint {
        let longitude = self.x / MAP_WORLD_SIZE * 360.0 - 180.0;
        let n = std::f64::consts::PI * (1.0 - 2.0 * self.y / MAP_WORLD_SIZE);
        let latitude = n.sinh().atan().to_degrees();
        GeoPoint::new(latitude, longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::{MAP_WORLD_SIZE, MapPoint};
    use crate::math::GeoPoint;

    fn assert_close(a: f64, b: f64, eps: f64) {
        let diff = (a - b).abs();
        assert!(diff <= eps, "expected {a} ~= {b} (diff {diff})");
    }

    #[test]
    fn origin_maps_to_world_center() {
        let p = MapPoint::from_geo(GeoPoint::new(0.0, 0.0));
        assert_close(p.x, MAP_WORLD_SIZE / 2.0, 1e-6);
        assert_close(p.y, MAP_WORLD_SIZE / 2.0, 1e-6);
    }

    #[test]
    fn y_grows_southward() {
        let north = MapPoint::from_geo(GeoPoint::new(45.0, 10.0));
        let south = MapPoint::from_geo(GeoPoint::new(-45.0, 10.0));
        assert!(north.y < south.y);
    }

    #[test]
    fn geo_round_trip() {
        let geo = GeoPoint::new(54.726840, -34.497420);
        let back = MapPoint::from_geo(geo).to_geo();
        assert_close(back.latitude, geo.latitude, 1e-9);
        assert_close(back.longitude, geo.longitude, 1e-9);
    }

    #[test]
    fn polar_latitudes_are_clamped() {
        let p = MapPoint::from_geo(GeoPoint::new(90.0, 0.0));
        assert!(p.y.is_finite());
        assert_close(p.y, 0.0, 1e-3);
    }
}
