//! Axis-aligned bounds on the map plane and on the globe.

use serde::{Deserialize, Serialize};

use crate::math::{GeoPoint, MAP_WORLD_SIZE, MapPoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegionError {
    NonFinite,
    Inverted,
    InvalidCoordinate(GeoPoint),
}

impl std::fmt::Display for RegionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionError::NonFinite => write!(f, "bounds contain a non-finite value"),
            RegionError::Inverted => write!(f, "bounds minimum exceeds maximum"),
            RegionError::InvalidCoordinate(p) => write!(
                f,
                "invalid coordinate: lat={} lon={}",
                p.latitude, p.longitude
            ),
        }
    }
}

impl std::error::Error for RegionError {}

/// Axis-aligned rectangle on the map plane, in map points.
///
/// A zero-area region is the "nothing loaded" sentinel: it contains no other
/// region, so anything compared against it needs a fetch.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Region {
    pub const SENTINEL: Region = Region {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 0.0,
        max_y: 0.0,
    };

    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Region {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn try_new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self, RegionError> {
        let r = Region::new(min_x, min_y, max_x, max_y);
        if !r.is_finite() {
            return Err(RegionError::NonFinite);
        }
        if min_x > max_x || min_y > max_y {
            return Err(RegionError::Inverted);
        }
        Ok(r)
    }

    pub fn from_origin_size(x: f64, y: f64, width: f64, height: f64) -> Self {
        Region::new(x, y, x + width, y + height)
    }

    /// Smallest region covering the given geographic box.
    pub fn from_geo_box(geo: &GeoBox) -> Self {
        let sw = MapPoint::from_geo(geo.south_west);
        let ne = MapPoint::from_geo(geo.north_east);
        Region::new(sw.x.min(ne.x), ne.y.min(sw.y), sw.x.max(ne.x), ne.y.max(sw.y))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn diagonal(&self) -> f64 {
        self.width().hypot(self.height())
    }

    pub fn center(&self) -> MapPoint {
        MapPoint::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    /// Zero (or negative) area; the sentinel is the canonical empty region.
    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    /// Inclusive containment. An empty region contains nothing.
    pub fn contains(&self, other: &Region) -> bool {
        if self.is_empty() {
            return false;
        }
        other.min_x >= self.min_x
            && other.min_y >= self.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    pub fn contains_point(&self, p: MapPoint) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Same center, width and height multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Region {
        let c = self.center();
        let half_w = self.width() * factor / 2.0;
        let half_h = self.height() * factor / 2.0;
        Region::new(c.x - half_w, c.y - half_h, c.x + half_w, c.y + half_h)
    }

    /// Intersection with the map world square.
    pub fn clamped_to_world(&self) -> Region {
        let clamp = |v: f64| v.clamp(0.0, MAP_WORLD_SIZE);
        Region::new(
            clamp(self.min_x),
            clamp(self.min_y),
            clamp(self.max_x),
            clamp(self.max_y),
        )
    }

    /// Geographic box covering this region (clamped to the world first).
    ///
    /// South-west is `(min_x, max_y)` and north-east is `(max_x, min_y)`
    /// because map `y` grows southward.
    pub fn to_geo_box(&self) -> GeoBox {
        let r = self.clamped_to_world();
        GeoBox {
            south_west: MapPoint::new(r.min_x, r.max_y).to_geo(),
            north_east: MapPoint::new(r.max_x, r.min_y).to_geo(),
        }
    }
}

impl Default for Region {
    fn default() -> Self {
        Region::SENTINEL
    }
}

/// Geographic rectangle given by its south-west and north-east corners.
///
/// A box whose south-west longitude is greater than its north-east longitude
/// wraps across the antimeridian.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoBox {
    pub south_west: GeoPoint,
    pub north_east: GeoPoint,
}

impl GeoBox {
    pub fn new(south_west: GeoPoint, north_east: GeoPoint) -> Result<Self, RegionError> {
        for p in [south_west, north_east] {
            if !p.latitude.is_finite() || !p.longitude.is_finite() {
                return Err(RegionError::NonFinite);
            }
            if !p.is_valid() {
                return Err(RegionError::InvalidCoordinate(p));
            }
        }
        if south_west.latitude > north_east.latitude {
            return Err(RegionError::Inverted);
        }
        Ok(GeoBox {
            south_west,
            north_east,
        })
    }

    pub fn crosses_antimeridian(&self) -> bool {
        self.south_west.longitude > self.north_east.longitude
    }

    pub fn contains(&self, p: &GeoPoint) -> bool {
        let lat_ok = p.latitude >= self.south_west.latitude && p.latitude <= self.north_east.latitude;
        let lon_ok = if self.crosses_antimeridian() {
            p.longitude >= self.south_west.longitude || p.longitude <= self.north_east.longitude
        } else {
            p.longitude >= self.south_west.longitude && p.longitude <= self.north_east.longitude
        };
        lat_ok && lon_ok
    }
}
