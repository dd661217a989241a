// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Geodetic points and bounds.
//!
//! Only what hit-testing and distance queries need: validity checks, a
//! great-circle distance, and a lon/lat bounding box. Datums, altitude and
//! map projections live outside this crate.

use crate::error::GeometryError;

/// Mean earth radius in meters (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Meters per degree of latitude, close enough for tolerance conversions.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// A WGS84-style latitude/longitude pair in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoPoint {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl GeoPoint {
    /// Create a point without validating it. See [`GeoPoint::checked`].
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Create a point, rejecting non-finite or out-of-range coordinates.
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self, GeometryError> {
        let p = Self::new(latitude, longitude);
        p.validate()?;
        Ok(p)
    }

    /// Check that the coordinates are finite and in range.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let Self {
            latitude,
            longitude,
        } = *self;
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(GeometryError::NonFinite {
                latitude,
                longitude,
            });
        }
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeometryError::OutOfRange {
                latitude,
                longitude,
            });
        }
        Ok(())
    }

    /// Whether [`validate`](Self::validate) would succeed.
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Great-circle (haversine) distance in meters.
    pub fn distance_to(&self, other: &Self) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
    }

    /// Point `meters` due north of this one (clamped at the pole).
    pub fn offset_north(&self, meters: f64) -> Self {
        Self::new(
            (self.latitude + meters / METERS_PER_DEGREE).min(90.0),
            self.longitude,
        )
    }
}

/// Axis-aligned lon/lat bounding box. Does not wrap the antimeridian.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBounds {
    /// Southern edge (minimum latitude).
    pub south: f64,
    /// Western edge (minimum longitude).
    pub west: f64,
    /// Northern edge (maximum latitude).
    pub north: f64,
    /// Eastern edge (maximum longitude).
    pub east: f64,
}

impl GeoBounds {
    /// Degenerate bounds around a single point.
    pub const fn from_point(p: GeoPoint) -> Self {
        Self {
            south: p.latitude,
            west: p.longitude,
            north: p.latitude,
            east: p.longitude,
        }
    }

    /// Smallest bounds enclosing all points, or `None` when empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = Self::from_point(*iter.next()?);
        Some(iter.fold(first, |b, p| b.including(*p)))
    }

    /// Bounds grown to include `p`.
    pub fn including(self, p: GeoPoint) -> Self {
        Self {
            south: self.south.min(p.latitude),
            west: self.west.min(p.longitude),
            north: self.north.max(p.latitude),
            east: self.east.max(p.longitude),
        }
    }

    /// Bounds grown by roughly `meters` on every side.
    ///
    /// Longitude growth is scaled by the cosine of the widest latitude so the
    /// result stays conservative away from the equator.
    pub fn expanded_by_meters(self, meters: f64) -> Self {
        let dlat = meters / METERS_PER_DEGREE;
        let widest = self.south.abs().max(self.north.abs()).min(89.0);
        let dlon = dlat / widest.to_radians().cos();
        Self {
            south: (self.south - dlat).max(-90.0),
            west: (self.west - dlon).max(-180.0),
            north: (self.north + dlat).min(90.0),
            east: (self.east + dlon).min(180.0),
        }
    }

    /// Whether `p` lies inside (edges inclusive).
    pub fn contains(&self, p: &GeoPoint) -> bool {
        self.south <= p.latitude
            && p.latitude <= self.north
            && self.west <= p.longitude
            && p.longitude <= self.east
    }

    /// Whether the two boxes overlap (shared edges count).
    pub fn intersects(&self, other: &Self) -> bool {
        self.south <= other.north
            && self.north >= other.south
            && self.west <= other.east
            && self.east >= other.west
    }

    /// Center of the box.
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(
            0.5 * (self.south + self.north),
            0.5 * (self.west + self.east),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_rejects_bad_coordinates() {
        assert!(GeoPoint::checked(f64::NAN, 0.0).is_err());
        assert!(GeoPoint::checked(0.0, f64::INFINITY).is_err());
        assert!(matches!(
            GeoPoint::checked(91.0, 0.0),
            Err(GeometryError::OutOfRange { .. })
        ));
        assert!(GeoPoint::checked(45.0, -120.0).is_ok());
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = a.distance_to(&b);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
        assert_eq!(a.distance_to(&a), 0.0);
    }

    #[test]
    fn bounds_expand_and_contain() {
        let b = GeoBounds::from_points(&[GeoPoint::new(10.0, 10.0), GeoPoint::new(11.0, 12.0)])
            .expect("two points");
        assert_eq!(b.south, 10.0);
        assert_eq!(b.east, 12.0);
        assert!(b.contains(&GeoPoint::new(10.5, 11.0)));
        assert!(!b.contains(&GeoPoint::new(9.99, 11.0)));

        let grown = b.expanded_by_meters(METERS_PER_DEGREE);
        assert!(grown.contains(&GeoPoint::new(9.5, 11.0)));
        assert!(grown.intersects(&b));
        assert!(GeoBounds::from_points(&[]).is_none());
    }
}
