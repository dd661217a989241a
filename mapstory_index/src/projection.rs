// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Geodetic ↔ screen projection seam.

use kurbo::{Affine, Point, Rect};

use crate::geo::{GeoPoint, METERS_PER_DEGREE};

/// Maps geodetic points to screen pixels and back.
///
/// Hosts supply the real map projection. `inverse` returning `None` means the
/// screen point is not over the map surface (an off-map press).
pub trait Projection: Send + Sync {
    /// Project a geodetic point to screen pixels, or `None` if it cannot be drawn.
    fn forward(&self, geo: GeoPoint) -> Option<Point>;

    /// Unproject a screen point, or `None` when it is off the map surface.
    fn inverse(&self, screen: Point) -> Option<GeoPoint>;

    /// Approximate meters covered by one pixel near `screen`.
    ///
    /// Used to turn pixel tolerances into search radii. The default samples the
    /// inverse one pixel to the right.
    fn meters_per_pixel(&self, screen: Point) -> Option<f64> {
        let a = self.inverse(screen)?;
        let b = self.inverse(screen + (1.0, 0.0))?;
        Some(a.distance_to(&b))
    }
}

/// Equirectangular projection: longitude → x, latitude → -y, uniform scale.
///
/// Good enough for tests and for hosts that draw small areas; not a substitute
/// for a real map projection.
#[derive(Clone, Copy, Debug)]
pub struct AffineProjection {
    geo_to_screen: Affine,
    surface: Rect,
}

impl AffineProjection {
    /// Center `center` on the middle of `surface` with the given scale.
    pub fn new(center: GeoPoint, pixels_per_degree: f64, surface: Rect) -> Self {
        let mid = surface.center();
        let ppd = pixels_per_degree;
        let geo_to_screen = Affine::new([
            ppd,
            0.0,
            0.0,
            -ppd,
            mid.x - ppd * center.longitude,
            mid.y + ppd * center.latitude,
        ]);
        Self {
            geo_to_screen,
            surface,
        }
    }

    /// The screen rectangle this projection covers.
    pub fn surface(&self) -> Rect {
        self.surface
    }

    /// Meters per pixel along the meridian.
    pub fn meters_per_pixel_ns(&self) -> f64 {
        METERS_PER_DEGREE / self.geo_to_screen.as_coeffs()[0]
    }
}

impl Projection for AffineProjection {
    fn forward(&self, geo: GeoPoint) -> Option<Point> {
        if !geo.is_valid() {
            return None;
        }
        Some(self.geo_to_screen * Point::new(geo.longitude, geo.latitude))
    }

    fn inverse(&self, screen: Point) -> Option<GeoPoint> {
        if !self.surface.contains(screen) {
            return None;
        }
        let p = self.geo_to_screen.inverse() * screen;
        let geo = GeoPoint::new(p.y, p.x);
        geo.is_valid().then_some(geo)
    }
}
