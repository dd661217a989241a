// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stroked polylines: routes, trails and other open line entities.
//!
//! Joins and caps are not modelled; the pick region of a polyline is the
//! union of its segments widened by the half-width plus tolerance.

use core::cmp::Ordering;

use kurbo::{Point, Rect};

use crate::{HitKind, HitParams, HitScore, PreciseHitTest};

/// An open polyline in screen pixels with a stroke half-width.
#[derive(Clone, Debug, PartialEq)]
pub struct StrokedPolyline {
    /// Projected vertices, in drawing order.
    pub points: Vec<Point>,
    /// Half of the drawn stroke width in pixels.
    pub half_width: f64,
}

impl StrokedPolyline {
    /// Bounding box of the centerline.
    pub fn bounds(&self) -> Rect {
        let mut iter = self.points.iter();
        let Some(first) = iter.next() else {
            return Rect::ZERO;
        };
        iter.fold(Rect::from_points(*first, *first), |acc, p| {
            acc.union_pt(*p)
        })
    }

    /// Distance from `pt` to the nearest point of the centerline.
    ///
    /// A single-vertex polyline degenerates to the distance to that vertex.
    pub fn centerline_distance(&self, pt: Point) -> Option<f64> {
        match self.points.as_slice() {
            [] => None,
            [only] => Some(only.distance(pt)),
            points => points
                .windows(2)
                .map(|w| segment_distance(w[0], w[1], pt))
                .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal)),
        }
    }
}

impl PreciseHitTest for StrokedPolyline {
    fn hit_test_screen(&self, pt: Point, params: &HitParams) -> Option<HitScore> {
        let dist = self.centerline_distance(pt)?;
        let limit = self.half_width + params.stroke_tolerance.max(params.touch_radius);
        (dist <= limit).then_some(HitScore {
            distance: (dist - self.half_width).max(0.0),
            kind: HitKind::Stroke,
        })
    }
}

/// Distance from `pt` to the segment `p0`–`p1`.
pub(crate) fn segment_distance(p0: Point, p1: Point, pt: Point) -> f64 {
    let v = p1 - p0;
    let w = pt - p0;
    let len2 = v.hypot2();
    let t = if len2 > 0.0 { w.dot(v) / len2 } else { 0.0 };
    let proj = p0 + v * t.clamp(0.0, 1.0);
    proj.distance(pt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route() -> StrokedPolyline {
        StrokedPolyline {
            points: vec![
                Point::new(0.0, 0.0),
                Point::new(100.0, 0.0),
                Point::new(100.0, 100.0),
            ],
            half_width: 2.0,
        }
    }

    #[test]
    fn hit_on_second_segment() {
        let score = route()
            .hit_test_screen(Point::new(101.0, 50.0), &HitParams::default())
            .expect("on the stroke");
        assert_eq!(score.kind, HitKind::Stroke);
        assert_eq!(score.distance, 0.0);
    }

    #[test]
    fn tolerance_widens_thin_lines() {
        let pt = Point::new(50.0, 9.0);
        assert!(route().hit_test_screen(pt, &HitParams::default()).is_none());
        let score = route()
            .hit_test_screen(pt, &HitParams::touch(8.0))
            .expect("within touch tolerance");
        assert!((score.distance - 7.0).abs() < 1e-9);
    }

    #[test]
    fn bounds_cover_all_vertices() {
        assert_eq!(route().bounds(), Rect::new(0.0, 0.0, 100.0, 100.0));
        let empty = StrokedPolyline {
            points: Vec::new(),
            half_width: 1.0,
        };
        assert!(empty.centerline_distance(Point::ZERO).is_none());
    }
}
