// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Screen-space precise hit testing for map entities.
//!
//! This crate answers the narrow-phase question "does this touch land on this
//! drawn entity?" once the entity's geometry has been projected to screen
//! pixels. It is built on [`kurbo`] and knows nothing about groups, indices or
//! projections; the index crate projects geometry and then calls in here.
//!
//! # Typical usage
//!
//! - Project the entity's geodetic geometry into screen space.
//! - Build a [`ScreenShape`] (icon disk, stroked polyline, or filled area).
//! - Reject cheaply with [`ScreenShape::touch_bounds`], then call
//!   [`PreciseHitTest::hit_test_screen`].
//! - Use the returned [`HitScore`] for ranking only; identity and z-order live
//!   in the caller's structures.
//!
//! # Key types
//!
//! - [`HitParams`]: touch radius (finger slop) and stroke tolerance, in pixels.
//! - [`HitScore`]: `{ distance, kind }`; lower distance is a better hit.
//! - [`PreciseHitTest`]: implemented by every screen shape.
//!
//! Touch input is imprecise, so every shape here is inflated by
//! [`HitParams::touch_radius`]: a marker icon of radius 8 px is hit by a touch
//! landing 20 px from its center when the touch radius is 12 px.

use core::cmp::Ordering;

use kurbo::{BezPath, Circle, ParamCurve, Point, Rect, Shape};

/// Stroke-oriented helpers and primitives.
pub mod stroke;

pub use stroke::StrokedPolyline;

/// Kind of hit produced by a precise test.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HitKind {
    /// Hit the interior of a filled area.
    Fill,
    /// Hit the stroked outline of a line or area.
    Stroke,
    /// Hit the icon drawn for a point entity.
    Icon,
    /// Hit a control handle (center or vertex handle of a shape).
    Handle,
}

/// Parameters controlling precise hit tests, in screen pixels.
#[derive(Clone, Copy, Debug)]
pub struct HitParams {
    /// Radius of the touch contact. Every shape is inflated by this much.
    pub touch_radius: f64,
    /// Extra tolerance added to stroke half-widths.
    ///
    /// Thin polylines are hard to hit with a finger; this widens their pick
    /// region independently of [`touch_radius`](Self::touch_radius).
    pub stroke_tolerance: f64,
    /// Prefer fill hits over stroke hits when an area is hit on its edge.
    pub prefer_fill: bool,
}

impl Default for HitParams {
    fn default() -> Self {
        Self {
            touch_radius: 0.0,
            stroke_tolerance: 0.0,
            prefer_fill: true,
        }
    }
}

impl HitParams {
    /// Parameters for a finger touch of the given radius.
    pub fn touch(radius: f64) -> Self {
        Self {
            touch_radius: radius,
            stroke_tolerance: radius,
            ..Self::default()
        }
    }
}

/// Score returned from a precise hit.
///
/// Lower distance is considered a better (closer) hit.
#[derive(Clone, Copy, Debug)]
pub struct HitScore {
    /// Distance in pixels from the touch point to the drawn geometry.
    pub distance: f64,
    /// Classification of what was hit.
    pub kind: HitKind,
}

impl HitScore {
    /// A direct hit of the given kind at distance 0.
    pub const fn direct(kind: HitKind) -> Self {
        Self {
            distance: 0.0,
            kind,
        }
    }

    /// Compare two scores, preferring smaller distance; ties keep original order.
    pub fn cmp_distance(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Trait for precise hit testing of projected geometry in screen space.
///
/// Implementors treat [`HitParams::touch_radius`] as an inclusive inflation
/// of the drawn shape.
pub trait PreciseHitTest {
    /// Test `pt` (screen pixels) against the shape.
    ///
    /// Returns `Some(HitScore)` when the point is considered a hit.
    fn hit_test_screen(&self, pt: Point, params: &HitParams) -> Option<HitScore>;
}

/// Icon of a point entity: a disk of `radius` pixels around the projected position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerIcon {
    /// Projected position of the entity.
    pub center: Point,
    /// Icon radius in pixels.
    pub radius: f64,
}

impl PreciseHitTest for MarkerIcon {
    fn hit_test_screen(&self, pt: Point, params: &HitParams) -> Option<HitScore> {
        let dist = self.center.distance(pt);
        if dist <= self.radius + params.touch_radius {
            let distance = if dist <= self.radius {
                0.0
            } else {
                dist - self.radius
            };
            Some(HitScore {
                distance,
                kind: HitKind::Icon,
            })
        } else {
            None
        }
    }
}

/// Center or vertex handle of a shape, drawn as a small disk.
impl PreciseHitTest for Circle {
    fn hit_test_screen(&self, pt: Point, params: &HitParams) -> Option<HitScore> {
        let dist = self.center.distance(pt);
        if dist <= self.radius + params.touch_radius {
            let distance = if dist <= self.radius {
                0.0
            } else {
                dist - self.radius
            };
            Some(HitScore {
                distance,
                kind: HitKind::Handle,
            })
        } else {
            None
        }
    }
}

/// A filled, closed area (polygon or projected circle) with an outline.
#[derive(Clone, Debug)]
pub struct FilledArea {
    /// Closed outline in screen pixels.
    pub outline: BezPath,
    /// Half of the outline stroke width.
    pub half_width: f64,
}

impl FilledArea {
    /// Build a closed area from projected vertices. Returns `None` for fewer than three.
    pub fn from_points(points: &[Point], half_width: f64) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        if rest.len() < 2 {
            return None;
        }
        let mut outline = BezPath::new();
        outline.move_to(*first);
        for p in rest {
            outline.line_to(*p);
        }
        outline.close_path();
        Some(Self {
            outline,
            half_width,
        })
    }
}

impl PreciseHitTest for FilledArea {
    fn hit_test_screen(&self, pt: Point, params: &HitParams) -> Option<HitScore> {
        let fill = self
            .outline
            .contains(pt)
            .then_some(HitScore::direct(HitKind::Fill));
        if fill.is_some() && params.prefer_fill {
            return fill;
        }
        let edge = outline_distance(&self.outline, pt).and_then(|dist| {
            (dist <= self.half_width + params.stroke_tolerance.max(params.touch_radius)).then_some(
                HitScore {
                    distance: (dist - self.half_width).max(0.0),
                    kind: HitKind::Stroke,
                },
            )
        });
        match (fill, edge) {
            (Some(f), Some(e)) => Some(if e.cmp_distance(&f) == Ordering::Less {
                e
            } else {
                f
            }),
            (f, e) => f.or(e),
        }
    }
}

fn outline_distance(path: &BezPath, pt: Point) -> Option<f64> {
    path.segments()
        .map(|seg| stroke::segment_distance(seg.start(), seg.end(), pt))
        .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
}

/// Screen-space shape of a projected entity.
#[derive(Clone, Debug)]
pub enum ScreenShape {
    /// Point entity icon.
    Icon(MarkerIcon),
    /// Handle of a shape.
    Handle(Circle),
    /// Open polyline (routes, trails).
    Line(StrokedPolyline),
    /// Closed area (polygons, range rings).
    Area(FilledArea),
}

impl ScreenShape {
    /// Bounding box of the drawn shape, inflated for touch.
    ///
    /// This is the broad-phase test: a point outside these bounds can never hit.
    pub fn touch_bounds(&self, params: &HitParams) -> Rect {
        let (rect, pad) = match self {
            Self::Icon(icon) => (
                Rect::from_center_size(icon.center, (icon.radius * 2.0, icon.radius * 2.0)),
                params.touch_radius,
            ),
            Self::Handle(circle) => (circle.bounding_box(), params.touch_radius),
            Self::Line(line) => (
                line.bounds(),
                line.half_width + params.stroke_tolerance.max(params.touch_radius),
            ),
            Self::Area(area) => (
                area.outline.bounding_box(),
                area.half_width + params.stroke_tolerance.max(params.touch_radius),
            ),
        };
        rect.inflate(pad, pad)
    }
}

impl PreciseHitTest for ScreenShape {
    fn hit_test_screen(&self, pt: Point, params: &HitParams) -> Option<HitScore> {
        if !self.touch_bounds(params).contains(pt) {
            return None;
        }
        match self {
            Self::Icon(icon) => icon.hit_test_screen(pt, params),
            Self::Handle(circle) => circle.hit_test_screen(pt, params),
            Self::Line(line) => line.hit_test_screen(pt, params),
            Self::Area(area) => area.hit_test_screen(pt, params),
        }
    }
}
