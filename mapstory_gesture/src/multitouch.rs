// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Two-pointer scale, rotation and tilt.

use kurbo::{Point, Vec2};

/// Spans shorter than this (pixels) give no usable scale or angle.
const MIN_SPAN: f64 = 1.0;

/// Incremental change between two samples of a pointer pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinchDelta {
    /// Span ratio, `new / old`.
    pub scale: f64,
    /// Clockwise rotation in degrees, in `(-180, 180]`.
    pub rotation: f64,
    /// Tilt in degrees from parallel vertical motion; zero otherwise.
    pub tilt: f64,
    /// Midpoint of the new pair.
    pub focus: Point,
}

/// Tracks the previous sample of a pointer pair.
///
/// Platforms often report the two pointers in separate events, so vertical
/// motion is accumulated per pointer until both have moved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PinchTracker {
    a: Point,
    b: Point,
    // Vertical motion not yet turned into tilt.
    pending: (f64, f64),
}

impl PinchTracker {
    /// Start from the initial pair.
    pub fn new(a: Point, b: Point) -> Self {
        Self {
            a,
            b,
            pending: (0.0, 0.0),
        }
    }

    /// Advance to a new sample and report the change.
    ///
    /// Tilt is reported for the vertical motion both pointers share; moving
    /// both fingers up tilts toward the horizon.
    pub fn update(&mut self, a: Point, b: Point, tilt_per_pixel: f64) -> PinchDelta {
        let old = self.b - self.a;
        let new = b - a;
        let (scale, rotation) = if old.hypot() < MIN_SPAN || new.hypot() < MIN_SPAN {
            (1.0, 0.0)
        } else {
            (
                new.hypot() / old.hypot(),
                normalize_degrees((new.atan2() - old.atan2()).to_degrees()),
            )
        };
        let da: Vec2 = a - self.a;
        let db: Vec2 = b - self.b;
        let (pa, pb) = (self.pending.0 + da.y, self.pending.1 + db.y);
        let tilt = if pa * pb > 0.0 {
            let common = pa.signum() * pa.abs().min(pb.abs());
            self.pending = (pa - common, pb - common);
            -common * tilt_per_pixel
        } else if pa * pb < 0.0 {
            // Opposite directions: a pinch, not a tilt.
            self.pending = (0.0, 0.0);
            0.0
        } else {
            self.pending = (pa, pb);
            0.0
        };
        self.a = a;
        self.b = b;
        PinchDelta {
            scale,
            rotation,
            tilt,
            focus: a.midpoint(b),
        }
    }
}

fn normalize_degrees(mut d: f64) -> f64 {
    while d > 180.0 {
        d -= 360.0;
    }
    while d <= -180.0 {
        d += 360.0;
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spreading_fingers_scales_up() {
        let mut pinch = PinchTracker::new(Point::new(100.0, 100.0), Point::new(200.0, 100.0));
        let delta = pinch.update(Point::new(50.0, 100.0), Point::new(250.0, 100.0), 0.25);
        assert!((delta.scale - 2.0).abs() < 1e-9);
        assert!(delta.rotation.abs() < 1e-9);
        assert_eq!(delta.tilt, 0.0);
        assert_eq!(delta.focus, Point::new(150.0, 100.0));
    }

    #[test]
    fn quarter_turn_is_ninety_degrees() {
        let mut pinch = PinchTracker::new(Point::new(0.0, 0.0), Point::new(100.0, 0.0));
        // Screen y points down, so this is clockwise on screen.
        let delta = pinch.update(Point::new(0.0, 0.0), Point::new(0.0, 100.0), 0.25);
        assert!((delta.rotation - 90.0).abs() < 1e-9);
        assert!((delta.scale - 1.0).abs() < 1e-9);
    }

    #[test]
    fn parallel_upward_motion_tilts() {
        let mut pinch = PinchTracker::new(Point::new(100.0, 300.0), Point::new(200.0, 300.0));
        let delta = pinch.update(Point::new(100.0, 280.0), Point::new(200.0, 280.0), 0.25);
        assert!((delta.tilt - 5.0).abs() < 1e-9);
        assert!((delta.scale - 1.0).abs() < 1e-9);
    }

    #[test]
    fn interleaved_reports_still_tilt() {
        let mut pinch = PinchTracker::new(Point::new(100.0, 300.0), Point::new(200.0, 300.0));
        let first = pinch.update(Point::new(100.0, 280.0), Point::new(200.0, 300.0), 0.25);
        assert_eq!(first.tilt, 0.0);
        let second = pinch.update(Point::new(100.0, 280.0), Point::new(200.0, 280.0), 0.25);
        assert!((second.tilt - 5.0).abs() < 1e-9);
        // A pinch clears pending motion.
        pinch.update(Point::new(100.0, 270.0), Point::new(200.0, 280.0), 0.25);
        let pinched = pinch.update(Point::new(100.0, 270.0), Point::new(200.0, 300.0), 0.25);
        assert_eq!(pinched.tilt, 0.0);
    }

    #[test]
    fn angles_wrap() {
        assert_eq!(normalize_degrees(270.0), -90.0);
        assert_eq!(normalize_degrees(-180.0), 180.0);
    }
}
