// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Double-tap detection.
//!
//! A tap is recorded on release. The next press counts as the second tap of a
//! double tap if it lands within a spatial tolerance of the recorded tap and
//! within the timeout of its release. A second tap consumes the record, so a
//! third tap starts over.
//!
//! ```
//! use std::time::{Duration, Instant};
//! use kurbo::Point;
//! use mapstory_gesture::TapTracker;
//!
//! let mut taps = TapTracker::new(Duration::from_millis(300), 40.0);
//! let t0 = Instant::now();
//! taps.record_tap(Point::new(10.0, 10.0), t0);
//! assert!(taps.is_second_tap(Point::new(20.0, 15.0), t0 + Duration::from_millis(120)));
//! assert!(!taps.is_second_tap(Point::new(20.0, 15.0), t0 + Duration::from_millis(400)));
//! ```

use core::time::Duration;
use std::time::Instant;

use kurbo::Point;

#[derive(Clone, Copy, Debug)]
struct Tap {
    position: Point,
    time: Instant,
}

/// Remembers the last tap and matches the next press against it.
#[derive(Clone, Debug)]
pub struct TapTracker {
    last: Option<Tap>,
    /// Maximum release-to-press delay of the second tap.
    pub timeout: Duration,
    /// Maximum distance between the two taps, in pixels.
    pub slop: f64,
}

impl TapTracker {
    /// A tracker with the given tolerances.
    pub fn new(timeout: Duration, slop: f64) -> Self {
        Self {
            last: None,
            timeout,
            slop,
        }
    }

    /// Record a completed tap released at `position`.
    pub fn record_tap(&mut self, position: Point, time: Instant) {
        self.last = Some(Tap { position, time });
    }

    /// Whether a press at `position` completes a double tap.
    pub fn is_second_tap(&self, position: Point, time: Instant) -> bool {
        self.last.is_some_and(|tap| {
            time.saturating_duration_since(tap.time) <= self.timeout
                && tap.position.distance(position) <= self.slop
        })
    }

    /// Consume the recorded tap if a press at `position` completes a double tap.
    pub fn take_second_tap(&mut self, position: Point, time: Instant) -> bool {
        let second = self.is_second_tap(position, time);
        if second {
            self.last = None;
        }
        second
    }

    /// Forget the recorded tap.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
