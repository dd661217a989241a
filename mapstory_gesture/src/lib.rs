// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mapstory Gesture: touch gesture classification and entity deconfliction.
//!
//! - [`GestureClassifier`]: turns raw [`PointerEvent`]s into [`GestureEvent`]s
//!   (press, tap, double tap, long press, scroll, drag, scale, rotate, tilt),
//!   resolving targets against a [`mapstory_index::RootIndex`].
//! - [`Dispatcher`]: synchronous, ordered listener list; listeners answer with
//!   an [`Outcome`], and [`Outcome::Rejected`] vetoes a drag start.
//! - [`DeconflictionCoordinator`] and [`filter_candidates`]: what to do when
//!   a touch lands on several entities at once.
//! - [`PromotionTimer`]: the cancelable long-press → drag-tracking timer.
//! - [`GestureConfig`] and [`SettingsStore`]: fixed thresholds and runtime
//!   preferences.
//!
//! The classifier runs on one interaction thread. The index it reads may be
//! mutated from any thread.
//!
//! # Example
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use std::time::Instant;
//! use core::num::NonZeroU64;
//! use kurbo::{Point, Rect};
//! use mapstory_gesture::{GestureClassifier, GestureEvent, Outcome, PointerEvent};
//! use mapstory_index::{AffineProjection, Entity, GeoPoint, RootIndex};
//!
//! let index = RootIndex::new();
//! let unit = Entity::builder("unit-1").kind("a-f-G").point(0.0, 0.0).build().unwrap();
//! index.add_entity(&unit);
//!
//! let projection = AffineProjection::new(
//!     GeoPoint::new(0.0, 0.0),
//!     10_000.0,
//!     Rect::new(0.0, 0.0, 800.0, 600.0),
//! );
//! let mut gestures = GestureClassifier::new(index, Arc::new(projection));
//! let clicked = Arc::new(Mutex::new(None));
//! let sink = clicked.clone();
//! gestures.subscribe(move |event: &GestureEvent| match event {
//!     GestureEvent::EntityClick { entity, .. } => {
//!         *sink.lock().unwrap() = Some(entity.clone());
//!         Outcome::Handled
//!     }
//!     _ => Outcome::Ignored,
//! });
//!
//! let finger = NonZeroU64::new(1).unwrap();
//! let now = Instant::now();
//! gestures.handle(&PointerEvent::down(finger, Point::new(400.0, 300.0), now));
//! gestures.handle(&PointerEvent::up(finger, Point::new(401.0, 300.0), now));
//! assert_eq!(*clicked.lock().unwrap(), Some(unit));
//! ```

mod classifier;
mod click;
mod deconflict;
mod events;
mod multitouch;
mod pointer;
mod settings;
mod timer;

pub use classifier::{GestureClassifier, GestureMode, PressTarget};
pub use click::TapTracker;
pub use deconflict::{
    DeconflictionCoordinator, DeconflictionRequest, DisambiguationSurface, Intent, Offer,
    RequestId, Resolution, filter_candidates,
};
pub use events::{Dispatcher, GestureEvent, GestureListener, ListenerId, Outcome, Verdict};
pub use multitouch::{PinchDelta, PinchTracker};
pub use pointer::{PointerEvent, PointerId, PointerPhase};
pub use settings::{
    GestureConfig, GestureSettings, KEY_DENSITY, KEY_FREE_FORM_3D, KEY_ORIENTATION_ENABLED,
    KEY_TILT_ENABLED, KEY_TILT_MODE, PreferenceValue, SettingsError, SettingsStore, TiltMode,
};
pub use timer::{PromotionTick, PromotionTimer};
