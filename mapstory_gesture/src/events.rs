// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Semantic gesture events and their synchronous dispatch.
//!
//! ## Semantics
//!
//! - Listeners run in subscription order on the interaction thread.
//! - [`Outcome::Handled`] marks the event consumed and keeps going, so every
//!   observer (renderer, UI, application logic) still sees it.
//! - [`Outcome::Rejected`] stops propagation immediately. It is how a listener
//!   vetoes a drag start.
//! - A listener added or removed during dispatch takes effect from the next
//!   event; each dispatch iterates a snapshot.
//!
//! ```
//! use mapstory_gesture::{Dispatcher, GestureEvent, Outcome};
//!
//! let dispatcher = Dispatcher::default();
//! dispatcher.subscribe(|event: &GestureEvent| match event {
//!     GestureEvent::GestureCanceled => Outcome::Handled,
//!     _ => Outcome::Ignored,
//! });
//! let verdict = dispatcher.dispatch(&GestureEvent::GestureCanceled);
//! assert!(verdict.handled && !verdict.rejected);
//! ```

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use kurbo::{Point, Vec2};
use mapstory_index::{Entity, GeoPoint};

use crate::deconflict::{Intent, RequestId};

/// A classified gesture.
#[derive(Clone, Debug, PartialEq)]
pub enum GestureEvent {
    /// Pointer down on empty map.
    MapPress {
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: GeoPoint,
    },
    /// Pointer up after a map press.
    MapRelease {
        /// Screen position.
        screen: Point,
        /// Geodetic position, `None` if released off the map.
        geo: Option<GeoPoint>,
    },
    /// Tap on empty map, or an entity tap no listener handled.
    MapClick {
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: GeoPoint,
    },
    /// Two taps on empty map without a drag.
    MapDoubleTap {
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: GeoPoint,
    },
    /// Long press on empty map.
    MapLongPress {
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: GeoPoint,
    },
    /// One-finger pan; `delta` is the pointer motion in pixels.
    MapScroll {
        /// Pointer motion since the previous scroll event.
        delta: Vec2,
    },
    /// Two-finger zoom step.
    Scale {
        /// Span ratio since the previous step; above 1 zooms in.
        factor: f64,
        /// Midpoint of the pointer pair.
        focus: Point,
    },
    /// Two-finger rotation step.
    Rotate {
        /// Clockwise degrees since the previous step.
        degrees: f64,
        /// Midpoint of the pointer pair.
        focus: Point,
    },
    /// Two-finger tilt step.
    Tilt {
        /// Degrees since the previous step; positive tilts toward the horizon.
        degrees: f64,
    },
    /// Double-tap drag zoom step.
    DoubleTapZoom {
        /// Zoom ratio since the previous step; above 1 zooms in.
        factor: f64,
        /// Position of the second tap.
        focus: Point,
    },
    /// Pointer down on a single entity.
    EntityPress {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
    },
    /// Pointer up after an entity press.
    EntityRelease {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
    },
    /// Tap on an entity.
    EntityClick {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
        /// Geodetic position of the tap.
        geo: Option<GeoPoint>,
    },
    /// Long press on an entity.
    EntityLongPress {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
    },
    /// Request for the entity's detail surface.
    RadialRequested {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
    },
    /// A movable entity began a drag. Reject to veto.
    DragStarted {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: Option<GeoPoint>,
    },
    /// The dragged entity moved.
    DragContinued {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: Option<GeoPoint>,
    },
    /// The dragged entity was released.
    DragDropped {
        /// The entity.
        entity: Entity,
        /// Screen position.
        screen: Point,
        /// Geodetic position.
        geo: Option<GeoPoint>,
    },
    /// The drag ended without a drop.
    DragCanceled {
        /// The entity.
        entity: Entity,
    },
    /// Candidates were handed to the disambiguation surface.
    DeconflictionRequested {
        /// Request handle.
        id: RequestId,
        /// What the choice is for.
        intent: Intent,
        /// Number of candidates.
        candidates: usize,
    },
    /// Too many candidates under the pointer; nothing was targeted.
    DensityExceeded {
        /// Candidates found.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
    /// The gesture was canceled.
    GestureCanceled,
}

impl GestureEvent {
    /// The entity this event targets, if any.
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            Self::EntityPress { entity, .. }
            | Self::EntityRelease { entity, .. }
            | Self::EntityClick { entity, .. }
            | Self::EntityLongPress { entity, .. }
            | Self::RadialRequested { entity, .. }
            | Self::DragStarted { entity, .. }
            | Self::DragContinued { entity, .. }
            | Self::DragDropped { entity, .. }
            | Self::DragCanceled { entity } => Some(entity),
            _ => None,
        }
    }
}

/// What a listener did with an event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// Not interested.
    #[default]
    Ignored,
    /// Consumed; propagation continues.
    Handled,
    /// Vetoed; propagation stops.
    Rejected,
}

/// Receives classified gestures.
pub trait GestureListener: Send + Sync {
    /// Observe one event.
    fn on_gesture(&self, event: &GestureEvent) -> Outcome;
}

impl<F> GestureListener for F
where
    F: Fn(&GestureEvent) -> Outcome + Send + Sync,
{
    fn on_gesture(&self, event: &GestureEvent) -> Outcome {
        self(event)
    }
}

/// Handle returned by [`Dispatcher::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Combined result of one dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Verdict {
    /// Some listener returned [`Outcome::Handled`].
    pub handled: bool,
    /// Some listener returned [`Outcome::Rejected`]; later listeners did not run.
    pub rejected: bool,
}

type Entry = (ListenerId, Arc<dyn GestureListener>);

/// Ordered listener list with snapshot iteration.
#[derive(Default)]
pub struct Dispatcher {
    entries: ArcSwap<Vec<Entry>>,
    next_id: AtomicU64,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("listeners", &self.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Append a listener.
    pub fn subscribe(&self, listener: impl GestureListener + 'static) -> ListenerId {
        self.subscribe_shared(Arc::new(listener))
    }

    /// Append a shared listener.
    pub fn subscribe_shared(&self, listener: Arc<dyn GestureListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.rcu(|entries| {
            let mut next = Vec::clone(entries);
            next.push((id, Arc::clone(&listener)));
            next
        });
        id
    }

    /// Remove a listener. Returns whether it was present.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut found = false;
        self.entries.rcu(|entries| {
            let mut next = Vec::clone(entries);
            let before = next.len();
            next.retain(|(i, _)| *i != id);
            found = next.len() != before;
            next
        });
        found
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Whether no listener is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener until one rejects it.
    pub fn dispatch(&self, event: &GestureEvent) -> Verdict {
        let snapshot = self.entries.load_full();
        let mut verdict = Verdict::default();
        for (_, listener) in snapshot.iter() {
            match listener.on_gesture(event) {
                Outcome::Ignored => {}
                Outcome::Handled => verdict.handled = true,
                Outcome::Rejected => {
                    verdict.rejected = true;
                    break;
                }
            }
        }
        tracing::trace!(?event, ?verdict, "gesture dispatched");
        verdict
    }
}
