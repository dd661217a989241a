// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The gesture state machine.
//!
//! [`GestureClassifier`] consumes raw [`PointerEvent`]s on the interaction
//! thread and dispatches [`GestureEvent`]s synchronously. It owns all transient
//! gesture state: the press, the dragged entity, the pinch, the promotion
//! timer and the pressed marker of at most one entity.
//!
//! ## Modes
//!
//! ```text
//! Idle ── down ──▶ Pressed ──▶ release: click / map click / deconfliction
//!                     │  ├── move past slop, movable ──▶ Dragging ──▶ drop
//!                     │  ├── move past slop ──▶ Scrolling
//!                     │  └── long press, movable ─(timer)─▶ DragTracking ──▶ drop
//!                     └── second pointer ──▶ MultiTouch
//! Idle ── second tap on empty map ──▶ DoubleTapPending ──▶ DoubleTapDrag
//! ```
//!
//! Every exit path (release, cancel, a new gesture, deconfliction
//! replacement) runs through the same cleanup, which clears the pressed
//! marker and disarms the promotion timer.
//!
//! ## Timing
//!
//! Long presses are detected by polling [`GestureClassifier::tick`] from the
//! host's frame loop. The long-press → drag-tracking promotion runs on a
//! [`PromotionTimer`]; its ticks are drained by `tick` and `handle`, or hosts
//! can `select!` over [`GestureClassifier::promotion_ticks`] and call
//! [`GestureClassifier::on_promotion`] themselves.

use core::fmt;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::Receiver;
use kurbo::Point;
use mapstory_index::{Entity, GeoPoint, HitParams, HitQuery, Projection, RootIndex};
use smallvec::SmallVec;

use crate::click::TapTracker;
use crate::deconflict::{
    DeconflictionCoordinator, DeconflictionRequest, DisambiguationSurface, Intent, Offer,
    RequestId, Resolution, filter_candidates,
};
use crate::events::{Dispatcher, GestureEvent, GestureListener, ListenerId, Verdict};
use crate::multitouch::PinchTracker;
use crate::pointer::{PointerEvent, PointerId, PointerPhase};
use crate::settings::{GestureConfig, GestureSettings, SettingsStore};
use crate::timer::{PromotionTick, PromotionTimer};

/// Changes smaller than this are not reported.
const EPSILON: f64 = 1e-6;

/// What the classifier is doing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum GestureMode {
    /// No gesture.
    #[default]
    Idle,
    /// One pointer down, not yet a scroll or drag.
    Pressed,
    /// One-finger map pan.
    Scrolling,
    /// Dragging an entity after an early move.
    Dragging,
    /// Dragging an entity after a long press or a move choice; owns pointer
    /// routing until release or cancel.
    DragTracking,
    /// Moves are ignored until release (vetoed drag, long press, pending
    /// move choice).
    Suppressed,
    /// Two pointers: scale, rotate, tilt.
    MultiTouch,
    /// Second tap of a double tap is down.
    DoubleTapPending,
    /// Second tap is dragging vertically to zoom.
    DoubleTapDrag,
}

/// What a pointer-down landed on.
#[derive(Clone, Debug, PartialEq)]
pub enum PressTarget {
    /// Empty map at this geodetic point.
    Map(GeoPoint),
    /// One entity.
    Entity(Entity),
    /// Several candidates, in hit-test order, awaiting deconfliction.
    Ambiguous(Vec<Entity>),
    /// Outside the map surface.
    OffMap,
}

#[derive(Debug)]
struct Press {
    pointer: PointerId,
    origin: Point,
    last: Point,
    time: Instant,
    geo: Option<GeoPoint>,
    target: PressTarget,
    // Entity carrying the pressed marker.
    pressed: Option<Entity>,
    long_pressed: bool,
    slop: f64,
}

fn clear_marker(press: &mut Press) {
    if let Some(entity) = press.pressed.take() {
        entity.set_pressed(false);
    }
}

/// Classifies pointer input into map and entity gestures.
pub struct GestureClassifier {
    index: Arc<RootIndex>,
    projection: Arc<dyn Projection>,
    config: GestureConfig,
    settings: Arc<SettingsStore>,
    snapshot: Arc<GestureSettings>,
    dispatcher: Dispatcher,
    coordinator: DeconflictionCoordinator,
    timer: PromotionTimer,
    taps: TapTracker,
    pointers: SmallVec<[(PointerId, Point); 2]>,
    generation: u64,
    mode: GestureMode,
    press: Option<Press>,
    pinch: Option<PinchTracker>,
    dragged: Option<Entity>,
    tool_intent: Option<Intent>,
    last_multitouch: Option<Instant>,
}

impl fmt::Debug for GestureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GestureClassifier")
            .field("mode", &self.mode)
            .field("generation", &self.generation)
            .field("pointers", &self.pointers.len())
            .field("press", &self.press)
            .field("dragged", &self.dragged)
            .field("timer", &self.timer)
            .field("coordinator", &self.coordinator)
            .finish_non_exhaustive()
    }
}

impl GestureClassifier {
    /// A classifier with default thresholds and settings.
    pub fn new(index: Arc<RootIndex>, projection: Arc<dyn Projection>) -> Self {
        Self::with_config(
            index,
            projection,
            GestureConfig::default(),
            Arc::new(SettingsStore::default()),
        )
    }

    /// A classifier with explicit thresholds and a shared settings store.
    pub fn with_config(
        index: Arc<RootIndex>,
        projection: Arc<dyn Projection>,
        config: GestureConfig,
        settings: Arc<SettingsStore>,
    ) -> Self {
        Self {
            index,
            projection,
            snapshot: settings.snapshot(),
            settings,
            dispatcher: Dispatcher::default(),
            coordinator: DeconflictionCoordinator::new(config.max_deconfliction_candidates),
            timer: PromotionTimer::new(),
            taps: TapTracker::new(config.double_tap_timeout, config.double_tap_slop),
            config,
            pointers: SmallVec::new(),
            generation: 0,
            mode: GestureMode::Idle,
            press: None,
            pinch: None,
            dragged: None,
            tool_intent: None,
            last_multitouch: None,
        }
    }

    /// Append a gesture listener.
    pub fn subscribe(&self, listener: impl GestureListener + 'static) -> ListenerId {
        self.dispatcher.subscribe(listener)
    }

    /// Remove a gesture listener.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// The listener list.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Install or remove the chooser UI.
    pub fn set_surface(&mut self, surface: Option<Arc<dyn DisambiguationSurface>>) {
        self.coordinator.set_surface(surface);
    }

    /// Intent used for ambiguous releases; `None` means [`Intent::Select`].
    pub fn set_tool_intent(&mut self, intent: Option<Intent>) {
        self.tool_intent = intent;
    }

    /// The active tool intent.
    pub fn tool_intent(&self) -> Option<Intent> {
        self.tool_intent
    }

    /// The index gestures resolve against.
    pub fn index(&self) -> &Arc<RootIndex> {
        &self.index
    }

    /// Thresholds.
    pub fn config(&self) -> &GestureConfig {
        &self.config
    }

    /// The settings store read at the start of each gesture.
    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    /// Current mode.
    pub fn mode(&self) -> GestureMode {
        self.mode
    }

    /// Generation of the current gesture; bumps on every new gesture and cancel.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of pointers down.
    pub fn active_pointers(&self) -> usize {
        self.pointers.len()
    }

    /// What the current press landed on.
    pub fn press_target(&self) -> Option<&PressTarget> {
        self.press.as_ref().map(|p| &p.target)
    }

    /// The entity carrying the pressed marker.
    pub fn pressed_entity(&self) -> Option<&Entity> {
        self.press.as_ref().and_then(|p| p.pressed.as_ref())
    }

    /// Whether the current press is on empty map.
    pub fn is_map_pressed(&self) -> bool {
        matches!(self.press_target(), Some(PressTarget::Map(_)))
    }

    /// The entity being dragged.
    pub fn dragged_entity(&self) -> Option<&Entity> {
        self.dragged.as_ref()
    }

    /// Whether the long-press promotion timer is armed.
    pub fn is_promotion_armed(&self) -> bool {
        self.timer.is_armed()
    }

    /// Channel promotion ticks arrive on.
    pub fn promotion_ticks(&self) -> Receiver<PromotionTick> {
        self.timer.ticks().clone()
    }

    /// The deconfliction request currently presented.
    pub fn open_request(&self) -> Option<&DeconflictionRequest> {
        self.coordinator.open_request()
    }

    /// The radial request waiting for the open surface to close.
    pub fn queued_request(&self) -> Option<&DeconflictionRequest> {
        self.coordinator.queued_request()
    }

    fn emit(&self, event: GestureEvent) -> Verdict {
        self.dispatcher.dispatch(&event)
    }

    fn hit_test(&self, screen: Point, density: f64) -> Vec<Entity> {
        let query = HitQuery::new(screen, &*self.projection)
            .with_limit(self.config.hit_limit)
            .with_params(HitParams::touch(self.config.touch_radius * density));
        self.index.hit_test(&query)
    }

    fn in_cooldown(&self, now: Instant) -> bool {
        self.last_multitouch
            .is_some_and(|t| now.saturating_duration_since(t) < self.config.scale_cooldown)
    }

    fn forget_pointer(&mut self, pointer: PointerId) -> bool {
        let before = self.pointers.len();
        self.pointers.retain(|(id, _)| *id != pointer);
        self.pointers.len() != before
    }

    /// Feed one raw pointer event.
    pub fn handle(&mut self, event: &PointerEvent) {
        self.poll_promotion();
        match event.phase {
            PointerPhase::Down => self.on_down(event),
            PointerPhase::Move => self.on_move(event),
            PointerPhase::Up => self.on_up(event),
            PointerPhase::Cancel => {
                self.forget_pointer(event.pointer);
                self.cancel();
            }
        }
    }

    /// Advance time: drains promotion ticks and detects long presses.
    pub fn tick(&mut self, now: Instant) {
        self.poll_promotion();
        if self.mode != GestureMode::Pressed {
            return;
        }
        let Some(press) = self.press.as_mut() else {
            return;
        };
        if press.long_pressed
            || now.saturating_duration_since(press.time) < self.config.long_press_timeout
        {
            return;
        }
        press.long_pressed = true;
        let (target, screen, geo) = (press.target.clone(), press.last, press.geo);
        self.long_press(target, screen, geo);
    }

    fn poll_promotion(&mut self) {
        loop {
            let Ok(tick) = self.timer.ticks().try_recv() else {
                break;
            };
            self.on_promotion(tick);
        }
    }

    /// Handle a promotion tick received from [`Self::promotion_ticks`].
    ///
    /// Stale ticks (canceled timer, finished gesture) are ignored.
    pub fn on_promotion(&mut self, tick: PromotionTick) {
        if !self.timer.accept(tick) {
            return;
        }
        if tick.generation != self.generation || self.mode != GestureMode::Pressed {
            tracing::debug!(
                generation = tick.generation,
                "promotion tick for a finished gesture"
            );
            return;
        }
        let Some((entity, screen)) = self.press.as_ref().and_then(|p| {
            p.pressed
                .clone()
                .filter(Entity::is_movable)
                .map(|e| (e, p.last))
        }) else {
            tracing::debug!("promotion tick with no movable pressed entity");
            return;
        };
        if !self.start_drag(entity, screen, GestureMode::DragTracking) {
            self.mode = GestureMode::Suppressed;
        }
    }

    /// Abandon the current gesture.
    ///
    /// Disarms the promotion timer first, then clears all state without
    /// dispatching a click or drop. Open deconfliction requests are left to
    /// the surface.
    pub fn cancel(&mut self) {
        self.timer.cancel();
        self.generation += 1;
        let active =
            self.mode != GestureMode::Idle || self.press.is_some() || self.dragged.is_some();
        if let Some(entity) = self.dragged.take() {
            self.emit(GestureEvent::DragCanceled { entity });
        }
        if let Some(mut press) = self.press.take() {
            clear_marker(&mut press);
        }
        self.pinch = None;
        self.pointers.clear();
        self.taps.reset();
        self.mode = GestureMode::Idle;
        if active {
            tracing::debug!(generation = self.generation, "gesture canceled");
            self.emit(GestureEvent::GestureCanceled);
        }
    }

    fn finish(&mut self) {
        self.timer.cancel();
        if let Some(mut press) = self.press.take() {
            clear_marker(&mut press);
        }
        if let Some(entity) = self.dragged.take() {
            tracing::debug!(uid = %entity.uid(), "gesture ended with a drag in progress");
            self.emit(GestureEvent::DragCanceled { entity });
        }
        self.pinch = None;
        self.mode = GestureMode::Idle;
    }

    fn on_down(&mut self, event: &PointerEvent) {
        if let Some(slot) = self.pointers.iter_mut().find(|(id, _)| *id == event.pointer) {
            tracing::debug!(pointer = event.pointer.get(), "repeated down for a tracked pointer");
            slot.1 = event.position;
            return;
        }
        self.pointers.push((event.pointer, event.position));
        match self.pointers.len() {
            1 if self.mode == GestureMode::DragTracking => self.continue_drag(event.position),
            1 => self.begin_press(event),
            2 => self.begin_multitouch(),
            n => tracing::trace!(pointers = n, "extra pointer ignored"),
        }
    }

    fn begin_press(&mut self, event: &PointerEvent) {
        self.finish();
        self.generation += 1;
        self.snapshot = self.settings.snapshot();
        let density = self.snapshot.density;
        let screen = event.position;
        let geo = self.projection.inverse(screen);
        let hits = self.hit_test(screen, density);
        let mut press = Press {
            pointer: event.pointer,
            origin: screen,
            last: screen,
            time: event.time,
            geo,
            target: PressTarget::OffMap,
            pressed: None,
            long_pressed: false,
            slop: self.config.touch_slop * density,
        };
        self.taps.slop = self.config.double_tap_slop * density;

        if hits.is_empty()
            && let Some(geo) = geo
            && self.taps.take_second_tap(screen, event.time)
        {
            press.target = PressTarget::Map(geo);
            self.press = Some(press);
            self.mode = GestureMode::DoubleTapPending;
            return;
        }
        if !hits.is_empty() {
            self.taps.reset();
        }

        let mut candidates = filter_candidates(&hits, |uid| self.index.resolve_by_uid(uid));
        press.target = if hits.is_empty() {
            geo.map_or(PressTarget::OffMap, PressTarget::Map)
        } else if candidates.len() > 1 {
            PressTarget::Ambiguous(candidates)
        } else {
            // Every hit was filtered out: the topmost hit is the target.
            match candidates.pop().or_else(|| hits.first().cloned()) {
                Some(entity) => PressTarget::Entity(entity),
                None => PressTarget::OffMap,
            }
        };

        match &press.target {
            PressTarget::Map(geo) => {
                self.emit(GestureEvent::MapPress { screen, geo: *geo });
            }
            PressTarget::OffMap => tracing::debug!(?screen, "press outside the map surface"),
            PressTarget::Entity(entity) => {
                if let Some(geo) = geo
                    && let Err(err) = entity.set_touch_point(Some(geo))
                {
                    tracing::debug!(uid = %entity.uid(), error = %err, "touch point not recorded");
                }
                entity.set_pressed(true);
                press.pressed = Some(entity.clone());
                self.emit(GestureEvent::EntityPress {
                    entity: entity.clone(),
                    screen,
                });
            }
            PressTarget::Ambiguous(candidates) => {
                if let Some(first) = candidates.iter().find(|c| c.is_movable()) {
                    first.set_pressed(true);
                    press.pressed = Some(first.clone());
                }
                tracing::debug!(
                    candidates = candidates.len(),
                    optimistic = ?press.pressed.as_ref().map(|e| e.uid().to_string()),
                    "ambiguous press"
                );
            }
        }
        self.press = Some(press);
        self.mode = GestureMode::Pressed;
    }

    fn begin_multitouch(&mut self) {
        let (Some(&(_, a)), Some(&(_, b))) = (self.pointers.first(), self.pointers.get(1)) else {
            return;
        };
        if self.mode == GestureMode::Pressed
            && let Some(PressTarget::Entity(entity)) = self.press_target()
        {
            let screen = self.press.as_ref().map_or(a, |p| p.last);
            self.emit(GestureEvent::EntityRelease {
                entity: entity.clone(),
                screen,
            });
        }
        self.finish();
        self.generation += 1;
        self.taps.reset();
        self.snapshot = self.settings.snapshot();
        self.pinch = Some(PinchTracker::new(a, b));
        self.mode = GestureMode::MultiTouch;
    }

    fn on_move(&mut self, event: &PointerEvent) {
        let Some(slot) = self.pointers.iter_mut().find(|(id, _)| *id == event.pointer) else {
            tracing::trace!(pointer = event.pointer.get(), "move for an untracked pointer");
            return;
        };
        slot.1 = event.position;
        match self.mode {
            GestureMode::MultiTouch => self.update_multitouch(event.time),
            GestureMode::Dragging | GestureMode::DragTracking => {
                self.continue_drag(event.position);
            }
            GestureMode::Pressed => self.move_pressed(event),
            GestureMode::Scrolling => self.scroll(event),
            GestureMode::DoubleTapPending | GestureMode::DoubleTapDrag => {
                self.double_tap_drag(event);
            }
            GestureMode::Idle | GestureMode::Suppressed => {}
        }
    }

    fn move_pressed(&mut self, event: &PointerEvent) {
        let Some(press) = self.press.as_mut() else {
            return;
        };
        if press.pointer != event.pointer || press.origin.distance(event.position) <= press.slop {
            return;
        }
        self.timer.cancel();
        if let Some(entity) = press.pressed.clone().filter(Entity::is_movable) {
            if !self.start_drag(entity, event.position, GestureMode::Dragging) {
                self.mode = GestureMode::Suppressed;
            }
            return;
        }
        if press.long_pressed {
            self.mode = GestureMode::Suppressed;
            return;
        }
        clear_marker(press);
        let released = match &press.target {
            PressTarget::Entity(entity) => Some(entity.clone()),
            _ => None,
        };
        if let Some(entity) = released {
            self.emit(GestureEvent::EntityRelease {
                entity,
                screen: event.position,
            });
        }
        self.mode = GestureMode::Scrolling;
        self.scroll(event);
    }

    fn scroll(&mut self, event: &PointerEvent) {
        let cooling = self.in_cooldown(event.time);
        let Some(press) = self.press.as_mut() else {
            return;
        };
        if press.pointer != event.pointer {
            return;
        }
        let delta = event.position - press.last;
        press.last = event.position;
        if cooling {
            tracing::trace!("scroll suppressed after a multi-touch gesture");
            return;
        }
        self.emit(GestureEvent::MapScroll { delta });
    }

    fn double_tap_drag(&mut self, event: &PointerEvent) {
        let Some(press) = self.press.as_mut() else {
            return;
        };
        if self.mode == GestureMode::DoubleTapPending {
            if (event.position.y - press.origin.y).abs() <= press.slop {
                return;
            }
            self.mode = GestureMode::DoubleTapDrag;
        }
        let dy = event.position.y - press.last.y;
        press.last = event.position;
        let focus = press.origin;
        // Dragging down zooms in.
        let factor = (dy * self.config.zoom_per_pixel).exp();
        self.emit(GestureEvent::DoubleTapZoom { factor, focus });
    }

    fn update_multitouch(&mut self, time: Instant) {
        let (Some(&(_, a)), Some(&(_, b))) = (self.pointers.first(), self.pointers.get(1)) else {
            return;
        };
        let Some(pinch) = self.pinch.as_mut() else {
            return;
        };
        let delta = pinch.update(a, b, self.config.tilt_per_pixel);
        self.last_multitouch = Some(time);
        if (delta.scale - 1.0).abs() > EPSILON {
            self.emit(GestureEvent::Scale {
                factor: delta.scale,
                focus: delta.focus,
            });
        }
        if self.snapshot.rotation_allowed() && delta.rotation.abs() > EPSILON {
            self.emit(GestureEvent::Rotate {
                degrees: delta.rotation,
                focus: delta.focus,
            });
        }
        if self.snapshot.tilt_allowed() && delta.tilt.abs() > EPSILON {
            self.emit(GestureEvent::Tilt {
                degrees: delta.tilt,
            });
        }
    }

    /// Dispatch drag-started; on acceptance `entity` becomes the dragged entity.
    fn start_drag(&mut self, entity: Entity, screen: Point, mode: GestureMode) -> bool {
        self.timer.cancel();
        if let Some(previous) = self.dragged.take() {
            self.emit(GestureEvent::DragCanceled { entity: previous });
        }
        let geo = self.projection.inverse(screen);
        let verdict = self.emit(GestureEvent::DragStarted {
            entity: entity.clone(),
            screen,
            geo,
        });
        if verdict.rejected {
            tracing::debug!(uid = %entity.uid(), "drag start vetoed");
            if let Some(press) = self.press.as_mut() {
                clear_marker(press);
            }
            self.emit(GestureEvent::DragCanceled { entity });
            return false;
        }
        self.dragged = Some(entity);
        self.mode = mode;
        true
    }

    fn continue_drag(&self, screen: Point) {
        let Some(entity) = self.dragged.clone() else {
            tracing::debug!("drag move with no dragged entity");
            return;
        };
        let geo = self.projection.inverse(screen);
        self.emit(GestureEvent::DragContinued {
            entity,
            screen,
            geo,
        });
    }

    fn on_up(&mut self, event: &PointerEvent) {
        if !self.forget_pointer(event.pointer) {
            tracing::trace!(pointer = event.pointer.get(), "release for an untracked pointer");
            return;
        }
        let screen = event.position;
        match self.mode {
            GestureMode::MultiTouch => {
                self.last_multitouch = Some(event.time);
                self.pinch = None;
                if self.pointers.is_empty() {
                    self.mode = GestureMode::Idle;
                }
            }
            GestureMode::Dragging | GestureMode::DragTracking => {
                match self.dragged.take() {
                    Some(entity) => {
                        let geo = self.projection.inverse(screen);
                        self.emit(GestureEvent::DragDropped {
                            entity,
                            screen,
                            geo,
                        });
                    }
                    None => tracing::debug!("drop with no dragged entity"),
                }
                self.finish();
            }
            GestureMode::Pressed => self.release(event),
            GestureMode::Scrolling => {
                if self.is_map_pressed() {
                    let geo = self.projection.inverse(screen);
                    self.emit(GestureEvent::MapRelease { screen, geo });
                }
                self.finish();
            }
            GestureMode::DoubleTapPending => {
                if let Some(PressTarget::Map(geo)) = self.press_target() {
                    self.emit(GestureEvent::MapDoubleTap { screen, geo: *geo });
                }
                self.finish();
            }
            GestureMode::DoubleTapDrag | GestureMode::Suppressed => self.finish(),
            GestureMode::Idle => tracing::debug!("release with no gesture in progress"),
        }
    }

    fn release(&mut self, event: &PointerEvent) {
        let Some(mut press) = self.press.take() else {
            self.finish();
            return;
        };
        clear_marker(&mut press);
        let screen = event.position;
        match press.target {
            PressTarget::Map(geo) => {
                let release_geo = self.projection.inverse(screen);
                self.emit(GestureEvent::MapRelease {
                    screen,
                    geo: release_geo,
                });
                if !press.long_pressed {
                    self.emit(GestureEvent::MapClick { screen, geo });
                    self.taps.record_tap(screen, event.time);
                }
            }
            PressTarget::Entity(entity) => {
                self.emit(GestureEvent::EntityRelease {
                    entity: entity.clone(),
                    screen,
                });
                if !press.long_pressed {
                    self.click_entity(entity, screen, press.geo);
                }
            }
            PressTarget::Ambiguous(candidates) => {
                if !press.long_pressed {
                    let intent = self.tool_intent.unwrap_or(Intent::Select);
                    self.offer_at(intent, candidates, press.origin, press.geo);
                }
            }
            PressTarget::OffMap => tracing::trace!("release of an off-map press"),
        }
        self.finish();
    }

    /// Dispatch a click; an unhandled click is offered to the map as well.
    fn click_entity(&self, entity: Entity, screen: Point, geo: Option<GeoPoint>) {
        let verdict = self.emit(GestureEvent::EntityClick {
            entity,
            screen,
            geo,
        });
        if !verdict.handled
            && let Some(geo) = geo
        {
            tracing::debug!("entity click unhandled; retrying as a map click");
            self.emit(GestureEvent::MapClick { screen, geo });
        }
    }

    fn long_press(&mut self, target: PressTarget, screen: Point, geo: Option<GeoPoint>) {
        match target {
            PressTarget::Map(geo) => {
                self.emit(GestureEvent::MapLongPress { screen, geo });
            }
            PressTarget::OffMap => {}
            PressTarget::Entity(entity) => self.long_press_entity(entity, screen),
            PressTarget::Ambiguous(candidates) => {
                let mut movable: Vec<Entity> =
                    candidates.into_iter().filter(Entity::is_movable).collect();
                if movable.len() > 1 {
                    if let Some(press) = self.press.as_mut() {
                        clear_marker(press);
                    }
                    self.mode = GestureMode::Suppressed;
                    self.offer_at(Intent::Move, movable, screen, geo);
                } else if let Some(entity) = movable.pop() {
                    self.long_press_entity(entity, screen);
                } else if let Some(geo) = geo {
                    self.emit(GestureEvent::MapLongPress { screen, geo });
                }
            }
        }
    }

    fn long_press_entity(&mut self, entity: Entity, screen: Point) {
        self.emit(GestureEvent::EntityLongPress {
            entity: entity.clone(),
            screen,
        });
        if entity.is_movable() && self.mode == GestureMode::Pressed {
            self.timer.arm(self.generation, self.config.drag_promotion_delay);
        }
    }

    /// Offer `candidates` for disambiguation at `screen`.
    ///
    /// Dispatches [`GestureEvent::DeconflictionRequested`] when presented, or
    /// [`GestureEvent::DensityExceeded`] when there are too many candidates.
    pub fn offer(&mut self, intent: Intent, candidates: Vec<Entity>, screen: Point) -> Offer {
        let geo = self.projection.inverse(screen);
        self.offer_at(intent, candidates, screen, geo)
    }

    fn offer_at(
        &mut self,
        intent: Intent,
        candidates: Vec<Entity>,
        screen: Point,
        geo: Option<GeoPoint>,
    ) -> Offer {
        let count = candidates.len();
        let offer = self.coordinator.offer(intent, candidates, screen, geo);
        match offer {
            Offer::Open(id) => {
                self.emit(GestureEvent::DeconflictionRequested {
                    id,
                    intent,
                    candidates: count,
                });
            }
            Offer::Queued(id) => tracing::debug!(id = id.get(), "radial request queued"),
            Offer::DensityExceeded { count, max } => {
                self.emit(GestureEvent::DensityExceeded { count, max });
            }
        }
        offer
    }

    fn present_queued(&mut self) {
        if let Some(id) = self.coordinator.present_queued()
            && let Some(request) = self.coordinator.open_request()
        {
            self.emit(GestureEvent::DeconflictionRequested {
                id,
                intent: request.intent,
                candidates: request.candidates.len(),
            });
        }
    }

    /// Answer deconfliction request `id`; `None` is no selection.
    ///
    /// The choice is replayed with its intent's single-candidate semantics:
    /// press, release and click for [`Intent::Select`], a detail request for
    /// [`Intent::Radial`], and a long press starting a relocate drag for
    /// [`Intent::Move`]. Answers to requests that are no longer open are
    /// ignored.
    pub fn resolve_deconfliction(&mut self, id: RequestId, choice: Option<Entity>) {
        let Some(Resolution { request, choice }) = self.coordinator.resolve(id, choice) else {
            return;
        };
        let screen = request.screen;
        match choice {
            None => tracing::debug!(id = id.get(), "deconfliction ended with no selection"),
            Some(entity) => match request.intent {
                Intent::Select => {
                    entity.set_pressed(true);
                    self.emit(GestureEvent::EntityPress {
                        entity: entity.clone(),
                        screen,
                    });
                    entity.set_pressed(false);
                    self.emit(GestureEvent::EntityRelease {
                        entity: entity.clone(),
                        screen,
                    });
                    self.click_entity(entity, screen, request.geo);
                }
                Intent::Radial => {
                    self.emit(GestureEvent::RadialRequested { entity, screen });
                }
                Intent::Move => self.relocate(entity, screen),
            },
        }
        self.present_queued();
    }

    fn relocate(&mut self, entity: Entity, screen: Point) {
        self.emit(GestureEvent::EntityLongPress {
            entity: entity.clone(),
            screen,
        });
        if !entity.is_movable() {
            tracing::debug!(uid = %entity.uid(), "chosen entity is not movable");
            return;
        }
        if let Some(mut press) = self.press.take() {
            clear_marker(&mut press);
        }
        self.pinch = None;
        if !self.start_drag(entity, screen, GestureMode::DragTracking) {
            self.mode = if self.pointers.is_empty() {
                GestureMode::Idle
            } else {
                GestureMode::Suppressed
            };
        }
    }

    /// The surface for `id` closed. Without a prior answer this is no
    /// selection. Presents a queued radial request, if any.
    pub fn surface_closed(&mut self, id: RequestId) {
        if self.coordinator.close(id) {
            tracing::debug!(id = id.get(), "surface closed without a choice");
        }
        self.present_queued();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Outcome;
    use core::num::NonZeroU64;
    use core::time::Duration;
    use kurbo::Rect;
    use mapstory_index::AffineProjection;
    use std::sync::Mutex;

    fn classifier() -> (GestureClassifier, Arc<Mutex<Vec<GestureEvent>>>) {
        let projection = AffineProjection::new(
            GeoPoint::new(0.0, 0.0),
            10_000.0,
            Rect::new(0.0, 0.0, 400.0, 400.0),
        );
        let classifier = GestureClassifier::new(RootIndex::new(), Arc::new(projection));
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        classifier.subscribe(move |e: &GestureEvent| {
            sink.lock().unwrap().push(e.clone());
            Outcome::Ignored
        });
        (classifier, log)
    }

    fn id(n: u64) -> PointerId {
        NonZeroU64::new(n).unwrap()
    }

    #[test]
    fn pan_after_pinch_waits_for_cooldown() {
        let (mut c, log) = classifier();
        let t0 = Instant::now();
        c.handle(&PointerEvent::down(id(1), Point::new(100.0, 200.0), t0));
        c.handle(&PointerEvent::down(id(2), Point::new(300.0, 200.0), t0));
        c.handle(&PointerEvent::moved(id(2), Point::new(350.0, 200.0), t0));
        c.handle(&PointerEvent::up(id(2), Point::new(350.0, 200.0), t0));
        c.handle(&PointerEvent::up(id(1), Point::new(100.0, 200.0), t0));
        assert_eq!(c.mode(), GestureMode::Idle);

        let t1 = t0 + Duration::from_millis(50);
        c.handle(&PointerEvent::down(id(3), Point::new(200.0, 200.0), t1));
        c.handle(&PointerEvent::moved(id(3), Point::new(250.0, 200.0), t1));
        assert_eq!(c.mode(), GestureMode::Scrolling);
        let t2 = t0 + Duration::from_secs(1);
        c.handle(&PointerEvent::moved(id(3), Point::new(260.0, 200.0), t2));

        let log = log.lock().unwrap();
        let scrolls: Vec<_> = log
            .iter()
            .filter_map(|e| match e {
                GestureEvent::MapScroll { delta } => Some(*delta),
                _ => None,
            })
            .collect();
        assert_eq!(scrolls, vec![kurbo::Vec2::new(10.0, 0.0)]);
        assert!(
            log.iter()
                .any(|e| matches!(e, GestureEvent::Scale { factor, .. } if *factor > 1.0))
        );
    }

    #[test]
    fn rotation_and_tilt_follow_settings() {
        let (mut c, log) = classifier();
        c.settings().update(|s| {
            s.orientation_enabled = false;
            s.tilt = crate::settings::TiltMode::ManuallyDisabled;
        });
        let t0 = Instant::now();
        c.handle(&PointerEvent::down(id(1), Point::new(100.0, 200.0), t0));
        c.handle(&PointerEvent::down(id(2), Point::new(300.0, 200.0), t0));
        // Rotate a quarter turn around the midpoint, then move both up.
        c.handle(&PointerEvent::moved(id(1), Point::new(200.0, 100.0), t0));
        c.handle(&PointerEvent::moved(id(2), Point::new(200.0, 300.0), t0));
        c.handle(&PointerEvent::moved(id(1), Point::new(200.0, 80.0), t0));
        c.handle(&PointerEvent::moved(id(2), Point::new(200.0, 280.0), t0));
        {
            let log = log.lock().unwrap();
            assert!(!log.iter().any(|e| matches!(e, GestureEvent::Rotate { .. })));
            assert!(!log.iter().any(|e| matches!(e, GestureEvent::Tilt { .. })));
        }
        c.cancel();

        c.settings().update(|s| s.free_form_3d = true);
        c.handle(&PointerEvent::down(id(1), Point::new(100.0, 200.0), t0));
        c.handle(&PointerEvent::down(id(2), Point::new(300.0, 200.0), t0));
        c.handle(&PointerEvent::moved(id(2), Point::new(100.0, 400.0), t0));
        // Fingers reported one at a time still read as parallel motion.
        c.handle(&PointerEvent::moved(id(1), Point::new(100.0, 180.0), t0));
        c.handle(&PointerEvent::moved(id(2), Point::new(100.0, 380.0), t0));
        c.handle(&PointerEvent::moved(id(1), Point::new(100.0, 160.0), t0));
        let log = log.lock().unwrap();
        assert!(log.iter().any(|e| matches!(e, GestureEvent::Rotate { .. })));
        assert!(log.iter().any(|e| matches!(e, GestureEvent::Tilt { .. })));
    }

    #[test]
    fn off_map_press_targets_nothing() {
        let (mut c, log) = classifier();
        let t0 = Instant::now();
        c.handle(&PointerEvent::down(id(1), Point::new(-50.0, -50.0), t0));
        assert_eq!(c.press_target(), Some(&PressTarget::OffMap));
        assert!(!c.is_map_pressed());
        c.handle(&PointerEvent::up(id(1), Point::new(-50.0, -50.0), t0));
        assert!(log.lock().unwrap().is_empty());
    }
}
