// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end gesture scenarios against a real index.

use core::num::NonZeroU64;
use core::time::Duration;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use kurbo::{Point, Rect};
use mapstory_gesture::{
    DeconflictionRequest, DisambiguationSurface, GestureClassifier, GestureConfig, GestureEvent,
    GestureMode, Intent, Offer, Outcome, PointerEvent, PointerId, PressTarget, PromotionTick,
    RequestId, SettingsStore,
};
use mapstory_index::{
    AffineProjection, Entity, EntityChange, EntityEvent, GeoPoint, Geometry, HitQuery, LinkRole,
    RootIndex,
};

const CENTER: Point = Point::new(200.0, 200.0);

fn projection() -> AffineProjection {
    AffineProjection::new(
        GeoPoint::new(0.0, 0.0),
        10_000.0,
        Rect::new(0.0, 0.0, 400.0, 400.0),
    )
}

fn finger(n: u64) -> PointerId {
    NonZeroU64::new(n).unwrap()
}

fn unit(uid: &str, z: f64, movable: bool) -> Entity {
    Entity::builder(uid)
        .kind("a-f-G-U-C")
        .z_order(z)
        .movable(movable)
        .point(0.0, 0.0)
        .build()
        .expect("valid point")
}

#[derive(Default)]
struct Surface {
    presented: Mutex<Vec<DeconflictionRequest>>,
}

impl DisambiguationSurface for Surface {
    fn present(&self, request: &DeconflictionRequest) {
        self.presented.lock().unwrap().push(request.clone());
    }

    fn dismiss(&self, _: RequestId) {}
}

struct Harness {
    index: Arc<RootIndex>,
    gestures: GestureClassifier,
    events: Arc<Mutex<Vec<GestureEvent>>>,
    surface: Arc<Surface>,
    t0: Instant,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(GestureConfig::default())
    }

    fn with_config(config: GestureConfig) -> Self {
        let index = RootIndex::new();
        let mut gestures = GestureClassifier::with_config(
            index.clone(),
            Arc::new(projection()),
            config,
            Arc::new(SettingsStore::default()),
        );
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        gestures.subscribe(move |event: &GestureEvent| {
            sink.lock().unwrap().push(event.clone());
            Outcome::Ignored
        });
        let surface = Arc::new(Surface::default());
        gestures.set_surface(Some(surface.clone()));
        Self {
            index,
            gestures,
            events,
            surface,
            t0: Instant::now(),
        }
    }

    fn at(&self, ms: u64) -> Instant {
        self.t0 + Duration::from_millis(ms)
    }

    fn down(&mut self, n: u64, p: Point, ms: u64) {
        let t = self.at(ms);
        self.gestures.handle(&PointerEvent::down(finger(n), p, t));
    }

    fn moved(&mut self, n: u64, p: Point, ms: u64) {
        let t = self.at(ms);
        self.gestures.handle(&PointerEvent::moved(finger(n), p, t));
    }

    fn up(&mut self, n: u64, p: Point, ms: u64) {
        let t = self.at(ms);
        self.gestures.handle(&PointerEvent::up(finger(n), p, t));
    }

    fn tick(&mut self, ms: u64) {
        let t = self.at(ms);
        self.gestures.tick(t);
    }

    fn take(&self) -> Vec<GestureEvent> {
        core::mem::take(&mut *self.events.lock().unwrap())
    }

    fn kinds(&self) -> Vec<&'static str> {
        self.take().iter().map(kind).collect()
    }
}

fn kind(event: &GestureEvent) -> &'static str {
    match event {
        GestureEvent::MapPress { .. } => "map-press",
        GestureEvent::MapRelease { .. } => "map-release",
        GestureEvent::MapClick { .. } => "map-click",
        GestureEvent::MapDoubleTap { .. } => "map-double-tap",
        GestureEvent::MapLongPress { .. } => "map-long-press",
        GestureEvent::MapScroll { .. } => "map-scroll",
        GestureEvent::Scale { .. } => "scale",
        GestureEvent::Rotate { .. } => "rotate",
        GestureEvent::Tilt { .. } => "tilt",
        GestureEvent::DoubleTapZoom { .. } => "double-tap-zoom",
        GestureEvent::EntityPress { .. } => "entity-press",
        GestureEvent::EntityRelease { .. } => "entity-release",
        GestureEvent::EntityClick { .. } => "entity-click",
        GestureEvent::EntityLongPress { .. } => "entity-long-press",
        GestureEvent::RadialRequested { .. } => "radial",
        GestureEvent::DragStarted { .. } => "drag-started",
        GestureEvent::DragContinued { .. } => "drag-continued",
        GestureEvent::DragDropped { .. } => "drag-dropped",
        GestureEvent::DragCanceled { .. } => "drag-canceled",
        GestureEvent::DeconflictionRequested { .. } => "deconfliction",
        GestureEvent::DensityExceeded { .. } => "density-exceeded",
        GestureEvent::GestureCanceled => "canceled",
    }
}

/// Records whether `entity` ever carried the pressed marker.
fn watch_pressed(entity: &Entity) -> Arc<AtomicBool> {
    let seen = Arc::new(AtomicBool::new(false));
    let flag = seen.clone();
    entity.subscribe(move |event: &EntityEvent| {
        if event.change == EntityChange::Flags && event.entity.is_pressed() {
            flag.store(true, Ordering::Relaxed);
        }
    });
    seen
}

#[test]
fn select_choice_taps_only_the_chosen_entity() {
    let mut h = Harness::new();
    let a = unit("a", 1.0, false);
    let b = unit("b", 2.0, false);
    h.index.add_entity(&b);
    h.index.add_entity(&a);
    let a_pressed = watch_pressed(&a);

    // Lower z-order is hit first; hit testing is repeatable.
    let projection = projection();
    let query = HitQuery::new(CENTER, &projection);
    let first = h.index.hit_test(&query);
    assert_eq!(first, vec![a.clone(), b.clone()]);
    assert_eq!(h.index.hit_test(&query), first);

    h.down(1, CENTER, 0);
    assert_eq!(
        h.gestures.press_target(),
        Some(&PressTarget::Ambiguous(vec![a.clone(), b.clone()]))
    );
    assert!(h.gestures.pressed_entity().is_none());
    h.up(1, CENTER, 80);
    assert_eq!(h.kinds(), vec!["deconfliction"]);

    let request = h.surface.presented.lock().unwrap()[0].clone();
    assert_eq!(request.intent, Intent::Select);
    assert_eq!(request.candidates, vec![a.clone(), b.clone()]);

    h.gestures.resolve_deconfliction(request.id, Some(b.clone()));
    let events = h.take();
    assert_eq!(
        events.iter().map(kind).collect::<Vec<_>>(),
        vec!["entity-press", "entity-release", "entity-click", "map-click"]
    );
    assert!(
        events
            .iter()
            .filter_map(GestureEvent::entity)
            .all(|e| *e == b)
    );
    assert!(!a_pressed.load(Ordering::Relaxed));
    assert!(!a.is_pressed() && !b.is_pressed());

    // Answering twice does nothing.
    h.gestures.resolve_deconfliction(request.id, Some(a));
    assert!(h.take().is_empty());
}

#[test]
fn early_move_starts_a_drag_without_arming_the_timer() {
    let mut h = Harness::new();
    let m = unit("m", 0.0, true);
    h.index.add_entity(&m);

    h.down(1, CENTER, 0);
    assert!(m.is_pressed());
    h.tick(200);
    h.moved(1, CENTER + (30.0, 0.0), 200);
    assert_eq!(h.gestures.mode(), GestureMode::Dragging);
    assert!(!h.gestures.is_promotion_armed());
    assert_eq!(h.gestures.dragged_entity(), Some(&m));

    // The long-press deadline passes mid-drag: nothing fires.
    h.tick(600);
    assert!(!h.gestures.is_promotion_armed());
    h.moved(1, CENTER + (40.0, 0.0), 650);
    h.up(1, CENTER + (40.0, 0.0), 700);

    assert_eq!(
        h.kinds(),
        vec![
            "entity-press",
            "drag-started",
            "drag-continued",
            "drag-dropped"
        ]
    );
    assert!(!m.is_pressed());
    assert!(h.gestures.dragged_entity().is_none());
    assert_eq!(h.gestures.mode(), GestureMode::Idle);
}

#[test]
fn long_press_promotes_to_drag_tracking() {
    let mut h = Harness::new();
    let m = unit("m", 0.0, true);
    h.index.add_entity(&m);

    h.down(1, CENTER, 0);
    h.tick(600);
    assert!(h.gestures.is_promotion_armed());
    assert_eq!(h.kinds(), vec!["entity-press", "entity-long-press"]);

    let tick = h
        .gestures
        .promotion_ticks()
        .recv_timeout(Duration::from_secs(5))
        .expect("promotion fires");
    h.gestures.on_promotion(tick);
    assert_eq!(h.gestures.mode(), GestureMode::DragTracking);
    assert!(!h.gestures.is_promotion_armed());

    h.moved(1, CENTER + (5.0, 5.0), 800);
    h.up(1, CENTER + (5.0, 5.0), 900);
    assert_eq!(
        h.kinds(),
        vec!["drag-started", "drag-continued", "drag-dropped"]
    );
    assert!(!m.is_pressed());
    // No click after a long press.
    assert_eq!(h.gestures.mode(), GestureMode::Idle);
}

#[test]
fn cancel_clears_everything_and_stales_the_timer() {
    let mut h = Harness::new();
    let m = unit("m", 0.0, true);
    h.index.add_entity(&m);

    h.down(1, CENTER, 0);
    h.tick(600);
    assert!(h.gestures.is_promotion_armed());
    let generation = h.gestures.generation();

    h.gestures.cancel();
    assert!(!h.gestures.is_promotion_armed());
    assert!(h.gestures.pressed_entity().is_none());
    assert!(!h.gestures.is_map_pressed());
    assert!(h.gestures.press_target().is_none());
    assert!(!m.is_pressed());
    assert_eq!(h.gestures.active_pointers(), 0);

    // A tick that raced the cancel is ignored.
    h.gestures.on_promotion(PromotionTick { generation });
    h.up(1, CENTER, 700);
    assert_eq!(
        h.kinds(),
        vec!["entity-press", "entity-long-press", "canceled"]
    );

    // Canceling while idle is silent.
    h.gestures.cancel();
    assert!(h.take().is_empty());
}

#[test]
fn pressed_entity_and_pressed_map_are_exclusive() {
    let mut h = Harness::new();
    let e = unit("e", 0.0, false);
    h.index.add_entity(&e);

    h.down(1, CENTER, 0);
    assert_eq!(h.gestures.pressed_entity(), Some(&e));
    assert!(!h.gestures.is_map_pressed());
    h.moved(1, CENTER + (2.0, 0.0), 10);
    assert!(!h.gestures.is_map_pressed());
    h.up(1, CENTER, 20);
    assert!(h.gestures.pressed_entity().is_none());

    let empty = Point::new(50.0, 50.0);
    h.down(1, empty, 1_000);
    assert!(h.gestures.is_map_pressed());
    assert!(h.gestures.pressed_entity().is_none());
    let t = h.at(1_010);
    h.gestures.handle(&PointerEvent::cancel(finger(1), empty, t));
    assert!(!h.gestures.is_map_pressed());
    assert!(h.gestures.pressed_entity().is_none());
    assert_eq!(
        h.kinds(),
        vec![
            "entity-press",
            "entity-release",
            "entity-click",
            "map-click",
            "map-press",
            "canceled"
        ]
    );
}

#[test]
fn vetoed_drag_ignores_the_rest_of_the_gesture() {
    let mut h = Harness::new();
    h.gestures.subscribe(|event: &GestureEvent| match event {
        GestureEvent::DragStarted { .. } => Outcome::Rejected,
        _ => Outcome::Ignored,
    });
    let m = unit("m", 0.0, true);
    h.index.add_entity(&m);

    h.down(1, CENTER, 0);
    h.moved(1, CENTER + (30.0, 0.0), 50);
    assert_eq!(h.gestures.mode(), GestureMode::Suppressed);
    assert!(!m.is_pressed());
    h.moved(1, CENTER + (60.0, 0.0), 100);
    h.tick(700);
    h.up(1, CENTER + (60.0, 0.0), 800);
    assert_eq!(
        h.kinds(),
        vec!["entity-press", "drag-started", "drag-canceled"]
    );
    assert!(h.gestures.dragged_entity().is_none());
}

#[test]
fn handled_entity_click_is_not_retried_on_the_map() {
    let mut h = Harness::new();
    let e = unit("e", 0.0, false);
    h.index.add_entity(&e);
    h.gestures.subscribe(|event: &GestureEvent| match event {
        GestureEvent::EntityClick { .. } => Outcome::Handled,
        _ => Outcome::Ignored,
    });

    h.down(1, CENTER, 0);
    h.up(1, CENTER, 50);
    assert_eq!(
        h.kinds(),
        vec!["entity-press", "entity-release", "entity-click"]
    );
}

#[test]
fn too_many_candidates_abandon_the_gesture() {
    let mut h = Harness::with_config(GestureConfig {
        max_deconfliction_candidates: 2,
        ..GestureConfig::default()
    });
    for (i, z) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        h.index.add_entity(&unit(&format!("u{i}"), z, false));
    }

    h.down(1, CENTER, 0);
    h.up(1, CENTER, 50);
    let events = h.take();
    assert_eq!(
        events,
        vec![GestureEvent::DensityExceeded { count: 3, max: 2 }]
    );
    assert!(h.gestures.open_request().is_none());
    assert!(h.surface.presented.lock().unwrap().is_empty());
}

#[test]
fn double_tap_and_double_tap_drag_on_empty_map() {
    let mut h = Harness::new();
    let p = CENTER;

    h.down(1, p, 0);
    h.up(1, p, 50);
    h.down(1, p + (5.0, 0.0), 150);
    assert_eq!(h.gestures.mode(), GestureMode::DoubleTapPending);
    h.up(1, p + (5.0, 0.0), 200);
    assert_eq!(
        h.kinds(),
        vec!["map-press", "map-release", "map-click", "map-double-tap"]
    );

    h.down(1, p, 2_000);
    h.up(1, p, 2_050);
    h.take();
    h.down(1, p, 2_100);
    h.moved(1, p + (0.0, 60.0), 2_150);
    assert_eq!(h.gestures.mode(), GestureMode::DoubleTapDrag);
    // Long press is off while zooming.
    h.tick(3_000);
    h.moved(1, p + (0.0, 30.0), 3_050);
    h.up(1, p + (0.0, 30.0), 3_100);

    let zooms: Vec<f64> = h
        .take()
        .iter()
        .map(|e| match e {
            GestureEvent::DoubleTapZoom { factor, .. } => *factor,
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    assert_eq!(zooms.len(), 2);
    assert!(zooms[0] > 1.0, "dragging down zooms in");
    assert!(zooms[1] < 1.0, "dragging up zooms out");
}

#[test]
fn long_press_over_several_movable_entities_asks_which_to_move() {
    let mut h = Harness::new();
    let a = unit("a", 1.0, true);
    let b = unit("b", 2.0, true);
    h.index.add_entity(&a);
    h.index.add_entity(&b);

    h.down(1, CENTER, 0);
    // The first movable candidate is pressed optimistically.
    assert_eq!(h.gestures.pressed_entity(), Some(&a));
    h.tick(600);
    assert!(!a.is_pressed());
    assert_eq!(h.gestures.mode(), GestureMode::Suppressed);
    let events = h.take();
    let Some(GestureEvent::DeconflictionRequested { id, intent, candidates }) = events.last()
    else {
        panic!("expected a deconfliction request, got {events:?}");
    };
    assert_eq!((*intent, *candidates), (Intent::Move, 2));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, GestureEvent::EntityLongPress { .. }))
    );

    h.gestures.resolve_deconfliction(*id, Some(b.clone()));
    assert_eq!(h.gestures.mode(), GestureMode::DragTracking);
    h.moved(1, CENTER + (20.0, 0.0), 700);
    h.up(1, CENTER + (20.0, 0.0), 800);
    let events = h.take();
    assert_eq!(
        events.iter().map(kind).collect::<Vec<_>>(),
        vec![
            "entity-long-press",
            "drag-started",
            "drag-continued",
            "drag-dropped"
        ]
    );
    assert!(events.iter().filter_map(GestureEvent::entity).all(|e| *e == b));
    assert!(!a.is_pressed() && !b.is_pressed());
}

#[test]
fn radial_request_waits_for_the_open_surface() {
    let mut h = Harness::new();
    let a = unit("a", 1.0, false);
    let b = unit("b", 2.0, false);
    h.index.add_entity(&a);
    h.index.add_entity(&b);

    h.down(1, CENTER, 0);
    h.up(1, CENTER, 50);
    let open = h.gestures.open_request().expect("select request").id;
    h.take();

    let Offer::Queued(radial) =
        h.gestures
            .offer(Intent::Radial, vec![a.clone(), b.clone()], CENTER)
    else {
        panic!("expected the radial request to queue");
    };
    assert!(h.take().is_empty());
    assert_eq!(h.surface.presented.lock().unwrap().len(), 1);

    h.gestures.surface_closed(open);
    assert_eq!(
        h.take(),
        vec![GestureEvent::DeconflictionRequested {
            id: radial,
            intent: Intent::Radial,
            candidates: 2
        }]
    );
    h.gestures.resolve_deconfliction(radial, Some(a.clone()));
    assert_eq!(
        h.take(),
        vec![GestureEvent::RadialRequested {
            entity: a,
            screen: CENTER
        }]
    );
    assert!(h.gestures.open_request().is_none());
}

#[test]
fn anchor_handle_press_targets_its_shape() {
    let mut h = Harness::new();
    let area = Entity::builder("area")
        .kind("u-d-f")
        .geometry(Geometry::Polygon(vec![
            GeoPoint::new(-0.002, -0.002),
            GeoPoint::new(-0.002, 0.002),
            GeoPoint::new(0.002, 0.002),
            GeoPoint::new(0.002, -0.002),
        ]))
        .build()
        .expect("valid polygon");
    let anchor = Entity::builder("area.anchor")
        .kind("handle")
        .point(0.0, 0.0)
        .link(area.uid().clone(), LinkRole::Anchor)
        .build()
        .expect("valid point");
    h.index.add_entity(&area);
    h.index.add_entity(&anchor);

    let touch = CENTER + (3.0, 0.0);
    h.down(1, touch, 0);
    assert_eq!(
        h.gestures.press_target(),
        Some(&PressTarget::Entity(area.clone()))
    );
    assert_eq!(area.touch_point(), projection_inverse(touch));
    h.gestures.cancel();
    assert!(!area.is_pressed());
}

fn projection_inverse(p: Point) -> Option<GeoPoint> {
    use mapstory_index::Projection;
    projection().inverse(p)
}
