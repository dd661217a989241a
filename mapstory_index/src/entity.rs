// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Map entities: identity, ordering, flags, geometry and observers.
//!
//! An [`Entity`] is a cheap, clonable handle. Clones share state; equality is
//! identity. Every entity gets a process-unique [`Serial`] at construction,
//! which is used for container keys and ordering tie-breaks, and an immutable
//! string [`Uid`] used for global lookup once the entity is reachable from a
//! [`RootIndex`](crate::RootIndex).
//!
//! Entity kinds are not a class hierarchy. What an entity can do follows from
//! its [`Geometry`] variant (whether it has a position, a line, an area) and
//! from an optional [`ShapeLink`] tying a handle entity to the shape it edits.

use core::cmp::Ordering;
use core::fmt;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use kurbo::{Circle, Point};
use mapstory_precise_hit::{FilledArea, MarkerIcon, ScreenShape, StrokedPolyline};
use parking_lot::{Mutex, RwLock};

use crate::error::GeometryError;
use crate::geo::{GeoBounds, GeoPoint, METERS_PER_DEGREE};
use crate::group::{Group, GroupInner};
use crate::listeners::{Listeners, SubscriptionId};
use crate::projection::Projection;

/// Z-order given to entities that never set one.
pub const DEFAULT_Z_ORDER: f64 = 0.0;

/// Default icon hit radius for point entities, in pixels.
pub const DEFAULT_ICON_RADIUS: f64 = 12.0;

/// Default stroke half-width for lines and area outlines, in pixels.
pub const DEFAULT_STROKE_HALF_WIDTH: f64 = 2.0;

const CIRCLE_OUTLINE_SEGMENTS: usize = 32;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing id of an entity or group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial(u64);

impl Serial {
    pub(crate) fn next() -> Self {
        Self(NEXT_SERIAL.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Raw value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Immutable, globally unique string identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(Arc<str>);

impl Uid {
    /// Accept `raw` as a UID if it is non-empty and free of whitespace and
    /// control characters.
    pub fn parse(raw: &str) -> Option<Self> {
        let ok = !raw.is_empty() && !raw.chars().any(|c| c.is_whitespace() || c.is_control());
        ok.then(|| Self(Arc::from(raw)))
    }

    /// A fresh random UID.
    pub fn synthetic() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    /// The UID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Uid {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

bitflags! {
    /// Entity flags controlling rendering, picking and gestures.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct EntityFlags: u8 {
        /// Drawn, and eligible for hit testing.
        const VISIBLE       = 0b0000_0001;
        /// Eligible for hit testing.
        const CLICKABLE     = 0b0000_0010;
        /// May be promoted to a drag by a long press or early move.
        const MOVABLE       = 0b0000_0100;
        /// Transient pressed marker, owned by the gesture layer.
        const PRESSED       = 0b0000_1000;
        /// Never offered for deconfliction.
        const NO_DECONFLICT = 0b0001_0000;
    }
}

impl Default for EntityFlags {
    fn default() -> Self {
        Self::VISIBLE | Self::CLICKABLE
    }
}

/// Geodetic geometry of an entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Geometry {
    /// No geometry; the entity is never hit and never near anything.
    #[default]
    None,
    /// A single position drawn as an icon.
    Point(GeoPoint),
    /// An open line.
    Polyline(Vec<GeoPoint>),
    /// A closed area.
    Polygon(Vec<GeoPoint>),
    /// A circle of `radius_m` meters.
    Circle {
        /// Center point.
        center: GeoPoint,
        /// Radius in meters.
        radius_m: f64,
    },
}

impl Geometry {
    /// Check coordinates, radii and vertex counts.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Self::None => Ok(()),
            Self::Point(p) => p.validate(),
            Self::Polyline(points) => validate_vertices("polyline", points, 1),
            Self::Polygon(points) => validate_vertices("polygon", points, 3),
            Self::Circle { center, radius_m } => {
                center.validate()?;
                if !radius_m.is_finite() || *radius_m < 0.0 {
                    return Err(GeometryError::InvalidRadius(*radius_m));
                }
                Ok(())
            }
        }
    }

    /// Single anchor position, for point-like geometry.
    pub fn position(&self) -> Option<GeoPoint> {
        match self {
            Self::Point(p) | Self::Circle { center: p, .. } => Some(*p),
            _ => None,
        }
    }

    /// Whether any geometry is present.
    pub fn has_geometry(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Geodetic bounds, including a circle's radius.
    pub fn bounds(&self) -> Option<GeoBounds> {
        match self {
            Self::None => None,
            Self::Point(p) => Some(GeoBounds::from_point(*p)),
            Self::Polyline(points) | Self::Polygon(points) => GeoBounds::from_points(points),
            Self::Circle { center, radius_m } => {
                Some(GeoBounds::from_point(*center).expanded_by_meters(*radius_m))
            }
        }
    }

    /// Approximate ground distance in meters from `p` to this geometry.
    ///
    /// Zero inside areas. Lines and outlines use a local planar approximation
    /// around `p`, which is fine at the distances touch and proximity queries
    /// care about.
    pub fn distance_to(&self, p: &GeoPoint) -> Option<f64> {
        match self {
            Self::None => None,
            Self::Point(q) => Some(p.distance_to(q)),
            Self::Circle { center, radius_m } => Some((p.distance_to(center) - radius_m).max(0.0)),
            Self::Polyline(points) => polyline_distance(p, points, false),
            Self::Polygon(points) => {
                if polygon_contains(points, p) {
                    Some(0.0)
                } else {
                    polyline_distance(p, points, true)
                }
            }
        }
    }

    /// Whether every coordinate is finite.
    pub fn is_finite(&self) -> bool {
        let finite = |p: &GeoPoint| p.latitude.is_finite() && p.longitude.is_finite();
        match self {
            Self::None => true,
            Self::Point(p) => finite(p),
            Self::Polyline(points) | Self::Polygon(points) => points.iter().all(finite),
            Self::Circle { center, radius_m } => finite(center) && radius_m.is_finite(),
        }
    }

    /// Project to a screen-space shape for precise hit testing.
    ///
    /// Returns `None` when there is no geometry or any vertex fails to project.
    pub fn screen_shape(
        &self,
        projection: &dyn Projection,
        icon_radius: f64,
        half_width: f64,
    ) -> Option<ScreenShape> {
        let project_all = |points: &[GeoPoint]| -> Option<Vec<Point>> {
            points.iter().map(|p| projection.forward(*p)).collect()
        };
        match self {
            Self::None => None,
            Self::Point(p) => Some(ScreenShape::Icon(MarkerIcon {
                center: projection.forward(*p)?,
                radius: icon_radius,
            })),
            Self::Polyline(points) => Some(ScreenShape::Line(StrokedPolyline {
                points: project_all(points)?,
                half_width,
            })),
            Self::Polygon(points) => {
                FilledArea::from_points(&project_all(points)?, half_width).map(ScreenShape::Area)
            }
            Self::Circle { center, radius_m } => {
                let ring = circle_ring(center, *radius_m);
                FilledArea::from_points(&project_all(&ring)?, half_width).map(ScreenShape::Area)
            }
        }
    }
}

fn validate_vertices(
    kind: &'static str,
    points: &[GeoPoint],
    min: usize,
) -> Result<(), GeometryError> {
    if points.len() < min {
        return Err(GeometryError::TooFewVertices {
            kind,
            min,
            got: points.len(),
        });
    }
    points.iter().try_for_each(GeoPoint::validate)
}

/// East/north offset of `q` from `origin`, in meters.
fn local_xy(origin: &GeoPoint, q: &GeoPoint) -> (f64, f64) {
    let x = (q.longitude - origin.longitude) * origin.latitude.to_radians().cos() * METERS_PER_DEGREE;
    let y = (q.latitude - origin.latitude) * METERS_PER_DEGREE;
    (x, y)
}

fn polyline_distance(p: &GeoPoint, points: &[GeoPoint], closed: bool) -> Option<f64> {
    let local: Vec<Point> = points
        .iter()
        .map(|q| {
            let (x, y) = local_xy(p, q);
            Point::new(x, y)
        })
        .collect();
    let (first, last) = (local.first()?, local.last()?);
    if local.len() == 1 {
        return Some(first.distance(Point::ZERO));
    }
    let closing = closed.then_some((*last, *first));
    local
        .windows(2)
        .map(|w| (w[0], w[1]))
        .chain(closing)
        .map(|(a, b)| segment_origin_distance(a, b))
        .min_by(f64::total_cmp)
}

fn segment_origin_distance(a: Point, b: Point) -> f64 {
    let v = b - a;
    let len2 = v.hypot2();
    let t = if len2 > 0.0 {
        (-a.to_vec2()).dot(v) / len2
    } else {
        0.0
    };
    (a + v * t.clamp(0.0, 1.0)).distance(Point::ZERO)
}

/// Even-odd test in lon/lat space.
fn polygon_contains(points: &[GeoPoint], p: &GeoPoint) -> bool {
    let mut inside = false;
    let n = points.len();
    for i in 0..n {
        let a = &points[i];
        let b = &points[(i + n - 1) % n];
        if (a.latitude > p.latitude) != (b.latitude > p.latitude) {
            let t = (p.latitude - a.latitude) / (b.latitude - a.latitude);
            if p.longitude < a.longitude + t * (b.longitude - a.longitude) {
                inside = !inside;
            }
        }
    }
    inside
}

fn circle_ring(center: &GeoPoint, radius_m: f64) -> Vec<GeoPoint> {
    let dlat = radius_m / METERS_PER_DEGREE;
    let dlon = dlat / center.latitude.to_radians().cos().max(1e-6);
    (0..CIRCLE_OUTLINE_SEGMENTS)
        .map(|i| {
            let t = core::f64::consts::TAU * i as f64 / CIRCLE_OUTLINE_SEGMENTS as f64;
            GeoPoint::new(center.latitude + dlat * t.sin(), center.longitude + dlon * t.cos())
        })
        .collect()
}

/// Role of a handle entity relative to the shape it belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LinkRole {
    /// Anchor (center) handle. Deconfliction offers the shape instead.
    Anchor,
    /// Vertex handle. Excluded whenever its shape is excluded.
    Member,
}

/// Ties a handle entity to the shape entity it edits.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShapeLink {
    /// UID of the shape entity.
    pub shape: Uid,
    /// Role of this entity.
    pub role: LinkRole,
}

/// What changed on an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityChange {
    /// Geometry replaced.
    Geometry,
    /// Z-order changed.
    ZOrder,
    /// One or more flags changed.
    Flags,
    /// Title changed.
    Title,
    /// A metadata key changed.
    Meta,
    /// Touch point changed.
    TouchPoint,
    /// Shape link changed.
    Link,
    /// The entity was disposed; no further events follow.
    Disposed,
}

/// Notification delivered to [`Entity::subscribe`] callbacks.
#[derive(Clone, Debug)]
pub struct EntityEvent {
    /// The entity that changed.
    pub entity: Entity,
    /// What changed.
    pub change: EntityChange,
}

#[derive(Clone, Debug)]
pub(crate) struct EntityState {
    pub(crate) kind: String,
    pub(crate) title: String,
    pub(crate) z_order: f64,
    pub(crate) flags: EntityFlags,
    pub(crate) geometry: Geometry,
    pub(crate) meta: BTreeMap<String, String>,
    pub(crate) link: Option<ShapeLink>,
    pub(crate) touch_point: Option<GeoPoint>,
    pub(crate) icon_radius: f64,
    pub(crate) stroke_half_width: f64,
}

impl Default for EntityState {
    fn default() -> Self {
        Self {
            kind: String::new(),
            title: String::new(),
            z_order: DEFAULT_Z_ORDER,
            flags: EntityFlags::default(),
            geometry: Geometry::None,
            meta: BTreeMap::new(),
            link: None,
            touch_point: None,
            icon_radius: DEFAULT_ICON_RADIUS,
            stroke_half_width: DEFAULT_STROKE_HALF_WIDTH,
        }
    }
}

struct EntityInner {
    uid: Uid,
    serial: Serial,
    state: RwLock<EntityState>,
    // Membership lock: held for the whole detach/attach transition.
    owner: Mutex<Weak<GroupInner>>,
    listeners: Listeners<EntityEvent>,
}

/// Shared handle to a map entity.
#[derive(Clone)]
pub struct Entity(Arc<EntityInner>);

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.read();
        f.debug_struct("Entity")
            .field("uid", &self.0.uid)
            .field("serial", &self.0.serial)
            .field("kind", &state.kind)
            .field("z_order", &state.z_order)
            .field("flags", &state.flags)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Entity {}

impl core::hash::Hash for Entity {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.0.serial.hash(state);
    }
}

/// Builder for [`Entity`].
#[derive(Debug)]
pub struct EntityBuilder {
    uid: String,
    state: EntityState,
}

impl EntityBuilder {
    /// Type string, e.g. `a-f-G-U-C`.
    pub fn kind(mut self, kind: impl Into<String>) -> Self {
        self.state.kind = kind.into();
        self
    }

    /// Display title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.state.title = title.into();
        self
    }

    /// Z-order; lower is on top.
    pub fn z_order(mut self, z: f64) -> Self {
        self.state.z_order = z;
        self
    }

    /// Replace all flags.
    pub fn flags(mut self, flags: EntityFlags) -> Self {
        self.state.flags = flags;
        self
    }

    /// Set or clear [`EntityFlags::MOVABLE`].
    pub fn movable(mut self, movable: bool) -> Self {
        self.state.flags.set(EntityFlags::MOVABLE, movable);
        self
    }

    /// Geometry; validated by [`build`](Self::build).
    pub fn geometry(mut self, geometry: Geometry) -> Self {
        self.state.geometry = geometry;
        self
    }

    /// Shorthand for point geometry.
    pub fn point(self, latitude: f64, longitude: f64) -> Self {
        self.geometry(Geometry::Point(GeoPoint::new(latitude, longitude)))
    }

    /// Add a metadata entry.
    pub fn meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.state.meta.insert(key.into(), value.into());
        self
    }

    /// Link this entity to a shape.
    pub fn link(mut self, shape: Uid, role: LinkRole) -> Self {
        self.state.link = Some(ShapeLink { shape, role });
        self
    }

    /// Icon hit radius in pixels.
    pub fn icon_radius(mut self, radius: f64) -> Self {
        self.state.icon_radius = radius;
        self
    }

    /// Stroke half-width in pixels.
    pub fn stroke_half_width(mut self, half_width: f64) -> Self {
        self.state.stroke_half_width = half_width;
        self
    }

    /// Create the entity.
    ///
    /// A malformed UID is replaced by a synthetic one (logged at `warn`).
    pub fn build(self) -> Result<Entity, GeometryError> {
        self.state.geometry.validate()?;
        let uid = Uid::parse(&self.uid).unwrap_or_else(|| {
            let synthetic = Uid::synthetic();
            tracing::warn!(
                requested = %self.uid.escape_debug(),
                substituted = %synthetic,
                "malformed entity uid; using a synthetic one"
            );
            synthetic
        });
        Ok(Entity(Arc::new(EntityInner {
            uid,
            serial: Serial::next(),
            state: RwLock::new(self.state),
            owner: Mutex::new(Weak::new()),
            listeners: Listeners::default(),
        })))
    }
}

impl Entity {
    /// Start building an entity with the given UID.
    pub fn builder(uid: impl Into<String>) -> EntityBuilder {
        EntityBuilder {
            uid: uid.into(),
            state: EntityState::default(),
        }
    }

    /// Unique string id.
    pub fn uid(&self) -> &Uid {
        &self.0.uid
    }

    /// Process-unique serial.
    pub fn serial(&self) -> Serial {
        self.0.serial
    }

    /// Type string.
    pub fn kind(&self) -> String {
        self.0.state.read().kind.clone()
    }

    /// Display title.
    pub fn title(&self) -> String {
        self.0.state.read().title.clone()
    }

    /// Current z-order.
    pub fn z_order(&self) -> f64 {
        self.0.state.read().z_order
    }

    /// Current flags.
    pub fn flags(&self) -> EntityFlags {
        self.0.state.read().flags
    }

    /// Whether [`EntityFlags::VISIBLE`] is set.
    pub fn is_visible(&self) -> bool {
        self.flags().contains(EntityFlags::VISIBLE)
    }

    /// Whether [`EntityFlags::CLICKABLE`] is set.
    pub fn is_clickable(&self) -> bool {
        self.flags().contains(EntityFlags::CLICKABLE)
    }

    /// Whether [`EntityFlags::MOVABLE`] is set.
    pub fn is_movable(&self) -> bool {
        self.flags().contains(EntityFlags::MOVABLE)
    }

    /// Whether [`EntityFlags::PRESSED`] is set.
    pub fn is_pressed(&self) -> bool {
        self.flags().contains(EntityFlags::PRESSED)
    }

    /// Current geometry.
    pub fn geometry(&self) -> Geometry {
        self.0.state.read().geometry.clone()
    }

    /// Anchor position, if the geometry has one.
    pub fn position(&self) -> Option<GeoPoint> {
        self.0.state.read().geometry.position()
    }

    /// Geodetic bounds of the geometry.
    pub fn bounds(&self) -> Option<GeoBounds> {
        self.0.state.read().geometry.bounds()
    }

    /// Ground distance in meters from `p` to the geometry.
    pub fn distance_to(&self, p: &GeoPoint) -> Option<f64> {
        self.0.state.read().geometry.distance_to(p)
    }

    /// Metadata value for `key`.
    pub fn meta(&self, key: &str) -> Option<String> {
        self.0.state.read().meta.get(key).cloned()
    }

    /// Shape link, for handle entities.
    pub fn link(&self) -> Option<ShapeLink> {
        self.0.state.read().link.clone()
    }

    /// Sub-location last touched on this shape.
    pub fn touch_point(&self) -> Option<GeoPoint> {
        self.0.state.read().touch_point
    }

    /// Icon hit radius in pixels.
    pub fn icon_radius(&self) -> f64 {
        self.0.state.read().icon_radius
    }

    /// Owning group, if any.
    pub fn group(&self) -> Option<Group> {
        self.0.owner.lock().upgrade().map(Group)
    }

    /// Screen-space shape under `projection`.
    ///
    /// A point entity linked to a shape is drawn as that shape's handle.
    pub fn screen_shape(&self, projection: &dyn Projection) -> Option<ScreenShape> {
        let state = self.0.state.read();
        let shape = state
            .geometry
            .screen_shape(projection, state.icon_radius, state.stroke_half_width)?;
        Some(match shape {
            ScreenShape::Icon(icon) if state.link.is_some() => {
                ScreenShape::Handle(Circle::new(icon.center, icon.radius))
            }
            other => other,
        })
    }

    /// Set the z-order.
    pub fn set_z_order(&self, z: f64) {
        if self.store_z_order(z) {
            self.notify(EntityChange::ZOrder);
        }
    }

    /// Store the z-order without notifying. Returns whether it changed.
    pub(crate) fn store_z_order(&self, z: f64) -> bool {
        let mut state = self.0.state.write();
        let changed = state.z_order.total_cmp(&z) != Ordering::Equal;
        state.z_order = z;
        changed
    }

    /// Set the title.
    pub fn set_title(&self, title: impl Into<String>) {
        self.0.state.write().title = title.into();
        self.notify(EntityChange::Title);
    }

    /// Set or remove (`None`) a metadata entry.
    pub fn set_meta(&self, key: impl Into<String>, value: Option<String>) {
        {
            let mut state = self.0.state.write();
            let key = key.into();
            match value {
                Some(v) => state.meta.insert(key, v),
                None => state.meta.remove(&key),
            };
        }
        self.notify(EntityChange::Meta);
    }

    /// Replace the geometry.
    ///
    /// Invalid geometry is rejected and the previous geometry is kept.
    pub fn set_geometry(&self, geometry: Geometry) -> Result<(), GeometryError> {
        geometry.validate()?;
        self.0.state.write().geometry = geometry;
        self.notify(EntityChange::Geometry);
        Ok(())
    }

    /// Record the sub-location last touched on this entity.
    pub fn set_touch_point(&self, point: Option<GeoPoint>) -> Result<(), GeometryError> {
        if let Some(p) = &point {
            p.validate()?;
        }
        self.0.state.write().touch_point = point;
        self.notify(EntityChange::TouchPoint);
        Ok(())
    }

    /// Set or clear the shape link.
    pub fn set_link(&self, link: Option<ShapeLink>) {
        self.0.state.write().link = link;
        self.notify(EntityChange::Link);
    }

    /// Set or clear flags. Returns whether anything changed.
    pub fn set_flag(&self, flag: EntityFlags, value: bool) -> bool {
        let changed = {
            let mut state = self.0.state.write();
            let before = state.flags;
            state.flags.set(flag, value);
            before != state.flags
        };
        if changed {
            self.notify(EntityChange::Flags);
        }
        changed
    }

    /// Show or hide the entity.
    ///
    /// Showing an entity also forces its owning group and every ancestor
    /// visible, so it is actually drawn.
    pub fn set_visible(&self, visible: bool) {
        self.set_flag(EntityFlags::VISIBLE, visible);
        if visible && let Some(group) = self.group() {
            group.force_visible_upward();
        }
    }

    /// Set or clear [`EntityFlags::CLICKABLE`].
    pub fn set_clickable(&self, clickable: bool) {
        self.set_flag(EntityFlags::CLICKABLE, clickable);
    }

    /// Set or clear [`EntityFlags::MOVABLE`].
    pub fn set_movable(&self, movable: bool) {
        self.set_flag(EntityFlags::MOVABLE, movable);
    }

    /// Set or clear the transient pressed marker.
    ///
    /// Intended for the gesture layer, which clears it on every exit path.
    pub fn set_pressed(&self, pressed: bool) {
        self.set_flag(EntityFlags::PRESSED, pressed);
    }

    /// Observe changes to this entity.
    pub fn subscribe(
        &self,
        callback: impl Fn(&EntityEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.0.listeners.subscribe(callback)
    }

    /// Stop observing.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.0.listeners.unsubscribe(id)
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.0.listeners.len()
    }

    /// Notify observers one last time and drop them all.
    pub fn dispose(&self) {
        self.notify(EntityChange::Disposed);
        self.0.listeners.clear();
    }

    fn notify(&self, change: EntityChange) {
        if self.0.listeners.is_empty() {
            return;
        }
        self.0.listeners.emit(&EntityEvent {
            entity: self.clone(),
            change,
        });
    }

    pub(crate) fn notify_z_order(&self) {
        self.notify(EntityChange::ZOrder);
    }

    pub(crate) fn owner_slot(&self) -> &Mutex<Weak<GroupInner>> {
        &self.0.owner
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&EntityState) -> R) -> R {
        f(&self.0.state.read())
    }
}

/// Hit-test order: z-order ascending, then serial ascending.
///
/// The first entity in this order is the topmost one under the pointer.
pub fn hit_test_order(a: &Entity, b: &Entity) -> Ordering {
    a.z_order()
        .total_cmp(&b.z_order())
        .then_with(|| a.serial().cmp(&b.serial()))
}

/// Render order: the exact reverse of [`hit_test_order`], bottom first.
pub fn render_order(a: &Entity, b: &Entity) -> Ordering {
    hit_test_order(b, a)
}
