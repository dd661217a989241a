// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Uniform lon/lat grid collaborator.
//!
//! [`SpatialCollaborator`] buckets the geodetic bounds of every entity in the
//! groups it is attached to into fixed-size grid cells, and answers proximity,
//! UID and hit-test queries by touching only the cells around the query. It
//! stays in sync through deep group subscriptions and per-entity geometry
//! subscriptions.
//!
//! The grid is intended for large, fairly uniform layers (tracks, markers
//! from a feed) where the root's linear walk becomes the bottleneck.

use core::fmt;
use std::sync::{Arc, Weak};

use hashbrown::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::collaborator::DeepQuery;
use crate::entity::{Entity, EntityChange, Serial};
use crate::error::QueryError;
use crate::geo::{GeoBounds, GeoPoint};
use crate::group::{Closest, Group, GroupEvent, GroupInner};
use crate::hit_test::{HitQuery, hit_entity, is_pickable};
use crate::listeners::SubscriptionId;
use crate::query::MetaQuery;

type CellKey = (i32, i32);

#[derive(Debug)]
struct GridEntry {
    entity: Entity,
    cells: SmallVec<[CellKey; 4]>,
    // Too large for the grid; listed in `GridState::wide` instead.
    wide: bool,
    subscription: Option<SubscriptionId>,
}

#[derive(Debug, Default)]
struct GridState {
    cells: HashMap<CellKey, SmallVec<[Serial; 8]>>,
    entries: HashMap<Serial, GridEntry>,
    wide: HashSet<Serial>,
    // Widest icon radius or stroke half-width seen, in pixels.
    max_pad_px: f64,
}

/// Grid-backed deep-query collaborator.
///
/// Shared as `Arc<SpatialCollaborator>`; the same allocation is installed as
/// the deep query of every attached group, so the root sees one collaborator.
pub struct SpatialCollaborator {
    name: String,
    cell_degrees: f64,
    grid: RwLock<GridState>,
    attached: Mutex<Vec<(Weak<GroupInner>, SubscriptionId)>>,
}

impl fmt::Debug for SpatialCollaborator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let grid = self.grid.read();
        f.debug_struct("SpatialCollaborator")
            .field("name", &self.name)
            .field("cell_degrees", &self.cell_degrees)
            .field("entries", &grid.entries.len())
            .field("cells", &grid.cells.len())
            .finish_non_exhaustive()
    }
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "Grid cell indices are intentionally i32; out-of-range values are saturated."
)]
fn cell_coord(value: f64, cell: f64) -> i32 {
    (value / cell).floor() as i32
}

/// Entities covering more cells than this are kept off the grid and offered
/// to every query.
const MAX_ENTITY_CELLS: u64 = 1024;

/// Inclusive rectangle of grid cells.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CellRange {
    x0: i32,
    x1: i32,
    y0: i32,
    y1: i32,
}

impl CellRange {
    fn covering(bounds: &GeoBounds, cell: f64) -> Self {
        Self {
            x0: cell_coord(bounds.west, cell),
            x1: cell_coord(bounds.east, cell),
            y0: cell_coord(bounds.south, cell),
            y1: cell_coord(bounds.north, cell),
        }
    }

    fn count(&self) -> u64 {
        let span = |lo: i32, hi: i32| (i64::from(hi) - i64::from(lo) + 1).max(0).unsigned_abs();
        span(self.x0, self.x1).saturating_mul(span(self.y0, self.y1))
    }

    fn contains(&self, (ix, iy): CellKey) -> bool {
        (self.x0..=self.x1).contains(&ix) && (self.y0..=self.y1).contains(&iy)
    }

    fn keys(self) -> impl Iterator<Item = CellKey> {
        (self.x0..=self.x1).flat_map(move |ix| (self.y0..=self.y1).map(move |iy| (ix, iy)))
    }
}

impl SpatialCollaborator {
    /// A grid with square cells of `cell_degrees` on each side.
    pub fn new(name: impl Into<String>, cell_degrees: f64) -> Arc<Self> {
        debug_assert!(cell_degrees > 0.0, "cell size must be strictly positive");
        Arc::new(Self {
            name: name.into(),
            cell_degrees,
            grid: RwLock::new(GridState::default()),
            attached: Mutex::new(Vec::new()),
        })
    }

    /// Take over deep queries for `group` and index its current contents.
    ///
    /// The group's subtree is kept in sync from now on. If the group is
    /// already reachable from a root, also call
    /// [`RootIndex::register_collaborator`](crate::RootIndex::register_collaborator);
    /// otherwise the root registers it when the group is attached.
    pub fn attach(self: &Arc<Self>, group: &Group) {
        group.set_deep_query(Some(Arc::clone(self) as Arc<dyn DeepQuery>));
        for entity in group.deep_find_entities(&MetaQuery::any()) {
            self.insert(&entity);
        }
        let weak = Arc::downgrade(self);
        let subscription = group.subscribe_deep(move |event| {
            let Some(this) = weak.upgrade() else {
                return;
            };
            match event {
                GroupEvent::EntityAdded { entity, .. } => this.insert(entity),
                GroupEvent::EntityRemoved { entity, .. } => this.remove_unless_attached(entity),
                GroupEvent::GroupAdded { child, .. } => {
                    for entity in child.deep_find_entities(&MetaQuery::any()) {
                        this.insert(&entity);
                    }
                }
                GroupEvent::GroupRemoved { child, .. } => {
                    for entity in child.deep_find_entities(&MetaQuery::any()) {
                        this.remove_unless_attached(&entity);
                    }
                }
                GroupEvent::VisibilityChanged { .. } => {}
            }
        });
        self.attached
            .lock()
            .push((Arc::downgrade(&group.0), subscription));
    }

    /// Stop serving `group` and drop its entities from the grid.
    pub fn detach(&self, group: &Group) {
        let subscription = {
            let mut attached = self.attached.lock();
            let pos = attached
                .iter()
                .position(|(g, _)| core::ptr::eq(g.as_ptr(), Arc::as_ptr(&group.0)));
            pos.map(|pos| attached.swap_remove(pos).1)
        };
        if let Some(id) = subscription {
            group.unsubscribe_deep(id);
        }
        group.set_deep_query(None);
        for entity in group.deep_find_entities(&MetaQuery::any()) {
            self.remove_unless_attached(&entity);
        }
    }

    /// Number of indexed entities.
    pub fn len(&self) -> usize {
        self.grid.read().entries.len()
    }

    /// Whether nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn serves(&self, entity: &Entity) -> bool {
        let Some(group) = entity.group() else {
            return false;
        };
        let attached = self.attached.lock();
        core::iter::once(group.clone())
            .chain(group.ancestors())
            .any(|g| {
                attached
                    .iter()
                    .any(|(w, _)| core::ptr::eq(w.as_ptr(), Arc::as_ptr(&g.0)))
            })
    }

    fn remove_unless_attached(&self, entity: &Entity) {
        if !self.serves(entity) {
            self.remove(entity);
        }
    }

    fn insert(self: &Arc<Self>, entity: &Entity) {
        let subscription = self
            .grid
            .write()
            .entries
            .get_mut(&entity.serial())
            .and_then(|e| e.subscription.take());
        // Re-subscribing keeps exactly one geometry subscription per entry.
        if let Some(id) = subscription {
            entity.unsubscribe(id);
        }
        self.reindex(entity);
        let weak = Arc::downgrade(self);
        let id = entity.subscribe(move |event| {
            if event.change != EntityChange::Geometry {
                return;
            }
            if let Some(this) = weak.upgrade() {
                this.reindex(&event.entity);
            }
        });
        if let Some(entry) = self.grid.write().entries.get_mut(&entity.serial()) {
            entry.subscription = Some(id);
        } else {
            entity.unsubscribe(id);
        }
    }

    fn reindex(&self, entity: &Entity) {
        let serial = entity.serial();
        let cell = self.cell_degrees;
        let (bounds, pad) = entity.with_state(|s| {
            (
                s.geometry.bounds(),
                s.icon_radius.max(s.stroke_half_width),
            )
        });
        let mut grid = self.grid.write();
        let subscription = grid.entries.get(&serial).and_then(|e| e.subscription);
        unlink(&mut grid, serial);
        let Some(bounds) = bounds else {
            // Geometry-less entities stay tracked so geometry changes are seen.
            grid.entries.insert(
                serial,
                GridEntry {
                    entity: entity.clone(),
                    cells: SmallVec::new(),
                    wide: false,
                    subscription,
                },
            );
            return;
        };
        let range = CellRange::covering(&bounds, cell);
        let wide = range.count() > MAX_ENTITY_CELLS;
        let cells: SmallVec<[CellKey; 4]> = if wide {
            tracing::trace!(uid = %entity.uid(), cells = range.count(), "entity kept off the grid");
            grid.wide.insert(serial);
            SmallVec::new()
        } else {
            range.keys().collect()
        };
        for key in &cells {
            grid.cells.entry(*key).or_default().push(serial);
        }
        grid.max_pad_px = grid.max_pad_px.max(pad);
        grid.entries.insert(
            serial,
            GridEntry {
                entity: entity.clone(),
                cells,
                wide,
                subscription,
            },
        );
    }

    fn remove(&self, entity: &Entity) {
        let removed = {
            let mut grid = self.grid.write();
            let subscription = grid
                .entries
                .get(&entity.serial())
                .and_then(|e| e.subscription);
            unlink(&mut grid, entity.serial());
            grid.entries.remove(&entity.serial());
            subscription
        };
        if let Some(id) = removed {
            entity.unsubscribe(id);
        }
    }

    /// Candidates whose cells overlap `bounds`, plus every wide entity, in
    /// serial order.
    ///
    /// Walks whichever is smaller: the cells under `bounds`, or the occupied
    /// cells. A query box stretched toward the whole globe therefore costs no
    /// more than a scan of what is indexed.
    fn candidates(&self, bounds: &GeoBounds) -> Vec<Entity> {
        let grid = self.grid.read();
        let range = CellRange::covering(bounds, self.cell_degrees);
        let mut seen: HashSet<Serial> = grid.wide.clone();
        let mut out: Vec<Entity> = grid
            .wide
            .iter()
            .filter_map(|serial| grid.entries.get(serial).map(|e| e.entity.clone()))
            .collect();
        let mut take = |bucket: &SmallVec<[Serial; 8]>| {
            for serial in bucket {
                if seen.insert(*serial)
                    && let Some(entry) = grid.entries.get(serial)
                {
                    out.push(entry.entity.clone());
                }
            }
        };
        let occupied = u64::try_from(grid.cells.len()).unwrap_or(u64::MAX);
        if range.count() > occupied {
            grid.cells
                .iter()
                .filter(|(key, _)| range.contains(**key))
                .for_each(|(_, bucket)| take(bucket));
        } else {
            range
                .keys()
                .filter_map(|key| grid.cells.get(&key))
                .for_each(&mut take);
        }
        out.sort_by_key(Entity::serial);
        out
    }

    fn all(&self) -> Vec<Entity> {
        let grid = self.grid.read();
        let mut out: Vec<Entity> = grid.entries.values().map(|e| e.entity.clone()).collect();
        out.sort_by_key(Entity::serial);
        out
    }
}

fn unlink(grid: &mut GridState, serial: Serial) {
    let Some(entry) = grid.entries.get_mut(&serial) else {
        return;
    };
    if core::mem::take(&mut entry.wide) {
        grid.wide.remove(&serial);
    }
    let cells = core::mem::take(&mut entry.cells);
    for key in cells {
        if let Some(bucket) = grid.cells.get_mut(&key) {
            bucket.retain(|s| *s != serial);
            if bucket.is_empty() {
                // Dropping empty cells keeps the map compact for sparse grids.
                grid.cells.remove(&key);
            }
        }
    }
}

impl DeepQuery for SpatialCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    fn deep_find_closest(
        &self,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) -> Result<Option<Entity>, QueryError> {
        let area = GeoBounds::from_point(*point).expanded_by_meters(threshold_m);
        let mut best = Closest::default();
        for entity in self.candidates(&area) {
            best.offer(&entity, point, threshold_m, query);
        }
        Ok(best.into_entity())
    }

    fn deep_find_within_radius(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        query: &MetaQuery,
    ) -> Result<Vec<Entity>, QueryError> {
        let area = GeoBounds::from_point(*point).expanded_by_meters(radius_m);
        Ok(self
            .candidates(&area)
            .into_iter()
            .filter(|e| e.distance_to(point).is_some_and(|d| d <= radius_m) && query.matches(e))
            .collect())
    }

    fn deep_find_by_uid(&self, uid: &str) -> Result<Option<Entity>, QueryError> {
        let grid = self.grid.read();
        Ok(grid
            .entries
            .values()
            .find(|e| e.entity.uid().as_str() == uid)
            .map(|e| e.entity.clone()))
    }

    fn supports_hit_test(&self) -> bool {
        true
    }

    fn hit_test(&self, query: &HitQuery<'_>) -> Result<Vec<Entity>, QueryError> {
        let pad_px = query.params.touch_radius.max(query.params.stroke_tolerance)
            + self.grid.read().max_pad_px;
        let near = query.geo.zip(query.projection.meters_per_pixel(query.screen));
        let candidates = match near {
            Some((geo, mpp)) => {
                self.candidates(&GeoBounds::from_point(geo).expanded_by_meters(pad_px * mpp))
            }
            None => self.all(),
        };
        Ok(candidates
            .into_iter()
            .filter(|e| is_pickable(e) && hit_entity(e, query).is_some())
            .collect())
    }
}
