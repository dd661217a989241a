// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Breadcrumb trails.
//!
//! A [`Trail`] stores crumbs in an arena addressed by generational
//! [`CrumbId`]s and threads them oldest → newest with prev/next links. When
//! the trail is full, pushing evicts the oldest crumb. A stale id (its crumb
//! evicted or removed, the slot possibly reused) resolves to nothing.
//!
//! A trail is drawn through an ordinary entity: [`Trail::sync_to`] writes the
//! crumb positions into the entity's polyline geometry.

use std::time::SystemTime;

use crate::entity::{Entity, Geometry};
use crate::error::GeometryError;
use crate::geo::GeoPoint;

/// Generational handle for a crumb.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CrumbId(u32, u32);

impl CrumbId {
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Crumb ids are intentionally 32-bit; trails never hold that many crumbs."
    )]
    const fn new(idx: usize, generation: u32) -> Self {
        Self(idx as u32, generation)
    }

    const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// One recorded position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crumb {
    /// Where.
    pub position: GeoPoint,
    /// When.
    pub time: SystemTime,
}

#[derive(Clone, Debug)]
struct Node {
    crumb: Crumb,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Clone, Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Bounded, ordered arena of crumbs.
#[derive(Clone, Debug)]
pub struct Trail {
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    capacity: usize,
}

impl Trail {
    /// An empty trail holding at most `capacity` crumbs (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of crumbs.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of crumbs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the trail has no crumbs.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append a crumb, evicting the oldest one when full.
    pub fn push(&mut self, crumb: Crumb) -> Result<CrumbId, GeometryError> {
        crumb.position.validate()?;
        if self.len == self.capacity
            && let Some(oldest) = self.head
        {
            self.unlink(oldest);
        }
        let node = Node {
            crumb,
            prev: self.tail,
            next: None,
        };
        let idx = if let Some(idx) = self.free_list.pop() {
            let slot = &mut self.slots[idx];
            slot.generation = slot.generation.wrapping_add(1);
            slot.node = Some(node);
            idx
        } else {
            self.slots.push(Slot {
                generation: 1,
                node: Some(node),
            });
            self.slots.len() - 1
        };
        if let Some(tail) = self.tail.and_then(|t| self.slots[t].node.as_mut()) {
            tail.next = Some(idx);
        }
        self.tail = Some(idx);
        if self.head.is_none() {
            self.head = Some(idx);
        }
        self.len += 1;
        Ok(CrumbId::new(idx, self.slots[idx].generation))
    }

    fn node(&self, id: CrumbId) -> Option<&Node> {
        let slot = self.slots.get(id.idx())?;
        if slot.generation != id.1 {
            return None;
        }
        slot.node.as_ref()
    }

    fn id_of(&self, idx: usize) -> CrumbId {
        CrumbId::new(idx, self.slots[idx].generation)
    }

    fn unlink(&mut self, idx: usize) -> Option<Crumb> {
        let node = self.slots.get_mut(idx)?.node.take()?;
        match node.prev {
            Some(p) => {
                if let Some(prev) = self.slots[p].node.as_mut() {
                    prev.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => {
                if let Some(next) = self.slots[n].node.as_mut() {
                    next.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        self.free_list.push(idx);
        self.len -= 1;
        Some(node.crumb)
    }

    /// The crumb behind `id`, if still present.
    pub fn get(&self, id: CrumbId) -> Option<&Crumb> {
        self.node(id).map(|n| &n.crumb)
    }

    /// Remove a crumb, relinking its neighbors.
    pub fn remove(&mut self, id: CrumbId) -> Option<Crumb> {
        self.node(id)?;
        self.unlink(id.idx())
    }

    /// Oldest crumb.
    pub fn first(&self) -> Option<CrumbId> {
        self.head.map(|i| self.id_of(i))
    }

    /// Newest crumb.
    pub fn last(&self) -> Option<CrumbId> {
        self.tail.map(|i| self.id_of(i))
    }

    /// The crumb recorded after `id`.
    pub fn next(&self, id: CrumbId) -> Option<CrumbId> {
        self.node(id)?.next.map(|i| self.id_of(i))
    }

    /// The crumb recorded before `id`.
    pub fn prev(&self, id: CrumbId) -> Option<CrumbId> {
        self.node(id)?.prev.map(|i| self.id_of(i))
    }

    /// Crumbs, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (CrumbId, &Crumb)> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            let idx = cursor?;
            let node = self.slots[idx].node.as_ref()?;
            cursor = node.next;
            Some((self.id_of(idx), &node.crumb))
        })
    }

    /// Drop every crumb. Outstanding ids become stale.
    pub fn clear(&mut self) {
        while let Some(head) = self.head {
            self.unlink(head);
        }
    }

    /// Crumb positions, oldest first.
    pub fn positions(&self) -> Vec<GeoPoint> {
        self.iter().map(|(_, c)| c.position).collect()
    }

    /// Ground length of the trail in meters.
    pub fn length_m(&self) -> f64 {
        let positions = self.positions();
        positions.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
    }

    /// Write the crumbs into `entity` as polyline geometry (none when empty).
    pub fn sync_to(&self, entity: &Entity) -> Result<(), GeometryError> {
        let geometry = if self.is_empty() {
            Geometry::None
        } else {
            Geometry::Polyline(self.positions())
        };
        entity.set_geometry(geometry)
    }
}
