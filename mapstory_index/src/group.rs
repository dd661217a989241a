// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Groups: keyed collections of entities and child groups.
//!
//! ## Membership
//!
//! An entity or group has at most one parent. Adding it somewhere detaches it
//! from wherever it was, as one transition serialized by the member's own
//! membership lock. Lock order is always member first, then container state;
//! no container lock is held while a member lock is taken.
//!
//! ## Notifications
//!
//! Every membership or visibility change is queued on the mutated group while
//! its state lock is held and delivered after the lock is released, so one
//! group's notifications arrive in mutation order. Delivery calls the group's
//! own listeners, then the deep listeners of the group and each ancestor.
//! There is no ordering across groups.

use core::fmt;
use core::ops::ControlFlow;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use hashbrown::HashSet;
use parking_lot::{Mutex, RwLock};

use crate::collaborator::DeepQuery;
use crate::entity::{Entity, Serial};
use crate::geo::GeoPoint;
use crate::listeners::{EventQueue, Listeners, SubscriptionId};
use crate::query::MetaQuery;

/// Membership and visibility notifications.
#[derive(Clone, Debug)]
pub enum GroupEvent {
    /// `entity` became a member of `group`.
    EntityAdded {
        /// The mutated group.
        group: Group,
        /// The added entity.
        entity: Entity,
    },
    /// `entity` left `group`.
    EntityRemoved {
        /// The mutated group.
        group: Group,
        /// The removed entity.
        entity: Entity,
    },
    /// `child` was attached under `parent`.
    GroupAdded {
        /// The mutated group.
        parent: Group,
        /// The attached group.
        child: Group,
    },
    /// `child` was detached from `parent`.
    GroupRemoved {
        /// The mutated group.
        parent: Group,
        /// The detached group.
        child: Group,
    },
    /// `group` changed visibility.
    VisibilityChanged {
        /// The mutated group.
        group: Group,
        /// New visibility.
        visible: bool,
    },
}

#[derive(Debug)]
struct GroupState {
    entities: BTreeMap<Serial, Entity>,
    children: BTreeMap<Serial, Group>,
    visible: bool,
}

pub(crate) struct GroupInner {
    serial: Serial,
    name: String,
    permanent: bool,
    default_z: Option<f64>,
    state: RwLock<GroupState>,
    parent: Mutex<Weak<GroupInner>>,
    listeners: Listeners<GroupEvent>,
    deep_listeners: Listeners<GroupEvent>,
    queue: EventQueue<GroupEvent>,
    deep_query: RwLock<Option<Arc<dyn DeepQuery>>>,
}

/// Shared handle to a group.
#[derive(Clone)]
pub struct Group(pub(crate) Arc<GroupInner>);

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.0.name)
            .field("serial", &self.0.serial)
            .field("permanent", &self.0.permanent)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Group {}

impl core::hash::Hash for Group {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.0.serial.hash(state);
    }
}

/// Builder for [`Group`].
#[derive(Debug)]
pub struct GroupBuilder {
    name: String,
    permanent: bool,
    default_z: Option<f64>,
}

impl GroupBuilder {
    /// A permanent group survives removal from its parent: its contents are
    /// detached and the empty group stays attached.
    pub fn permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    /// Z-order applied to every entity added to this group.
    pub fn default_z_order(mut self, z: f64) -> Self {
        self.default_z = Some(z);
        self
    }

    /// Create the group. It starts detached and visible.
    pub fn build(self) -> Group {
        Group(Arc::new(GroupInner {
            serial: Serial::next(),
            name: self.name,
            permanent: self.permanent,
            default_z: self.default_z,
            state: RwLock::new(GroupState {
                entities: BTreeMap::new(),
                children: BTreeMap::new(),
                visible: true,
            }),
            parent: Mutex::new(Weak::new()),
            listeners: Listeners::default(),
            deep_listeners: Listeners::default(),
            queue: EventQueue::default(),
            deep_query: RwLock::new(None),
        }))
    }
}

fn is_member_of(slot: &Weak<GroupInner>, group: &Group) -> bool {
    core::ptr::eq(slot.as_ptr(), Arc::as_ptr(&group.0))
}

impl Group {
    /// A plain, non-permanent group.
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(name).build()
    }

    /// Start building a group.
    pub fn builder(name: impl Into<String>) -> GroupBuilder {
        GroupBuilder {
            name: name.into(),
            permanent: false,
            default_z: None,
        }
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Process-unique serial.
    pub fn serial(&self) -> Serial {
        self.0.serial
    }

    /// Whether the group is permanent.
    pub fn is_permanent(&self) -> bool {
        self.0.permanent
    }

    /// Parent group, if attached.
    pub fn parent(&self) -> Option<Self> {
        self.0.parent.lock().upgrade().map(Self)
    }

    /// Iterate the parent chain, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = Self> {
        core::iter::successors(self.parent(), Self::parent)
    }

    /// Snapshot of the member entities, in serial order.
    pub fn entities(&self) -> Vec<Entity> {
        self.0.state.read().entities.values().cloned().collect()
    }

    /// Snapshot of the child groups, in serial order.
    pub fn groups(&self) -> Vec<Self> {
        self.0.state.read().children.values().cloned().collect()
    }

    /// Number of member entities.
    pub fn entity_count(&self) -> usize {
        self.0.state.read().entities.len()
    }

    /// Whether `entity` is a direct member.
    pub fn contains_entity(&self, entity: &Entity) -> bool {
        self.0.state.read().entities.contains_key(&entity.serial())
    }

    /// Direct child group named `name`.
    pub fn find_group(&self, name: &str) -> Option<Self> {
        self.0
            .state
            .read()
            .children
            .values()
            .find(|g| g.name() == name)
            .cloned()
    }

    /// Add `entity`, detaching it from any prior group.
    ///
    /// Returns `false` (and does nothing) if it is already a member.
    pub fn add_entity(&self, entity: &Entity) -> bool {
        let mut z_changed = false;
        let previous = {
            let mut owner = entity.owner_slot().lock();
            if is_member_of(&owner, self) {
                return false;
            }
            let previous = owner.upgrade().map(Self);
            if let Some(prev) = &previous {
                let mut state = prev.0.state.write();
                state.entities.remove(&entity.serial());
                prev.0.queue.push(GroupEvent::EntityRemoved {
                    group: prev.clone(),
                    entity: entity.clone(),
                });
                drop(state);
            }
            if let Some(z) = self.0.default_z {
                z_changed = entity.store_z_order(z);
            }
            let mut state = self.0.state.write();
            state.entities.insert(entity.serial(), entity.clone());
            self.0.queue.push(GroupEvent::EntityAdded {
                group: self.clone(),
                entity: entity.clone(),
            });
            drop(state);
            *owner = Arc::downgrade(&self.0);
            previous
        };
        if let Some(prev) = previous {
            prev.flush();
        }
        if z_changed {
            entity.notify_z_order();
        }
        self.flush();
        true
    }

    /// Remove `entity`. Returns `false` for a non-member.
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        {
            let mut owner = entity.owner_slot().lock();
            if !is_member_of(&owner, self) {
                return false;
            }
            let mut state = self.0.state.write();
            state.entities.remove(&entity.serial());
            self.0.queue.push(GroupEvent::EntityRemoved {
                group: self.clone(),
                entity: entity.clone(),
            });
            drop(state);
            *owner = Weak::new();
        }
        self.flush();
        true
    }

    /// Attach `child`, detaching it from any prior parent.
    ///
    /// Refuses (and logs) adding a group beneath itself. Returns whether the
    /// tree changed.
    pub fn add_group(&self, child: &Self) -> bool {
        if child == self || self.ancestors().any(|a| a == *child) {
            tracing::warn!(
                parent = %self.name(),
                child = %child.name(),
                "refusing to add a group beneath itself"
            );
            return false;
        }
        let previous = {
            let mut parent = child.0.parent.lock();
            if is_member_of(&parent, self) {
                return false;
            }
            let previous = parent.upgrade().map(Self);
            if let Some(prev) = &previous {
                let mut state = prev.0.state.write();
                state.children.remove(&child.serial());
                prev.0.queue.push(GroupEvent::GroupRemoved {
                    parent: prev.clone(),
                    child: child.clone(),
                });
                drop(state);
            }
            let mut state = self.0.state.write();
            state.children.insert(child.serial(), child.clone());
            self.0.queue.push(GroupEvent::GroupAdded {
                parent: self.clone(),
                child: child.clone(),
            });
            drop(state);
            *parent = Arc::downgrade(&self.0);
            previous
        };
        if let Some(prev) = previous {
            prev.flush();
        }
        self.flush();
        true
    }

    /// Detach `child`. A permanent child is emptied instead and stays attached.
    ///
    /// Returns `false` if `child` is not a direct child.
    pub fn remove_group(&self, child: &Self) -> bool {
        if child.is_permanent() {
            if !is_member_of(&child.0.parent.lock(), self) {
                return false;
            }
            child.clear();
            return true;
        }
        {
            let mut parent = child.0.parent.lock();
            if !is_member_of(&parent, self) {
                return false;
            }
            let mut state = self.0.state.write();
            state.children.remove(&child.serial());
            self.0.queue.push(GroupEvent::GroupRemoved {
                parent: self.clone(),
                child: child.clone(),
            });
            drop(state);
            *parent = Weak::new();
        }
        self.flush();
        true
    }

    /// Remove every member entity.
    pub fn clear_entities(&self) {
        for entity in self.entities() {
            self.remove_entity(&entity);
        }
    }

    /// Remove every child group (permanent children are emptied instead).
    pub fn clear_groups(&self) {
        for child in self.groups() {
            self.remove_group(&child);
        }
    }

    /// Recursively detach all contents.
    pub fn clear(&self) {
        for child in self.groups() {
            child.clear();
        }
        self.clear_entities();
        self.clear_groups();
    }

    /// First direct member matching `query`, in serial order.
    pub fn find_entity(&self, query: &MetaQuery) -> Option<Entity> {
        self.entities().into_iter().find(|e| query.matches(e))
    }

    /// Every direct member matching `query`.
    pub fn find_entities(&self, query: &MetaQuery) -> Vec<Entity> {
        self.entities()
            .into_iter()
            .filter(|e| query.matches(e))
            .collect()
    }

    /// First match in this subtree: local members first, then child groups.
    pub fn deep_find_entity(&self, query: &MetaQuery) -> Option<Entity> {
        let mut found = None;
        let _ = self.walk(&|_| true, &mut |e| {
            if query.matches(e) {
                found = Some(e.clone());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        found
    }

    /// Every match in this subtree: local members first, then child groups.
    pub fn deep_find_entities(&self, query: &MetaQuery) -> Vec<Entity> {
        let mut found = Vec::new();
        let _ = self.walk(&|_| true, &mut |e| {
            if query.matches(e) {
                found.push(e.clone());
            }
            ControlFlow::Continue(())
        });
        found
    }

    /// Nearest direct member within `threshold_m` meters of `point`.
    ///
    /// Ties go to the lowest serial.
    pub fn find_closest(
        &self,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) -> Option<Entity> {
        let mut best = Closest::default();
        for entity in self.entities() {
            best.offer(&entity, point, threshold_m, query);
        }
        best.into_entity()
    }

    /// Nearest entity in this subtree within `threshold_m` meters of `point`.
    pub fn deep_find_closest(
        &self,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) -> Option<Entity> {
        let mut best = Closest::default();
        let _ = self.walk(&|_| true, &mut |e| {
            best.offer(e, point, threshold_m, query);
            ControlFlow::Continue(())
        });
        best.into_entity()
    }

    /// Every entity in this subtree within `radius_m` meters of `point`.
    pub fn deep_find_within_radius(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        query: &MetaQuery,
    ) -> Vec<Entity> {
        let mut found = Vec::new();
        let _ = self.walk(&|_| true, &mut |e| {
            if within(e, point, radius_m, query) {
                found.push(e.clone());
            }
            ControlFlow::Continue(())
        });
        found
    }

    /// Visit local members, then descend into each child accepted by `descend`.
    pub(crate) fn walk(
        &self,
        descend: &dyn Fn(&Self) -> bool,
        visit: &mut dyn FnMut(&Entity) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let (entities, children) = {
            let state = self.0.state.read();
            (
                state.entities.values().cloned().collect::<Vec<_>>(),
                state.children.values().cloned().collect::<Vec<_>>(),
            )
        };
        for entity in &entities {
            visit(entity)?;
        }
        for child in children.iter().filter(|c| descend(c)) {
            child.walk(descend, visit)?;
        }
        ControlFlow::Continue(())
    }

    /// This group's own visibility flag.
    pub fn is_visible(&self) -> bool {
        self.0.state.read().visible
    }

    /// Whether this group and every ancestor are visible.
    pub fn is_effectively_visible(&self) -> bool {
        self.is_visible() && self.ancestors().all(|g| g.is_visible())
    }

    /// Show or hide this group and all its descendants.
    ///
    /// Showing a group also forces every ancestor visible. Siblings are never
    /// touched.
    pub fn set_visible(&self, visible: bool) {
        self.set_visible_down(visible);
        if visible && let Some(parent) = self.parent() {
            parent.force_visible_upward();
        }
    }

    fn set_visible_down(&self, visible: bool) {
        let children = {
            let mut state = self.0.state.write();
            if state.visible != visible {
                state.visible = visible;
                self.0.queue.push(GroupEvent::VisibilityChanged {
                    group: self.clone(),
                    visible,
                });
            }
            state.children.values().cloned().collect::<Vec<_>>()
        };
        self.flush();
        for child in children {
            child.set_visible_down(visible);
        }
    }

    /// Make this group and every ancestor visible without touching siblings.
    pub(crate) fn force_visible_upward(&self) {
        let mut visited = HashSet::new();
        let mut cursor = Some(self.clone());
        while let Some(group) = cursor {
            if !visited.insert(group.serial()) {
                break;
            }
            {
                let mut state = group.0.state.write();
                if !state.visible {
                    state.visible = true;
                    group.0.queue.push(GroupEvent::VisibilityChanged {
                        group: group.clone(),
                        visible: true,
                    });
                }
            }
            group.flush();
            cursor = group.parent();
        }
    }

    /// Observe changes to this group only.
    pub fn subscribe(
        &self,
        callback: impl Fn(&GroupEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.0.listeners.subscribe(callback)
    }

    /// Observe changes to this group and every descendant.
    pub fn subscribe_deep(
        &self,
        callback: impl Fn(&GroupEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.0.deep_listeners.subscribe(callback)
    }

    /// Remove a callback registered with [`subscribe`](Self::subscribe).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.0.listeners.unsubscribe(id)
    }

    /// Remove a callback registered with [`subscribe_deep`](Self::subscribe_deep).
    pub fn unsubscribe_deep(&self, id: SubscriptionId) -> bool {
        self.0.deep_listeners.unsubscribe(id)
    }

    /// Collaborator answering deep queries for this subtree, if delegated.
    pub fn deep_query(&self) -> Option<Arc<dyn DeepQuery>> {
        self.0.deep_query.read().clone()
    }

    /// Delegate (or stop delegating) deep queries for this subtree.
    ///
    /// A delegated subtree is skipped by the root's own walks; the collaborator
    /// must be registered with the root to be consulted.
    pub fn set_deep_query(&self, collaborator: Option<Arc<dyn DeepQuery>>) {
        *self.0.deep_query.write() = collaborator;
    }

    pub(crate) fn is_delegated(&self) -> bool {
        self.0.deep_query.read().is_some()
    }

    fn flush(&self) {
        self.0.queue.drain(|event| self.deliver(&event));
    }

    fn deliver(&self, event: &GroupEvent) {
        self.0.listeners.emit(event);
        let mut cursor = Some(self.clone());
        while let Some(group) = cursor {
            group.0.deep_listeners.emit(event);
            cursor = group.parent();
        }
    }
}

fn within(entity: &Entity, point: &GeoPoint, radius_m: f64, query: &MetaQuery) -> bool {
    entity
        .distance_to(point)
        .is_some_and(|d| d <= radius_m && query.matches(entity))
}

/// Running minimum by (distance, serial).
#[derive(Default)]
pub(crate) struct Closest {
    best: Option<(f64, Entity)>,
}

impl Closest {
    pub(crate) fn offer(
        &mut self,
        entity: &Entity,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) {
        let Some(d) = entity.distance_to(point) else {
            return;
        };
        if d > threshold_m || !query.matches(entity) {
            return;
        }
        self.offer_scored(d, entity);
    }

    pub(crate) fn offer_scored(&mut self, distance: f64, entity: &Entity) {
        let better = match &self.best {
            None => true,
            Some((bd, be)) => distance
                .total_cmp(bd)
                .then_with(|| entity.serial().cmp(&be.serial()))
                .is_lt(),
        };
        if better {
            self.best = Some((distance, entity.clone()));
        }
    }

    pub(crate) fn into_entity(self) -> Option<Entity> {
        self.best.map(|(_, e)| e)
    }
}
