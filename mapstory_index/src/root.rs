// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The root index: the distinguished root group plus global lookups.
//!
//! The UID map is maintained only from the root's deep notification stream.
//! An entity is removed from the map on a removal notification only if it is
//! no longer reachable from the root, so a move between two attached groups
//! keeps it resolvable throughout.

use core::fmt;
use core::ops::{ControlFlow, Deref};
use std::sync::{Arc, Weak};

use hashbrown::{HashMap, HashSet};
use parking_lot::RwLock;

use crate::collaborator::{DeepQuery, Registry};
use crate::entity::{Entity, Uid};
use crate::error::QueryError;
use crate::geo::GeoPoint;
use crate::group::{Closest, Group, GroupEvent};
use crate::listeners::SubscriptionId;
use crate::query::MetaQuery;

/// Root of the entity tree, with a global UID map and collaborator registry.
///
/// Dereferences to the root [`Group`]. Create one per map surface and pass it
/// around explicitly; there is no global instance.
pub struct RootIndex {
    root: Group,
    uids: RwLock<HashMap<Uid, Entity>>,
    registry: RwLock<Registry>,
    subscription: SubscriptionId,
}

impl fmt::Debug for RootIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootIndex")
            .field("root", &self.root)
            .field("uids", &self.uids.read().len())
            .field("registry", &*self.registry.read())
            .finish_non_exhaustive()
    }
}

impl Deref for RootIndex {
    type Target = Group;

    fn deref(&self) -> &Group {
        &self.root
    }
}

impl Drop for RootIndex {
    fn drop(&mut self) {
        self.root.unsubscribe_deep(self.subscription);
    }
}

fn log_failure(collaborator: &dyn DeepQuery, err: &QueryError) {
    tracing::warn!(
        collaborator = collaborator.name(),
        error = %err,
        "deep query collaborator failed; skipping"
    );
}

impl RootIndex {
    /// An empty index with a permanent root group.
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let root = Group::builder("root").permanent(true).build();
            let weak = weak.clone();
            let subscription = root.subscribe_deep(move |event| {
                if let Some(index) = weak.upgrade() {
                    index.on_event(event);
                }
            });
            let mut registry = Registry::default();
            registry.register(Arc::new(root.clone()), &root);
            Self {
                root,
                uids: RwLock::new(HashMap::new()),
                registry: RwLock::new(registry),
                subscription,
            }
        })
    }

    /// The root group.
    pub fn root(&self) -> &Group {
        &self.root
    }

    fn on_event(&self, event: &GroupEvent) {
        match event {
            GroupEvent::EntityAdded { entity, .. } => self.remember(entity),
            GroupEvent::EntityRemoved { entity, .. } => self.forget(entity),
            GroupEvent::GroupAdded { child, .. } => {
                if self.is_group_attached(child) {
                    self.index_subtree(child);
                }
            }
            GroupEvent::GroupRemoved { child, .. } => {
                if !self.is_group_attached(child) {
                    self.unindex_subtree(child);
                }
            }
            GroupEvent::VisibilityChanged { .. } => {}
        }
    }

    fn remember(&self, entity: &Entity) {
        if self.is_attached(entity) {
            self.uids
                .write()
                .insert(entity.uid().clone(), entity.clone());
        }
    }

    fn forget(&self, entity: &Entity) {
        if self.is_attached(entity) {
            return;
        }
        let mut uids = self.uids.write();
        if uids.get(entity.uid().as_str()) == Some(entity) {
            uids.remove(entity.uid().as_str());
        }
    }

    fn index_subtree(&self, group: &Group) {
        let collaborator = group
            .deep_query()
            .unwrap_or_else(|| Arc::new(group.clone()) as Arc<dyn DeepQuery>);
        self.registry.write().register(collaborator, group);
        for entity in group.entities() {
            self.remember(&entity);
        }
        for child in group.groups() {
            self.index_subtree(&child);
        }
    }

    fn unindex_subtree(&self, group: &Group) {
        self.registry.write().deregister_group(group);
        for entity in group.entities() {
            self.forget(&entity);
        }
        for child in group.groups() {
            self.unindex_subtree(&child);
        }
    }

    /// Whether `group` is the root or a descendant of it.
    pub fn is_group_attached(&self, group: &Group) -> bool {
        *group == self.root || group.ancestors().any(|a| a == self.root)
    }

    /// Whether `entity` is reachable from the root.
    pub fn is_attached(&self, entity: &Entity) -> bool {
        entity.group().is_some_and(|g| self.is_group_attached(&g))
    }

    /// Number of entries in the UID map.
    pub fn uid_count(&self) -> usize {
        self.uids.read().len()
    }

    /// Number of distinct registered non-identity collaborators.
    pub fn collaborator_count(&self) -> usize {
        self.registry.read().external_len()
    }

    /// Record that `collaborator` serves `group`.
    ///
    /// A non-identity collaborator also becomes the group's deep query, so
    /// the root's own walks skip that subtree. Returns `false` if the mapping
    /// already existed.
    pub fn register_collaborator(&self, collaborator: Arc<dyn DeepQuery>, group: &Group) -> bool {
        if collaborator.identity().is_none() {
            group.set_deep_query(Some(Arc::clone(&collaborator)));
        }
        self.registry.write().register(collaborator, group)
    }

    pub(crate) fn external_collaborators(&self) -> Vec<Arc<dyn DeepQuery>> {
        self.registry.read().external()
    }

    /// Look up an entity by UID.
    ///
    /// Consults the UID map first and falls back to a full walk (and every
    /// collaborator) on a miss.
    pub fn resolve_by_uid(&self, uid: &str) -> Option<Entity> {
        if let Some(entity) = self.uids.read().get(uid).cloned() {
            return Some(entity);
        }
        tracing::debug!(uid, "uid map miss; walking the tree");
        let mut found = None;
        let _ = self.root.walk(&|_| true, &mut |e| {
            if e.uid().as_str() == uid {
                found = Some(e.clone());
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if found.is_some() {
            return found;
        }
        for collaborator in self.external_collaborators() {
            match collaborator.deep_find_by_uid(uid) {
                Ok(Some(entity)) => return Some(entity),
                Ok(None) => {}
                Err(err) => log_failure(&*collaborator, &err),
            }
        }
        None
    }

    /// Nearest entity anywhere under the root within `threshold_m` meters.
    ///
    /// Merges the local walk with every registered collaborator. Ties go to
    /// the lowest serial. A failing collaborator is logged and skipped.
    pub fn deep_find_closest(
        &self,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) -> Option<Entity> {
        let mut best = Closest::default();
        let _ = self.root.walk(&|g| !g.is_delegated(), &mut |e| {
            best.offer(e, point, threshold_m, query);
            ControlFlow::Continue(())
        });
        for collaborator in self.external_collaborators() {
            match collaborator.deep_find_closest(point, threshold_m, query) {
                Ok(Some(entity)) => {
                    if let Some(d) = entity.distance_to(point) {
                        best.offer_scored(d, &entity);
                    }
                }
                Ok(None) => {}
                Err(err) => log_failure(&*collaborator, &err),
            }
        }
        best.into_entity()
    }

    /// Every entity under the root within `radius_m` meters, without duplicates.
    ///
    /// Local results come first, then each collaborator's.
    pub fn deep_find_within_radius(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        query: &MetaQuery,
    ) -> Vec<Entity> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let _ = self.root.walk(&|g| !g.is_delegated(), &mut |e| {
            let near = e.distance_to(point).is_some_and(|d| d <= radius_m);
            if near && query.matches(e) && seen.insert(e.serial()) {
                found.push(e.clone());
            }
            ControlFlow::Continue(())
        });
        for collaborator in self.external_collaborators() {
            match collaborator.deep_find_within_radius(point, radius_m, query) {
                Ok(entities) => {
                    for entity in entities {
                        if seen.insert(entity.serial()) {
                            found.push(entity);
                        }
                    }
                }
                Err(err) => log_failure(&*collaborator, &err),
            }
        }
        found
    }
}
