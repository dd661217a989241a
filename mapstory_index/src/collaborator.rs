// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deep-query collaborators and their registry.
//!
//! A collaborator answers deep queries for the groups it is authoritative
//! for, typically through its own spatial structure. A plain group is its own
//! (identity) collaborator and is served by the root's local walk.

use std::sync::Arc;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::entity::{Entity, Serial};
use crate::error::QueryError;
use crate::geo::GeoPoint;
use crate::group::Group;
use crate::hit_test::HitQuery;
use crate::query::MetaQuery;

/// Answers deep queries for one or more groups.
pub trait DeepQuery: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Nearest match within `threshold_m` meters, ties to the lowest serial.
    fn deep_find_closest(
        &self,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) -> Result<Option<Entity>, QueryError>;

    /// Every match within `radius_m` meters.
    fn deep_find_within_radius(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        query: &MetaQuery,
    ) -> Result<Vec<Entity>, QueryError>;

    /// Entity with exactly this UID.
    fn deep_find_by_uid(&self, uid: &str) -> Result<Option<Entity>, QueryError>;

    /// Whether [`hit_test`](Self::hit_test) is implemented.
    fn supports_hit_test(&self) -> bool {
        false
    }

    /// Visible, clickable entities under the query point.
    fn hit_test(&self, query: &HitQuery<'_>) -> Result<Vec<Entity>, QueryError> {
        let _ = query;
        Ok(Vec::new())
    }

    /// `Some(serial)` when this collaborator is the group with that serial.
    fn identity(&self) -> Option<Serial> {
        None
    }
}

impl DeepQuery for Group {
    fn name(&self) -> &str {
        Self::name(self)
    }

    fn deep_find_closest(
        &self,
        point: &GeoPoint,
        threshold_m: f64,
        query: &MetaQuery,
    ) -> Result<Option<Entity>, QueryError> {
        Ok(Self::deep_find_closest(self, point, threshold_m, query))
    }

    fn deep_find_within_radius(
        &self,
        point: &GeoPoint,
        radius_m: f64,
        query: &MetaQuery,
    ) -> Result<Vec<Entity>, QueryError> {
        Ok(Self::deep_find_within_radius(self, point, radius_m, query))
    }

    fn deep_find_by_uid(&self, uid: &str) -> Result<Option<Entity>, QueryError> {
        Ok(self.deep_find_entity(&MetaQuery::uid(uid)))
    }

    fn identity(&self) -> Option<Serial> {
        Some(self.serial())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum CollaboratorKey {
    Identity(Serial),
    External(usize),
}

impl CollaboratorKey {
    fn of(collaborator: &Arc<dyn DeepQuery>) -> Self {
        match collaborator.identity() {
            Some(serial) => Self::Identity(serial),
            None => Self::External(Arc::as_ptr(collaborator).cast::<()>().addr()),
        }
    }
}

struct Registration {
    collaborator: Arc<dyn DeepQuery>,
    targets: SmallVec<[Group; 2]>,
}

/// Collaborator → groups it is authoritative for.
#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<CollaboratorKey, Registration>,
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("collaborators", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Record that `collaborator` serves `group`. Returns `false` if already recorded.
    pub(crate) fn register(&mut self, collaborator: Arc<dyn DeepQuery>, group: &Group) -> bool {
        let key = CollaboratorKey::of(&collaborator);
        let entry = self.entries.entry(key).or_insert_with(|| Registration {
            collaborator,
            targets: SmallVec::new(),
        });
        if entry.targets.contains(group) {
            return false;
        }
        entry.targets.push(group.clone());
        true
    }

    /// Drop `group` from every mapping; collaborators left without targets go away.
    pub(crate) fn deregister_group(&mut self, group: &Group) {
        self.entries.retain(|_, reg| {
            reg.targets.retain(|g| g != group);
            !reg.targets.is_empty()
        });
    }

    /// Distinct non-identity collaborators.
    pub(crate) fn external(&self) -> Vec<Arc<dyn DeepQuery>> {
        self.entries
            .iter()
            .filter(|(key, _)| matches!(key, CollaboratorKey::External(_)))
            .map(|(_, reg)| Arc::clone(&reg.collaborator))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn external_len(&self) -> usize {
        self.entries
            .keys()
            .filter(|key| matches!(key, CollaboratorKey::External(_)))
            .count()
    }
}
