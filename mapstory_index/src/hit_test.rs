// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hit-test resolution: which visible, clickable entities lie under a point.
//!
//! Resolution runs in three steps:
//!
//! 1. A legacy walk over the tree, skipping invisible groups and subtrees
//!    served by an accelerated collaborator. Each entity gets a broad screen
//!    bounds test and then a precise shape test.
//! 2. Every registered collaborator that supports hit testing is solicited,
//!    and its results are merged without duplicates.
//! 3. Once the result bound is reached, remaining collaborators are skipped.
//!
//! Results are returned in [`hit_test_order`], topmost first.

use core::fmt;
use core::ops::ControlFlow;

use hashbrown::HashSet;
use kurbo::Point;
use mapstory_precise_hit::{HitParams, HitScore, PreciseHitTest};

use crate::entity::{Entity, hit_test_order};
use crate::geo::GeoPoint;
use crate::projection::Projection;
use crate::root::RootIndex;

/// A hit-test request.
#[derive(Clone, Copy)]
pub struct HitQuery<'a> {
    /// Touch position in screen pixels.
    pub screen: Point,
    /// Geodetic position of the touch, `None` when off the map surface.
    pub geo: Option<GeoPoint>,
    /// Upper bound on the number of results.
    pub limit: usize,
    /// Projection used to place entities on screen.
    pub projection: &'a dyn Projection,
    /// Touch tolerances.
    pub params: HitParams,
}

impl fmt::Debug for HitQuery<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HitQuery")
            .field("screen", &self.screen)
            .field("geo", &self.geo)
            .field("limit", &self.limit)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl<'a> HitQuery<'a> {
    /// Query at `screen`, unprojecting it for the geodetic point.
    pub fn new(screen: Point, projection: &'a dyn Projection) -> Self {
        Self {
            screen,
            geo: projection.inverse(screen),
            limit: usize::MAX,
            projection,
            params: HitParams::default(),
        }
    }

    /// Bound the number of results.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set touch tolerances.
    pub fn with_params(mut self, params: HitParams) -> Self {
        self.params = params;
        self
    }
}

/// Precise test of one entity, ignoring flags and group visibility.
pub fn hit_entity(entity: &Entity, query: &HitQuery<'_>) -> Option<HitScore> {
    entity
        .screen_shape(query.projection)?
        .hit_test_screen(query.screen, &query.params)
}

/// Whether `entity` is visible, clickable, and inside an effectively visible group.
pub fn is_pickable(entity: &Entity) -> bool {
    entity.is_visible()
        && entity.is_clickable()
        && entity.group().is_some_and(|g| g.is_effectively_visible())
}

impl RootIndex {
    /// Visible, clickable entities under the query point, topmost first.
    ///
    /// The result never holds duplicates and has at most `query.limit`
    /// entries. When the local walk alone reaches the bound, collaborators
    /// are not consulted.
    pub fn hit_test(&self, query: &HitQuery<'_>) -> Vec<Entity> {
        if query.limit == 0 {
            return Vec::new();
        }
        let mut hits = Vec::new();
        if self.is_visible() {
            let _ = self.walk(&|g| g.is_visible() && !g.is_delegated(), &mut |e| {
                if e.is_visible() && e.is_clickable() && hit_entity(e, query).is_some() {
                    hits.push(e.clone());
                }
                ControlFlow::Continue(())
            });
        }
        hits.sort_by(hit_test_order);
        if hits.len() >= query.limit {
            hits.truncate(query.limit);
            return hits;
        }

        let mut seen: HashSet<_> = hits.iter().map(Entity::serial).collect();
        for collaborator in self.external_collaborators() {
            if !collaborator.supports_hit_test() {
                continue;
            }
            match collaborator.hit_test(query) {
                Ok(found) => {
                    for entity in found {
                        if is_pickable(&entity) && seen.insert(entity.serial()) {
                            hits.push(entity);
                        }
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        collaborator = collaborator.name(),
                        error = %err,
                        "hit-test collaborator failed; skipping"
                    );
                }
            }
            if hits.len() >= query.limit {
                break;
            }
        }
        hits.sort_by(hit_test_order);
        hits.truncate(query.limit);
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Group;
    use crate::projection::AffineProjection;
    use kurbo::Rect;

    fn projection() -> AffineProjection {
        AffineProjection::new(
            GeoPoint::new(0.0, 0.0),
            10_000.0,
            Rect::new(0.0, 0.0, 1000.0, 1000.0),
        )
    }

    fn marker(uid: &str, z: f64) -> Entity {
        Entity::builder(uid)
            .kind("a-f-G")
            .z_order(z)
            .point(0.0, 0.0)
            .build()
            .expect("valid point")
    }

    #[test]
    fn overlapping_entities_come_back_topmost_first() {
        let index = RootIndex::new();
        let layer = Group::new("layer");
        index.add_group(&layer);
        let low = marker("low", 5.0);
        let high = marker("high", 3.0);
        let tie = marker("tie", 5.0);
        layer.add_entity(&low);
        layer.add_entity(&high);
        layer.add_entity(&tie);

        let proj = projection();
        let query = HitQuery::new(Point::new(500.0, 500.0), &proj);
        let hits = index.hit_test(&query);
        assert_eq!(hits, vec![high.clone(), low.clone(), tie]);

        // Idempotent.
        assert_eq!(index.hit_test(&query), hits);
        assert_eq!(index.hit_test(&query.with_limit(1)), vec![high]);
    }

    #[test]
    fn hidden_and_unclickable_entities_are_skipped() {
        let index = RootIndex::new();
        let layer = Group::new("layer");
        index.add_group(&layer);
        let hidden = marker("hidden", 0.0);
        let inert = marker("inert", 0.0);
        let live = marker("live", 0.0);
        for e in [&hidden, &inert, &live] {
            layer.add_entity(e);
        }
        hidden.set_visible(false);
        inert.set_clickable(false);

        let proj = projection();
        let query = HitQuery::new(Point::new(500.0, 500.0), &proj);
        assert_eq!(index.hit_test(&query), vec![live]);

        layer.set_visible(false);
        assert!(index.hit_test(&query).is_empty());
    }

    #[test]
    fn touch_radius_widens_the_pick() {
        let index = RootIndex::new();
        let e = Entity::builder("small")
            .point(0.0, 0.0)
            .icon_radius(4.0)
            .build()
            .expect("valid point");
        index.add_entity(&e);
        let proj = projection();
        let off = Point::new(515.0, 500.0);
        assert!(index.hit_test(&HitQuery::new(off, &proj)).is_empty());
        let wide = HitQuery::new(off, &proj).with_params(HitParams::touch(12.0));
        assert_eq!(index.hit_test(&wide), vec![e]);
    }
}
