// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Choosing among overlapping entities.
//!
//! [`filter_candidates`] turns raw hit-test results into the list a user may
//! choose from. [`DeconflictionCoordinator`] freezes such a list into a
//! [`DeconflictionRequest`], hands it to the host's [`DisambiguationSurface`],
//! and matches the answer back to the request.
//!
//! At most one request is open at a time. A new `Select` or `Move` request
//! replaces the open one; a `Radial` request waits until the open surface
//! closes so surfaces do not flicker.

use core::fmt;
use std::sync::Arc;

use kurbo::Point;
use mapstory_index::{Entity, EntityFlags, GeoPoint, Geometry, LinkRole, Serial};
use smallvec::SmallVec;

/// What a disambiguation choice is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Ordinary tap on the chosen entity.
    Select,
    /// Open the chosen entity's detail surface.
    Radial,
    /// Long press on the chosen entity, starting a relocate drag.
    Move,
}

/// Handle of a [`DeconflictionRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Raw value, for hosts that key their surfaces by it.
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A frozen candidate list awaiting the user's choice.
#[derive(Clone, Debug, PartialEq)]
pub struct DeconflictionRequest {
    /// Handle to answer with.
    pub id: RequestId,
    /// What the choice is for.
    pub intent: Intent,
    /// Candidates in hit-test order.
    pub candidates: Vec<Entity>,
    /// Where the ambiguous touch happened.
    pub screen: Point,
    /// Geodetic position of the touch.
    pub geo: Option<GeoPoint>,
}

/// The host's chooser UI.
///
/// Answers come back through
/// [`GestureClassifier::resolve_deconfliction`](crate::GestureClassifier::resolve_deconfliction),
/// and closing without a choice through
/// [`GestureClassifier::surface_closed`](crate::GestureClassifier::surface_closed).
pub trait DisambiguationSurface: Send + Sync {
    /// Show `request`.
    fn present(&self, request: &DeconflictionRequest);

    /// Withdraw a request that was replaced before it was answered.
    fn dismiss(&self, id: RequestId);
}

fn is_excluded(entity: &Entity) -> bool {
    entity.kind().is_empty() || entity.flags().contains(EntityFlags::NO_DECONFLICT)
}

/// Reduce hit-test results to deconfliction candidates, keeping order.
///
/// - Entities without a type, or flagged [`EntityFlags::NO_DECONFLICT`], are
///   dropped.
/// - An anchor handle is replaced by its shape, so a shape and its handle are
///   never offered separately.
/// - Handles of a shape that is itself dropped are dropped.
///
/// `resolve` looks shapes up by UID, typically
/// [`RootIndex::resolve_by_uid`](mapstory_index::RootIndex::resolve_by_uid).
pub fn filter_candidates(
    hits: &[Entity],
    resolve: impl Fn(&str) -> Option<Entity>,
) -> Vec<Entity> {
    let mut seen: SmallVec<[Serial; 8]> = SmallVec::new();
    let mut out = Vec::with_capacity(hits.len());
    for hit in hits {
        if is_excluded(hit) {
            continue;
        }
        let shape = hit.link().map(|link| (resolve(link.shape.as_str()), link.role));
        let candidate = match shape {
            Some((Some(shape), _)) if is_excluded(&shape) => continue,
            Some((Some(shape), LinkRole::Anchor)) => shape,
            _ => hit.clone(),
        };
        if !seen.contains(&candidate.serial()) {
            seen.push(candidate.serial());
            out.push(candidate);
        }
    }
    out
}

fn is_shape(entity: &Entity) -> bool {
    matches!(
        entity.geometry(),
        Geometry::Polyline(_) | Geometry::Polygon(_) | Geometry::Circle { .. }
    )
}

/// Result of [`DeconflictionCoordinator::offer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Presented now.
    Open(RequestId),
    /// Waiting for the open surface to close.
    Queued(RequestId),
    /// Too many candidates; nothing was offered.
    DensityExceeded {
        /// Candidates found.
        count: usize,
        /// Configured maximum.
        max: usize,
    },
}

/// The answer to an open request.
#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    /// The request that was answered.
    pub request: DeconflictionRequest,
    /// The chosen candidate, `None` for no selection.
    pub choice: Option<Entity>,
}

#[derive(Debug)]
struct OpenRequest {
    request: DeconflictionRequest,
    // Touch points of shape candidates at the moment of ambiguity.
    touch_points: Vec<(Entity, Option<GeoPoint>)>,
}

/// Tracks the open and queued disambiguation requests.
pub struct DeconflictionCoordinator {
    surface: Option<Arc<dyn DisambiguationSurface>>,
    max_candidates: usize,
    next_id: u64,
    open: Option<OpenRequest>,
    queued: Option<DeconflictionRequest>,
}

impl fmt::Debug for DeconflictionCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeconflictionCoordinator")
            .field("has_surface", &self.surface.is_some())
            .field("max_candidates", &self.max_candidates)
            .field("open", &self.open_request().map(|r| r.id))
            .field("queued", &self.queued.as_ref().map(|r| r.id))
            .finish_non_exhaustive()
    }
}

impl DeconflictionCoordinator {
    /// A coordinator offering at most `max_candidates` at once.
    pub fn new(max_candidates: usize) -> Self {
        Self {
            surface: None,
            max_candidates,
            next_id: 1,
            open: None,
            queued: None,
        }
    }

    /// Install or remove the chooser UI.
    pub fn set_surface(&mut self, surface: Option<Arc<dyn DisambiguationSurface>>) {
        self.surface = surface;
    }

    /// The request currently presented.
    pub fn open_request(&self) -> Option<&DeconflictionRequest> {
        self.open.as_ref().map(|o| &o.request)
    }

    /// The radial request waiting for the open surface to close.
    pub fn queued_request(&self) -> Option<&DeconflictionRequest> {
        self.queued.as_ref()
    }

    /// Freeze `candidates` into a request and present or queue it.
    ///
    /// Shape candidates get `geo` as their touch point, which is restored on
    /// the chosen entity when the answer arrives.
    pub fn offer(
        &mut self,
        intent: Intent,
        candidates: Vec<Entity>,
        screen: Point,
        geo: Option<GeoPoint>,
    ) -> Offer {
        if candidates.len() > self.max_candidates {
            tracing::debug!(
                count = candidates.len(),
                max = self.max_candidates,
                "too many candidates to deconflict"
            );
            return Offer::DensityExceeded {
                count: candidates.len(),
                max: self.max_candidates,
            };
        }
        let id = RequestId(self.next_id);
        self.next_id += 1;
        let request = DeconflictionRequest {
            id,
            intent,
            candidates,
            screen,
            geo,
        };
        if intent == Intent::Radial && self.open.is_some() {
            if let Some(dropped) = self.queued.replace(request) {
                tracing::debug!(id = dropped.id.0, "queued radial request superseded");
            }
            return Offer::Queued(id);
        }
        if let Some(old) = self.open.take() {
            tracing::debug!(old = old.request.id.0, new = id.0, "replacing open request");
            if let Some(surface) = &self.surface {
                surface.dismiss(old.request.id);
            }
        }
        self.present(request);
        Offer::Open(id)
    }

    fn present(&mut self, request: DeconflictionRequest) {
        let mut touch_points = Vec::new();
        for candidate in request.candidates.iter().filter(|c| is_shape(c)) {
            if let Some(geo) = request.geo
                && let Err(err) = candidate.set_touch_point(Some(geo))
            {
                tracing::debug!(uid = %candidate.uid(), error = %err, "touch point not recorded");
            }
            touch_points.push((candidate.clone(), candidate.touch_point()));
        }
        tracing::debug!(
            id = request.id.0,
            intent = ?request.intent,
            candidates = request.candidates.len(),
            "presenting deconfliction request"
        );
        if let Some(surface) = &self.surface {
            surface.present(&request);
        }
        self.open = Some(OpenRequest {
            request,
            touch_points,
        });
    }

    /// Match an answer to the open request.
    ///
    /// Returns `None` for an answer to a request that is no longer open. A
    /// choice that was not among the candidates counts as no selection.
    pub fn resolve(&mut self, id: RequestId, choice: Option<Entity>) -> Option<Resolution> {
        if self.open_request().map(|r| r.id) != Some(id) {
            tracing::debug!(id = id.0, "ignoring answer to a closed request");
            return None;
        }
        let open = self.open.take()?;
        let choice = choice.filter(|c| {
            let known = open.request.candidates.contains(c);
            if !known {
                tracing::debug!(uid = %c.uid(), "choice was not a candidate");
            }
            known
        });
        if let Some(chosen) = &choice
            && let Some((_, touch)) = open.touch_points.iter().find(|(e, _)| e == chosen)
            && let Err(err) = chosen.set_touch_point(*touch)
        {
            tracing::debug!(uid = %chosen.uid(), error = %err, "touch point not restored");
        }
        Some(Resolution {
            request: open.request,
            choice,
        })
    }

    /// The surface for `id` closed. Returns whether it was the open request.
    pub fn close(&mut self, id: RequestId) -> bool {
        if self.open_request().map(|r| r.id) == Some(id) {
            self.open = None;
            true
        } else {
            false
        }
    }

    /// Present the queued radial request if nothing is open.
    pub fn present_queued(&mut self) -> Option<RequestId> {
        if self.open.is_some() {
            return None;
        }
        let request = self.queued.take()?;
        let id = request.id;
        self.present(request);
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mapstory_index::{ShapeLink, Uid};
    use std::sync::Mutex;

    fn typed(uid: &str) -> Entity {
        Entity::builder(uid)
            .kind("a-f-G")
            .point(0.0, 0.0)
            .build()
            .expect("valid point")
    }

    fn handle(uid: &str, shape: &Entity, role: LinkRole) -> Entity {
        Entity::builder(uid)
            .kind("handle")
            .point(0.0, 0.0)
            .link(shape.uid().clone(), role)
            .build()
            .expect("valid point")
    }

    fn shape(uid: &str) -> Entity {
        Entity::builder(uid)
            .kind("u-d-f")
            .geometry(Geometry::Polygon(vec![
                GeoPoint::new(-0.001, -0.001),
                GeoPoint::new(-0.001, 0.001),
                GeoPoint::new(0.001, 0.0),
            ]))
            .build()
            .expect("valid polygon")
    }

    #[test]
    fn filtering_drops_untyped_and_flagged_entities() {
        let untyped = Entity::builder("untyped")
            .point(0.0, 0.0)
            .build()
            .expect("valid point");
        let flagged = typed("flagged");
        flagged.set_flag(EntityFlags::NO_DECONFLICT, true);
        let kept = typed("kept");
        let out = filter_candidates(&[untyped, flagged, kept.clone()], |_| None);
        assert_eq!(out, vec![kept]);
    }

    #[test]
    fn anchor_is_replaced_by_its_shape_once() {
        let area = shape("area");
        let anchor = handle("anchor", &area, LinkRole::Anchor);
        let other = typed("other");
        let shapes = [area.clone()];
        let resolve = |uid: &str| shapes.iter().find(|s| s.uid().as_str() == uid).cloned();
        let out = filter_candidates(&[anchor, other.clone(), area.clone()], resolve);
        assert_eq!(out, vec![area, other]);
    }

    #[test]
    fn members_of_excluded_shapes_are_dropped() {
        let area = shape("area");
        area.set_flag(EntityFlags::NO_DECONFLICT, true);
        let vertex = handle("vertex", &area, LinkRole::Member);
        let anchor = handle("anchor", &area, LinkRole::Anchor);
        let shapes = [area.clone()];
        let resolve = |uid: &str| shapes.iter().find(|s| s.uid().as_str() == uid).cloned();
        assert!(filter_candidates(&[vertex.clone(), anchor, area], resolve).is_empty());

        // An unresolvable shape leaves the handle as is.
        let orphan = Entity::builder("orphan")
            .kind("handle")
            .point(0.0, 0.0)
            .link(Uid::parse("gone").expect("valid uid"), LinkRole::Anchor)
            .build()
            .expect("valid point");
        assert_eq!(filter_candidates(&[orphan.clone()], |_| None), vec![orphan]);
        assert_eq!(
            vertex.link(),
            Some(ShapeLink {
                shape: Uid::parse("area").expect("valid uid"),
                role: LinkRole::Member
            })
        );
    }

    #[derive(Default)]
    struct Recorder {
        presented: Mutex<Vec<RequestId>>,
        dismissed: Mutex<Vec<RequestId>>,
    }

    impl DisambiguationSurface for Recorder {
        fn present(&self, request: &DeconflictionRequest) {
            self.presented.lock().unwrap().push(request.id);
        }

        fn dismiss(&self, id: RequestId) {
            self.dismissed.lock().unwrap().push(id);
        }
    }

    #[test]
    fn radial_waits_for_the_open_surface() {
        let surface = Arc::new(Recorder::default());
        let mut coordinator = DeconflictionCoordinator::new(4);
        coordinator.set_surface(Some(surface.clone()));
        let a = typed("a");
        let b = typed("b");

        let Offer::Open(first) =
            coordinator.offer(Intent::Select, vec![a.clone(), b.clone()], Point::ZERO, None)
        else {
            panic!("expected an open request");
        };
        let Offer::Queued(radial) =
            coordinator.offer(Intent::Radial, vec![a.clone(), b.clone()], Point::ZERO, None)
        else {
            panic!("expected a queued request");
        };
        assert_eq!(*surface.presented.lock().unwrap(), vec![first]);

        assert!(coordinator.present_queued().is_none());
        assert!(coordinator.close(first));
        assert_eq!(coordinator.present_queued(), Some(radial));
        assert_eq!(*surface.presented.lock().unwrap(), vec![first, radial]);

        // A select replaces the open radial outright.
        let Offer::Open(second) = coordinator.offer(Intent::Select, vec![a, b], Point::ZERO, None)
        else {
            panic!("expected an open request");
        };
        assert_eq!(*surface.dismissed.lock().unwrap(), vec![radial]);
        assert_eq!(coordinator.open_request().map(|r| r.id), Some(second));
    }

    #[test]
    fn density_limit_and_stale_answers() {
        let mut coordinator = DeconflictionCoordinator::new(1);
        let a = typed("a");
        let b = typed("b");
        assert_eq!(
            coordinator.offer(Intent::Select, vec![a.clone(), b.clone()], Point::ZERO, None),
            Offer::DensityExceeded { count: 2, max: 1 }
        );
        assert!(coordinator.open_request().is_none());

        let Offer::Open(id) = coordinator.offer(Intent::Move, vec![a.clone()], Point::ZERO, None)
        else {
            panic!("expected an open request");
        };
        // Not a candidate: no selection.
        let resolution = coordinator.resolve(id, Some(b)).expect("open request");
        assert_eq!(resolution.choice, None);
        assert!(coordinator.resolve(id, Some(a)).is_none());
    }

    #[test]
    fn chosen_shape_gets_its_touch_point_back() {
        let mut coordinator = DeconflictionCoordinator::new(4);
        let area = shape("area");
        let other = typed("other");
        let touch = GeoPoint::new(0.0002, 0.0001);
        let Offer::Open(id) = coordinator.offer(
            Intent::Select,
            vec![area.clone(), other],
            Point::ZERO,
            Some(touch),
        ) else {
            panic!("expected an open request");
        };
        assert_eq!(area.touch_point(), Some(touch));
        // Something else touches the shape meanwhile.
        area.set_touch_point(Some(GeoPoint::new(0.0, 0.0)))
            .expect("valid point");
        let resolution = coordinator.resolve(id, Some(area.clone())).expect("open");
        assert_eq!(resolution.choice, Some(area.clone()));
        assert_eq!(area.touch_point(), Some(touch));
    }
}
