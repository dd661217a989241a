// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mapstory Index: a hierarchical, thread-safe index of map entities.
//!
//! - [`Entity`]: a geospatial item with a unique UID, a process-unique serial,
//!   a floating-point z-order, flags, and tagged [`Geometry`].
//! - [`Group`]: a keyed collection of entities and child groups with
//!   visibility propagation and ordered add/remove notifications.
//! - [`RootIndex`]: the root group plus a global UID map and a registry of
//!   deep-query collaborators such as the grid-backed [`SpatialCollaborator`].
//! - [`RootIndex::hit_test`]: z-ordered hit testing through a [`Projection`],
//!   with precise shape tests from [`mapstory_precise_hit`].
//! - [`Trail`]: a bounded breadcrumb arena synchronized into polyline geometry.
//!
//! Lower z-order renders on top and is hit first. Ties break on serial, so
//! ordering is total and stable; render order is the exact reverse.
//!
//! # Example
//!
//! ```rust
//! use kurbo::{Point, Rect};
//! use mapstory_index::{AffineProjection, Entity, GeoPoint, Group, HitQuery, RootIndex};
//!
//! let index = RootIndex::new();
//! let layer = Group::new("units");
//! index.add_group(&layer);
//!
//! let unit = Entity::builder("unit-1")
//!     .kind("a-f-G-U-C")
//!     .point(0.0, 0.0)
//!     .build()
//!     .unwrap();
//! layer.add_entity(&unit);
//! assert_eq!(index.resolve_by_uid("unit-1"), Some(unit.clone()));
//!
//! let projection = AffineProjection::new(
//!     GeoPoint::new(0.0, 0.0),
//!     10_000.0,
//!     Rect::new(0.0, 0.0, 800.0, 600.0),
//! );
//! let hits = index.hit_test(&HitQuery::new(Point::new(400.0, 300.0), &projection));
//! assert_eq!(hits, vec![unit]);
//! ```

mod collaborator;
mod entity;
mod error;
mod geo;
mod group;
mod hit_test;
mod listeners;
mod projection;
mod query;
mod root;
mod spatial;
mod trail;

pub use collaborator::DeepQuery;
pub use entity::{
    DEFAULT_ICON_RADIUS, DEFAULT_STROKE_HALF_WIDTH, DEFAULT_Z_ORDER, Entity, EntityBuilder,
    EntityChange, EntityEvent, EntityFlags, Geometry, LinkRole, Serial, ShapeLink, Uid,
    hit_test_order, render_order,
};
pub use error::{GeometryError, QueryError};
pub use geo::{EARTH_RADIUS_M, GeoBounds, GeoPoint, METERS_PER_DEGREE};
pub use group::{Group, GroupBuilder, GroupEvent};
pub use hit_test::{HitQuery, hit_entity, is_pickable};
pub use listeners::{Listeners, SubscriptionId};
pub use projection::{AffineProjection, Projection};
pub use query::{ATTR_TITLE, ATTR_TYPE, ATTR_UID, MetaQuery};
pub use root::RootIndex;
pub use spatial::SpatialCollaborator;
pub use trail::{Crumb, CrumbId, Trail};

pub use mapstory_precise_hit::HitParams;
