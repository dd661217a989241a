// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.

use thiserror::Error;

/// A geometry mutation was rejected; the entity keeps its previous geometry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// A coordinate was NaN or infinite.
    #[error("non-finite coordinate ({latitude}, {longitude})")]
    NonFinite {
        /// Offending latitude.
        latitude: f64,
        /// Offending longitude.
        longitude: f64,
    },
    /// Latitude outside [-90, 90] or longitude outside [-180, 180].
    #[error("coordinate out of range ({latitude}, {longitude})")]
    OutOfRange {
        /// Offending latitude.
        latitude: f64,
        /// Offending longitude.
        longitude: f64,
    },
    /// A radius or width was negative or non-finite.
    #[error("invalid radius {0}")]
    InvalidRadius(f64),
    /// The geometry variant needs more vertices than were supplied.
    #[error("{kind} needs at least {min} vertices, got {got}")]
    TooFewVertices {
        /// Geometry kind name.
        kind: &'static str,
        /// Minimum vertex count.
        min: usize,
        /// Supplied vertex count.
        got: usize,
    },
}

/// A deep-query collaborator failed to answer.
///
/// The root index logs these and treats the collaborator as having returned
/// no results.
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The collaborator raised an error while searching.
    #[error("collaborator `{name}` failed: {reason}")]
    Failed {
        /// Collaborator name, as reported by [`DeepQuery::name`](crate::DeepQuery::name).
        name: String,
        /// Human readable failure reason.
        reason: String,
    },
    /// The collaborator's backing store is not available right now.
    #[error("collaborator `{0}` is unavailable")]
    Unavailable(String),
}
