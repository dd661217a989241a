// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Metadata queries: conjunctions of attribute → pattern terms.

use regex::{Regex, RegexBuilder};

use crate::entity::Entity;

/// Attribute name matching the entity UID.
pub const ATTR_UID: &str = "uid";
/// Attribute name matching the entity type string.
pub const ATTR_TYPE: &str = "type";
/// Attribute name matching the entity title.
pub const ATTR_TITLE: &str = "title";

#[derive(Clone, Debug)]
enum Pattern {
    Exact(String),
    Wildcard(Regex),
}

impl Pattern {
    fn new(raw: &str) -> Self {
        if !raw.contains(['*', '?']) {
            return Self::Exact(raw.to_lowercase());
        }
        let mut re = String::with_capacity(raw.len() + 8);
        re.push('^');
        for c in raw.chars() {
            match c {
                '*' => re.push_str(".*"),
                '?' => re.push('.'),
                c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
            }
        }
        re.push('$');
        match RegexBuilder::new(&re).case_insensitive(true).build() {
            Ok(regex) => Self::Wildcard(regex),
            Err(err) => {
                tracing::debug!(pattern = raw, %err, "wildcard did not compile; matching literally");
                Self::Exact(raw.to_lowercase())
            }
        }
    }

    fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(want) => value.to_lowercase() == *want,
            Self::Wildcard(regex) => regex.is_match(value),
        }
    }
}

/// A conjunction of attribute → pattern terms.
///
/// `uid`, `type` and `title` match the corresponding entity fields; any other
/// attribute matches the metadata entry of that name. A pattern is an exact
/// value or a wildcard (`*` any run, `?` one character), compared
/// case-insensitively. An entity lacking a queried metadata key never matches.
/// The empty query matches everything.
#[derive(Clone, Debug, Default)]
pub struct MetaQuery {
    terms: Vec<(String, Pattern)>,
}

impl MetaQuery {
    /// Match every entity.
    pub fn any() -> Self {
        Self::default()
    }

    /// Match on UID.
    pub fn uid(pattern: &str) -> Self {
        Self::any().and(ATTR_UID, pattern)
    }

    /// Match on type string.
    pub fn kind(pattern: &str) -> Self {
        Self::any().and(ATTR_TYPE, pattern)
    }

    /// Add a term.
    pub fn and(mut self, attribute: &str, pattern: &str) -> Self {
        self.terms.push((attribute.to_owned(), Pattern::new(pattern)));
        self
    }

    /// Whether the query has no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Test an entity against every term.
    pub fn matches(&self, entity: &Entity) -> bool {
        if self.terms.is_empty() {
            return true;
        }
        let uid = entity.uid();
        entity.with_state(|state| {
            self.terms.iter().all(|(attr, pattern)| match attr.as_str() {
                ATTR_UID => pattern.matches(uid.as_str()),
                ATTR_TYPE => pattern.matches(&state.kind),
                ATTR_TITLE => pattern.matches(&state.title),
                key => state.meta.get(key).is_some_and(|v| pattern.matches(v)),
            })
        })
    }
}
