//! Route pattern parsing.
//!
//! A pattern is a path template such as `/users/{id}/posts/{post}`. A placeholder always spans a
//! whole segment; a trailing `{*name}` captures the (non-empty) remainder of the path.

use crate::router::RouteError;
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

impl Segment {
    /// Matching priority of the trie, a literal segment is always tried before a placeholder
    fn priority(&self) -> u8 {
        match self {
            Segment::Literal(_) => 2,
            Segment::Param(_) => 1,
            Segment::CatchAll(_) => 0,
        }
    }

    fn same_kind(&self, other: &Segment) -> bool {
        match (self, other) {
            (Segment::Literal(a), Segment::Literal(b)) => a == b,
            (Segment::Param(_), Segment::Param(_)) | (Segment::CatchAll(_), Segment::CatchAll(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    /// # Errors
    /// Returns [`RouteError::InvalidPattern`] when the pattern does not start with `/`, when a
    /// placeholder is malformed, repeated or does not span a whole segment, or when a catch-all
    /// is not the last segment.
    pub fn parse(pattern: impl Into<String>) -> Result<Self, RouteError> {
        let raw = pattern.into();
        let Some(path) = raw.strip_prefix('/') else {
            return Err(RouteError::invalid_pattern(&raw, "must start with '/'"));
        };

        let parts = path.split('/').collect::<Vec<_>>();
        let mut names = HashSet::new();
        let mut segments = Vec::with_capacity(parts.len());

        for (index, part) in parts.iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => match inner.strip_prefix('*') {
                    Some(name) if index + 1 == parts.len() => Segment::CatchAll(check_name(&raw, name)?),
                    Some(_) => return Err(RouteError::invalid_pattern(&raw, "catch-all must be the last segment")),
                    None => Segment::Param(check_name(&raw, inner)?),
                },
                None if part.contains(['{', '}']) => {
                    return Err(RouteError::invalid_pattern(&raw, "a placeholder must span a whole segment"));
                }
                None => Segment::Literal((*part).to_string()),
            };

            if let Segment::Param(name) | Segment::CatchAll(name) = &segment
                && !names.insert(name.clone())
            {
                return Err(RouteError::invalid_pattern(&raw, format!("placeholder '{name}' is declared twice")));
            }
            segments.push(segment);
        }

        Ok(Self { raw, segments })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder names in declaration order
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Param(name) | Segment::CatchAll(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn is_static(&self) -> bool {
        self.segments.iter().all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// The pattern handed to the trie, placeholders are renamed after their segment index so that
    /// `/users/{id}` and `/users/{name}/posts` share the same trie node
    pub(crate) fn matcher_path(&self) -> String {
        let mut path = String::with_capacity(self.raw.len());
        for (index, segment) in self.segments.iter().enumerate() {
            path.push('/');
            match segment {
                Segment::Literal(literal) => path.push_str(literal),
                Segment::Param(_) => path.push_str(&format!("{{{}}}", matcher_key(index))),
                Segment::CatchAll(_) => path.push_str(&format!("{{*{}}}", matcher_key(index))),
            }
        }
        path
    }

    /// `(name, trie key)` of every placeholder in declaration order
    pub(crate) fn matcher_params(&self) -> Vec<(String, String)> {
        self.segments
            .iter()
            .enumerate()
            .filter_map(|(index, segment)| match segment {
                Segment::Param(name) | Segment::CatchAll(name) => Some((name.clone(), matcher_key(index))),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Both patterns match exactly the same paths, placeholder names aside
    pub fn same_shape(&self, other: &RoutePattern) -> bool {
        self.segments.len() == other.segments.len()
            && self.segments.iter().zip(&other.segments).all(|(a, b)| a.same_kind(b))
    }

    /// Some concrete path is matched by both patterns
    pub fn overlaps(&self, other: &RoutePattern) -> bool {
        let len = self.segments.len().max(other.segments.len());
        for index in 0..len {
            match (self.segments.get(index), other.segments.get(index)) {
                (None, None) => return true,
                (Some(Segment::CatchAll(_)), Some(Segment::Literal(literal)))
                | (Some(Segment::Literal(literal)), Some(Segment::CatchAll(_))) => return !literal.is_empty(),
                (Some(Segment::CatchAll(_)), Some(_)) | (Some(_), Some(Segment::CatchAll(_))) => return true,
                (Some(Segment::Literal(a)), Some(Segment::Literal(b))) if a != b => return false,
                (Some(Segment::Param(_)), Some(Segment::Literal(literal)))
                | (Some(Segment::Literal(literal)), Some(Segment::Param(_)))
                    if literal.is_empty() =>
                {
                    return false;
                }
                (Some(_), Some(_)) => {}
                (None, Some(_)) | (Some(_), None) => return false,
            }
        }
        true
    }

    /// Whether the trie would prefer `self` over an `earlier` pattern for a path both match.
    ///
    /// The trie takes the most specific branch at the first segment where two patterns differ,
    /// so a later pattern that is more specific there would win over the earlier registration.
    pub fn shadows(&self, earlier: &RoutePattern) -> bool {
        if !self.overlaps(earlier) {
            return false;
        }

        self.segments
            .iter()
            .zip(&earlier.segments)
            .find(|(a, b)| a.priority() != b.priority())
            .is_some_and(|(a, b)| a.priority() > b.priority())
    }

    /// Index of the segment where the two patterns put a placeholder next to a catch-all.
    ///
    /// The trie can not hold both under the same node, whatever the registration order.
    pub fn param_catch_all_conflict(&self, other: &RoutePattern) -> Option<usize> {
        let (index, (a, b)) =
            self.segments.iter().zip(&other.segments).enumerate().find(|(_, (a, b))| !a.same_kind(b))?;
        match (a, b) {
            (Segment::Param(_), Segment::CatchAll(_)) | (Segment::CatchAll(_), Segment::Param(_)) => Some(index),
            _ => None,
        }
    }
}

impl fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn matcher_key(index: usize) -> String {
    format!("s{index}")
}

fn check_name(pattern: &str, name: &str) -> Result<String, RouteError> {
    if name.is_empty() {
        return Err(RouteError::invalid_pattern(pattern, "empty placeholder name"));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(RouteError::invalid_pattern(pattern, format!("invalid placeholder name '{name}'")));
    }
    Ok(name.to_string())
}
