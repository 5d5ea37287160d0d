//! Structural addressing of tree positions.
//!
//! A [`Path`] is an ordered list of segments walked from the document root.
//! Integer segments are sibling ranks, string segments name a fixed attribute
//! slot (a document's `title` and `body`). Paths are plain values: they are
//! compared, hashed and shifted, never dereferenced on their own.
//!
//! On the wire a path is a JSON array mixing numbers and strings:
//! `["body", 2]`. For logs it displays as `/body/2`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One step of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// Sibling rank among an element's positional children.
    Index(usize),
    /// Named attribute slot holding a single child node.
    Key(String),
}

impl PathSegment {
    /// The sibling rank, if this is an index segment.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathSegment::Index(i) => Some(*i),
            PathSegment::Key(_) => None,
        }
    }

    /// The slot name, if this is a key segment.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            PathSegment::Index(_) => None,
            PathSegment::Key(k) => Some(k),
        }
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

impl From<&str> for PathSegment {
    fn from(k: &str) -> Self {
        PathSegment::Key(k.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(k: String) -> Self {
        PathSegment::Key(k)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => write!(f, "{k}"),
        }
    }
}

/// Location of a node, relative to the document root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    /// The empty path (the root itself).
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The final segment (the addressed node's own slot or rank).
    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Path of the parent, or `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// A new path one level deeper.
    pub fn child(&self, segment: impl Into<PathSegment>) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn push(&mut self, segment: impl Into<PathSegment>) {
        self.0.push(segment.into());
    }

    /// Replace the final segment.
    pub fn with_last(&self, segment: impl Into<PathSegment>) -> Path {
        let mut segments = self.0.clone();
        segments.pop();
        segments.push(segment.into());
        Self(segments)
    }

    /// True when `self` is a strict prefix of `other`.
    pub fn is_ancestor_of(&self, other: &Path) -> bool {
        self.0.len() < other.0.len() && other.0.starts_with(&self.0)
    }

    /// Re-point `target` after `count_delta` siblings were inserted (positive)
    /// or removed (negative) at `base`.
    ///
    /// Only targets under `base`'s parent whose rank at `base`'s depth is at or
    /// after `base`'s rank move. Key segments never move. A removal never moves
    /// a target before `base`'s own rank: positions inside the removed run
    /// collapse onto the removal point.
    pub fn transform(base: &Path, target: &Path, count_delta: isize) -> Path {
        let depth = base.0.len();
        if depth == 0 || depth > target.0.len() {
            return target.clone();
        }
        if base.0[..depth - 1] != target.0[..depth - 1] {
            return target.clone();
        }
        let (PathSegment::Index(base_rank), PathSegment::Index(target_rank)) =
            (&base.0[depth - 1], &target.0[depth - 1])
        else {
            return target.clone();
        };
        if target_rank < base_rank {
            return target.clone();
        }

        let shifted = (*target_rank as isize + count_delta).max(*base_rank as isize) as usize;
        let mut segments = target.0.clone();
        segments[depth - 1] = PathSegment::Index(shifted);
        Self(segments)
    }
}

impl From<Vec<PathSegment>> for Path {
    fn from(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }
}

impl FromIterator<PathSegment> for Path {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for seg in &self.0 {
            write!(f, "/{seg}")?;
        }
        Ok(())
    }
}

/// Error parsing a path from its `/a/0/b` display form.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathParseError {
    #[error("path must start with '/': {0:?}")]
    MissingLeadingSlash(String),
    #[error("empty segment in path {0:?}")]
    EmptySegment(String),
}

impl FromStr for Path {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(PathParseError::MissingLeadingSlash(s.to_string()));
        };
        if rest.is_empty() {
            return Ok(Path::root());
        }
        rest.split('/')
            .map(|seg| {
                if seg.is_empty() {
                    Err(PathParseError::EmptySegment(s.to_string()))
                } else if let Ok(i) = seg.parse::<usize>() {
                    Ok(PathSegment::Index(i))
                } else {
                    Ok(PathSegment::Key(seg.to_string()))
                }
            })
            .collect()
    }
}

/// Build a [`Path`] from a mix of ranks and slot names: `path!["body", 0]`.
#[macro_export]
macro_rules! path {
    () => { $crate::Path::root() };
    ($($seg:expr),+ $(,)?) => {
        $crate::Path::new(vec![$($crate::PathSegment::from($seg)),+])
    };
}
