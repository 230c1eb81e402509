#![forbid(unsafe_code)]

//! Path canonicalization.
//!
//! A location in the value tree is described by a [`PathKey`]: either a bare
//! top-level key or an ordered sequence of [`Segment`]s. Both shapes are
//! resolved once into a [`CanonicalPath`], which carries the dot-joined
//! identity string used by the registry and the stringified segment array
//! used for tree navigation.
//!
//! # Invariants
//!
//! 1. Two descriptors name the same subscription target iff their identities
//!    are equal. `PathKey::from("user")` and `path!["user"]` are different
//!    cache entries but canonicalize to the same identity.
//! 2. Index segments stringify to decimal, so `path!["items", 0usize]` and
//!    `path!["items", "0"]` share the identity `items.0`.
//! 3. [`PathCache::resolve`] returns the same shared allocation for repeated
//!    lookups of an equal descriptor.
//!
//! Keys containing the separator are accepted as-is; `path!["a.b"]` and
//! `path!["a", "b"]` collide on identity.

use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

/// Separator placed between segments in a canonical identity.
pub const SEPARATOR: char = '.';

// ─── Segment ─────────────────────────────────────────────────────────────────

/// One step in a path: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl Segment {
    /// Stringified form used in identities and tree navigation.
    #[must_use]
    pub fn to_key(&self) -> String {
        match self {
            Self::Key(key) => key.clone(),
            Self::Index(idx) => idx.to_string(),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(key) => f.write_str(key),
            Self::Index(idx) => write!(f, "{idx}"),
        }
    }
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<&String> for Segment {
    fn from(key: &String) -> Self {
        Self::Key(key.clone())
    }
}

impl From<usize> for Segment {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

// ─── PathKey ─────────────────────────────────────────────────────────────────

/// A path descriptor as supplied by callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathKey {
    /// A bare top-level key (a length-1 path).
    Single(Segment),
    /// An ordered path starting at a top-level key.
    Sequence(Vec<Segment>),
}

impl PathKey {
    /// Number of segments described.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Sequence(segments) => segments.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn segments(&self) -> &[Segment] {
        match self {
            Self::Single(segment) => std::slice::from_ref(segment),
            Self::Sequence(segments) => segments,
        }
    }
}

impl From<&str> for PathKey {
    fn from(key: &str) -> Self {
        Self::Single(Segment::from(key))
    }
}

impl From<String> for PathKey {
    fn from(key: String) -> Self {
        Self::Single(Segment::Key(key))
    }
}

impl From<&String> for PathKey {
    fn from(key: &String) -> Self {
        Self::Single(Segment::Key(key.clone()))
    }
}

impl From<usize> for PathKey {
    fn from(idx: usize) -> Self {
        Self::Single(Segment::Index(idx))
    }
}

impl From<Segment> for PathKey {
    fn from(segment: Segment) -> Self {
        Self::Single(segment)
    }
}

impl From<Vec<Segment>> for PathKey {
    fn from(segments: Vec<Segment>) -> Self {
        Self::Sequence(segments)
    }
}

impl<S: Into<Segment>, const N: usize> From<[S; N]> for PathKey {
    fn from(segments: [S; N]) -> Self {
        Self::Sequence(segments.into_iter().map(Into::into).collect())
    }
}

impl From<&PathKey> for PathKey {
    fn from(key: &PathKey) -> Self {
        key.clone()
    }
}

/// Build a [`PathKey::Sequence`] from mixed key and index segments.
///
/// ```
/// use treestate_core::path;
/// use treestate_core::path::{PathKey, Segment};
///
/// let key = path!["user", "roles", 0usize];
/// assert_eq!(
///     key,
///     PathKey::Sequence(vec![
///         Segment::Key("user".into()),
///         Segment::Key("roles".into()),
///         Segment::Index(0),
///     ])
/// );
/// ```
#[macro_export]
macro_rules! path {
    ($($segment:expr),* $(,)?) => {
        $crate::path::PathKey::Sequence(vec![$($crate::path::Segment::from($segment)),*])
    };
}

// ─── CanonicalPath ───────────────────────────────────────────────────────────

/// Resolved form of a [`PathKey`]. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalPath {
    identity: Rc<str>,
    segments: Rc<[String]>,
}

impl CanonicalPath {
    /// Dot-joined identity, e.g. `user.profile.name`.
    #[must_use]
    pub fn identity(&self) -> &Rc<str> {
        &self.identity
    }

    /// Stringified segments, top-level key first.
    #[must_use]
    pub fn segments(&self) -> &Rc<[String]> {
        &self.segments
    }

    /// The top-level key, or `None` for an empty path.
    #[must_use]
    pub fn top_key(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Segments after the top-level key.
    #[must_use]
    pub fn nested(&self) -> &[String] {
        self.segments.get(1..).unwrap_or(&[])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True if `other` is this path or lies beneath it.
    #[must_use]
    pub fn covers(&self, other: &CanonicalPath) -> bool {
        is_same_or_descendant(&other.identity, &self.identity)
    }
}

impl fmt::Display for CanonicalPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.identity)
    }
}

/// True if `candidate` equals `base` or is `base` followed by the separator
/// and more segments.
#[must_use]
pub fn is_same_or_descendant(candidate: &str, base: &str) -> bool {
    match candidate.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest.starts_with(SEPARATOR),
        None => false,
    }
}

/// Canonicalize a descriptor without caching.
#[must_use]
pub fn canonicalize(key: &PathKey) -> CanonicalPath {
    let segments: Vec<String> = key.segments().iter().map(Segment::to_key).collect();
    let identity = segments.join(&SEPARATOR.to_string());
    CanonicalPath {
        identity: Rc::from(identity),
        segments: Rc::from(segments),
    }
}

// ─── PathCache ───────────────────────────────────────────────────────────────

/// Hit/miss counters for a [`PathCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathCacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Memo from descriptor to canonical form, kept for the owner's lifetime.
#[derive(Debug, Default)]
pub struct PathCache {
    entries: AHashMap<PathKey, CanonicalPath>,
    stats: PathCacheStats,
}

impl PathCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a descriptor, reusing the cached canonical form when present.
    pub fn resolve(&mut self, key: &PathKey) -> CanonicalPath {
        if let Some(found) = self.entries.get(key) {
            self.stats.hits += 1;
            return found.clone();
        }
        self.stats.misses += 1;
        let resolved = canonicalize(key);
        self.entries.insert(key.clone(), resolved.clone());
        resolved
    }

    /// Canonical identity of `key`.
    pub fn identity(&mut self, key: &PathKey) -> Rc<str> {
        Rc::clone(self.resolve(key).identity())
    }

    /// Stringified segments of `key`.
    pub fn segments(&mut self, key: &PathKey) -> Rc<[String]> {
        Rc::clone(self.resolve(key).segments())
    }

    /// Number of distinct descriptors memoized.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn stats(&self) -> PathCacheStats {
        self.stats
    }
}
