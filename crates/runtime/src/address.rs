//! Dotted addresses into the story tree
//!
//! Addresses are dot-separated paths from the story root:
//! - `intro.0.c-0` — nested containers by name and content index
//! - `.^.sibling` — relative lookup rooted at the current container's parent
//!
//! A `^` segment means "parent". Parent/contains/resolve are string-level
//! operations; the tree itself interprets segments during lookup.

use std::fmt;

/// A dot-separated path from the story root.
///
/// Addresses are immutable and cheap to compare. The empty address denotes
/// the root container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(String);

impl Address {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The root (empty) address.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Parent address: everything before the final segment.
    ///
    /// The parent of a single-segment address is the root.
    pub fn parent(&self) -> Address {
        match self.0.rfind('.') {
            Some(i) => Address(self.0[..i].to_string()),
            None => Address::default(),
        }
    }

    /// Append a segment (or a dotted run of segments).
    pub fn child(&self, segment: &str) -> Address {
        if self.0.is_empty() {
            Address(segment.to_string())
        } else {
            Address(format!("{}.{}", self.0, segment))
        }
    }

    /// Whether `other` is this address or lies beneath it.
    ///
    /// The root address contains everything.
    pub fn contains(&self, other: &Address) -> bool {
        if self.0.is_empty() {
            return true;
        }
        other.0 == self.0
            || (other.0.len() > self.0.len()
                && other.0.starts_with(&self.0)
                && other.0.as_bytes()[self.0.len()] == b'.')
    }

    /// Resolve a relative path against this address.
    ///
    /// Leading `.^` pairs each ascend one level; the remaining path is
    /// appended. A path without a leading `.^` replaces the address wholesale
    /// (it is already absolute).
    pub fn resolve(&self, rel: &str) -> Address {
        if !rel.starts_with(".^") {
            return Address::new(rel);
        }
        let mut base = self.clone();
        let mut rest = rel;
        while let Some(r) = rest.strip_prefix(".^") {
            base = base.parent();
            rest = r;
        }
        let rest = rest.strip_prefix('.').unwrap_or(rest);
        if rest.is_empty() {
            base
        } else {
            base.child(rest)
        }
    }

    /// Split into the leading path segments and the final key.
    pub fn split(s: &str) -> (Vec<&str>, &str) {
        let mut path: Vec<&str> = s.split('.').collect();
        let key = path.pop().unwrap_or("");
        (path, key)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_is_proper_prefix() {
        let addr = Address::from("a.b.c");
        let parent = addr.parent();
        assert_eq!(parent.as_str(), "a.b");
        assert!(parent.contains(&addr));
        assert!(addr.contains(&addr));
    }

    #[test]
    fn test_parent_of_single_segment_is_root() {
        assert!(Address::from("a").parent().is_root());
    }

    #[test]
    fn test_contains() {
        let knot = Address::from("intro");
        assert!(knot.contains(&Address::from("intro.0.c-0")));
        assert!(!knot.contains(&Address::from("introduction")));
        assert!(!knot.contains(&Address::from("other")));
        assert!(Address::default().contains(&knot));
    }

    #[test]
    fn test_split() {
        let (path, key) = Address::split("a.b");
        assert_eq!(path, vec!["a"]);
        assert_eq!(key, "b");

        let (path, key) = Address::split("a");
        assert!(path.is_empty());
        assert_eq!(key, "a");
    }

    #[test]
    fn test_resolve_relative() {
        let base = Address::from("knot.stitch");
        assert_eq!(base.resolve(".^.other").as_str(), "knot.other");
        assert_eq!(base.resolve(".^.^.elsewhere").as_str(), "elsewhere");
        assert_eq!(base.resolve("top.down").as_str(), "top.down");
        assert_eq!(base.resolve(".^").as_str(), "knot");
    }

    #[test]
    fn test_child() {
        assert_eq!(Address::default().child("a").as_str(), "a");
        assert_eq!(Address::from("a").child("b.c").as_str(), "a.b.c");
    }
}
