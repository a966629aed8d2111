//! Digest collections with deterministic iteration order.

use std::collections::BTreeSet;

use crate::digest::Digest;

/// An unordered set of digests.
///
/// Iteration order is deterministic (sorted), so decorators that partition,
/// union or intersect sets produce stable results that tests can assert on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestSet {
    items: BTreeSet<Digest>,
}

impl DigestSet {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a set.
    pub fn builder() -> DigestSetBuilder {
        DigestSetBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.items.contains(digest)
    }

    /// Iterate the digests in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Digest> {
        self.items.iter()
    }

    /// Digests present in both sets.
    pub fn intersection(&self, other: &DigestSet) -> DigestSet {
        DigestSet {
            items: self.items.intersection(&other.items).cloned().collect(),
        }
    }

    /// Digests present in either set.
    pub fn union(&self, other: &DigestSet) -> DigestSet {
        DigestSet {
            items: self.items.union(&other.items).cloned().collect(),
        }
    }

    /// Digests present in `self` but not in `other`.
    pub fn difference(&self, other: &DigestSet) -> DigestSet {
        DigestSet {
            items: self.items.difference(&other.items).cloned().collect(),
        }
    }
}

impl IntoIterator for DigestSet {
    type Item = Digest;
    type IntoIter = std::collections::btree_set::IntoIter<Digest>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl FromIterator<Digest> for DigestSet {
    fn from_iter<I: IntoIterator<Item = Digest>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

/// Accumulates digests into a [`DigestSet`].
#[derive(Debug, Default)]
pub struct DigestSetBuilder {
    items: BTreeSet<Digest>,
}

impl DigestSetBuilder {
    pub fn add(&mut self, digest: Digest) -> &mut Self {
        self.items.insert(digest);
        self
    }

    pub fn build(self) -> DigestSet {
        DigestSet { items: self.items }
    }
}
