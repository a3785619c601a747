//! Strongly-typed identifiers for classes, objects and dependency ranks.

use std::fmt;

/// Identifies a simulation object within an object store.
///
/// Ids are assigned sequentially at creation and never reused, even
/// after the object is logically removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// The id as a `usize`, for indexing dense tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ObjectId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a registered class.
///
/// `ClassId(n)` is the n-th class registered with the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl ClassId {
    /// The id as a `usize`, for indexing the class table.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ClassId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Dependency rank of an object.
///
/// A parent always holds a strictly higher rank than each of its
/// children. Ranks only ever increase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(pub u32);

impl Rank {
    /// The rank every object starts with.
    pub const ZERO: Self = Self(0);

    /// The lowest rank a parent of an object at this rank may hold.
    pub fn above(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// The rank as a `usize`, for indexing rank buckets.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Rank {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_above_saturates() {
        assert_eq!(Rank(3).above(), Rank(4));
        assert_eq!(Rank(u32::MAX).above(), Rank(u32::MAX));
    }

    #[test]
    fn ids_display_as_plain_numbers() {
        assert_eq!(ObjectId(42).to_string(), "42");
        assert_eq!(ClassId::from(7).to_string(), "7");
    }
}
