//! Per-object state flags.

use std::ops::BitOr;

/// Bitset of per-object state flags stored in the object header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ObjectFlags(u32);

impl ObjectFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// External control logic is attached; the class PLC callback is skipped.
    pub const HAS_PLC: Self = Self(0x0001);
    /// The object is held by a caller outside the engine.
    pub const LOCKED: Self = Self(0x0002);
    /// A recalculation is due before the next sync.
    pub const RECALC: Self = Self(0x0008);
    /// The object was created by a foreign module.
    pub const FOREIGN: Self = Self(0x0010);
    /// The sync callback may be skipped while the valid-to window holds.
    pub const SKIPSAFE: Self = Self(0x0020);
    /// Initialization was deferred and has not completed yet.
    pub const DEFERRED: Self = Self(0x0040);

    /// Build from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for ObjectFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let mut f = ObjectFlags::NONE;
        f.insert(ObjectFlags::RECALC | ObjectFlags::SKIPSAFE);
        assert!(f.contains(ObjectFlags::RECALC));
        f.remove(ObjectFlags::RECALC);
        assert!(!f.contains(ObjectFlags::RECALC));
        assert!(f.contains(ObjectFlags::SKIPSAFE));
    }
}
