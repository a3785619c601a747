//! Synchronization passes and the per-class pass configuration bitset.

use std::fmt;
use std::ops::BitOr;

/// Direction in which a pass walks the rank index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Highest rank first.
    TopDown,
    /// Lowest rank first.
    BottomUp,
}

/// One of the three ordered traversals of a synchronization step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pass {
    /// First pass, parents before children.
    PreTopDown,
    /// Second pass, children before parents.
    BottomUp,
    /// Third pass, parents before children.
    PostTopDown,
}

impl Pass {
    /// All passes in execution order.
    pub const ALL: [Pass; 3] = [Pass::PreTopDown, Pass::BottomUp, Pass::PostTopDown];

    /// Walk direction over ranks.
    pub fn direction(self) -> Direction {
        match self {
            Pass::PreTopDown | Pass::PostTopDown => Direction::TopDown,
            Pass::BottomUp => Direction::BottomUp,
        }
    }

    /// The configuration bit that requests this pass.
    pub fn flag(self) -> PassConfig {
        match self {
            Pass::PreTopDown => PassConfig::PRETOPDOWN,
            Pass::BottomUp => PassConfig::BOTTOMUP,
            Pass::PostTopDown => PassConfig::POSTTOPDOWN,
        }
    }

    /// Position in [`Pass::ALL`].
    pub fn index(self) -> usize {
        match self {
            Pass::PreTopDown => 0,
            Pass::BottomUp => 1,
            Pass::PostTopDown => 2,
        }
    }

    /// Upper-case pass name used in diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            Pass::PreTopDown => "PRETOPDOWN",
            Pass::BottomUp => "BOTTOMUP",
            Pass::PostTopDown => "POSTTOPDOWN",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which passes a class takes part in, plus class behaviour bits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PassConfig(u8);

impl PassConfig {
    /// No synchronization at all.
    pub const NOSYNC: Self = Self(0);
    /// Synchronize on the first top-down pass.
    pub const PRETOPDOWN: Self = Self(0x01);
    /// Synchronize on the bottom-up pass.
    pub const BOTTOMUP: Self = Self(0x02);
    /// Synchronize on the second top-down pass.
    pub const POSTTOPDOWN: Self = Self(0x04);
    /// The engine takes the object lock around each callback separately.
    pub const AUTOLOCK: Self = Self(0x08);
    /// The class cannot be instantiated directly.
    pub const ABSTRACT: Self = Self(0x10);
    /// Objects of this class are expected to carry a name.
    pub const FORCE_NAME: Self = Self(0x20);

    const PASS_MASK: u8 = 0x07;

    /// Build from raw bits.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the class synchronizes on `pass`.
    pub fn requires(self, pass: Pass) -> bool {
        self.contains(pass.flag())
    }

    /// Whether the class synchronizes on any pass.
    pub fn any_pass(self) -> bool {
        self.0 & Self::PASS_MASK != 0
    }

    /// Passes this class synchronizes on, in execution order.
    pub fn passes(self) -> impl Iterator<Item = Pass> {
        Pass::ALL.into_iter().filter(move |p| self.requires(*p))
    }

    /// Whether [`PassConfig::ABSTRACT`] is set.
    pub fn is_abstract(self) -> bool {
        self.contains(Self::ABSTRACT)
    }

    /// Whether [`PassConfig::AUTOLOCK`] is set.
    pub fn autolock(self) -> bool {
        self.contains(Self::AUTOLOCK)
    }

    /// Whether [`PassConfig::FORCE_NAME`] is set.
    pub fn force_name(self) -> bool {
        self.contains(Self::FORCE_NAME)
    }
}

impl BitOr for PassConfig {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
