//! Text format flags and their per-flag merge registers.

use super::id::OpId;
use serde::{Deserialize, Serialize};
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Bit-set of inline text formats. Several flags may be active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormatFlags(u16);

impl FormatFlags {
    pub const NONE: FormatFlags = FormatFlags(0);
    pub const BOLD: FormatFlags = FormatFlags(1 << 0);
    pub const ITALIC: FormatFlags = FormatFlags(1 << 1);
    pub const UNDERLINE: FormatFlags = FormatFlags(1 << 2);
    pub const STRIKETHROUGH: FormatFlags = FormatFlags(1 << 3);
    pub const CODE: FormatFlags = FormatFlags(1 << 4);
    pub const SUBSCRIPT: FormatFlags = FormatFlags(1 << 5);
    pub const SUPERSCRIPT: FormatFlags = FormatFlags(1 << 6);
    pub const LOWERCASE: FormatFlags = FormatFlags(1 << 7);
    pub const UPPERCASE: FormatFlags = FormatFlags(1 << 8);
    pub const CAPITALIZE: FormatFlags = FormatFlags(1 << 9);

    /// Number of distinct flags.
    pub const COUNT: usize = 10;
    pub const ALL: FormatFlags = FormatFlags((1 << Self::COUNT) - 1);

    /// The three case transforms.
    pub const CASE: FormatFlags =
        FormatFlags(Self::LOWERCASE.0 | Self::UPPERCASE.0 | Self::CAPITALIZE.0);

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u16) -> Self {
        FormatFlags(bits & Self::ALL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: FormatFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: FormatFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: FormatFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: FormatFlags) {
        self.0 &= !other.0;
    }

    /// Flags that must be cleared when `self` is switched on.
    ///
    /// Subscript/superscript exclude each other, and so do the case transforms.
    pub fn exclusive_with(self) -> FormatFlags {
        let mut out = FormatFlags::NONE;
        if self.intersects(Self::SUBSCRIPT) {
            out.insert(Self::SUPERSCRIPT);
        }
        if self.intersects(Self::SUPERSCRIPT) {
            out.insert(Self::SUBSCRIPT);
        }
        if self.intersects(Self::CASE) {
            out.insert(Self::CASE);
        }
        out.remove(self);
        out
    }

    /// Iterate over the single flags contained in `self`.
    pub fn iter(self) -> impl Iterator<Item = FormatFlags> {
        (0..Self::COUNT)
            .map(|bit| FormatFlags(1 << bit))
            .filter(move |flag| self.contains(*flag))
    }

    /// Lowercase name used by the toolbar and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::BOLD => "bold",
            Self::ITALIC => "italic",
            Self::UNDERLINE => "underline",
            Self::STRIKETHROUGH => "strikethrough",
            Self::CODE => "code",
            Self::SUBSCRIPT => "subscript",
            Self::SUPERSCRIPT => "superscript",
            Self::LOWERCASE => "lowercase",
            Self::UPPERCASE => "uppercase",
            Self::CAPITALIZE => "capitalize",
            Self::NONE => "none",
            _ => "mixed",
        }
    }
}

impl BitOr for FormatFlags {
    type Output = FormatFlags;

    fn bitor(self, rhs: FormatFlags) -> FormatFlags {
        FormatFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for FormatFlags {
    fn bitor_assign(&mut self, rhs: FormatFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for FormatFlags {
    type Output = FormatFlags;

    fn bitand(self, rhs: FormatFlags) -> FormatFlags {
        FormatFlags(self.0 & rhs.0)
    }
}

impl Not for FormatFlags {
    type Output = FormatFlags;

    fn not(self) -> FormatFlags {
        FormatFlags(!self.0 & Self::ALL.0)
    }
}

/// Last-writer-wins register stamped with an operation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lww<T> {
    value: T,
    stamp: OpId,
}

impl<T: Copy + PartialEq> Lww<T> {
    pub fn new(value: T, stamp: OpId) -> Self {
        Self { value, stamp }
    }

    pub fn get(&self) -> T {
        self.value
    }

    pub fn stamp(&self) -> OpId {
        self.stamp
    }

    /// Write `value` if `stamp` is newer. Returns true if the value changed.
    pub fn set(&mut self, value: T, stamp: OpId) -> bool {
        if stamp <= self.stamp {
            return false;
        }
        self.stamp = stamp;
        let changed = self.value != value;
        self.value = value;
        changed
    }
}

/// Format state of one character: an independent register per flag.
///
/// Concurrent writes to different flags never interfere, which is what makes
/// a concurrent bold + italic end up as bold-italic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRegister {
    flags: FormatFlags,
    stamps: [OpId; FormatFlags::COUNT],
}

impl FormatRegister {
    pub fn new(initial: FormatFlags, stamp: OpId) -> Self {
        Self {
            flags: FormatFlags::from_bits_truncate(initial.bits()),
            stamps: [stamp; FormatFlags::COUNT],
        }
    }

    pub fn flags(&self) -> FormatFlags {
        self.flags
    }

    /// Apply a write: flags in `set` are switched on, flags in `clear` off,
    /// each only where `stamp` beats that flag's current stamp.
    /// Returns true if any flag changed.
    pub fn apply(&mut self, stamp: OpId, set: FormatFlags, clear: FormatFlags) -> bool {
        let mut changed = false;
        for bit in 0..FormatFlags::COUNT {
            let flag = FormatFlags(1 << bit);
            let enable = if set.contains(flag) {
                true
            } else if clear.contains(flag) {
                false
            } else {
                continue;
            };
            if stamp <= self.stamps[bit] {
                continue;
            }
            self.stamps[bit] = stamp;
            let was = self.flags.contains(flag);
            if enable {
                self.flags.insert(flag);
            } else {
                self.flags.remove(flag);
            }
            changed |= was != enable;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::id::ClientId;

    fn stamp(client: u64, seq: u64) -> OpId {
        OpId::new(ClientId(client), seq)
    }

    #[test]
    fn test_flags_set_operations() {
        let mut flags = FormatFlags::BOLD | FormatFlags::ITALIC;
        assert!(flags.contains(FormatFlags::BOLD));
        assert!(!flags.contains(FormatFlags::BOLD | FormatFlags::CODE));
        flags.remove(FormatFlags::BOLD);
        assert_eq!(flags, FormatFlags::ITALIC);
        assert_eq!(flags.iter().count(), 1);
        assert_eq!((!FormatFlags::NONE), FormatFlags::ALL);
    }

    #[test]
    fn test_exclusive_flags() {
        assert_eq!(FormatFlags::SUBSCRIPT.exclusive_with(), FormatFlags::SUPERSCRIPT);
        assert_eq!(
            FormatFlags::UPPERCASE.exclusive_with(),
            FormatFlags::LOWERCASE | FormatFlags::CAPITALIZE
        );
        assert!(FormatFlags::BOLD.exclusive_with().is_empty());
    }

    #[test]
    fn test_register_merges_flags_independently() {
        let mut a = FormatRegister::new(FormatFlags::NONE, stamp(1, 1));
        let mut b = a.clone();

        let bold = stamp(1, 5);
        let italic = stamp(2, 5);

        a.apply(bold, FormatFlags::BOLD, FormatFlags::NONE);
        a.apply(italic, FormatFlags::ITALIC, FormatFlags::NONE);
        b.apply(italic, FormatFlags::ITALIC, FormatFlags::NONE);
        b.apply(bold, FormatFlags::BOLD, FormatFlags::NONE);

        assert_eq!(a.flags(), FormatFlags::BOLD | FormatFlags::ITALIC);
        assert_eq!(a, b);
    }

    #[test]
    fn test_register_last_writer_per_flag() {
        let mut reg = FormatRegister::new(FormatFlags::NONE, stamp(1, 1));
        assert!(reg.apply(stamp(1, 3), FormatFlags::BOLD, FormatFlags::NONE));
        // Older clear loses.
        assert!(!reg.apply(stamp(2, 2), FormatFlags::NONE, FormatFlags::BOLD));
        assert!(reg.flags().contains(FormatFlags::BOLD));
        // Newer clear wins.
        assert!(reg.apply(stamp(2, 4), FormatFlags::NONE, FormatFlags::BOLD));
        assert!(reg.flags().is_empty());
    }

    #[test]
    fn test_lww_ignores_stale_writes() {
        let mut reg = Lww::new(1u8, stamp(1, 1));
        assert!(reg.set(2, stamp(1, 2)));
        assert!(!reg.set(3, stamp(9, 1)));
        assert_eq!(reg.get(), 2);
    }
}
