//! Addr-indexed arena keys and name interning.
//!
//! Every edge in the type/subprogram tables is an integer key into a flat
//! table; there are no pointer fields and no reference counts (spec §9,
//! "cyclic ownership → addr-indexed arena").

use std::collections::HashMap;
use std::fmt;

/// High bit flags a placeholder addr so it can never collide with a real
/// DIE-offset-derived addr (spec §3).
pub const HIGH_BIT: u64 = 1 << 63;

/// The reserved addr of the builtin `void` type (spec §3, ingestion-exit
/// invariant: "the special `void` type exists at a fixed reserved addr").
pub const VOID_ADDR: Addr = Addr(0);

/// A stable integer identifier for a table entry, derived from a DIE
/// offset (or, for placeholders, a DIE offset with [`HIGH_BIT`] set).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Addr(pub u64);

impl Addr {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Addr(raw)
    }

    /// True if this addr was synthesized by the Cycle Breaker for a
    /// placeholder rather than derived from a real DIE offset.
    #[must_use]
    pub const fn is_placeholder(self) -> bool {
        self.0 & HIGH_BIT != 0
    }

    #[must_use]
    pub const fn as_placeholder(self) -> Self {
        Addr(self.0 | HIGH_BIT)
    }

    /// The real-addr half of a placeholder addr, i.e. the offset it was
    /// synthesized from. Meaningless for a non-placeholder addr.
    #[must_use]
    pub const fn strip_placeholder(self) -> Self {
        Addr(self.0 & !HIGH_BIT)
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_placeholder() {
            write!(f, "Addr(ph:{:#x})", self.strip_placeholder().0)
        } else {
            write!(f, "Addr({:#x})", self.0)
        }
    }
}

/// A handle into the [`Interner`]'s flyweight string table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Name(u32);

/// Deduplicates name/linkage-name strings behind small integer handles,
/// mirroring the teacher's dedup-on-first-sight of `Abbreviation`s behind
/// an id-keyed map (`read.rs::BitStreamReader::global_abbrevs`): the first
/// time a string is seen it is pushed and handed an id; every later sight
/// of the same string returns the existing id instead of allocating again.
#[derive(Default)]
pub struct Interner {
    strings: Vec<Box<str>>,
    lookup: HashMap<Box<str>, Name>,
}

impl Interner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Name {
        if let Some(&name) = self.lookup.get(s) {
            return name;
        }
        let id = Name(u32::try_from(self.strings.len()).expect("too many distinct names"));
        let boxed: Box<str> = s.into();
        self.strings.push(boxed.clone());
        self.lookup.insert(boxed, id);
        id
    }

    #[must_use]
    pub fn resolve(&self, name: Name) -> &str {
        &self.strings[name.0 as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedups_equal_strings() {
        let mut interner = Interner::new();
        let a = interner.intern("struct Foo");
        let b = interner.intern("struct Foo");
        let c = interner.intern("struct Bar");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.resolve(a), "struct Foo");
    }

    #[test]
    fn placeholder_bit_roundtrips() {
        let addr = Addr::new(0x1234);
        let ph = addr.as_placeholder();
        assert!(ph.is_placeholder());
        assert!(!addr.is_placeholder());
        assert_eq!(ph.strip_placeholder(), addr);
    }
}
