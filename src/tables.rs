//! The core data model (spec §3): the `Types` and `Subprograms` tables and
//! their row shapes.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::die::Tag;
use crate::ids::{Addr, Name};

bitflags! {
    /// Classification bits used by the Cycle Breaker (pointer-family edge
    /// test, spec §4.4) and the Acyclic Merger (pointer short-circuit,
    /// spec §4.6). Grounded on the teacher's `bitflags`-based operand
    /// classification in `schema/enums.rs`.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct MetaTypeFlags: u8 {
        /// `pointer`, `ptr_to_member`, `reference`, `rvalue_reference`:
        /// the edge kinds the Cycle Breaker is allowed to cut.
        const POINTER_FAMILY = 0b0000_0001;
        /// `const`, `volatile`, `restrict`: transit qualifiers (spec §4.3).
        const TRANSIT = 0b0000_0010;
        /// Carries a `members` list when populated (struct/union/class).
        const HAS_MEMBERS = 0b0000_0100;
        /// Carries a `values` list when populated (enumeration).
        const HAS_VALUES = 0b0000_1000;
        /// Carries a `params` list when populated (subroutine).
        const HAS_PARAMS = 0b0001_0000;
    }
}

/// The kind of a [`TypeEntry`] (spec §3).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MetaType {
    Base,
    Unspecified,
    Typedef,
    Const,
    Volatile,
    Restrict,
    Pointer,
    PtrToMember,
    Reference,
    RvalueReference,
    Array,
    Structure,
    Class,
    Union,
    Enumeration,
    Subroutine,
    Placeholder,
}

impl MetaType {
    #[must_use]
    pub fn from_tag(tag: Tag) -> Option<Self> {
        Some(match tag {
            Tag::BaseType => MetaType::Base,
            Tag::UnspecifiedType => MetaType::Unspecified,
            Tag::Typedef => MetaType::Typedef,
            Tag::ConstType => MetaType::Const,
            Tag::VolatileType => MetaType::Volatile,
            Tag::RestrictType => MetaType::Restrict,
            Tag::PointerType => MetaType::Pointer,
            Tag::PtrToMemberType => MetaType::PtrToMember,
            Tag::ReferenceType => MetaType::Reference,
            Tag::RvalueReferenceType => MetaType::RvalueReference,
            Tag::ArrayType => MetaType::Array,
            Tag::StructureType => MetaType::Structure,
            Tag::ClassType => MetaType::Class,
            Tag::UnionType => MetaType::Union,
            Tag::EnumerationType => MetaType::Enumeration,
            Tag::SubroutineType => MetaType::Subroutine,
            _ => return None,
        })
    }

    #[must_use]
    pub fn flags(self) -> MetaTypeFlags {
        match self {
            MetaType::Pointer
            | MetaType::PtrToMember
            | MetaType::Reference
            | MetaType::RvalueReference => MetaTypeFlags::POINTER_FAMILY,
            MetaType::Const | MetaType::Volatile | MetaType::Restrict => {
                MetaTypeFlags::TRANSIT
            }
            MetaType::Structure | MetaType::Class | MetaType::Union => {
                MetaTypeFlags::HAS_MEMBERS
            }
            MetaType::Enumeration => MetaTypeFlags::HAS_VALUES,
            MetaType::Subroutine => MetaTypeFlags::HAS_PARAMS,
            _ => MetaTypeFlags::empty(),
        }
    }

    #[must_use]
    pub fn is_pointer_family(self) -> bool {
        self.flags().contains(MetaTypeFlags::POINTER_FAMILY)
    }

    #[must_use]
    pub fn is_transit(self) -> bool {
        self.flags().contains(MetaTypeFlags::TRANSIT)
    }

    /// `true` for the types the Acyclic Merger bootstraps by name alone
    /// (spec §4.6): base, unspecified and placeholder types.
    #[must_use]
    pub fn dedups_by_name_only(self) -> bool {
        matches!(self, MetaType::Base | MetaType::Unspecified | MetaType::Placeholder)
    }
}

/// A uniform record acting as a member, enumerator value, or formal
/// parameter (spec §3). Exactly one of the three lists on a [`TypeEntry`]
/// may be populated; this is the per-element row of whichever one it is.
#[derive(Clone, Debug, PartialEq)]
pub struct CommonParam {
    pub name: Option<Name>,
    /// Referent addr (members/params) or enumerator integer value
    /// (values). Kept as a raw `i64` so both cases share a field, per
    /// spec §3; callers interpret it according to the enclosing slot.
    pub value: i64,
    /// Struct-field byte offset; `0` for enumerators/params.
    pub offset: u64,
    /// Static-member flag; such members are dropped before they ever
    /// reach this list (spec §9, "external (static) struct members are
    /// removed before merge").
    pub external: bool,
}

impl CommonParam {
    #[must_use]
    pub fn value_addr(&self) -> Addr {
        Addr::new(self.value as u64)
    }
}

/// The discriminated union a [`TypeEntry`] locks into on first append
/// (spec §4.1: "a second choice of a different slot is a fatal schema
/// violation"). Grounded on the teacher's `Operand`/`PayloadOperand`
/// tagged-union style in `bitstream.rs`.
#[derive(Clone, Debug, PartialEq)]
pub enum CommonParamSlot {
    Empty,
    Members(Vec<CommonParam>),
    Values(Vec<CommonParam>),
    Params(Vec<CommonParam>),
}

impl Default for CommonParamSlot {
    fn default() -> Self {
        CommonParamSlot::Empty
    }
}

impl CommonParamSlot {
    /// Appends `param` under `kind`, locking the slot to `kind` if this is
    /// the first append. Returns `Err` if a different kind was already
    /// locked in (spec §4.1 fatal schema violation).
    pub fn append(&mut self, kind: CommonParamKind, param: CommonParam) -> Result<(), ()> {
        match (self, kind) {
            (slot @ CommonParamSlot::Empty, CommonParamKind::Member) => {
                *slot = CommonParamSlot::Members(vec![param]);
            }
            (slot @ CommonParamSlot::Empty, CommonParamKind::Value) => {
                *slot = CommonParamSlot::Values(vec![param]);
            }
            (slot @ CommonParamSlot::Empty, CommonParamKind::Param) => {
                *slot = CommonParamSlot::Params(vec![param]);
            }
            (CommonParamSlot::Members(v), CommonParamKind::Member)
            | (CommonParamSlot::Values(v), CommonParamKind::Value)
            | (CommonParamSlot::Params(v), CommonParamKind::Param) => v.push(param),
            _ => return Err(()),
        }
        Ok(())
    }

    #[must_use]
    pub fn as_slice(&self) -> &[CommonParam] {
        match self {
            CommonParamSlot::Empty => &[],
            CommonParamSlot::Members(v) | CommonParamSlot::Values(v) | CommonParamSlot::Params(v) => v,
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [CommonParam] {
        match self {
            CommonParamSlot::Empty => &mut [],
            CommonParamSlot::Members(v) | CommonParamSlot::Values(v) | CommonParamSlot::Params(v) => v,
        }
    }

    pub fn retain(&mut self, mut f: impl FnMut(&CommonParam) -> bool) {
        match self {
            CommonParamSlot::Empty => {}
            CommonParamSlot::Members(v) | CommonParamSlot::Values(v) | CommonParamSlot::Params(v) => {
                v.retain(|p| f(p));
            }
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CommonParamKind {
    Member,
    Value,
    Param,
}

/// A row in the `Types` table (spec §3), keyed by [`Addr`].
#[derive(Clone, Debug)]
pub struct TypeEntry {
    pub addr: Addr,
    pub meta_type: MetaType,
    pub name: Option<Name>,
    pub linkage_name: Option<Name>,
    pub declaration: bool,
    /// Out-edge to another type, or `None`. Used by typedef/qualifier/
    /// pointer/array/enumeration-base.
    pub ty: Option<Addr>,
    pub slot: CommonParamSlot,
    /// Valid only for placeholders: the addr of the type this one stands
    /// in for.
    pub real_type: Option<Addr>,
    /// Non-`None` once this entry has been subsumed by another.
    pub replaced_by: Option<Addr>,
    /// `true` once this entry is a surviving canonical representative.
    pub chosen: bool,
}

impl TypeEntry {
    #[must_use]
    pub fn new(addr: Addr, meta_type: MetaType) -> Self {
        TypeEntry {
            addr,
            meta_type,
            name: None,
            linkage_name: None,
            declaration: false,
            ty: None,
            slot: CommonParamSlot::Empty,
            real_type: None,
            replaced_by: None,
            chosen: false,
        }
    }

    /// Linkage name preferred when present (spec §3).
    #[must_use]
    pub fn display_name(&self) -> Option<Name> {
        self.linkage_name.or(self.name)
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.meta_type == MetaType::Placeholder
    }
}

/// A row in the `Subprograms` table (spec §3), keyed by [`Addr`].
#[derive(Clone, Debug)]
pub struct Subprogram {
    pub addr: Addr,
    pub name: Option<Name>,
    pub linkage_name: Option<Name>,
    /// `Some` means this is an inlined/abstract copy deferring to another
    /// entry at that addr.
    pub origin: Option<Addr>,
    pub specification: Option<Addr>,
    pub calls: Vec<Addr>,
    pub call_names: Vec<Name>,
}

impl Subprogram {
    #[must_use]
    pub fn new(addr: Addr) -> Self {
        Subprogram {
            addr,
            name: None,
            linkage_name: None,
            origin: None,
            specification: None,
            calls: Vec::new(),
            call_names: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_original(&self) -> bool {
        self.origin.is_none()
    }

    #[must_use]
    pub fn display_name(&self) -> Option<Name> {
        self.linkage_name.or(self.name)
    }
}

/// Flat, addr-keyed table of [`TypeEntry`] rows.
#[derive(Default)]
pub struct TypeTable {
    entries: HashMap<Addr, TypeEntry>,
}

impl TypeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: TypeEntry) {
        self.entries.insert(entry.addr, entry);
    }

    #[must_use]
    pub fn get(&self, addr: Addr) -> Option<&TypeEntry> {
        self.entries.get(&addr)
    }

    pub fn get_mut(&mut self, addr: Addr) -> Option<&mut TypeEntry> {
        self.entries.get_mut(&addr)
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.entries.contains_key(&addr)
    }

    pub fn remove(&mut self, addr: Addr) -> Option<TypeEntry> {
        self.entries.remove(&addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deterministic iteration order over keys, required for reproducible
    /// Cycle Breaker output (spec §4.4, "tie-break policy").
    pub fn sorted_addrs(&self) -> Vec<Addr> {
        let mut addrs: Vec<Addr> = self.entries.keys().copied().collect();
        addrs.sort_unstable();
        addrs
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Addr, &TypeEntry)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Addr, &mut TypeEntry)> {
        self.entries.iter_mut()
    }

    pub fn values(&self) -> impl Iterator<Item = &TypeEntry> {
        self.entries.values()
    }
}

/// Flat, addr-keyed table of [`Subprogram`] rows.
#[derive(Default)]
pub struct SubprogramTable {
    entries: HashMap<Addr, Subprogram>,
}

impl SubprogramTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: Subprogram) {
        self.entries.insert(entry.addr, entry);
    }

    #[must_use]
    pub fn get(&self, addr: Addr) -> Option<&Subprogram> {
        self.entries.get(&addr)
    }

    pub fn get_mut(&mut self, addr: Addr) -> Option<&mut Subprogram> {
        self.entries.get_mut(&addr)
    }

    pub fn remove(&mut self, addr: Addr) -> Option<Subprogram> {
        self.entries.remove(&addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn addrs(&self) -> Vec<Addr> {
        self.entries.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Addr, &Subprogram)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Subprogram> {
        self.entries.values()
    }
}
