//! The input contract (spec §6): a sequence of DIE records produced by an
//! external DWARF byte-level decoder. This module only describes the
//! shape of that stream; decoding raw DWARF bytes is explicitly out of
//! scope (spec §1).

use std::collections::BTreeMap;

use serde::Deserialize;

/// One DWARF debug information entry, already decoded to scalars.
///
/// `depth` gives the implicit tree structure: a valid stream is a
/// pre-order traversal where each closing marker reduces depth by
/// exactly one (spec §6).
#[derive(Clone, Debug, Deserialize)]
pub struct DieRecord {
    pub depth: u32,
    pub offset: u64,
    pub tag: Tag,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,
}

/// The DIE tag families the Ingestor dispatches on (spec §4.1).
///
/// `Other` covers every tag the ingestor doesn't need to open a table
/// entry for; it still holds a slot on the depth stack so that depth
/// tracking survives unrecognized tags (spec §4.1: "unknown tags become
/// opaque stack markers").
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    BaseType,
    UnspecifiedType,
    Typedef,
    ConstType,
    VolatileType,
    RestrictType,
    PointerType,
    PtrToMemberType,
    ReferenceType,
    RvalueReferenceType,
    ArrayType,
    StructureType,
    ClassType,
    UnionType,
    EnumerationType,
    SubroutineType,
    Subprogram,
    InlinedSubroutine,
    Member,
    Enumerator,
    FormalParameter,
    Namespace,
    CallSite,
    Other,
}

impl Tag {
    /// Tags that open a new [`crate::tables::TypeEntry`].
    #[must_use]
    pub fn is_type_like(self) -> bool {
        crate::tables::MetaType::from_tag(self).is_some()
    }
}

/// A DWARF attribute value, permissively typed (spec §4.1: "attributes are
/// parsed permissively").
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum AttrValue {
    Ref(u64),
    UInt(u64),
    Int(i64),
    Str(String),
    Flag(bool),
}

impl AttrValue {
    #[must_use]
    pub fn as_ref_addr(&self) -> Option<u64> {
        match self {
            AttrValue::Ref(v) | AttrValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_flag(&self) -> bool {
        matches!(self, AttrValue::Flag(true))
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::UInt(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }
}
