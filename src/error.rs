//! Pipeline error type.
//!
//! Follows the teacher's `read.rs::Error` pattern: a plain enum, a manual
//! `Display` impl, and a manual `std::error::Error` impl, rather than a
//! derive-macro crate. Only the conditions spec §7 calls "fatal" surface
//! as an `Err`; every other condition is logged and handled in place by
//! the phase that hit it.

use std::fmt;

use crate::ids::Addr;

/// Fatal errors: a malformed DIE stream. All other error kinds in spec §7
/// (unknown type reference, uncuttable cycle, finalizer assertion
/// failure, persistence conflict) are non-fatal and never reach this
/// type.
#[derive(Debug, Clone)]
pub enum PipelineError {
    /// The stream's depth counter went negative, i.e. more closing
    /// markers than openings.
    DepthUnderflow { at_offset: u64 },
    /// A tagged entry required an attribute it didn't carry (e.g. a
    /// `member` with no enclosing type to attach to).
    MissingRequiredAttribute { at_offset: u64, attribute: &'static str },
    /// An enclosing type's [`crate::tables::CommonParamSlot`] was already
    /// locked to a different kind (spec §4.1 fatal schema violation).
    SlotKindConflict { type_addr: Addr },
    Io(String),
    Json(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthUnderflow { at_offset } => {
                write!(f, "DIE stream depth underflow at offset {at_offset:#x}")
            }
            Self::MissingRequiredAttribute { at_offset, attribute } => write!(
                f,
                "DIE at offset {at_offset:#x} is missing required attribute `{attribute}`"
            ),
            Self::SlotKindConflict { type_addr } => write!(
                f,
                "type {type_addr:?} was appended members of two different kinds (members/values/params)"
            ),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
            Self::Json(msg) => write!(f, "malformed DIE record: {msg}"),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}
