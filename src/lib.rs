//! Canonicalizing type-graph builder for DWARF debug information.
//!
//! Converts a raw, per-compilation-unit DWARF type forest into a single
//! deduplicated type graph: every distinct type appears exactly once,
//! cycles are cut via synthetic placeholders, and structurally equivalent
//! types are merged by an iterative signature fixed point. Call-graph
//! extraction rides alongside in the same tables. DWARF byte-level
//! decoding, persistence to a real store, and diagram rendering are
//! external collaborators; see [`die`] and [`sink`] for the boundaries
//! this crate consumes and produces.

pub mod cycle;
pub mod die;
pub mod error;
pub mod finalize;
pub mod ids;
pub mod ingest;
pub mod merge;
pub mod partition;
pub mod pipeline;
pub mod resolve;
pub mod signature;
pub mod sink;
pub mod tables;
pub mod transit;

pub use error::PipelineError;
pub use pipeline::{run, Context, PipelineConfig, RunReport};
