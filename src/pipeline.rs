//! Pipeline driver (spec §5, §9 "global module state → explicit context
//! record").
//!
//! Strictly sequential, single-threaded phase ordering: ingest, resolve,
//! name transits, break cycles, partition, merge, finalize, sink.
//! Grounded on the teacher's `BitStreamReader::visit_block`: the one
//! function that owns traversal order and delegates to phase-shaped
//! callbacks, here replaced by a fixed sequence of phase functions rather
//! than a visitor callback.

use std::time::Instant;

use tracing::info_span;

use crate::cycle::{self, CycleBreakerConfig};
use crate::die::DieRecord;
use crate::error::PipelineError;
use crate::finalize;
use crate::ids::{Interner, Name};
use crate::ingest;
use crate::merge;
use crate::partition;
use crate::resolve;
use crate::sink::{self, Sink};
use crate::tables::{SubprogramTable, TypeTable};
use crate::transit;

/// The context one pipeline run threads through every phase: the two
/// tables, the name interner, and the scratchpad state later phases need
/// (`placeholder_names`, `merge_sets`) (spec §5).
pub struct Context {
    pub types: TypeTable,
    pub subprograms: SubprogramTable,
    pub interner: Interner,
    pub placeholder_names: std::collections::HashSet<Name>,
    pub merge_sets: Vec<Vec<crate::ids::Addr>>,
}

/// Knobs for a run (spec §9 open question: tie-break policy).
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineConfig {
    pub cycle_breaker: CycleBreakerConfig,
}

pub struct RunReport {
    pub types_ingested: usize,
    pub subprograms_ingested: usize,
    pub placeholders_created: usize,
    pub merge_sets: usize,
    pub merge_rounds: u32,
    pub deleted: usize,
    pub orphaned: usize,
}

/// Runs every phase in order over `records`, then emits the finalized
/// tables to `sink`. Returns a summary report for the caller to log or
/// print; fatal errors (spec §7) abort before any sink writes happen.
pub fn run(records: &[DieRecord], config: PipelineConfig, out: &mut dyn Sink) -> Result<RunReport, PipelineError> {
    let mut interner = Interner::new();

    let ingested = {
        let _span = info_span!("ingest", records = records.len()).entered();
        let start = Instant::now();
        let output = ingest::ingest(records, &mut interner)?;
        tracing::info!(
            types = output.types.len(),
            subprograms = output.subprograms.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "ingest done"
        );
        output
    };

    let mut ctx = Context {
        types: ingested.types,
        subprograms: ingested.subprograms,
        interner,
        placeholder_names: Default::default(),
        merge_sets: Vec::new(),
    };
    let types_ingested = ctx.types.len();
    let subprograms_ingested = ctx.subprograms.len();

    {
        let _span = info_span!("resolve").entered();
        let start = Instant::now();
        resolve::resolve(&mut ctx.types, &mut ctx.subprograms);
        tracing::info!(elapsed_ms = start.elapsed().as_millis(), "resolve done");
    }

    {
        let _span = info_span!("transit").entered();
        let start = Instant::now();
        transit::name_transit_types(&mut ctx.types, &mut ctx.interner);
        tracing::info!(elapsed_ms = start.elapsed().as_millis(), "transit naming done");
    }

    let placeholders_created;
    {
        let _span = info_span!("cycle_breaker").entered();
        let start = Instant::now();
        let output = cycle::break_cycles(&mut ctx.types, &mut ctx.interner, config.cycle_breaker);
        placeholders_created = output.placeholder_names.len();
        ctx.placeholder_names = output.placeholder_names;
        tracing::info!(
            placeholder_names = placeholders_created,
            elapsed_ms = start.elapsed().as_millis(),
            "cycle breaker done"
        );
    }

    {
        let _span = info_span!("partition").entered();
        let start = Instant::now();
        let output = partition::partition(&mut ctx.types, &ctx.interner, &ctx.placeholder_names);
        ctx.merge_sets = output.merge_sets;
        tracing::info!(
            merge_sets = ctx.merge_sets.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "partition engine done"
        );
    }

    let merge_rounds;
    {
        let _span = info_span!("acyclic_merger").entered();
        let start = Instant::now();
        let output = merge::merge(&mut ctx.types, &ctx.interner);
        merge_rounds = output.rounds;
        tracing::info!(
            rounds = merge_rounds,
            elapsed_ms = start.elapsed().as_millis(),
            "acyclic merger done"
        );
    }

    let finalize_output;
    {
        let _span = info_span!("finalize").entered();
        let start = Instant::now();
        finalize_output = finalize::finalize(&mut ctx.types);
        tracing::info!(
            deleted = finalize_output.deleted,
            orphaned = finalize_output.orphaned.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "finalizer done"
        );
    }

    {
        let _span = info_span!("sink").entered();
        let start = Instant::now();
        sink::emit(&ctx.types, &ctx.subprograms, &ctx.interner, out);
        tracing::info!(elapsed_ms = start.elapsed().as_millis(), "sink done");
    }

    Ok(RunReport {
        types_ingested,
        subprograms_ingested,
        placeholders_created,
        merge_sets: ctx.merge_sets.len(),
        merge_rounds,
        deleted: finalize_output.deleted,
        orphaned: finalize_output.orphaned.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::die::{AttrValue, Tag};
    use crate::sink::InMemorySink;
    use std::collections::BTreeMap;

    fn rec(depth: u32, offset: u64, tag: Tag, attrs: &[(&str, AttrValue)]) -> DieRecord {
        let mut attributes = BTreeMap::new();
        for (k, v) in attrs {
            attributes.insert((*k).to_string(), v.clone());
        }
        DieRecord { depth, offset, tag, attributes }
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let mut sink = InMemorySink::default();
        let report = run(&[], PipelineConfig::default(), &mut sink).unwrap();
        assert_eq!(report.subprograms_ingested, 0);
        assert!(sink.symbols.rows.is_empty());
        assert!(sink.calls.rows.is_empty());
        // The reserved `void` type exists internally but nothing
        // references it here, so it is suppressed from the sink.
        assert!(sink.types.rows.is_empty());
    }

    #[test]
    fn self_referential_struct_survives_as_one_type_one_placeholder() {
        let records = vec![
            rec(0, 1, Tag::StructureType, &[("name", AttrValue::Str("Node".into()))]),
            rec(
                1,
                2,
                Tag::Member,
                &[("name", AttrValue::Str("next".into())), ("type", AttrValue::Ref(3))],
            ),
            rec(0, 3, Tag::PointerType, &[("type", AttrValue::Ref(1))]),
        ];
        let mut sink = InMemorySink::default();
        let report = run(&records, PipelineConfig::default(), &mut sink).unwrap();
        assert_eq!(report.placeholders_created, 1);

        let node = sink.types.rows.iter().find(|t| t.name.as_deref() == Some("Node")).unwrap();
        let member = sink.members.rows.iter().find(|m| m.type_id == node.id).unwrap();
        assert_eq!(member.name, "next");
    }
}
