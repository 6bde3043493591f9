//! `mk-dwarf-db` (spec §6): the command-surface stand-in for the real
//! external CLI. Reads a newline-delimited-JSON file of [`DieRecord`]s,
//! runs the full pipeline, and dumps the output tables as JSON.
//!
//! Grounded on the clap-derive CLI pattern used throughout the
//! binary-analysis corpus (e.g. `wasmerio-wasmer`'s `cli-compiler`): a
//! derived `Parser` struct, no hand-rolled argument loop.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use dwarf_typegraph::die::DieRecord;
use dwarf_typegraph::pipeline::{self, PipelineConfig};
use dwarf_typegraph::sink::InMemorySink;

/// Build a compact, queryable call-graph/type-graph database from a
/// stream of DWARF debug information entries.
#[derive(Parser, Debug)]
#[command(name = "mk-dwarf-db", about = "Canonicalize DWARF debug info into a queryable database")]
struct Args {
    /// Path to the output database file (written as JSON; the real
    /// persistence layer is an external collaborator, spec §1).
    #[arg(long = "output", value_name = "FILE")]
    output: PathBuf,

    /// Newline-delimited-JSON file of `DieRecord`s standing in for the
    /// real DWARF-decoder output (spec §6 input contract).
    input: PathBuf,

    /// Cut the first cuttable pointer on a cycle instead of the last
    /// (spec §9 open question; for parity checks against legacy runs).
    #[arg(long)]
    first_cuttable_pointer: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("mk-dwarf-db: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let records = read_records(&args.input)?;

    let config = PipelineConfig {
        cycle_breaker: dwarf_typegraph::cycle::CycleBreakerConfig {
            prefer_first_pointer: args.first_cuttable_pointer,
            progress_every: 10_000,
        },
    };

    let mut sink = InMemorySink::default();
    let report = pipeline::run(&records, config, &mut sink)?;

    tracing::info!(
        types_ingested = report.types_ingested,
        subprograms_ingested = report.subprograms_ingested,
        placeholders_created = report.placeholders_created,
        merge_sets = report.merge_sets,
        merge_rounds = report.merge_rounds,
        deleted = report.deleted,
        orphaned = report.orphaned,
        "pipeline run complete"
    );

    let mut out = File::create(&args.output)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&sink.symbols.rows)?)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&sink.calls.rows)?)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&sink.types.rows)?)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&sink.members.rows)?)?;
    Ok(())
}

fn read_records(path: &PathBuf) -> Result<Vec<DieRecord>, Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
