//! Sink (spec §4.8 / §6): the output store boundary.
//!
//! Persistence to a real relational store is an external collaborator
//! (spec §1); this module defines the four output tables and the
//! flattening from the in-memory type/subprogram graph into them, behind
//! a `Sink` trait so a real persistence layer can be swapped in without
//! touching the pipeline driver. Grounded on the teacher's `BlockInfo`
//! struct (`schema/blocks.rs`): a plain, data-holding record assembled
//! across a pass and handed to a caller, not itself an I/O type.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::ids::{Addr, Interner, VOID_ADDR};
use crate::tables::{CommonParamSlot, MetaType, SubprogramTable, TypeTable};

#[derive(Clone, Debug, Serialize)]
pub struct SymbolRow {
    pub id: u32,
    pub name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct CallRow {
    pub caller: u32,
    pub callee: u32,
}

#[derive(Clone, Debug, Serialize)]
pub struct TypeRow {
    pub id: u32,
    pub name: Option<String>,
    pub addr: u64,
    pub meta_type: MetaType,
    pub declaration: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct MemberRow {
    pub type_id: u32,
    pub name: String,
    pub r#type: u32,
    pub offset: u64,
}

impl Serialize for MetaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{self:?}"))
    }
}

#[derive(Default, Debug)]
pub struct SymbolsTable {
    pub rows: Vec<SymbolRow>,
}

#[derive(Default, Debug)]
pub struct CallsTable {
    pub rows: Vec<CallRow>,
}

#[derive(Default, Debug)]
pub struct TypesTable {
    pub rows: Vec<TypeRow>,
}

#[derive(Default, Debug)]
pub struct MembersTable {
    pub rows: Vec<MemberRow>,
}

/// The boundary a real persistence layer implements (spec §1: "out of
/// scope ... persistence to the output store"). `InMemorySink` is the one
/// concrete implementation this crate carries, used by the demo binary
/// and by tests that want to inspect the emitted tables directly.
pub trait Sink {
    fn write_symbols(&mut self, table: SymbolsTable);
    fn write_calls(&mut self, table: CallsTable);
    fn write_types(&mut self, table: TypesTable);
    fn write_members(&mut self, table: MembersTable);
}

#[derive(Default, Debug)]
pub struct InMemorySink {
    pub symbols: SymbolsTable,
    pub calls: CallsTable,
    pub types: TypesTable,
    pub members: MembersTable,
}

impl Sink for InMemorySink {
    fn write_symbols(&mut self, table: SymbolsTable) {
        self.symbols = table;
    }
    fn write_calls(&mut self, table: CallsTable) {
        self.calls = table;
    }
    fn write_types(&mut self, table: TypesTable) {
        self.types = table;
    }
    fn write_members(&mut self, table: MembersTable) {
        self.members = table;
    }
}

/// Flattens the finalized tables and hands the four output tables to
/// `sink`. Placeholders are never persisted (spec §6); any edge to one
/// resolves through `real_type` first.
pub fn emit(types: &TypeTable, subprograms: &SubprogramTable, interner: &Interner, sink: &mut dyn Sink) {
    emit_symbols_and_calls(subprograms, interner, sink);
    emit_types_and_members(types, interner, sink);
}

fn emit_symbols_and_calls(subprograms: &SubprogramTable, interner: &Interner, sink: &mut dyn Sink) {
    let mut originals: Vec<_> = subprograms.values().filter(|s| s.is_original()).collect();
    originals.sort_unstable_by_key(|s| s.addr);

    let mut symbol_id_of: HashMap<Addr, u32> = HashMap::new();
    // Persistence conflict (spec §7): a duplicate symbol name keeps the
    // first one seen; later duplicates still get an addr->id mapping (so
    // their calls resolve) but contribute no second row.
    let mut seen_names: HashMap<&str, u32> = HashMap::new();
    let mut rows = Vec::new();

    for sub in &originals {
        let Some(name) = sub.display_name() else { continue };
        let text = interner.resolve(name);
        let id = match seen_names.get(text) {
            Some(&existing) => existing,
            None => {
                let id = u32::try_from(rows.len()).expect("symbol count fits u32");
                rows.push(SymbolRow { id, name: text.to_string() });
                seen_names.insert(text, id);
                id
            }
        };
        symbol_id_of.insert(sub.addr, id);
    }

    let mut call_rows = Vec::new();
    for sub in &originals {
        let Some(&caller_id) = symbol_id_of.get(&sub.addr) else { continue };
        for &callee in &sub.calls {
            if let Some(&callee_id) = symbol_id_of.get(&callee) {
                call_rows.push(CallRow { caller: caller_id, callee: callee_id });
            }
        }
    }

    sink.write_symbols(SymbolsTable { rows });
    sink.write_calls(CallsTable { rows: call_rows });
}

fn emit_types_and_members(types: &TypeTable, interner: &Interner, sink: &mut dyn Sink) {
    // The reserved `void` type always exists (spec §3), but an empty or
    // void-free input has nothing pointing at it; emitting it anyway
    // would violate the "empty input -> empty output tables" boundary
    // (spec §8), so it is dropped unless some surviving entry's edge
    // resolves to it.
    let referenced = referenced_targets(types);
    let mut survivors: Vec<_> = types
        .values()
        .filter(|e| !e.is_placeholder() && (e.addr != VOID_ADDR || referenced.contains(&VOID_ADDR)))
        .collect();
    survivors.sort_unstable_by_key(|e| e.addr);

    let mut type_id_of: HashMap<Addr, u32> = HashMap::new();
    for entry in &survivors {
        let id = u32::try_from(type_id_of.len()).expect("type count fits u32");
        type_id_of.insert(entry.addr, id);
    }

    let mut type_rows = Vec::with_capacity(survivors.len());
    let mut member_rows = Vec::new();

    for entry in &survivors {
        let id = type_id_of[&entry.addr];
        type_rows.push(TypeRow {
            id,
            name: entry.display_name().map(|n| interner.resolve(n).to_string()),
            addr: entry.addr.0,
            meta_type: entry.meta_type,
            declaration: entry.declaration,
        });

        // The single `type` edge of typedef/qualifier/pointer/array/
        // enumeration-base becomes one member row with empty name and
        // offset 0 (spec §6).
        if let Some(ty) = entry.ty {
            if let Some(resolved_id) = resolve_type_id(types, &type_id_of, ty) {
                member_rows.push(MemberRow { type_id: id, name: String::new(), r#type: resolved_id, offset: 0 });
            }
        }

        match &entry.slot {
            CommonParamSlot::Empty => {}
            CommonParamSlot::Members(members) => {
                for m in members {
                    let Some(resolved_id) = resolve_type_id(types, &type_id_of, m.value_addr()) else { continue };
                    member_rows.push(MemberRow {
                        type_id: id,
                        name: m.name.map(|n| interner.resolve(n).to_string()).unwrap_or_default(),
                        r#type: resolved_id,
                        offset: m.offset,
                    });
                }
            }
            CommonParamSlot::Values(_) => {
                // Enumerator values are integers, not type edges; the
                // spec's output contract flattens struct/union/subroutine
                // edges into `members`, and enumerators have none to
                // flatten beyond the enumeration's own base-type edge
                // (already emitted above).
            }
            CommonParamSlot::Params(params) => {
                for (i, p) in params.iter().enumerate() {
                    let Some(resolved_id) = resolve_type_id(types, &type_id_of, p.value_addr()) else { continue };
                    member_rows.push(MemberRow { type_id: id, name: i.to_string(), r#type: resolved_id, offset: 0 });
                }
            }
        }
    }

    sink.write_types(TypesTable { rows: type_rows });
    sink.write_members(MembersTable { rows: member_rows });
}

/// Collects every addr that some non-placeholder entry's `type` edge
/// resolves to (through a placeholder's `real_type` if need be). Used
/// only to decide whether the reserved `void` entry has any incoming
/// edge worth persisting for.
fn referenced_targets(types: &TypeTable) -> HashSet<Addr> {
    let mut referenced = HashSet::new();
    for entry in types.values() {
        if entry.is_placeholder() {
            continue;
        }
        if let Some(ty) = entry.ty {
            referenced.insert(resolve_through_placeholder(types, ty));
        }
        match &entry.slot {
            CommonParamSlot::Empty | CommonParamSlot::Values(_) => {}
            CommonParamSlot::Members(members) => {
                for m in members {
                    referenced.insert(resolve_through_placeholder(types, m.value_addr()));
                }
            }
            CommonParamSlot::Params(params) => {
                for p in params {
                    referenced.insert(resolve_through_placeholder(types, p.value_addr()));
                }
            }
        }
    }
    referenced
}

fn resolve_through_placeholder(types: &TypeTable, addr: Addr) -> Addr {
    match types.get(addr) {
        Some(entry) if entry.is_placeholder() => entry.real_type.unwrap_or(addr),
        _ => addr,
    }
}

/// Resolves a type edge to its output id, following a placeholder's
/// `real_type` transparently (spec §6: "placeholders are not persisted;
/// any incoming edge ... resolves through `real_type` at persistence
/// time").
fn resolve_type_id(types: &TypeTable, type_id_of: &HashMap<Addr, u32>, target: Addr) -> Option<u32> {
    let entry = types.get(target)?;
    if entry.is_placeholder() {
        let real = entry.real_type?;
        return type_id_of.get(&real).copied();
    }
    type_id_of.get(&target).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{CommonParam, TypeEntry};

    #[test]
    fn placeholder_edges_resolve_through_real_type() {
        let mut interner = Interner::new();
        let mut types = TypeTable::new();

        let node_name = interner.intern("Node");
        let mut node = TypeEntry::new(Addr::new(1), MetaType::Structure);
        node.name = Some(node_name);
        node.chosen = true;
        node.slot = CommonParamSlot::Members(vec![CommonParam {
            name: Some(interner.intern("next")),
            value: 2,
            offset: 0,
            external: false,
        }]);
        types.insert(node);

        let mut ptr = TypeEntry::new(Addr::new(2), MetaType::Pointer);
        ptr.chosen = true;
        ptr.ty = Some(Addr::new(1).as_placeholder());
        types.insert(ptr);

        let mut ph = TypeEntry::new(Addr::new(1).as_placeholder(), MetaType::Placeholder);
        ph.name = Some(node_name);
        ph.real_type = Some(Addr::new(1));
        ph.chosen = true;
        types.insert(ph);

        let subprograms = SubprogramTable::new();
        let mut sink = InMemorySink::default();
        emit(&types, &subprograms, &interner, &mut sink);

        assert_eq!(sink.types.rows.len(), 2, "placeholder itself is not persisted");
        let ptr_row = sink.members.rows.iter().find(|m| m.name.is_empty()).unwrap();
        let node_id = sink.types.rows.iter().find(|t| t.meta_type == MetaType::Structure).unwrap().id;
        assert_eq!(ptr_row.r#type, node_id);
    }

    #[test]
    fn duplicate_symbol_names_keep_the_first() {
        use crate::tables::Subprogram;
        let mut interner = Interner::new();
        let name = interner.intern("foo");
        let mut subs = SubprogramTable::new();
        let mut a = Subprogram::new(Addr::new(1));
        a.name = Some(name);
        subs.insert(a);
        let mut b = Subprogram::new(Addr::new(2));
        b.name = Some(name);
        subs.insert(b);

        let types = TypeTable::new();
        let mut sink = InMemorySink::default();
        emit(&types, &subs, &interner, &mut sink);
        assert_eq!(sink.symbols.rows.len(), 1);
    }
}
