//! Reference Resolver (spec §4.2).
//!
//! Three independent passes over the tables ingestion produced. Grounded
//! on the teacher's `read_block_info_block`: build an index over one flat
//! structure, then rewrite in place using it.

use std::collections::HashMap;

use crate::ids::{Addr, Name};
use crate::tables::{MetaType, SubprogramTable, TypeTable};

/// Runs all three resolver passes. Missing origin/specification targets
/// are not fatal (spec §4.2 failure model): the entry is simply left as
/// it was.
pub fn resolve(types: &mut TypeTable, subprograms: &mut SubprogramTable) {
    redirect_calls_to_origin(subprograms);
    borrow_name_from_specification(subprograms);
    replace_declarations_with_definitions(types);
}

/// Pass 1: walk each callee through `origin` chains until an original is
/// reached, overwriting in place.
fn redirect_calls_to_origin(subprograms: &mut SubprogramTable) {
    let addrs = subprograms.addrs();
    let mut resolved: HashMap<Addr, Vec<Addr>> = HashMap::new();
    for &addr in &addrs {
        let calls = subprograms.get(addr).expect("addr from addrs()").calls.clone();
        let mut new_calls = Vec::with_capacity(calls.len());
        for callee in calls {
            new_calls.push(follow_origin_chain(subprograms, callee));
        }
        resolved.insert(addr, new_calls);
    }
    for (addr, calls) in resolved {
        if let Some(sub) = subprograms.get_mut(addr) {
            sub.calls = calls;
        }
    }
}

fn follow_origin_chain(subprograms: &SubprogramTable, mut addr: Addr) -> Addr {
    // Bound the walk by the table size: a well-formed origin chain is
    // acyclic and at most this long, and a cycle here would otherwise
    // loop forever on malformed input (spec §4.2 tolerates missing
    // targets, not infinite ones).
    let mut steps_left = subprograms.len() + 1;
    while steps_left > 0 {
        match subprograms.get(addr) {
            Some(sub) if sub.origin.is_some() => addr = sub.origin.unwrap(),
            _ => return addr,
        }
        steps_left -= 1;
    }
    addr
}

/// Pass 2: if a subprogram is unnamed but has a `specification` link,
/// copy the specification's name.
fn borrow_name_from_specification(subprograms: &mut SubprogramTable) {
    let addrs = subprograms.addrs();
    let mut borrowed: Vec<(Addr, Name)> = Vec::new();
    for &addr in &addrs {
        let sub = subprograms.get(addr).expect("addr from addrs()");
        if sub.name.is_some() || sub.linkage_name.is_some() {
            continue;
        }
        let Some(spec) = sub.specification else { continue };
        if let Some(spec_sub) = subprograms.get(spec) {
            if let Some(name) = spec_sub.display_name() {
                borrowed.push((addr, name));
            }
        }
    }
    for (addr, name) in borrowed {
        if let Some(sub) = subprograms.get_mut(addr) {
            sub.name = Some(name);
        }
    }
}

/// Pass 3: build a `(meta_type, name)` index over non-declaration types;
/// redirect every non-declaration type's out-edges pointing at a
/// declaration whose `(meta_type, name)` matches the index; drop
/// declarations no longer referenced by anyone.
fn replace_declarations_with_definitions(types: &mut TypeTable) {
    let mut index: HashMap<(MetaType, Name), Addr> = HashMap::new();
    for (&addr, entry) in types.iter() {
        if !entry.declaration {
            if let Some(name) = entry.display_name() {
                index.insert((entry.meta_type, name), addr);
            }
        }
    }
    if index.is_empty() {
        return;
    }

    // Which addrs are declarations with a matching definition, so we can
    // rewrite edges pointing at them.
    let mut declaration_to_definition: HashMap<Addr, Addr> = HashMap::new();
    for (&addr, entry) in types.iter() {
        if entry.declaration {
            if let Some(name) = entry.display_name() {
                if let Some(&definition) = index.get(&(entry.meta_type, name)) {
                    if definition != addr {
                        declaration_to_definition.insert(addr, definition);
                    }
                }
            }
        }
    }
    if declaration_to_definition.is_empty() {
        return;
    }

    for (_, entry) in types.iter_mut() {
        if let Some(ty) = entry.ty {
            if let Some(&definition) = declaration_to_definition.get(&ty) {
                entry.ty = Some(definition);
            }
        }
        for param in entry.slot.as_mut_slice() {
            let target = param.value_addr();
            if let Some(&definition) = declaration_to_definition.get(&target) {
                param.value = definition.0 as i64;
            }
        }
    }

    let mut referenced: std::collections::HashSet<Addr> = std::collections::HashSet::new();
    for (_, entry) in types.iter() {
        if let Some(ty) = entry.ty {
            referenced.insert(ty);
        }
        for param in entry.slot.as_slice() {
            referenced.insert(param.value_addr());
        }
    }

    let dead: Vec<Addr> = declaration_to_definition
        .keys()
        .copied()
        .filter(|addr| !referenced.contains(addr))
        .collect();
    for addr in dead {
        types.remove(addr);
    }
}
