//! Acyclic Merger (spec §4.6).
//!
//! Processes every type, including those never touched by the Partition
//! Engine, bottom-up by shallow signature until a round produces no
//! change. Grounded on `partition.rs`'s `SignatureBuilder` usage — the
//! shallow signature shares the exact same hashing machinery, just fed
//! literal out-edge addrs instead of recursive signatures (spec §4.6:
//! "no recursion needed because targets are already canonical").

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::ids::{Addr, Interner, Name};
use crate::signature::{Signature, SignatureBuilder};
use crate::tables::{CommonParamSlot, MetaType, TypeTable};

pub struct MergeOutput {
    /// Count of rounds the fixed-point loop took, for progress reporting.
    pub rounds: u32,
}

/// Runs the Acyclic Merger to a fixed point over `types`.
pub fn merge(types: &mut TypeTable, interner: &Interner) -> MergeOutput {
    bootstrap_leaves(types);

    let mut rounds = 0u32;
    loop {
        rounds += 1;
        let changed = merge_round(types, interner);
        trace!(round = rounds, changed, "acyclic merger round");
        if !changed {
            break;
        }
    }
    debug!(rounds, "acyclic merger reached fixed point");
    MergeOutput { rounds }
}

/// Bootstraps `chosen` on `base`/`unspecified`/`placeholder` types (spec
/// §4.6): base and unspecified types dedup by name, placeholders are
/// already `chosen` from the Cycle Breaker and are left untouched.
fn bootstrap_leaves(types: &mut TypeTable) {
    let mut by_key: HashMap<(MetaType, Option<Name>), Addr> = HashMap::new();
    let mut replacements: Vec<(Addr, Addr)> = Vec::new();

    let mut addrs: Vec<Addr> = types
        .values()
        .filter(|e| e.meta_type.dedups_by_name_only() && !e.is_placeholder())
        .map(|e| e.addr)
        .collect();
    addrs.sort_unstable();

    for addr in addrs {
        let entry = types.get(addr).expect("addr from values()");
        let key = (entry.meta_type, entry.display_name());
        match by_key.get(&key) {
            Some(&canonical) => replacements.push((addr, canonical)),
            None => {
                by_key.insert(key, addr);
            }
        }
    }

    for &canonical in by_key.values() {
        if let Some(entry) = types.get_mut(canonical) {
            entry.chosen = true;
        }
    }
    for (addr, canonical) in replacements {
        if let Some(entry) = types.get_mut(addr) {
            entry.replaced_by = Some(canonical);
        }
    }
}

/// One round: rewrite replaced out-edges, then try to canonicalize every
/// type whose out-edges are now all `chosen`. Returns whether anything
/// changed, which is the fixed-point loop's termination signal.
fn merge_round(types: &mut TypeTable, interner: &Interner) -> bool {
    let mut changed = false;

    let addrs: Vec<Addr> = types.values().map(|e| e.addr).collect();
    for &addr in &addrs {
        changed |= rewrite_replaced_edges(types, addr);
    }

    let candidates: Vec<Addr> = types
        .values()
        .filter(|e| !e.chosen && e.replaced_by.is_none() && !e.is_placeholder())
        .map(|e| e.addr)
        .collect();

    let mut dictionary: HashMap<Signature, Addr> = HashMap::new();
    for entry in types.values() {
        if entry.chosen {
            if let Some(sig) = try_shallow_signature(types, interner, entry.addr) {
                dictionary.entry(sig).or_insert(entry.addr);
            }
        }
    }

    for addr in candidates {
        if !all_out_edges_resolved(types, addr) {
            continue;
        }
        let Some(sig) = try_shallow_signature(types, interner, addr) else { continue };
        match dictionary.get(&sig) {
            Some(&canonical) if canonical != addr => {
                if let Some(entry) = types.get_mut(addr) {
                    entry.replaced_by = Some(canonical);
                }
                changed = true;
            }
            _ => {
                if let Some(entry) = types.get_mut(addr) {
                    entry.chosen = true;
                }
                dictionary.insert(sig, addr);
                changed = true;
            }
        }
    }

    changed
}

/// Rewrites `addr`'s out-edges that point at an already-replaced type to
/// point at its replacement instead. Returns whether anything changed.
fn rewrite_replaced_edges(types: &mut TypeTable, addr: Addr) -> bool {
    let mut changed = false;

    let ty_replacement = types.get(addr).and_then(|e| e.ty).and_then(|t| types.get(t)?.replaced_by);
    let param_replacements: Vec<(usize, Addr)> = {
        let Some(entry) = types.get(addr) else { return false };
        entry
            .slot
            .as_slice()
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                if matches!(entry.slot, CommonParamSlot::Values(_)) {
                    return None;
                }
                let target = types.get(p.value_addr())?;
                target.replaced_by.map(|r| (i, r))
            })
            .collect()
    };

    if let Some(replacement) = ty_replacement {
        if let Some(entry) = types.get_mut(addr) {
            entry.ty = Some(replacement);
            changed = true;
        }
    }
    if !param_replacements.is_empty() {
        if let Some(entry) = types.get_mut(addr) {
            let slice = entry.slot.as_mut_slice();
            for (i, replacement) in param_replacements {
                slice[i].value = replacement.0 as i64;
            }
            changed = true;
        }
    }

    changed
}

/// `true` once every out-edge of `addr` resolves to a `chosen` type or a
/// placeholder (spec §4.6 readiness condition).
fn all_out_edges_resolved(types: &TypeTable, addr: Addr) -> bool {
    let Some(entry) = types.get(addr) else { return false };
    let resolved = |target: Addr| -> bool {
        types.get(target).map(|t| t.chosen || t.is_placeholder()).unwrap_or(false)
    };
    if let Some(ty) = entry.ty {
        if !resolved(ty) {
            return false;
        }
    }
    if entry.meta_type != MetaType::Enumeration {
        for param in entry.slot.as_slice() {
            if !resolved(param.value_addr()) {
                return false;
            }
        }
    }
    true
}

/// The shallow signature (spec §4.6): `meta_type`, name, and each
/// out-edge's target addr literally — no recursion, since by
/// construction every target here is already canonical. Pointer-family
/// types short-circuit to `"<pointer>:target"`. Returns `None` if an
/// out-edge is not actually resolved yet (defensive; callers already
/// check [`all_out_edges_resolved`]).
fn try_shallow_signature(types: &TypeTable, interner: &Interner, addr: Addr) -> Option<Signature> {
    let entry = types.get(addr)?;

    if entry.meta_type.is_pointer_family() {
        let mut b = SignatureBuilder::new();
        b.push("<pointer>");
        b.push(&format!("{:?}", entry.meta_type));
        if let Some(ty) = entry.ty {
            b.push(&addr_text(ty));
        }
        return Some(b.finish());
    }

    let mut b = SignatureBuilder::new();
    b.push(&format!("{:?}", entry.meta_type));
    b.push(name_text(interner, entry.display_name()));
    b.push(if entry.declaration { "decl" } else { "def" });

    if let Some(ty) = entry.ty {
        b.push(&addr_text(ty));
    }

    match &entry.slot {
        CommonParamSlot::Empty => {}
        CommonParamSlot::Members(members) => {
            for m in members {
                b.push(name_text(interner, m.name));
                b.push(&addr_text(m.value_addr()));
                b.push(&m.offset.to_string());
            }
        }
        CommonParamSlot::Values(values) => {
            for v in values {
                b.push(name_text(interner, v.name));
                b.push(&v.value.to_string());
            }
        }
        CommonParamSlot::Params(params) => {
            for p in params {
                b.push(&addr_text(p.value_addr()));
            }
        }
    }

    Some(b.finish())
}

fn name_text(interner: &Interner, name: Option<Name>) -> &str {
    match name {
        Some(name) => interner.resolve(name),
        None => "<unnamed>",
    }
}

fn addr_text(addr: Addr) -> String {
    format!("{:#x}", addr.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::TypeEntry;

    #[test]
    fn identical_typedef_chains_merge() {
        let mut interner = Interner::new();
        let mut types = TypeTable::new();
        let int_name = interner.intern("int");

        let mut int1 = TypeEntry::new(Addr::new(1), MetaType::Base);
        int1.name = Some(int_name);
        types.insert(int1);
        let mut int2 = TypeEntry::new(Addr::new(2), MetaType::Base);
        int2.name = Some(int_name);
        types.insert(int2);

        let mut td1 = TypeEntry::new(Addr::new(10), MetaType::Typedef);
        td1.name = Some(interner.intern("myint"));
        td1.ty = Some(Addr::new(1));
        types.insert(td1);

        let mut td2 = TypeEntry::new(Addr::new(20), MetaType::Typedef);
        td2.name = Some(interner.intern("myint"));
        td2.ty = Some(Addr::new(2));
        types.insert(td2);

        merge(&mut types, &interner);

        assert!(types.get(Addr::new(1)).unwrap().chosen);
        assert_eq!(types.get(Addr::new(2)).unwrap().replaced_by, Some(Addr::new(1)));

        // Exactly one typedef survives as chosen.
        let td1 = types.get(Addr::new(10)).unwrap();
        let td2 = types.get(Addr::new(20)).unwrap();
        let chosen_count = [td1, td2].iter().filter(|e| e.chosen).count();
        assert_eq!(chosen_count, 1);
        let replaced_count = [td1, td2].iter().filter(|e| e.replaced_by.is_some()).count();
        assert_eq!(replaced_count, 1);
    }

    #[test]
    fn placeholder_is_never_reconsidered() {
        let mut interner = Interner::new();
        let mut types = TypeTable::new();
        let ph_name = interner.intern("Node");
        let mut ph = TypeEntry::new(Addr::new(1).as_placeholder(), MetaType::Placeholder);
        ph.name = Some(ph_name);
        ph.real_type = Some(Addr::new(99));
        ph.chosen = true;
        types.insert(ph);

        merge(&mut types, &interner);
        let ph = types.get(Addr::new(1).as_placeholder()).unwrap();
        assert!(ph.chosen);
        assert!(ph.replaced_by.is_none());
    }
}
