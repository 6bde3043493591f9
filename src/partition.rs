//! Partition Engine (spec §4.5).
//!
//! Refines the types whose names the Cycle Breaker registered in
//! `placeholder_names` into structural-equivalence classes, first by
//! local recursive signature, then by iterating a dependent-partition
//! tuple to a fixed point. Grounded on the teacher's two-phase
//! `Abbreviation`-then-`BlockInfo` resolution in `read.rs`: establish a
//! coarse grouping first, then refine it against already-resolved state.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::ids::{Addr, Interner, Name};
use crate::signature::{Signature, SignatureBuilder};
use crate::tables::{MetaType, TypeTable};

/// A merge-set is addressed by a small integer id, not by its member
/// list directly, so the fixed-point loop can compare "did a type's set
/// change" in O(1) instead of diffing vectors (spec §5: "integer-id
/// hashed to avoid per-set allocations").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MergeSetId(u32);

pub struct PartitionOutput {
    /// Every merge-set produced by Step D, representative addr first.
    pub merge_sets: Vec<Vec<Addr>>,
}

const MAX_SIGNATURE_DEPTH: u32 = 200;

pub fn partition(
    types: &mut TypeTable,
    interner: &Interner,
    placeholder_names: &std::collections::HashSet<Name>,
) -> PartitionOutput {
    let mut next_id = 0u32;
    let mut fresh_id = || {
        let id = MergeSetId(next_id);
        next_id += 1;
        id
    };

    // Step A: seed one merge-set per placeholder name.
    let mut by_name: HashMap<Name, Vec<Addr>> = HashMap::new();
    for (&addr, entry) in types.iter() {
        if entry.is_placeholder() {
            continue;
        }
        let Some(name) = entry.display_name() else { continue };
        if placeholder_names.contains(&name) {
            by_name.entry(name).or_default().push(addr);
        }
    }

    let mut sets: Vec<Vec<Addr>> = by_name.into_values().collect();
    for set in &mut sets {
        set.sort_unstable();
    }
    debug!(seed_sets = sets.len(), "partition engine: seeded merge-sets");

    // Step B: split each seed set by local recursive signature.
    let mut refined: Vec<Vec<Addr>> = Vec::new();
    for set in sets {
        let mut by_sig: HashMap<Signature, Vec<Addr>> = HashMap::new();
        for addr in set {
            let sig = recursive_signature(types, interner, addr, MAX_SIGNATURE_DEPTH);
            by_sig.entry(sig).or_default().push(addr);
        }
        refined.extend(by_sig.into_values());
    }
    trace!(sets_after_step_b = refined.len());

    // Assign initial set ids and an addr -> set-id index.
    let mut set_of: HashMap<Addr, MergeSetId> = HashMap::new();
    let mut sets: Vec<(MergeSetId, Vec<Addr>)> = refined
        .into_iter()
        .map(|members| {
            let id = fresh_id();
            for &addr in &members {
                set_of.insert(addr, id);
            }
            (id, members)
        })
        .collect();

    // Step C: refine by dependent partition tuple, iterated to a fixed
    // point.
    loop {
        let set_count_before = sets.len();
        let mut by_tuple: HashMap<(MergeSetId, Vec<MergeSetId>), Vec<Addr>> = HashMap::new();
        for (_, members) in &sets {
            for &addr in members {
                let tuple = dependent_partition_tuple(types, addr, &set_of);
                let old_set = set_of[&addr];
                by_tuple.entry((old_set, tuple)).or_default().push(addr);
            }
        }

        let mut next_sets: Vec<(MergeSetId, Vec<Addr>)> = Vec::new();
        let mut next_set_of: HashMap<Addr, MergeSetId> = HashMap::new();
        for (_, members) in by_tuple {
            let id = fresh_id();
            for &addr in &members {
                next_set_of.insert(addr, id);
            }
            next_sets.push((id, members));
        }

        sets = next_sets;
        set_of = next_set_of;

        if sets.len() == set_count_before {
            break;
        }
        trace!(set_count = sets.len(), "partition engine: step C round");
    }

    // Step D: elect a deterministic representative per set of size > 1
    // and write back replacement edges. Singleton sets are left for
    // merge.rs to elect.
    let mut merge_sets: Vec<Vec<Addr>> = Vec::new();
    for (_, mut members) in sets {
        members.sort_unstable();
        if members.len() > 1 {
            let representative = members[0];
            for &addr in &members[1..] {
                if let Some(entry) = types.get_mut(addr) {
                    entry.replaced_by = Some(representative);
                }
            }
            if let Some(entry) = types.get_mut(representative) {
                entry.chosen = true;
            }
        }
        merge_sets.push(members);
    }

    PartitionOutput { merge_sets }
}

/// Step B signature: opaque for placeholder/base/unspecified types
/// (just the name), otherwise built from `meta_type`, `declaration`, and
/// the recursive signature of every out-edge. Member offsets are folded
/// in too: they are layout-contributing (spec §9 singles out *static*
/// members as the one kind that deliberately is not), so two members
/// with the same name and type at different byte offsets must not
/// collapse into one signature.
fn recursive_signature(types: &TypeTable, interner: &Interner, addr: Addr, depth_left: u32) -> Signature {
    let Some(entry) = types.get(addr) else {
        let mut b = SignatureBuilder::new();
        b.push("dangling");
        return b.finish();
    };

    if entry.meta_type.dedups_by_name_only() {
        let mut b = SignatureBuilder::new();
        b.push("leaf");
        b.push(name_text(interner, entry.display_name()));
        return b.finish();
    }

    if depth_left == 0 {
        // A well-formed graph never recurses this deep once the Cycle
        // Breaker has run; this only guards pathological input.
        let mut b = SignatureBuilder::new();
        b.push("depth-capped");
        b.push(&format!("{:?}", entry.meta_type));
        return b.finish();
    }

    let mut b = SignatureBuilder::new();
    b.push(&format!("{:?}", entry.meta_type));
    b.push(if entry.declaration { "decl" } else { "def" });

    if let Some(ty) = entry.ty {
        let sig = recursive_signature(types, interner, ty, depth_left - 1);
        b.push(&signature_text(sig));
    }

    match &entry.slot {
        crate::tables::CommonParamSlot::Empty => {}
        crate::tables::CommonParamSlot::Members(members) => {
            for m in members {
                let sig = recursive_signature(types, interner, m.value_addr(), depth_left - 1);
                b.push(name_text(interner, m.name));
                b.push(&signature_text(sig));
                b.push(&m.offset.to_string());
            }
        }
        crate::tables::CommonParamSlot::Values(values) => {
            for v in values {
                b.push(name_text(interner, v.name));
                b.push(&v.value.to_string());
            }
        }
        crate::tables::CommonParamSlot::Params(params) => {
            for p in params {
                let sig = recursive_signature(types, interner, p.value_addr(), depth_left - 1);
                b.push(&signature_text(sig));
            }
        }
    }

    b.finish()
}

fn name_text(interner: &Interner, name: Option<Name>) -> &str {
    match name {
        Some(name) => interner.resolve(name),
        None => "<unnamed>",
    }
}

fn signature_text(sig: Signature) -> String {
    sig.to_hex()
}

/// Step C: the ordered list of merge-set identities reached by walking
/// `addr`'s out-edges, recursing through non-placeholder targets and
/// emitting the merge-set identity of the *real type* behind any
/// placeholder encountered.
fn dependent_partition_tuple(
    types: &TypeTable,
    addr: Addr,
    set_of: &HashMap<Addr, MergeSetId>,
) -> Vec<MergeSetId> {
    let mut tuple = Vec::new();
    let mut seen = std::collections::HashSet::new();
    collect_dependent_sets(types, addr, set_of, &mut tuple, &mut seen, MAX_SIGNATURE_DEPTH);
    tuple
}

fn collect_dependent_sets(
    types: &TypeTable,
    addr: Addr,
    set_of: &HashMap<Addr, MergeSetId>,
    out: &mut Vec<MergeSetId>,
    seen: &mut std::collections::HashSet<Addr>,
    depth_left: u32,
) {
    if depth_left == 0 || !seen.insert(addr) {
        return;
    }
    let Some(entry) = types.get(addr) else { return };

    if entry.is_placeholder() {
        // Recursion stops here: a placeholder's own identity carries no
        // structural information, only a pointer to the real type it cut
        // away. Emit that real type's current merge-set identity and do
        // not descend further (its further structure is exactly what the
        // placeholder exists to keep opaque at this stage).
        if let Some(real) = entry.real_type {
            if let Some(&id) = set_of.get(&real) {
                out.push(id);
            }
        }
        return;
    }

    // Non-placeholder targets are transparent: keep walking through
    // them rather than recording their own merge-set identity, so the
    // tuple reflects only where cut edges ultimately land.
    if let Some(ty) = entry.ty {
        collect_dependent_sets(types, ty, set_of, out, seen, depth_left - 1);
    }

    if entry.meta_type != MetaType::Enumeration {
        for param in entry.slot.as_slice() {
            collect_dependent_sets(types, param.value_addr(), set_of, out, seen, depth_left - 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::Interner;
    use crate::tables::{CommonParam, CommonParamSlot, TypeEntry};

    #[test]
    fn identical_shapes_merge_into_one_set() {
        let mut interner = Interner::new();
        let mut types = TypeTable::new();
        let int_name = interner.intern("int");
        let mut int_ty = TypeEntry::new(Addr::new(1), MetaType::Base);
        int_ty.name = Some(int_name);
        types.insert(int_ty);

        let s_name = interner.intern("S");
        for (addr, x_offset) in [(10u64, 0u64), (20u64, 0u64)] {
            let mut s = TypeEntry::new(Addr::new(addr), MetaType::Structure);
            s.name = Some(s_name);
            s.slot = CommonParamSlot::Members(vec![CommonParam {
                name: Some(interner.intern("x")),
                value: 1,
                offset: x_offset,
                external: false,
            }]);
            types.insert(s);
        }

        let mut names = std::collections::HashSet::new();
        names.insert(s_name);
        let out = partition(&mut types, &interner, &names);

        assert_eq!(out.merge_sets.len(), 1);
        assert_eq!(out.merge_sets[0].len(), 2);
        let representative = types.get(Addr::new(10)).unwrap();
        assert!(representative.chosen);
        let other = types.get(Addr::new(20)).unwrap();
        assert_eq!(other.replaced_by, Some(Addr::new(10)));
    }

    #[test]
    fn differing_member_offsets_split() {
        let mut interner = Interner::new();
        let mut types = TypeTable::new();
        let int_name = interner.intern("int");
        let mut int_ty = TypeEntry::new(Addr::new(1), MetaType::Base);
        int_ty.name = Some(int_name);
        types.insert(int_ty);

        let s_name = interner.intern("S");
        let mut s1 = TypeEntry::new(Addr::new(10), MetaType::Structure);
        s1.name = Some(s_name);
        s1.slot = CommonParamSlot::Members(vec![CommonParam {
            name: Some(interner.intern("x")),
            value: 1,
            offset: 0,
            external: false,
        }]);
        types.insert(s1);

        let mut s2 = TypeEntry::new(Addr::new(20), MetaType::Structure);
        s2.name = Some(s_name);
        s2.slot = CommonParamSlot::Members(vec![CommonParam {
            name: Some(interner.intern("x")),
            value: 1,
            offset: 4,
            external: false,
        }]);
        types.insert(s2);

        let mut names = std::collections::HashSet::new();
        names.insert(s_name);
        let out = partition(&mut types, &interner, &names);

        assert_eq!(out.merge_sets.len(), 2, "differing offsets must not merge");
    }
}
