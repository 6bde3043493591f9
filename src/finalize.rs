//! Finalizer (spec §4.7).
//!
//! Rewires placeholder back-pointers to chosen representatives, deletes
//! every subsumed entry, and reports anything left in neither state.
//! Grounded on `resolve.rs`'s "collect, then rewrite" discipline: one
//! read-only pass to decide what changes, one mutating pass to apply it.

use tracing::{debug, warn};

use crate::ids::Addr;
use crate::tables::TypeTable;

pub struct FinalizeOutput {
    pub deleted: usize,
    /// Addrs that ended the run neither `chosen` nor `replaced_by`-set:
    /// an upstream-bug indicator (spec §4.7 step 3), never fatal.
    pub orphaned: Vec<Addr>,
}

pub fn finalize(types: &mut TypeTable) -> FinalizeOutput {
    redirect_placeholder_real_types(types);

    let orphaned: Vec<Addr> = types
        .values()
        .filter(|e| !e.is_placeholder() && !e.chosen && e.replaced_by.is_none())
        .map(|e| e.addr)
        .collect();
    for &addr in &orphaned {
        warn!(?addr, "type survived finalization neither chosen nor replaced");
    }

    let dead: Vec<Addr> = types.values().filter(|e| e.replaced_by.is_some()).map(|e| e.addr).collect();
    for addr in &dead {
        types.remove(*addr);
    }

    debug!(deleted = dead.len(), orphaned = orphaned.len(), "finalizer done");
    FinalizeOutput { deleted: dead.len(), orphaned }
}

/// Step 1: for each placeholder, if its `real_type` has itself been
/// subsumed, follow `replaced_by` to the eventual chosen representative.
/// Logs (rather than aborts) if the final target still isn't chosen
/// (spec §7: "assertion failure in Finalizer ... log and keep original
/// `real_type`").
fn redirect_placeholder_real_types(types: &mut TypeTable) {
    let rewrites: Vec<(Addr, Addr)> = types
        .values()
        .filter(|e| e.is_placeholder())
        .filter_map(|e| {
            let real = e.real_type?;
            let resolved = follow_replaced_by(types, real);
            (resolved != real).then_some((e.addr, resolved))
        })
        .collect();

    for (placeholder, resolved) in rewrites {
        if let Some(entry) = types.get_mut(placeholder) {
            entry.real_type = Some(resolved);
        }
    }

    for entry in types.values() {
        if !entry.is_placeholder() {
            continue;
        }
        let Some(real) = entry.real_type else { continue };
        match types.get(real) {
            Some(target) if target.chosen => {}
            Some(_) => warn!(
                placeholder = ?entry.addr,
                real_type = ?real,
                "placeholder's real_type resolved to a non-chosen type; leaving as-is"
            ),
            None => warn!(
                placeholder = ?entry.addr,
                real_type = ?real,
                "placeholder's real_type does not exist; leaving as-is"
            ),
        }
    }
}

fn follow_replaced_by(types: &TypeTable, mut addr: Addr) -> Addr {
    let mut steps_left = types.len() + 1;
    while steps_left > 0 {
        match types.get(addr) {
            Some(entry) if entry.replaced_by.is_some() => addr = entry.replaced_by.unwrap(),
            _ => return addr,
        }
        steps_left -= 1;
    }
    addr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::{MetaType, TypeEntry};

    #[test]
    fn replaced_entries_are_deleted() {
        let mut types = TypeTable::new();
        let mut a = TypeEntry::new(Addr::new(1), MetaType::Base);
        a.chosen = true;
        types.insert(a);
        let mut b = TypeEntry::new(Addr::new(2), MetaType::Base);
        b.replaced_by = Some(Addr::new(1));
        types.insert(b);

        let out = finalize(&mut types);
        assert_eq!(out.deleted, 1);
        assert!(types.get(Addr::new(2)).is_none());
        assert!(types.get(Addr::new(1)).is_some());
    }

    #[test]
    fn placeholder_real_type_follows_replacement_chain() {
        let mut types = TypeTable::new();
        let mut chosen = TypeEntry::new(Addr::new(1), MetaType::Structure);
        chosen.chosen = true;
        types.insert(chosen);
        let mut replaced = TypeEntry::new(Addr::new(2), MetaType::Structure);
        replaced.replaced_by = Some(Addr::new(1));
        types.insert(replaced);

        let mut ph = TypeEntry::new(Addr::new(3).as_placeholder(), MetaType::Placeholder);
        ph.real_type = Some(Addr::new(2));
        ph.chosen = true;
        types.insert(ph);

        finalize(&mut types);
        let ph = types.get(Addr::new(3).as_placeholder()).unwrap();
        assert_eq!(ph.real_type, Some(Addr::new(1)));
    }
}
