//! Transit Namer (spec §4.3).
//!
//! Synthesizes names for unnamed `const`/`volatile`/`restrict` qualifier
//! chains. Grounded on the teacher's abbreviation-operand chain walk in
//! `read_abbrev_op`: follow a chain of wrapped values until a terminal
//! case is reached, accumulating a token at each step.

use crate::ids::{Addr, Interner};
use crate::tables::TypeTable;

const QUALIFIER_TOKENS: [(crate::tables::MetaType, &str); 3] = [
    (crate::tables::MetaType::Const, "const"),
    (crate::tables::MetaType::Volatile, "volatile"),
    (crate::tables::MetaType::Restrict, "restrict"),
];

fn qualifier_token(meta_type: crate::tables::MetaType) -> Option<&'static str> {
    QUALIFIER_TOKENS.iter().find(|(mt, _)| *mt == meta_type).map(|(_, tok)| *tok)
}

pub fn name_transit_types(types: &mut TypeTable, interner: &mut Interner) {
    let candidates: Vec<Addr> = types
        .values()
        .filter(|e| e.meta_type.is_transit() && e.name.is_none())
        .map(|e| e.addr)
        .collect();

    for addr in candidates {
        if let Some(synthesized) = synthesize_name(types, interner, addr) {
            if let Some(entry) = types.get_mut(addr) {
                entry.name = Some(interner.intern(&synthesized));
            }
        }
    }
}

/// Follows `type` edges through further transit types, in encounter
/// order, until a named type or a non-transit type is found. Returns
/// `None` if the chain terminates in something still unnamed (spec
/// §4.3).
fn synthesize_name(types: &TypeTable, interner: &Interner, start: Addr) -> Option<String> {
    let mut tokens = Vec::new();
    let mut current = start;
    // Bound the walk the same way the Reference Resolver bounds origin
    // chains: a well-formed chain is finite, and this guards against a
    // cyclic chain in malformed input.
    let mut steps_left = types.len() + 1;

    loop {
        if steps_left == 0 {
            return None;
        }
        steps_left -= 1;

        let entry = types.get(current)?;

        // The starting type is itself unnamed by construction (it's a
        // transit-namer candidate); any type reached *after* it that
        // already has a usable name is the terminal, whether or not it
        // is itself a transit type.
        if current != start {
            if let Some(name) = entry.display_name() {
                let mut out = tokens.join(" ");
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(interner.resolve(name));
                return Some(out);
            }
        }

        let token = qualifier_token(entry.meta_type)?;
        tokens.push(token);
        current = entry.ty?;
    }
}
