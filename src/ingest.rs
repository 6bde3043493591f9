//! DIE Ingestor (spec §4.1).
//!
//! Linearizes the DIE stream into the `Types` and `Subprograms` tables.
//! Grounded on the teacher's `BlockIter::next` (`read.rs`): a stack
//! indexed by depth, popped to the current depth on every record before a
//! new frame is pushed, dispatching on the record's kind exactly the way
//! `BlockIter` dispatches on `BuiltinAbbreviationId`.

use crate::die::{AttrValue, DieRecord, Tag};
use crate::error::PipelineError;
use crate::ids::{Addr, Interner, VOID_ADDR};
use crate::tables::{CommonParam, CommonParamKind, MetaType, Subprogram, SubprogramTable, TypeEntry, TypeTable};

/// One entry on the Ingestor's depth-indexed stack.
enum Frame {
    /// A DIE that opened a [`TypeEntry`]; children attach to it via the
    /// tagged-slot discipline.
    Type(Addr),
    /// A DIE that opened a [`Subprogram`]; children may record call
    /// edges on it.
    Subprogram(Addr),
    /// A namespace: contributes a `NS::` prefix to descendant names.
    Namespace(String),
    /// Anything else: an opaque marker that only exists to keep the
    /// depth stack balanced (spec §4.1: "unknown tags become opaque
    /// stack markers").
    Opaque,
}

/// Output of ingestion: the two tables plus bookkeeping the Reference
/// Resolver needs (deferred-origin call edges, subprograms that ended up
/// unnamed).
pub struct IngestOutput {
    pub types: TypeTable,
    pub subprograms: SubprogramTable,
}

struct Ingestor<'a> {
    types: TypeTable,
    subprograms: SubprogramTable,
    interner: &'a mut Interner,
    stack: Vec<Frame>,
}

pub fn ingest(records: &[DieRecord], interner: &mut Interner) -> Result<IngestOutput, PipelineError> {
    let mut state = Ingestor {
        types: TypeTable::new(),
        subprograms: SubprogramTable::new(),
        interner,
        stack: Vec::new(),
    };

    // The reserved `void` type always exists (spec §3 ingestion-exit
    // invariant), independent of whether the stream happens to mention it.
    let void_name = state.interner.intern("void");
    let mut void_entry = TypeEntry::new(VOID_ADDR, MetaType::Base);
    void_entry.name = Some(void_name);
    state.types.insert(void_entry);

    for record in records {
        state.visit(record)?;
    }

    state.finish_unnamed_subprograms();
    state.move_origin_call_edges();

    Ok(IngestOutput {
        types: state.types,
        subprograms: state.subprograms,
    })
}

impl<'a> Ingestor<'a> {
    fn namespace_prefix(&self) -> String {
        let mut prefix = String::new();
        for frame in &self.stack {
            if let Frame::Namespace(name) = frame {
                prefix.push_str(name);
                prefix.push_str("::");
            }
        }
        prefix
    }

    fn enclosing_type(&mut self) -> Option<Addr> {
        self.stack.iter().rev().find_map(|f| match f {
            Frame::Type(addr) => Some(*addr),
            _ => None,
        })
    }

    fn enclosing_subprogram(&self) -> Option<Addr> {
        self.stack.iter().rev().find_map(|f| match f {
            Frame::Subprogram(addr) => Some(*addr),
            _ => None,
        })
    }

    fn visit(&mut self, record: &DieRecord) -> Result<(), PipelineError> {
        // Pop to the record's depth: every closing marker reduces depth
        // by one, so the stack's length after popping equals the
        // record's depth (spec §4.1).
        let target_len = record.depth as usize;
        if self.stack.len() < target_len {
            return Err(PipelineError::DepthUnderflow { at_offset: record.offset });
        }
        self.stack.truncate(target_len);

        if let Some(meta_type) = MetaType::from_tag(record.tag) {
            self.visit_type(record, meta_type)?;
        } else {
            match record.tag {
                Tag::Subprogram | Tag::InlinedSubroutine => self.visit_subprogram(record)?,
                Tag::Member | Tag::Enumerator | Tag::FormalParameter => {
                    self.visit_common_param(record)?
                }
                Tag::Namespace => self.visit_namespace(record),
                Tag::CallSite => self.visit_call_site(record),
                Tag::BaseType
                | Tag::UnspecifiedType
                | Tag::Typedef
                | Tag::ConstType
                | Tag::VolatileType
                | Tag::RestrictType
                | Tag::PointerType
                | Tag::PtrToMemberType
                | Tag::ReferenceType
                | Tag::RvalueReferenceType
                | Tag::ArrayType
                | Tag::StructureType
                | Tag::ClassType
                | Tag::UnionType
                | Tag::EnumerationType
                | Tag::SubroutineType
                | Tag::Other => self.stack.push(Frame::Opaque),
            }
        }
        Ok(())
    }

    fn visit_type(&mut self, record: &DieRecord, meta_type: MetaType) -> Result<(), PipelineError> {
        let addr = Addr::new(record.offset);
        let mut entry = TypeEntry::new(addr, meta_type);
        entry.declaration = record
            .attributes
            .get("declaration")
            .map(AttrValue::as_flag)
            .unwrap_or(false);

        let prefix = self.namespace_prefix();
        if let Some(name) = record.attributes.get("name").and_then(AttrValue::as_str) {
            let full = if prefix.is_empty() { name.to_string() } else { format!("{prefix}{name}") };
            entry.name = Some(self.interner.intern(&full));
        }
        if let Some(name) = record.attributes.get("linkage_name").and_then(AttrValue::as_str) {
            entry.linkage_name = Some(self.interner.intern(name));
        }

        // Pointer/qualifier/reference types default their out-edge to
        // `void` so the ingestion-exit invariant "every out-edge has a
        // target" holds before the full stream is seen (spec §4.1).
        let defaults_to_void = matches!(
            meta_type,
            MetaType::Pointer
                | MetaType::PtrToMember
                | MetaType::Reference
                | MetaType::RvalueReference
                | MetaType::Const
                | MetaType::Volatile
                | MetaType::Restrict
                | MetaType::Typedef
                | MetaType::Array
                | MetaType::Enumeration
        );
        entry.ty = record
            .attributes
            .get("type")
            .and_then(AttrValue::as_ref_addr)
            .map(Addr::new)
            .or(if defaults_to_void { Some(VOID_ADDR) } else { None });

        self.types.insert(entry);
        self.stack.push(Frame::Type(addr));
        Ok(())
    }

    fn visit_subprogram(&mut self, record: &DieRecord) -> Result<(), PipelineError> {
        let addr = Addr::new(record.offset);
        let mut entry = Subprogram::new(addr);

        let prefix = self.namespace_prefix();
        if let Some(name) = record.attributes.get("name").and_then(AttrValue::as_str) {
            let full = if prefix.is_empty() { name.to_string() } else { format!("{prefix}{name}") };
            entry.name = Some(self.interner.intern(&full));
        }
        if let Some(name) = record.attributes.get("linkage_name").and_then(AttrValue::as_str) {
            entry.linkage_name = Some(self.interner.intern(name));
        }
        entry.origin = record
            .attributes
            .get("abstract_origin")
            .and_then(AttrValue::as_ref_addr)
            .map(Addr::new);
        entry.specification = record
            .attributes
            .get("specification")
            .and_then(AttrValue::as_ref_addr)
            .map(Addr::new);

        self.subprograms.insert(entry);
        self.stack.push(Frame::Subprogram(addr));
        Ok(())
    }

    fn visit_common_param(&mut self, record: &DieRecord) -> Result<(), PipelineError> {
        let kind = match record.tag {
            Tag::Member => CommonParamKind::Member,
            Tag::Enumerator => CommonParamKind::Value,
            Tag::FormalParameter => CommonParamKind::Param,
            _ => unreachable!("visit_common_param called with non-common-param tag"),
        };

        let owner = match (self.enclosing_type(), kind) {
            (Some(owner), _) => owner,
            // A formal parameter may legitimately belong to a subprogram
            // rather than a subroutine type; the data model has nowhere
            // to attach it in that case, which is tolerated rather than
            // an error.
            (None, CommonParamKind::Param) if self.enclosing_subprogram().is_some() => {
                self.stack.push(Frame::Opaque);
                return Ok(());
            }
            // A member/enumerator/parameter with no enclosing type (and,
            // for a parameter, no enclosing subprogram either) has no
            // required attribute to attach to at all: fatal per spec §7
            // ("missing required attribute on a tagged entry"), whose
            // canonical example is exactly this case.
            (None, _) => {
                return Err(PipelineError::MissingRequiredAttribute {
                    at_offset: record.offset,
                    attribute: "enclosing type",
                });
            }
        };

        let name = record
            .attributes
            .get("name")
            .and_then(AttrValue::as_str)
            .map(|s| self.interner.intern(s));

        let value = match kind {
            CommonParamKind::Value => record
                .attributes
                .get("const_value")
                .and_then(AttrValue::as_int)
                .unwrap_or(0),
            _ => record
                .attributes
                .get("type")
                .and_then(AttrValue::as_ref_addr)
                .map(|a| a as i64)
                .unwrap_or(VOID_ADDR.0 as i64),
        };

        let offset = record
            .attributes
            .get("data_member_location")
            .and_then(AttrValue::as_ref_addr)
            .unwrap_or(0);

        let external = record
            .attributes
            .get("external")
            .map(AttrValue::as_flag)
            .unwrap_or(false);

        // Static members are not layout-contributing and should not
        // disambiguate types (spec §9); drop them before they ever reach
        // a TypeEntry's member list rather than carrying the flag
        // forward into signature computation.
        if kind == CommonParamKind::Member && external {
            self.stack.push(Frame::Opaque);
            return Ok(());
        }

        let param = CommonParam { name, value, offset, external };

        let entry = self.types.get_mut(owner).expect("enclosing type must exist");
        entry
            .slot
            .append(kind, param)
            .map_err(|()| PipelineError::SlotKindConflict { type_addr: owner })?;

        self.stack.push(Frame::Opaque);
        Ok(())
    }

    fn visit_namespace(&mut self, record: &DieRecord) {
        let name = record
            .attributes
            .get("name")
            .and_then(AttrValue::as_str)
            .unwrap_or("")
            .to_string();
        self.stack.push(Frame::Namespace(name));
    }

    fn visit_call_site(&mut self, record: &DieRecord) {
        if let Some(caller) = self.enclosing_subprogram() {
            if let Some(target) = record
                .attributes
                .get("abstract_origin")
                .or_else(|| record.attributes.get("call_origin"))
                .and_then(AttrValue::as_ref_addr)
            {
                let target = Addr::new(target);
                let name = record
                    .attributes
                    .get("name")
                    .and_then(AttrValue::as_str)
                    .map(|s| self.interner.intern(s))
                    .unwrap_or_else(|| self.interner.intern("<unknown>"));
                if let Some(sub) = self.subprograms.get_mut(caller) {
                    sub.calls.push(target);
                    sub.call_names.push(name);
                }
            }
        }
        self.stack.push(Frame::Opaque);
    }

    /// Subprograms remaining unnamed after the whole stream have their
    /// address appended to yield a unique synthetic name (spec §4.1).
    fn finish_unnamed_subprograms(&mut self) {
        let unnamed: Vec<Addr> = self
            .subprograms
            .values()
            .filter(|s| s.name.is_none() && s.linkage_name.is_none())
            .map(|s| s.addr)
            .collect();
        for addr in unnamed {
            let synth = format!("<unknown>@{:#x}", addr.0);
            let name = self.interner.intern(&synth);
            self.subprograms.get_mut(addr).expect("just looked up").name = Some(name);
        }
    }

    /// If a non-original subprogram (has `origin`) also carries call
    /// edges, those edges are moved to its origin at the end of ingestion
    /// (spec §4.1).
    fn move_origin_call_edges(&mut self) {
        let movers: Vec<(Addr, Addr, Vec<Addr>, Vec<crate::ids::Name>)> = self
            .subprograms
            .values()
            .filter(|s| s.origin.is_some() && !s.calls.is_empty())
            .map(|s| (s.addr, s.origin.unwrap(), s.calls.clone(), s.call_names.clone()))
            .collect();
        for (addr, origin, calls, call_names) in movers {
            if let Some(target) = self.subprograms.get_mut(origin) {
                target.calls.extend(calls);
                target.call_names.extend(call_names);
            }
            if let Some(s) = self.subprograms.get_mut(addr) {
                s.calls.clear();
                s.call_names.clear();
            }
        }
    }
}
