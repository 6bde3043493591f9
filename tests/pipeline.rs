//! End-to-end scenarios from spec §8, driving the full pipeline through
//! its public entry point (`dwarf_typegraph::run`) with a literal
//! `DieRecord` stream per scenario and asserting on the resulting output
//! tables.

use std::collections::BTreeMap;

use dwarf_typegraph::die::{AttrValue, DieRecord, Tag};
use dwarf_typegraph::pipeline::PipelineConfig;
use dwarf_typegraph::sink::InMemorySink;

fn rec(depth: u32, offset: u64, tag: Tag, attrs: &[(&str, AttrValue)]) -> DieRecord {
    let mut attributes = BTreeMap::new();
    for (k, v) in attrs {
        attributes.insert((*k).to_string(), v.clone());
    }
    DieRecord { depth, offset, tag, attributes }
}

fn run(records: &[DieRecord]) -> InMemorySink {
    let mut sink = InMemorySink::default();
    dwarf_typegraph::run(records, PipelineConfig::default(), &mut sink).expect("pipeline run");
    sink
}

#[test]
fn empty_input_yields_empty_output_tables() {
    let sink = run(&[]);
    assert!(sink.symbols.rows.is_empty());
    assert!(sink.calls.rows.is_empty());
    // The reserved `void` type always exists internally (spec §3), but
    // nothing references it on empty input, so it is suppressed from the
    // sink per the §8 empty-output boundary.
    assert!(sink.types.rows.is_empty());
    assert!(sink.members.rows.is_empty());
}

#[test]
fn single_base_type() {
    let records = vec![rec(0, 1, Tag::BaseType, &[("name", AttrValue::Str("int".into()))])];
    let sink = run(&records);

    let int_row = sink.types.rows.iter().find(|t| t.name.as_deref() == Some("int")).unwrap();
    assert_eq!(int_row.meta_type, dwarf_typegraph::tables::MetaType::Base);
    assert!(sink.members.rows.iter().all(|m| m.type_id != int_row.id));
}

#[test]
fn typedef_chain() {
    let records = vec![
        rec(0, 1, Tag::BaseType, &[("name", AttrValue::Str("int".into()))]),
        rec(0, 2, Tag::Typedef, &[("name", AttrValue::Str("T1".into())), ("type", AttrValue::Ref(1))]),
        rec(0, 3, Tag::Typedef, &[("name", AttrValue::Str("T2".into())), ("type", AttrValue::Ref(2))]),
    ];
    let sink = run(&records);

    let int_id = sink.types.rows.iter().find(|t| t.name.as_deref() == Some("int")).unwrap().id;
    let t1_id = sink.types.rows.iter().find(|t| t.name.as_deref() == Some("T1")).unwrap().id;
    let t2_id = sink.types.rows.iter().find(|t| t.name.as_deref() == Some("T2")).unwrap().id;

    let t1_member = sink.members.rows.iter().find(|m| m.type_id == t1_id).unwrap();
    assert_eq!(t1_member.name, "");
    assert_eq!(t1_member.r#type, int_id);
    assert_eq!(t1_member.offset, 0);

    let t2_member = sink.members.rows.iter().find(|m| m.type_id == t2_id).unwrap();
    assert_eq!(t2_member.r#type, t1_id);
}

fn struct_p(base_offset: u64) -> Vec<DieRecord> {
    vec![
        rec(0, base_offset, Tag::StructureType, &[("name", AttrValue::Str("P".into()))]),
        rec(
            1,
            base_offset + 1,
            Tag::Member,
            &[
                ("name", AttrValue::Str("x".into())),
                ("type", AttrValue::Ref(1)),
                ("data_member_location", AttrValue::UInt(0)),
            ],
        ),
        rec(
            1,
            base_offset + 2,
            Tag::Member,
            &[
                ("name", AttrValue::Str("y".into())),
                ("type", AttrValue::Ref(1)),
                ("data_member_location", AttrValue::UInt(4)),
            ],
        ),
    ]
}

#[test]
fn identical_struct_in_two_cus_merges_to_one() {
    let mut records = vec![rec(0, 1, Tag::BaseType, &[("name", AttrValue::Str("int".into()))])];
    records.extend(struct_p(10));
    records.extend(struct_p(20));
    let sink = run(&records);

    let p_rows: Vec<_> = sink.types.rows.iter().filter(|t| t.name.as_deref() == Some("P")).collect();
    assert_eq!(p_rows.len(), 1, "two identical struct P definitions must merge to one");

    let members: Vec<_> = sink.members.rows.iter().filter(|m| m.type_id == p_rows[0].id).collect();
    assert_eq!(members.len(), 2);
    let mut offsets: Vec<u64> = members.iter().map(|m| m.offset).collect();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 4]);
}

#[test]
fn pointer_self_cycle_one_type_one_resolved_placeholder() {
    let records = vec![
        rec(0, 1, Tag::StructureType, &[("name", AttrValue::Str("Node".into()))]),
        rec(1, 2, Tag::Member, &[("name", AttrValue::Str("next".into())), ("type", AttrValue::Ref(3))]),
        rec(0, 3, Tag::PointerType, &[("type", AttrValue::Ref(1))]),
    ];
    let sink = run(&records);

    let node_rows: Vec<_> = sink.types.rows.iter().filter(|t| t.name.as_deref() == Some("Node")).collect();
    assert_eq!(node_rows.len(), 1);

    let pointer_rows: Vec<_> = sink
        .types
        .rows
        .iter()
        .filter(|t| t.meta_type == dwarf_typegraph::tables::MetaType::Pointer)
        .collect();
    assert_eq!(pointer_rows.len(), 1);

    // The pointer's own member row (its `type` edge) resolves through the
    // placeholder back to Node, and Node's `next` member row points at
    // the (persisted) pointer.
    let ptr_edge = sink.members.rows.iter().find(|m| m.type_id == pointer_rows[0].id).unwrap();
    assert_eq!(ptr_edge.r#type, node_rows[0].id);

    let next_member = sink.members.rows.iter().find(|m| m.name == "next").unwrap();
    assert_eq!(next_member.r#type, pointer_rows[0].id);
}

#[test]
fn declaration_definition_merge_drops_the_declaration() {
    let records = vec![
        // CU1: forward declaration of D, and User { D* d; }.
        rec(0, 1, Tag::StructureType, &[("name", AttrValue::Str("D".into())), ("declaration", AttrValue::Flag(true))]),
        rec(0, 2, Tag::StructureType, &[("name", AttrValue::Str("User".into()))]),
        rec(1, 3, Tag::Member, &[("name", AttrValue::Str("d".into())), ("type", AttrValue::Ref(4))]),
        rec(0, 4, Tag::PointerType, &[("type", AttrValue::Ref(1))]),
        // CU2: the definition of D.
        rec(0, 5, Tag::StructureType, &[("name", AttrValue::Str("D".into()))]),
        rec(1, 6, Tag::Member, &[("name", AttrValue::Str("v".into())), ("type", AttrValue::Ref(7))]),
        rec(0, 7, Tag::BaseType, &[("name", AttrValue::Str("int".into()))]),
    ];
    let sink = run(&records);

    let d_rows: Vec<_> = sink.types.rows.iter().filter(|t| t.name.as_deref() == Some("D")).collect();
    assert_eq!(d_rows.len(), 1, "the forward declaration must not survive alongside the definition");
    assert!(!d_rows[0].declaration);

    let user_row = sink.types.rows.iter().find(|t| t.name.as_deref() == Some("User")).unwrap();
    let d_member = sink.members.rows.iter().find(|m| m.type_id == user_row.id && m.name == "d").unwrap();
    let pointer_row = sink.types.rows.iter().find(|t| t.id == d_member.r#type).unwrap();
    let pointer_edge = sink.members.rows.iter().find(|m| m.type_id == pointer_row.id).unwrap();
    assert_eq!(pointer_edge.r#type, d_rows[0].id);
}

#[test]
fn divergent_struct_shapes_do_not_merge() {
    let mut records = vec![rec(0, 1, Tag::BaseType, &[("name", AttrValue::Str("int".into()))])];
    records.extend(struct_p(10)); // { x; y; }
    // A third copy of P with only one member: structurally different.
    records.push(rec(0, 30, Tag::StructureType, &[("name", AttrValue::Str("P".into()))]));
    records.push(rec(
        1,
        31,
        Tag::Member,
        &[("name", AttrValue::Str("x".into())), ("type", AttrValue::Ref(1)), ("data_member_location", AttrValue::UInt(0))],
    ));
    let sink = run(&records);

    let p_rows: Vec<_> = sink.types.rows.iter().filter(|t| t.name.as_deref() == Some("P")).collect();
    assert_eq!(p_rows.len(), 2, "struct P with two members vs one member must not merge");
}

#[test]
fn divergent_partition_splits_both_x_and_y() {
    // CU1: struct X { Y* y; }; struct Y { int a; };
    // CU2: struct X { Y* y; }; struct Y { int a; int b; };
    // Not itself cyclic, so the split is carried entirely by the Acyclic
    // Merger's shallow signatures: two distinct Y shapes force two
    // distinct pointer-to-Y canonicals, which force two distinct X's.
    let records = vec![
        rec(0, 1, Tag::BaseType, &[("name", AttrValue::Str("int".into()))]),
        // CU1
        rec(0, 10, Tag::StructureType, &[("name", AttrValue::Str("X".into()))]),
        rec(1, 11, Tag::Member, &[("name", AttrValue::Str("y".into())), ("type", AttrValue::Ref(12))]),
        rec(0, 12, Tag::PointerType, &[("type", AttrValue::Ref(13))]),
        rec(0, 13, Tag::StructureType, &[("name", AttrValue::Str("Y".into()))]),
        rec(
            1,
            14,
            Tag::Member,
            &[("name", AttrValue::Str("a".into())), ("type", AttrValue::Ref(1)), ("data_member_location", AttrValue::UInt(0))],
        ),
        // CU2
        rec(0, 20, Tag::StructureType, &[("name", AttrValue::Str("X".into()))]),
        rec(1, 21, Tag::Member, &[("name", AttrValue::Str("y".into())), ("type", AttrValue::Ref(22))]),
        rec(0, 22, Tag::PointerType, &[("type", AttrValue::Ref(23))]),
        rec(0, 23, Tag::StructureType, &[("name", AttrValue::Str("Y".into()))]),
        rec(
            1,
            24,
            Tag::Member,
            &[("name", AttrValue::Str("a".into())), ("type", AttrValue::Ref(1)), ("data_member_location", AttrValue::UInt(0))],
        ),
        rec(
            1,
            25,
            Tag::Member,
            &[("name", AttrValue::Str("b".into())), ("type", AttrValue::Ref(1)), ("data_member_location", AttrValue::UInt(4))],
        ),
    ];
    let sink = run(&records);

    let y_rows: Vec<_> = sink.types.rows.iter().filter(|t| t.name.as_deref() == Some("Y")).collect();
    assert_eq!(y_rows.len(), 2, "two differently-shaped Y definitions must not merge");

    let x_rows: Vec<_> = sink.types.rows.iter().filter(|t| t.name.as_deref() == Some("X")).collect();
    assert_eq!(x_rows.len(), 2, "X's partition must split because its Y dependency splits");
}

#[test]
fn first_cuttable_pointer_config_is_available_for_parity_runs() {
    let records = vec![
        rec(0, 1, Tag::StructureType, &[("name", AttrValue::Str("Node".into()))]),
        rec(1, 2, Tag::Member, &[("name", AttrValue::Str("next".into())), ("type", AttrValue::Ref(3))]),
        rec(0, 3, Tag::PointerType, &[("type", AttrValue::Ref(1))]),
    ];
    let mut sink = InMemorySink::default();
    let config = PipelineConfig {
        cycle_breaker: dwarf_typegraph::cycle::CycleBreakerConfig {
            prefer_first_pointer: true,
            progress_every: 0,
        },
    };
    let report = dwarf_typegraph::run(&records, config, &mut sink).unwrap();
    assert_eq!(report.placeholders_created, 1);
}
