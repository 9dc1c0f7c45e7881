//! All-details report round-trips: build, emit canonical bytes, re-check
//! with the doctor, and make sure tampering is caught.

use cheshbon_core::api::{diff_all_details, DiffInputs};
use cheshbon_core::canonical::canonical_dumps;
use cheshbon_core::model::bindings::Bindings;
use cheshbon_core::model::compat::parse_spec;
use cheshbon_core::model::registry::TransformRegistry;
use cheshbon_core::model::spec::MappingSpec;
use cheshbon_core::report::contract::ReportCaps;
use cheshbon_core::report::doctor::{run_doctor, DoctorInputs, DoctorMode};
use serde_json::{json, Value};

fn spec(value: Value) -> MappingSpec {
    parse_spec(&value).unwrap().spec
}

struct Fixture {
    v1: MappingSpec,
    v2: MappingSpec,
    registry_v1: TransformRegistry,
    registry_v2: TransformRegistry,
    bindings: Bindings,
    raw_schema: Value,
}

fn fixture() -> Fixture {
    let base = json!({
        "spec_version": "1", "study_id": "S1", "source_table": "DM",
        "sources": [
            {"id": "s:SUBJID", "name": "SUBJID", "type": "string"},
            {"id": "s:SEX_RAW", "name": "SEX", "type": "string"}
        ],
        "derived": [
            {"id": "d:USUBJID", "name": "USUBJID", "type": "string",
             "transform_ref": "t:direct_copy", "inputs": ["s:SUBJID"]},
            {"id": "d:SEX", "name": "SEX", "type": "string",
             "transform_ref": "t:ct_map", "inputs": ["s:SEX_RAW"],
             "params": {"map": {"M": "M", "F": "F"}}},
            {"id": "d:SEX_CDISC", "name": "SEX_CDISC", "type": "string",
             "transform_ref": "t:direct_copy", "inputs": ["d:SEX"]}
        ],
        "constraints": [
            {"id": "c:SEX_KNOWN", "name": "sex is known", "inputs": ["d:SEX"],
             "expression": "SEX in ('M', 'F')"}
        ]
    });
    let mut changed = base.clone();
    changed["derived"][1]["params"] = json!({"map": {"M": "M", "F": "F", "U": "UNKNOWN"}});

    let transform = |id: &str, digest: char| {
        json!({
            "id": id, "version": "1.0.0", "kind": "builtin",
            "signature": {"inputs": ["string"], "output": "string"},
            "impl_fingerprint": {
                "algo": "sha256", "source": "builtin",
                "ref": format!("builtin/{}", id.trim_start_matches("t:")),
                "digest": digest.to_string().repeat(64)
            }
        })
    };
    let registry_value = json!({
        "registry_version": "1",
        "transforms": [transform("t:direct_copy", 'a'), transform("t:ct_map", 'c')]
    });

    Fixture {
        v1: spec(base),
        v2: spec(changed),
        registry_v1: TransformRegistry::from_value(&registry_value).unwrap(),
        registry_v2: TransformRegistry::from_value(&registry_value).unwrap(),
        bindings: Bindings {
            table: "DM".to_string(),
            bindings: [
                ("SUBJID".to_string(), "s:SUBJID".to_string()),
                ("SEX".to_string(), "s:SEX_RAW".to_string()),
            ]
            .into(),
        },
        raw_schema: json!({
            "table": "DM",
            "columns": [
                {"name": "SUBJID", "type": "string"},
                {"name": "SEX", "type": "string"}
            ]
        }),
    }
}

fn build_report(f: &Fixture, caps: Option<ReportCaps>) -> Value {
    diff_all_details(
        &DiffInputs {
            spec_v1: &f.v1,
            spec_v2: &f.v2,
            registry_v1: Some(&f.registry_v1),
            registry_v2: Some(&f.registry_v2),
            bindings_v2: Some(&f.bindings),
        },
        Some(&f.raw_schema),
        caps,
    )
    .unwrap()
}

fn doctor_inputs(f: &Fixture) -> DoctorInputs<'_> {
    DoctorInputs {
        spec_v1: &f.v1,
        spec_v2: &f.v2,
        registry_v1: Some(&f.registry_v1),
        registry_v2: Some(&f.registry_v2),
        bindings_v2: Some(&f.bindings),
        raw_schema: Some(&f.raw_schema),
    }
}

#[test]
fn repeated_builds_are_byte_identical() {
    let f = fixture();
    let a = canonical_dumps(&build_report(&f, None)).unwrap();
    let b = canonical_dumps(&build_report(&f, None)).unwrap();
    assert_eq!(a, b);
}

#[test]
fn canonical_report_survives_pretty_printing() {
    // A report written pretty and re-parsed verifies identically: the
    // doctor hashes parses, not bytes.
    let f = fixture();
    let report = build_report(&f, None);
    let pretty = serde_json::to_string_pretty(&report).unwrap();
    let reparsed: Value = serde_json::from_str(&pretty).unwrap();
    let verdict = run_doctor(&reparsed, &doctor_inputs(&f), DoctorMode::Strict);
    assert!(verdict.ok, "clauses: {:?}", verdict.clauses);
}

#[test]
fn full_fixture_passes_doctor_in_both_modes() {
    let f = fixture();
    let report = build_report(&f, None);
    for mode in [DoctorMode::Sample, DoctorMode::Strict] {
        let verdict = run_doctor(&report, &doctor_inputs(&f), mode);
        assert!(verdict.ok, "mode {:?}: {:?}", mode, verdict.clauses);
        let witness_clause = verdict
            .clauses
            .iter()
            .find(|c| c.id == "witness_invariants")
            .unwrap();
        assert!(witness_clause.details.contains_key("distance_check_mode"));
    }
}

#[test]
fn capped_report_accounts_for_omissions_and_verifies() {
    let f = fixture();
    let caps = ReportCaps {
        max_witnesses: 1,
        ..ReportCaps::default()
    };
    let report = build_report(&f, Some(caps));
    let witnesses = report["details"]["witnesses"].as_object().unwrap();
    assert_eq!(witnesses.len(), 1);
    let omissions = report["details"]["omissions"].as_array().unwrap();
    let witness_omission = omissions
        .iter()
        .find(|o| o["path"] == json!("details.witnesses"))
        .unwrap();
    assert_eq!(
        witness_omission["actual"].as_u64().unwrap()
            - witness_omission["cap"].as_u64().unwrap(),
        witness_omission["omitted_count"].as_u64().unwrap()
    );

    // The doctor accepts the truncation because it is honestly accounted.
    let verdict = run_doctor(&report, &doctor_inputs(&f), DoctorMode::Sample);
    assert!(verdict.ok, "clauses: {:?}", verdict.clauses);
}

#[test]
fn dishonest_omission_is_rejected() {
    let f = fixture();
    let caps = ReportCaps {
        max_witnesses: 1,
        ..ReportCaps::default()
    };
    let mut report = build_report(&f, Some(caps));
    report["details"]["omissions"][0]["omitted_count"] = json!(0);
    let verdict = run_doctor(&report, &doctor_inputs(&f), DoctorMode::Sample);
    let accounting = verdict
        .clauses
        .iter()
        .find(|c| c.id == "accounting_invariants")
        .unwrap();
    assert!(!accounting.ok);
}

#[test]
fn swapped_input_flips_input_and_core_digests() {
    let f = fixture();
    let report = build_report(&f, None);

    // Re-check against a different v2 spec than the report was built from.
    let mut other = fixture();
    let mut raw = serde_json::json!({
        "spec_version": "1", "study_id": "S1", "source_table": "DM",
        "sources": [{"id": "s:SUBJID", "name": "SUBJID", "type": "string"}],
        "derived": [{
            "id": "d:USUBJID", "name": "USUBJID", "type": "string",
            "transform_ref": "t:direct_copy", "inputs": ["s:SUBJID"]
        }]
    });
    raw["study_id"] = json!("S2");
    other.v2 = spec(raw);

    let verdict = run_doctor(&report, &doctor_inputs(&other), DoctorMode::Sample);
    assert!(!verdict.ok);
    let failed: Vec<&str> = verdict
        .clauses
        .iter()
        .filter(|c| !c.ok)
        .map(|c| c.id.as_str())
        .collect();
    assert!(failed.contains(&"inputs_digest"));
    assert!(failed.contains(&"core_digest"));
}

#[test]
fn report_includes_issue_backed_witness_links() {
    // Remove a binding so d:SEX carries a MISSING_BINDING witness with an
    // issue link and no event links.
    let mut f = fixture();
    f.bindings.bindings.remove("SEX");
    let report = build_report(&f, None);
    let witness = &report["details"]["witnesses"]["d:SEX"];
    assert_eq!(witness["reason"], json!("MISSING_BINDING"));
    assert_eq!(witness["distance"], json!(1));
    assert!(witness["triggering_event_ids"].as_array().unwrap().is_empty());
    assert_eq!(witness["triggering_issue_ids"].as_array().unwrap().len(), 1);

    let verdict = run_doctor(&report, &doctor_inputs(&f), DoctorMode::Strict);
    assert!(verdict.ok, "clauses: {:?}", verdict.clauses);
}
