use regex::Regex;
use serde_json::{Map, Value, json};

use snapmatch::transform::utility;
use snapmatch::transform::{TransformContext, Transformer, run_pipeline};
use snapmatch::{SessionOptions, SnapshotError, SnapshotSession};

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

fn base_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("test").to_string_lossy().into_owned()
}

#[test]
fn record_then_verify_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir);

    // Recording pass: persist the observed state as golden.
    let mut recorder = SnapshotSession::new(
        &base,
        "scope-a",
        SessionOptions {
            update: true,
            verify: true,
            raw: false,
        },
    );
    recorder
        .match_value("api-call", json!({"Status": "ok", "Count": 2}))
        .unwrap();
    recorder.assert_all().unwrap();

    // Verification pass against the persisted file.
    let mut verifier = SnapshotSession::new(
        &base,
        "scope-a",
        SessionOptions {
            verify: true,
            ..Default::default()
        },
    );
    verifier
        .match_value("api-call", json!({"Status": "ok", "Count": 2}))
        .unwrap();
    verifier.assert_all().unwrap();

    // A drifted value fails the next pass.
    let mut drifted = SnapshotSession::new(
        &base,
        "scope-a",
        SessionOptions {
            verify: true,
            ..Default::default()
        },
    );
    drifted
        .match_value("api-call", json!({"Status": "error", "Count": 2}))
        .unwrap();
    let err = drifted.assert_all().unwrap_err();
    assert!(matches!(err, SnapshotError::ComparisonFailed { .. }));
    assert!(err.to_string().contains("Status"));
}

#[test]
fn recording_preserves_other_scopes_in_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir);

    for (scope, value) in [("scope-a", json!({"a": 1})), ("scope-b", json!({"b": 2}))] {
        let mut recorder = SnapshotSession::new(
            &base,
            scope,
            SessionOptions {
                update: true,
                verify: true,
                raw: false,
            },
        );
        recorder.match_value("state", value).unwrap();
        recorder.assert_all().unwrap();
    }

    let mut verifier = SnapshotSession::new(
        &base,
        "scope-a",
        SessionOptions {
            verify: true,
            ..Default::default()
        },
    );
    verifier.match_value("state", json!({"a": 1})).unwrap();
    verifier.assert_all().unwrap();
}

#[test]
fn recording_normalizes_through_the_pipeline_before_persisting() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir);

    let mut recorder = SnapshotSession::new(
        &base,
        "scope",
        SessionOptions {
            update: true,
            verify: true,
            raw: false,
        },
    );
    recorder.add_transformer(utility::key_value_with("RequestId", "request-id", true));
    recorder
        .match_value(
            "call",
            json!({"RequestId": "52ac2c54-7db8", "Echo": "52ac2c54-7db8"}),
        )
        .unwrap();
    recorder.assert_all().unwrap();

    // A later run observing different ids still matches: both collapse to
    // the same reference token.
    let mut verifier = SnapshotSession::new(
        &base,
        "scope",
        SessionOptions {
            verify: true,
            ..Default::default()
        },
    );
    verifier.add_transformer(utility::key_value_with("RequestId", "request-id", true));
    verifier
        .match_value(
            "call",
            json!({"RequestId": "99ff00aa-1234", "Echo": "99ff00aa-1234"}),
        )
        .unwrap();
    verifier.assert_all().unwrap();
}

#[test]
fn raw_mode_writes_the_pre_transform_state() {
    let dir = tempfile::tempdir().unwrap();
    let base = base_path(&dir);

    let mut recorder = SnapshotSession::new(
        &base,
        "scope",
        SessionOptions {
            update: true,
            verify: true,
            raw: true,
        },
    );
    recorder.register_replacement(Regex::new("world").unwrap(), "<greeting>");
    recorder.match_value("greeting", json!({"text": "world"})).unwrap();
    recorder.assert_all().unwrap();

    let raw_text = std::fs::read_to_string(format!("{}.raw.snapshot.json", base)).unwrap();
    assert!(raw_text.contains("world"));
    assert!(!raw_text.contains("<greeting>"));

    let snapshot_text = std::fs::read_to_string(format!("{}.snapshot.json", base)).unwrap();
    assert!(snapshot_text.contains("<greeting>"));
}

#[test]
fn transformer_priorities_order_the_pipeline() {
    let mut sm = SnapshotSession::new(
        "",
        "scope",
        SessionOptions {
            verify: true,
            ..Default::default()
        },
    );
    sm.set_recorded_state(object(json!({"key": {"value": "second"}})));

    // Registered in the "wrong" order; priorities flip them.
    sm.add_transformer_with_priority(utility::key_value_with("value", "second", false), 10);
    sm.add_transformer_with_priority(utility::key_value_with("value", "first", false), 0);

    sm.match_value("key", json!({"value": "original"})).unwrap();
    sm.assert_all().unwrap();
}

#[test]
fn pipeline_rerun_is_idempotent_for_tree_transformers() {
    let transformers: Vec<(Box<dyn Transformer>, i32)> = vec![
        (Box::new(utility::timestamp()), 0),
        (Box::new(utility::json_string("payload")), 0),
        (Box::new(utility::sorting("items", None)), 0),
        (Box::new(utility::response_metadata()), 0),
    ];

    let input = json!({
        "call": {
            "At": "2023-11-21T07:14:12.243Z",
            "payload": "{\"b\": 1, \"a\": 2}",
            "items": [3, 1, 2],
            "ResponseMetadata": {"HTTPStatusCode": 200, "RequestId": "x"},
        }
    });

    let mut ctx = TransformContext::new();
    let once = run_pipeline(&transformers, input, &mut ctx).unwrap();
    let mut ctx2 = TransformContext::new();
    let twice = run_pipeline(&transformers, once.clone(), &mut ctx2).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn overlapping_reference_values_resolve_in_registration_order() {
    let mut sm = SnapshotSession::new(
        "",
        "scope",
        SessionOptions {
            verify: true,
            ..Default::default()
        },
    );
    // "topic" is registered before "topic-suffix"; the serialized pass
    // rewrites the shorter needle first, so the longer one never matches.
    sm.set_recorded_state(object(json!({
        "key": {"a": "<name:1>", "b": "<name:1>-suffix"}
    })));
    sm.add_transformer(utility::path("$..a", "name", true));
    sm.add_transformer(utility::path("$..b", "name", true));
    sm.match_value("key", json!({"a": "topic", "b": "topic-suffix"}))
        .unwrap();
    sm.assert_all().unwrap();
}

mod properties {
    use super::*;
    use proptest::prelude::*;
    use snapmatch::transform::register_reference_replacement;

    proptest! {
        #[test]
        fn distinct_raw_values_get_strictly_increasing_indices(
            // Equal-length values: none can be a substring of another, so
            // the documented order-dependence of overlapping needles never
            // interferes with the counting property under test.
            values in proptest::collection::btree_set("[a-z]{8}", 1..8)
        ) {
            let values: Vec<String> = values.into_iter().collect();
            let mut ctx = TransformContext::new();
            for value in &values {
                register_reference_replacement(&mut ctx, &json!(value), "name").unwrap();
            }

            // First-occurrence order assigns 1..=n.
            let text = values.join(" ");
            let replaced = ctx.apply_substitutions(text);
            let expected: Vec<String> =
                (1..=values.len()).map(|i| format!("<name:{}>", i)).collect();
            prop_assert_eq!(replaced, expected.join(" "));
        }

        #[test]
        fn re_registering_seen_values_never_adds_substitutions(
            values in proptest::collection::vec("[a-z]{4,12}", 1..16)
        ) {
            let mut ctx = TransformContext::new();
            let mut distinct = std::collections::BTreeSet::new();
            for value in &values {
                register_reference_replacement(&mut ctx, &json!(value), "name").unwrap();
                distinct.insert(value.clone());
            }
            prop_assert_eq!(ctx.substitutions().len(), distinct.len());
        }

        #[test]
        fn counters_are_independent_per_name(
            count_a in 1usize..6,
            count_b in 1usize..6,
        ) {
            let mut ctx = TransformContext::new();
            for i in 0..count_a {
                register_reference_replacement(&mut ctx, &json!(format!("a-{}", i)), "alpha").unwrap();
            }
            for i in 0..count_b {
                register_reference_replacement(&mut ctx, &json!(format!("b-{}", i)), "beta").unwrap();
            }

            let replaced = ctx.apply_substitutions(format!(
                "{} {}",
                format!("a-{}", count_a - 1),
                format!("b-{}", count_b - 1)
            ));
            prop_assert_eq!(
                replaced,
                format!("<alpha:{}> <beta:{}>", count_a, count_b)
            );
        }
    }
}
