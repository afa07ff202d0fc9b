use std::collections::BTreeMap;

use crate::ConfigValue;
use crate::Error;
use crate::Record;
use crate::RecordError;

fn sample_record() -> Record {
    let mut r = Record::new("myDB");
    r.set_simple_field("NUM_PARTITIONS", "6");
    r.set_simple_field("STATE_MODEL_DEF_REF", "MasterSlave");
    r.set_list_field("myDB_0", vec!["h_1".into(), "h_2".into()]);
    r.set_map_field("myDB_0", "h_1", "MASTER");
    r.set_map_field("myDB_0", "h_2", "SLAVE");
    r
}

#[test]
fn test_round_trip_preserves_all_field_families() {
    let r = sample_record();
    let bytes = r.marshal().unwrap();

    let decoded = Record::unmarshal(&bytes).unwrap();
    assert_eq!(decoded, r);
    assert_eq!(decoded.id, "myDB");
}

#[test]
fn test_wire_format_uses_camel_case_keys() {
    let r = sample_record();
    let value: serde_json::Value = serde_json::from_slice(&r.marshal().unwrap()).unwrap();

    assert_eq!(value["id"], "myDB");
    assert_eq!(value["simpleFields"]["NUM_PARTITIONS"], "6");
    assert_eq!(value["listFields"]["myDB_0"][1], "h_2");
    assert_eq!(value["mapFields"]["myDB_0"]["h_1"], "MASTER");
}

#[test]
fn test_unknown_top_level_fields_survive_re_marshal() {
    let payload = br#"{
        "id": "h_1",
        "simpleFields": {"HELIX_HOST": "h"},
        "deltaList": [1, 2, 3],
        "nested": {"a": {"b": null}}
    }"#;

    let mut r = Record::unmarshal(payload).unwrap();
    r.set_simple_field("HELIX_PORT", "1");
    let bytes = r.marshal().unwrap();

    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["deltaList"], serde_json::json!([1, 2, 3]));
    assert_eq!(value["nested"], serde_json::json!({"a": {"b": null}}));
    assert_eq!(value["simpleFields"]["HELIX_PORT"], "1");

    assert_eq!(Record::unmarshal(&bytes).unwrap(), r);
}

#[test]
fn test_null_and_missing_field_maps_decode_as_empty() {
    let r = Record::unmarshal(br#"{"id":"x","simpleFields":null}"#).unwrap();

    assert!(r.simple_fields.is_empty());
    assert!(r.list_fields.is_empty());
    assert!(r.map_fields.is_empty());
}

#[test]
fn test_unmarshal_rejects_structurally_invalid_payloads() {
    let payloads: [&[u8]; 4] = [b"", b"not json", b"[1,2]", br#"{"simpleFields":{}}"#];
    for payload in payloads {
        match Record::unmarshal_at("/c/IDEALSTATES/r", payload) {
            Err(Error::Record(RecordError::MalformedPayload { path, .. })) => {
                assert_eq!(path, "/c/IDEALSTATES/r")
            }
            other => panic!("expected MalformedPayload, got {other:?}"),
        }
    }
}

#[test]
fn test_map_field_accessors() {
    let mut r = sample_record();

    assert_eq!(r.get_map_field("myDB_0", "h_1"), Some("MASTER"));
    assert_eq!(r.get_map_field("myDB_0", "h_9"), None);
    assert_eq!(r.get_map_field("missing", "h_1"), None);

    let removed = r.remove_map_field("myDB_0").unwrap();
    assert_eq!(removed.len(), 2);
    assert!(r.get_map("myDB_0").is_none());
}

#[test]
fn test_typed_simple_field_helpers() {
    let mut r = Record::new("cfg");
    r.set_simple_field("allowParticipantAutoJoin", "TRUE");
    r.set_int_field("NUM_PARTITIONS", 12);
    r.set_simple_field("REPLICAS", "three");

    assert_eq!(r.get_bool_field("allowParticipantAutoJoin").unwrap(), Some(true));
    assert_eq!(r.get_int_field("NUM_PARTITIONS").unwrap(), Some(12));
    assert_eq!(r.get_int_field("missing").unwrap(), None);
    assert!(matches!(
        r.get_int_field("REPLICAS"),
        Err(Error::Record(RecordError::InvalidValue { .. }))
    ));
}

#[test]
fn test_display_is_pretty_json() {
    let text = sample_record().to_string();
    assert!(text.contains("\"id\": \"myDB\""));
    assert!(text.contains('\n'));
}

#[test]
fn test_config_value_decoding() {
    assert_eq!(ConfigValue::from_raw("true"), ConfigValue::Bool(true));
    assert_eq!(ConfigValue::from_raw("False"), ConfigValue::Bool(false));
    assert_eq!(ConfigValue::from_raw("42"), ConfigValue::Int(42));
    assert_eq!(
        ConfigValue::from_raw("SEMI_AUTO"),
        ConfigValue::String("SEMI_AUTO".into())
    );

    let mut expected = BTreeMap::new();
    expected.insert("a".to_string(), "1".to_string());
    assert_eq!(ConfigValue::from_raw(r#"{"a":"1"}"#), ConfigValue::Map(expected));

    // a brace that is not a string map stays a string
    assert_eq!(
        ConfigValue::from_raw("{broken"),
        ConfigValue::String("{broken".into())
    );
}

#[test]
fn test_config_value_raw_round_trip() {
    for v in [
        ConfigValue::Bool(true),
        ConfigValue::Int(-3),
        ConfigValue::String("x".into()),
    ] {
        assert_eq!(ConfigValue::from_raw(&v.to_raw()), v);
    }
}
