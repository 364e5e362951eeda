//! Cross-module properties of the value model and the assignment parser.

use plexus_core::{
    assign::{encode_hierarchical, infer_literal, parse_hierarchical},
    Kind, RegisterError, RegisterName, Value,
};

fn yaml(src: &str) -> serde_yaml::Value {
    serde_yaml::from_str(src).expect("yaml")
}

// ---------------------------------------------------------------------------
// 1. Coercion round trips
// ---------------------------------------------------------------------------

#[test]
fn every_numeric_kind_roundtrips_through_real64_when_exact() {
    let small = Value::Natural8(vec![0, 1, 100]);
    for kind in Kind::ALL.into_iter().filter(|k| k.is_numeric() && *k != Kind::Bit) {
        let there = small.coerce(kind).expect("numeric coercion");
        let wide = there.coerce(Kind::Real64).expect("to real64");
        let back = wide.coerce(kind).expect("back");
        assert_eq!(back, there, "kind {kind}");
    }
}

#[test]
fn string_never_becomes_numeric() {
    for kind in Kind::ALL.into_iter().filter(|k| k.is_numeric()) {
        let err = Value::from("42").coerce(kind).unwrap_err();
        assert!(matches!(err, RegisterError::IncompatibleKind { .. }));
    }
}

// ---------------------------------------------------------------------------
// 2. Declarative literal → hierarchical transport → typed value
// ---------------------------------------------------------------------------

#[test]
fn inferred_literal_survives_hierarchical_transport() {
    let name = RegisterName::parse("thermostat.pid.gains").unwrap();
    let value = infer_literal("thermostat.pid.gains", &yaml("[0.1, 0, 0]")).unwrap();
    assert_eq!(value.kind(), Kind::Real32);

    let (key, text) = encode_hierarchical(&name, &value);
    assert_eq!(key, "THERMOSTAT__PID__GAINS__REAL32");
    assert_eq!(text, "0.1,0,0");

    let (decoded_name, decoded) = parse_hierarchical(&key, &text).unwrap();
    assert_eq!(decoded_name, name);
    assert_eq!(decoded, value);
}

#[test]
fn explicitly_typed_literal_encodes_with_its_kind() {
    let name = RegisterName::parse("x.y").unwrap();
    let value = infer_literal("x.y", &yaml("{natural16: 42}")).unwrap();
    let (key, text) = encode_hierarchical(&name, &value);
    assert_eq!((key.as_str(), text.as_str()), ("X__Y__NATURAL16", "42"));
}

#[test]
fn integer_and_float_sequences_infer_different_families_of_width() {
    let ints = infer_literal("a", &yaml("[2, 0, 0]")).unwrap();
    let floats = infer_literal("a", &yaml("[2.0, 0.0, 0.0]")).unwrap();
    assert_eq!(ints, Value::Natural8(vec![2, 0, 0]));
    assert!(matches!(floats.kind(), Kind::Real16 | Kind::Real32 | Kind::Real64));
    assert_eq!(floats.as_floats().unwrap(), vec![2.0, 0.0, 0.0]);
}
