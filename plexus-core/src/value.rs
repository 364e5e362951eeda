//! Typed register values.
//!
//! A [`Value`] is exactly one of a closed set of kinds, each carrying a
//! homogeneous array (or a string / byte sequence). Numeric kinds, `bit`
//! included, form one family and coerce into each other; `string` and
//! `unstructured` coerce only into themselves.
//!
//! All conversion goes through [`Value::coerce`], which dispatches on the
//! (source family, target family) pair and, for numeric targets, on the
//! target kind.

use std::fmt;

use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::RegisterError;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// Discriminant of a [`Value`]: element kind and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Bit,
    Integer8,
    Integer16,
    Integer32,
    Integer64,
    Natural8,
    Natural16,
    Natural32,
    Natural64,
    Real16,
    Real32,
    Real64,
    String,
    Unstructured,
}

/// Coercion family. Kinds coerce only within their family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Numeric,
    Text,
    Bytes,
}

impl Kind {
    pub const ALL: [Kind; 14] = [
        Kind::Bit,
        Kind::Integer8,
        Kind::Integer16,
        Kind::Integer32,
        Kind::Integer64,
        Kind::Natural8,
        Kind::Natural16,
        Kind::Natural32,
        Kind::Natural64,
        Kind::Real16,
        Kind::Real32,
        Kind::Real64,
        Kind::String,
        Kind::Unstructured,
    ];

    /// Lowercase token used in the hierarchical-name form and in YAML.
    pub fn token(self) -> &'static str {
        match self {
            Kind::Bit => "bit",
            Kind::Integer8 => "integer8",
            Kind::Integer16 => "integer16",
            Kind::Integer32 => "integer32",
            Kind::Integer64 => "integer64",
            Kind::Natural8 => "natural8",
            Kind::Natural16 => "natural16",
            Kind::Natural32 => "natural32",
            Kind::Natural64 => "natural64",
            Kind::Real16 => "real16",
            Kind::Real32 => "real32",
            Kind::Real64 => "real64",
            Kind::String => "string",
            Kind::Unstructured => "unstructured",
        }
    }

    /// Case-insensitive inverse of [`Kind::token`]. `boolean` is accepted as
    /// an alias for `bit`.
    pub fn from_token(token: &str) -> Option<Kind> {
        let lower = token.to_ascii_lowercase();
        if lower == "boolean" {
            return Some(Kind::Bit);
        }
        Kind::ALL.into_iter().find(|k| k.token() == lower)
    }

    pub fn family(self) -> Family {
        match self {
            Kind::String => Family::Text,
            Kind::Unstructured => Family::Bytes,
            _ => Family::Numeric,
        }
    }

    pub fn is_numeric(self) -> bool {
        self.family() == Family::Numeric
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Everything a register can hold.
///
/// Equality and ordering are element-wise (ordering compares the kind first).
#[derive(Debug, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(tag = "kind", content = "elements", rename_all = "lowercase")]
pub enum Value {
    Bit(Vec<bool>),
    Integer8(Vec<i8>),
    Integer16(Vec<i16>),
    Integer32(Vec<i32>),
    Integer64(Vec<i64>),
    Natural8(Vec<u8>),
    Natural16(Vec<u16>),
    Natural32(Vec<u32>),
    Natural64(Vec<u64>),
    Real16(#[serde(with = "real_elements")] Vec<f16>),
    Real32(#[serde(with = "real_elements")] Vec<f32>),
    Real64(#[serde(with = "real_elements")] Vec<f64>),
    String(String),
    Unstructured(Vec<u8>),
}

/// Intermediate element used by numeric coercion. Wide enough to hold any
/// integer element exactly.
#[derive(Debug, Clone, Copy)]
enum Scalar {
    Bool(bool),
    Int(i128),
    Float(f64),
}

impl Scalar {
    fn to_bool(self) -> bool {
        match self {
            Scalar::Bool(b) => b,
            Scalar::Int(i) => i != 0,
            Scalar::Float(f) => f != 0.0 && !f.is_nan(),
        }
    }

    /// Nearest integer, ties away from zero; NaN maps to zero and values
    /// beyond the `i128` range saturate before the caller truncates.
    fn to_int(self) -> i128 {
        match self {
            Scalar::Bool(b) => i128::from(b),
            Scalar::Int(i) => i,
            Scalar::Float(f) if f.is_nan() => 0,
            Scalar::Float(f) => f.round() as i128,
        }
    }

    fn to_float(self) -> f64 {
        match self {
            Scalar::Bool(b) => f64::from(u8::from(b)),
            Scalar::Int(i) => i as f64,
            Scalar::Float(f) => f,
        }
    }
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Bit(_) => Kind::Bit,
            Value::Integer8(_) => Kind::Integer8,
            Value::Integer16(_) => Kind::Integer16,
            Value::Integer32(_) => Kind::Integer32,
            Value::Integer64(_) => Kind::Integer64,
            Value::Natural8(_) => Kind::Natural8,
            Value::Natural16(_) => Kind::Natural16,
            Value::Natural32(_) => Kind::Natural32,
            Value::Natural64(_) => Kind::Natural64,
            Value::Real16(_) => Kind::Real16,
            Value::Real32(_) => Kind::Real32,
            Value::Real64(_) => Kind::Real64,
            Value::String(_) => Kind::String,
            Value::Unstructured(_) => Kind::Unstructured,
        }
    }

    /// Number of elements. For `string` this is the byte length.
    pub fn len(&self) -> usize {
        match self {
            Value::Bit(v) => v.len(),
            Value::Integer8(v) => v.len(),
            Value::Integer16(v) => v.len(),
            Value::Integer32(v) => v.len(),
            Value::Integer64(v) => v.len(),
            Value::Natural8(v) => v.len(),
            Value::Natural16(v) => v.len(),
            Value::Natural32(v) => v.len(),
            Value::Natural64(v) => v.len(),
            Value::Real16(v) => v.len(),
            Value::Real32(v) => v.len(),
            Value::Real64(v) => v.len(),
            Value::String(s) => s.len(),
            Value::Unstructured(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn unstructured(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Unstructured(bytes.into())
    }

    /// Elements widened to `f64`, or `None` for non-numeric kinds.
    pub fn as_floats(&self) -> Option<Vec<f64>> {
        self.scalars()
            .map(|s| s.into_iter().map(Scalar::to_float).collect())
    }

    /// Convert into `target`, keeping the element count.
    ///
    /// Integer targets wrap (two's complement) after rounding; real targets
    /// round to the nearest representable value.
    pub fn coerce(&self, target: Kind) -> Result<Value, RegisterError> {
        let source = self.kind();
        if source == target {
            return Ok(self.clone());
        }
        match (source.family(), target.family()) {
            (Family::Text, Family::Text) | (Family::Bytes, Family::Bytes) => Ok(self.clone()),
            _ => self
                .scalars()
                .and_then(|scalars| Value::from_scalars(target, &scalars))
                .ok_or_else(|| RegisterError::IncompatibleKind {
                    from: source,
                    to: target,
                    detail: "kinds belong to different families".to_string(),
                }),
        }
    }

    fn scalars(&self) -> Option<Vec<Scalar>> {
        fn ints<T: Copy + Into<i128>>(v: &[T]) -> Vec<Scalar> {
            v.iter().map(|x| Scalar::Int((*x).into())).collect()
        }
        let out = match self {
            Value::Bit(v) => v.iter().map(|b| Scalar::Bool(*b)).collect(),
            Value::Integer8(v) => ints(v),
            Value::Integer16(v) => ints(v),
            Value::Integer32(v) => ints(v),
            Value::Integer64(v) => ints(v),
            Value::Natural8(v) => ints(v),
            Value::Natural16(v) => ints(v),
            Value::Natural32(v) => ints(v),
            Value::Natural64(v) => ints(v),
            Value::Real16(v) => v.iter().map(|x| Scalar::Float(x.to_f64())).collect(),
            Value::Real32(v) => v.iter().map(|x| Scalar::Float(f64::from(*x))).collect(),
            Value::Real64(v) => v.iter().map(|x| Scalar::Float(*x)).collect(),
            Value::String(_) | Value::Unstructured(_) => return None,
        };
        Some(out)
    }

    fn from_scalars(target: Kind, s: &[Scalar]) -> Option<Value> {
        let ints = || s.iter().map(|x| x.to_int());
        let floats = || s.iter().map(|x| x.to_float());
        let out = match target {
            Kind::Bit => Value::Bit(s.iter().map(|x| x.to_bool()).collect()),
            Kind::Integer8 => Value::Integer8(ints().map(|i| i as i8).collect()),
            Kind::Integer16 => Value::Integer16(ints().map(|i| i as i16).collect()),
            Kind::Integer32 => Value::Integer32(ints().map(|i| i as i32).collect()),
            Kind::Integer64 => Value::Integer64(ints().map(|i| i as i64).collect()),
            Kind::Natural8 => Value::Natural8(ints().map(|i| i as u8).collect()),
            Kind::Natural16 => Value::Natural16(ints().map(|i| i as u16).collect()),
            Kind::Natural32 => Value::Natural32(ints().map(|i| i as u32).collect()),
            Kind::Natural64 => Value::Natural64(ints().map(|i| i as u64).collect()),
            Kind::Real16 => Value::Real16(floats().map(f16::from_f64).collect()),
            Kind::Real32 => Value::Real32(floats().map(|f| f as f32).collect()),
            Kind::Real64 => Value::Real64(floats().collect()),
            Kind::String | Kind::Unstructured => return None,
        };
        Some(out)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, v: &[T]) -> fmt::Result {
            f.write_str("[")?;
            for (i, x) in v.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{x}")?;
            }
            f.write_str("]")
        }
        write!(f, "{}", self.kind())?;
        match self {
            Value::Bit(v) => list(f, v),
            Value::Integer8(v) => list(f, v),
            Value::Integer16(v) => list(f, v),
            Value::Integer32(v) => list(f, v),
            Value::Integer64(v) => list(f, v),
            Value::Natural8(v) => list(f, v),
            Value::Natural16(v) => list(f, v),
            Value::Natural32(v) => list(f, v),
            Value::Natural64(v) => list(f, v),
            Value::Real16(v) => list(f, v),
            Value::Real32(v) => list(f, v),
            Value::Real64(v) => list(f, v),
            Value::String(s) => write!(f, " {s:?}"),
            Value::Unstructured(b) => write!(f, " {}", hex::encode(b)),
        }
    }
}

macro_rules! impl_from_elements {
    ($($elem:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$elem>> for Value {
                fn from(v: Vec<$elem>) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_elements! {
    bool => Bit,
    i8 => Integer8,
    i16 => Integer16,
    i32 => Integer32,
    i64 => Integer64,
    u16 => Natural16,
    u32 => Natural32,
    u64 => Natural64,
    f16 => Real16,
    f32 => Real32,
    f64 => Real64,
}

// `Vec<u8>` is ambiguous between natural8 and unstructured; use the
// constructors or the variant directly.

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Serialized form of real elements.
///
/// Finite elements are plain numbers (half precision travels as `f32`).
/// NaN and the infinities, which JSON numbers cannot carry, are the strings
/// `"NaN"`, `"inf"` and `"-inf"`.
mod real_elements {
    use half::f16;
    use serde::de::{DeserializeOwned, Error as _};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub trait Real: Copy {
        type Wire: Serialize + DeserializeOwned + Copy;

        fn to_wire(self) -> Self::Wire;
        fn from_wire(wire: Self::Wire) -> Self;
        fn from_f64(value: f64) -> Self;
        fn widen(self) -> f64;
    }

    impl Real for f16 {
        type Wire = f32;

        fn to_wire(self) -> f32 {
            self.to_f32()
        }
        fn from_wire(wire: f32) -> Self {
            f16::from_f32(wire)
        }
        fn from_f64(value: f64) -> Self {
            f16::from_f64(value)
        }
        fn widen(self) -> f64 {
            self.to_f64()
        }
    }

    impl Real for f32 {
        type Wire = f32;

        fn to_wire(self) -> f32 {
            self
        }
        fn from_wire(wire: f32) -> Self {
            wire
        }
        fn from_f64(value: f64) -> Self {
            value as f32
        }
        fn widen(self) -> f64 {
            f64::from(self)
        }
    }

    impl Real for f64 {
        type Wire = f64;

        fn to_wire(self) -> f64 {
            self
        }
        fn from_wire(wire: f64) -> Self {
            wire
        }
        fn from_f64(value: f64) -> Self {
            value
        }
        fn widen(self) -> f64 {
            self
        }
    }

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum Element<W> {
        Number(W),
        Special(String),
    }

    pub fn serialize<T: Real, S: Serializer>(v: &[T], serializer: S) -> Result<S::Ok, S::Error> {
        let wire: Vec<Element<T::Wire>> = v
            .iter()
            .map(|x| {
                let wide = x.widen();
                if wide.is_nan() {
                    Element::Special("NaN".to_string())
                } else if wide == f64::INFINITY {
                    Element::Special("inf".to_string())
                } else if wide == f64::NEG_INFINITY {
                    Element::Special("-inf".to_string())
                } else {
                    Element::Number(x.to_wire())
                }
            })
            .collect();
        wire.serialize(serializer)
    }

    pub fn deserialize<'de, T: Real, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<T>, D::Error> {
        let wire = Vec::<Element<T::Wire>>::deserialize(deserializer)?;
        wire.into_iter()
            .map(|element| match element {
                Element::Number(n) => Ok(T::from_wire(n)),
                Element::Special(text) => special(&text)
                    .map(T::from_f64)
                    .ok_or_else(|| D::Error::custom(format!("invalid real element '{text}'"))),
            })
            .collect()
    }

    fn special(text: &str) -> Option<f64> {
        match text.to_ascii_lowercase().as_str() {
            "nan" => Some(f64::NAN),
            "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
            "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn kind_tokens_roundtrip() {
        for kind in Kind::ALL {
            assert_eq!(Kind::from_token(kind.token()), Some(kind));
            assert_eq!(Kind::from_token(&kind.token().to_uppercase()), Some(kind));
        }
        assert_eq!(Kind::from_token("BOOLEAN"), Some(Kind::Bit));
        assert_eq!(Kind::from_token("natural12"), None);
    }

    #[test]
    fn same_kind_is_identity() {
        let v = Value::Real32(vec![0.1, 0.2]);
        assert_eq!(v.coerce(Kind::Real32).unwrap(), v);
    }

    #[test]
    fn floats_round_into_integers() {
        let v = Value::Real64(vec![3.3, 6.4, -2.5]);
        assert_eq!(
            v.coerce(Kind::Integer8).unwrap(),
            Value::Integer8(vec![3, 6, -3])
        );
        assert_eq!(
            Value::Real64(vec![f64::NAN]).coerce(Kind::Natural8).unwrap(),
            Value::Natural8(vec![0])
        );
    }

    #[test]
    fn integers_wrap_into_narrower_widths() {
        let v = Value::Integer32(vec![300, -1, 128]);
        assert_eq!(
            v.coerce(Kind::Natural8).unwrap(),
            Value::Natural8(vec![44, 255, 128])
        );
        assert_eq!(
            v.coerce(Kind::Integer8).unwrap(),
            Value::Integer8(vec![44, -1, -128])
        );
    }

    #[test]
    fn bits_map_to_zero_and_one() {
        let v = Value::Bit(vec![true, false]);
        assert_eq!(v.coerce(Kind::Real32).unwrap(), Value::Real32(vec![1.0, 0.0]));
        let back = Value::Integer32(vec![-1, 0]).coerce(Kind::Bit).unwrap();
        assert_eq!(back, Value::Bit(vec![true, false]));
    }

    #[test]
    fn real16_rounds_to_nearest() {
        let v = Value::Real64(vec![0.1]).coerce(Kind::Real16).unwrap();
        assert_eq!(v, Value::Real16(vec![f16::from_f64(0.1)]));
    }

    #[rstest]
    #[case(Value::from("abc"), Kind::Natural8)]
    #[case(Value::unstructured(vec![1, 2]), Kind::String)]
    #[case(Value::from("abc"), Kind::Unstructured)]
    #[case(Value::Real32(vec![1.0]), Kind::String)]
    #[case(Value::Bit(vec![true]), Kind::Unstructured)]
    fn cross_family_coercion_fails(#[case] value: Value, #[case] target: Kind) {
        let err = value.coerce(target).unwrap_err();
        assert!(matches!(err, RegisterError::IncompatibleKind { .. }), "got: {err}");
    }

    #[rstest]
    #[case(Value::Natural8(vec![0, 7, 255]), Kind::Natural16)]
    #[case(Value::Natural8(vec![0, 7, 255]), Kind::Integer16)]
    #[case(Value::Integer16(vec![-32768, 0, 32767]), Kind::Integer32)]
    #[case(Value::Integer32(vec![i32::MIN, 5, i32::MAX]), Kind::Real64)]
    #[case(Value::Natural32(vec![u32::MAX, 1]), Kind::Integer64)]
    #[case(Value::Real16(vec![f16::from_f32(0.5), f16::from_f32(-3.25)]), Kind::Real32)]
    #[case(Value::Real32(vec![0.1, 1e30]), Kind::Real64)]
    #[case(Value::Bit(vec![true, false]), Kind::Natural8)]
    fn widening_then_narrowing_back_is_lossless(#[case] value: Value, #[case] wide: Kind) {
        let widened = value.coerce(wide).unwrap();
        assert_eq!(widened.kind(), wide);
        assert_eq!(widened.coerce(value.kind()).unwrap(), value);
    }

    #[test]
    fn display_includes_kind_and_elements() {
        assert_eq!(Value::Natural16(vec![42]).to_string(), "natural16[42]");
        assert_eq!(Value::from("hi").to_string(), "string \"hi\"");
        assert_eq!(Value::unstructured(vec![0xab, 0x01]).to_string(), "unstructured ab01");
    }

    #[test]
    fn serde_shape_is_kind_and_elements() {
        let json = serde_json::to_value(Value::Natural16(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "natural16", "elements": [1, 2]}));

        let half: Value =
            serde_json::from_value(serde_json::json!({"kind": "real16", "elements": [0.5]}))
                .unwrap();
        assert_eq!(half, Value::Real16(vec![f16::from_f32(0.5)]));
    }

    #[test]
    fn non_finite_reals_survive_serialization() {
        let value = Value::Real64(vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "real64", "elements": ["NaN", "inf", "-inf", 1.5]})
        );

        let back: Value = serde_json::from_value(json).unwrap();
        let Value::Real64(elements) = back else {
            panic!("deserialized into the wrong kind");
        };
        assert!(elements[0].is_nan());
        assert_eq!(&elements[1..], &[f64::INFINITY, f64::NEG_INFINITY, 1.5]);

        let half: Value = serde_json::from_str(r#"{"kind":"real16","elements":["inf",0.25]}"#).unwrap();
        assert_eq!(half, Value::Real16(vec![f16::INFINITY, f16::from_f32(0.25)]));

        let err = serde_json::from_str::<Value>(r#"{"kind":"real32","elements":["lots"]}"#);
        assert!(err.is_err());
    }
}
