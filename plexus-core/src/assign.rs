//! Assignment parser: external text/literals → `(RegisterName, Value)`.
//!
//! Two independent entry points:
//!
//! - [`parse_hierarchical`] decodes the hierarchical-name form used for
//!   environment overrides, where the kind is always explicit:
//!   `UAVCAN__NODE__ID__NATURAL16=42` → `uavcan.node.id = natural16[42]`.
//! - [`infer_literal`] decodes a human-authored YAML literal with no kind
//!   token and infers the narrowest fitting kind.
//!
//! [`encode_hierarchical`] is the inverse of [`parse_hierarchical`].

use std::fmt::Display;
use std::str::FromStr;

use half::f16;
use serde_yaml::Value as Yaml;

use crate::error::RegisterError;
use crate::register::RegisterName;
use crate::value::{Kind, Value};

/// Separator between name segments in the hierarchical-name form.
pub const SEGMENT_SEPARATOR: &str = "__";

// ---------------------------------------------------------------------------
// 1. Hierarchical-name form
// ---------------------------------------------------------------------------

/// Decode one `KEY=text` pair. The last `__` segment of the key names the kind.
///
/// Numeric arrays are comma- or whitespace-separated; `string` takes the text
/// verbatim; `unstructured` is hex.
pub fn parse_hierarchical(key: &str, text: &str) -> Result<(RegisterName, Value), RegisterError> {
    let (name, kind) = split_key(key)?;
    let value = decode_text(key, kind, text)?;
    Ok((name, value))
}

/// Pick every variable whose key ends in a kind token and decode it.
///
/// Unrelated variables (`PATH`, `HOME`, ...) are skipped. A variable that
/// looks like an assignment but fails to decode is an error.
pub fn parse_environment<I, K, V>(vars: I) -> Result<Vec<(RegisterName, Value)>, RegisterError>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut out = Vec::new();
    for (key, text) in vars {
        let key = key.as_ref();
        if !looks_like_assignment(key) {
            continue;
        }
        out.push(parse_hierarchical(key, text.as_ref())?);
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

/// Encode a register as a `(KEY, text)` pair that [`parse_hierarchical`]
/// decodes back to the same name and value.
pub fn encode_hierarchical(name: &RegisterName, value: &Value) -> (String, String) {
    let mut key: Vec<String> = name.segments().map(str::to_ascii_uppercase).collect();
    key.push(value.kind().token().to_ascii_uppercase());
    (key.join(SEGMENT_SEPARATOR), encode_text(value))
}

fn looks_like_assignment(key: &str) -> bool {
    match key.rsplit_once(SEGMENT_SEPARATOR) {
        Some((head, token)) => !head.is_empty() && Kind::from_token(token).is_some(),
        None => false,
    }
}

fn split_key(key: &str) -> Result<(RegisterName, Kind), RegisterError> {
    let Some((head, token)) = key.rsplit_once(SEGMENT_SEPARATOR) else {
        return Err(RegisterError::invalid(key, "missing kind suffix"));
    };
    let kind = Kind::from_token(token)
        .ok_or_else(|| RegisterError::invalid(key, format!("unknown kind token '{token}'")))?;
    let dotted = head
        .split(SEGMENT_SEPARATOR)
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(".");
    let name = RegisterName::parse(&dotted)
        .map_err(|_| RegisterError::invalid(key, format!("'{dotted}' is not a valid register name")))?;
    Ok((name, kind))
}

fn decode_text(subject: &str, kind: Kind, text: &str) -> Result<Value, RegisterError> {
    match kind {
        Kind::String => return Ok(Value::String(text.to_owned())),
        Kind::Unstructured => {
            return hex::decode(text.trim())
                .map(Value::Unstructured)
                .map_err(|e| RegisterError::invalid(subject, format!("bad hex: {e}")));
        }
        _ => {}
    }

    let tokens: Vec<&str> = text
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.is_empty() {
        return Err(RegisterError::invalid(subject, "no elements given"));
    }

    let value = match kind {
        Kind::Bit => Value::Bit(
            tokens
                .iter()
                .map(|t| parse_bit(subject, t))
                .collect::<Result<_, _>>()?,
        ),
        Kind::Integer8 => Value::Integer8(parse_all(subject, &tokens)?),
        Kind::Integer16 => Value::Integer16(parse_all(subject, &tokens)?),
        Kind::Integer32 => Value::Integer32(parse_all(subject, &tokens)?),
        Kind::Integer64 => Value::Integer64(parse_all(subject, &tokens)?),
        Kind::Natural8 => Value::Natural8(parse_all(subject, &tokens)?),
        Kind::Natural16 => Value::Natural16(parse_all(subject, &tokens)?),
        Kind::Natural32 => Value::Natural32(parse_all(subject, &tokens)?),
        Kind::Natural64 => Value::Natural64(parse_all(subject, &tokens)?),
        Kind::Real16 => Value::Real16(
            parse_all::<f64>(subject, &tokens)?
                .into_iter()
                .map(f16::from_f64)
                .collect(),
        ),
        Kind::Real32 => Value::Real32(parse_all(subject, &tokens)?),
        Kind::Real64 => Value::Real64(parse_all(subject, &tokens)?),
        Kind::String | Kind::Unstructured => {
            return Err(RegisterError::invalid(subject, "not an array kind"))
        }
    };
    Ok(value)
}

fn parse_bit(subject: &str, token: &str) -> Result<bool, RegisterError> {
    match token.to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        other => Err(RegisterError::invalid(subject, format!("'{other}' is not a bit"))),
    }
}

fn parse_all<T>(subject: &str, tokens: &[&str]) -> Result<Vec<T>, RegisterError>
where
    T: FromStr,
    T::Err: Display,
{
    tokens
        .iter()
        .map(|t| {
            t.parse::<T>()
                .map_err(|e| RegisterError::invalid(subject, format!("'{t}': {e}")))
        })
        .collect()
}

fn encode_text(value: &Value) -> String {
    fn join<T: Display>(v: &[T]) -> String {
        v.iter().map(T::to_string).collect::<Vec<_>>().join(",")
    }
    match value {
        Value::Bit(v) => v
            .iter()
            .map(|b| if *b { "1" } else { "0" })
            .collect::<Vec<_>>()
            .join(","),
        Value::Integer8(v) => join(v),
        Value::Integer16(v) => join(v),
        Value::Integer32(v) => join(v),
        Value::Integer64(v) => join(v),
        Value::Natural8(v) => join(v),
        Value::Natural16(v) => join(v),
        Value::Natural32(v) => join(v),
        Value::Natural64(v) => join(v),
        Value::Real16(v) => join(v),
        Value::Real32(v) => join(v),
        Value::Real64(v) => join(v),
        Value::String(s) => s.clone(),
        Value::Unstructured(b) => hex::encode(b),
    }
}

// ---------------------------------------------------------------------------
// 2. Declarative-literal form
// ---------------------------------------------------------------------------

/// Infer a typed value from an untyped YAML literal.
///
/// - booleans → `bit`
/// - integers → narrowest natural width if all are non-negative, otherwise
///   the narrowest signed width
/// - floats (integers mixed in are promoted) → `real16` if exact at half
///   precision, `real32` if the shortest decimal form survives single
///   precision, otherwise `real64`
/// - strings → `string`
/// - `{<kind>: <literal>}` → the literal decoded strictly as `<kind>`
///
/// Anything else, including heterogeneous and empty sequences, is
/// `InvalidAssignment`. `subject` names the assignment in error messages.
pub fn infer_literal(subject: &str, literal: &Yaml) -> Result<Value, RegisterError> {
    match literal {
        Yaml::String(s) => Ok(Value::String(s.clone())),
        Yaml::Mapping(map) => {
            let mut entries = map.iter();
            match (entries.next(), entries.next()) {
                (Some((Yaml::String(token), inner)), None) => {
                    let kind = Kind::from_token(token).ok_or_else(|| {
                        RegisterError::invalid(subject, format!("unknown kind '{token}'"))
                    })?;
                    typed_literal(subject, kind, inner)
                }
                _ => Err(RegisterError::invalid(
                    subject,
                    "a mapping literal must have exactly one key naming the kind",
                )),
            }
        }
        Yaml::Sequence(items) if items.is_empty() => Err(RegisterError::invalid(
            subject,
            "cannot infer a kind from an empty sequence",
        )),
        Yaml::Sequence(items) => {
            let scalars = items
                .iter()
                .map(|item| classify(subject, item))
                .collect::<Result<Vec<_>, _>>()?;
            infer_scalars(subject, &scalars)
        }
        other => {
            let scalar = classify(subject, other)?;
            infer_scalars(subject, &[scalar])
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Literal {
    Bool(bool),
    Int(i128),
    Float(f64),
}

fn classify(subject: &str, item: &Yaml) -> Result<Literal, RegisterError> {
    match item {
        Yaml::Bool(b) => Ok(Literal::Bool(*b)),
        Yaml::Number(n) => {
            if let Some(u) = n.as_u64() {
                Ok(Literal::Int(i128::from(u)))
            } else if let Some(i) = n.as_i64() {
                Ok(Literal::Int(i128::from(i)))
            } else {
                Ok(Literal::Float(n.as_f64().unwrap_or(f64::NAN)))
            }
        }
        Yaml::Null => Err(RegisterError::invalid(subject, "null is not a value")),
        Yaml::String(_) => Err(RegisterError::invalid(
            subject,
            "strings are only allowed as standalone values",
        )),
        _ => Err(RegisterError::invalid(subject, "unsupported literal shape")),
    }
}

fn infer_scalars(subject: &str, items: &[Literal]) -> Result<Value, RegisterError> {
    let all_bool = items.iter().all(|l| matches!(l, Literal::Bool(_)));
    let any_bool = items.iter().any(|l| matches!(l, Literal::Bool(_)));
    if all_bool {
        return Ok(Value::Bit(
            items
                .iter()
                .map(|l| matches!(l, Literal::Bool(true)))
                .collect(),
        ));
    }
    if any_bool {
        return Err(RegisterError::invalid(
            subject,
            "sequence mixes booleans with numbers",
        ));
    }

    let ints: Option<Vec<i128>> = items
        .iter()
        .map(|l| match l {
            Literal::Int(i) => Some(*i),
            _ => None,
        })
        .collect();
    match ints {
        Some(ints) => narrowest_integer(subject, &ints),
        None => {
            let floats: Vec<f64> = items
                .iter()
                .map(|l| match l {
                    Literal::Int(i) => *i as f64,
                    Literal::Float(f) => *f,
                    Literal::Bool(_) => 0.0,
                })
                .collect();
            Ok(narrowest_real(&floats))
        }
    }
}

fn narrowest_integer(subject: &str, ints: &[i128]) -> Result<Value, RegisterError> {
    let min = ints.iter().copied().min().unwrap_or(0);
    let max = ints.iter().copied().max().unwrap_or(0);
    let fits = |lo: i128, hi: i128| min >= lo && max <= hi;

    let value = if min >= 0 {
        if fits(0, u8::MAX.into()) {
            Value::Natural8(ints.iter().map(|i| *i as u8).collect())
        } else if fits(0, u16::MAX.into()) {
            Value::Natural16(ints.iter().map(|i| *i as u16).collect())
        } else if fits(0, u32::MAX.into()) {
            Value::Natural32(ints.iter().map(|i| *i as u32).collect())
        } else if fits(0, u64::MAX.into()) {
            Value::Natural64(ints.iter().map(|i| *i as u64).collect())
        } else {
            return Err(RegisterError::invalid(subject, "integer exceeds 64 bits"));
        }
    } else if fits(i8::MIN.into(), i8::MAX.into()) {
        Value::Integer8(ints.iter().map(|i| *i as i8).collect())
    } else if fits(i16::MIN.into(), i16::MAX.into()) {
        Value::Integer16(ints.iter().map(|i| *i as i16).collect())
    } else if fits(i32::MIN.into(), i32::MAX.into()) {
        Value::Integer32(ints.iter().map(|i| *i as i32).collect())
    } else if fits(i64::MIN.into(), i64::MAX.into()) {
        Value::Integer64(ints.iter().map(|i| *i as i64).collect())
    } else {
        return Err(RegisterError::invalid(
            subject,
            "integers do not fit any signed 64-bit width",
        ));
    };
    Ok(value)
}

fn narrowest_real(floats: &[f64]) -> Value {
    let exact_half = floats
        .iter()
        .all(|f| f.is_finite() && f16::from_f64(*f).to_f64() == *f);
    if exact_half {
        return Value::Real16(floats.iter().map(|f| f16::from_f64(*f)).collect());
    }
    let same_decimal_single = floats
        .iter()
        .all(|f| f.is_finite() && (*f as f32).to_string() == f.to_string());
    if same_decimal_single {
        return Value::Real32(floats.iter().map(|f| *f as f32).collect());
    }
    Value::Real64(floats.to_vec())
}

/// Decode a literal under an explicitly named kind. Numbers are checked
/// against the target range rather than wrapped.
fn typed_literal(subject: &str, kind: Kind, literal: &Yaml) -> Result<Value, RegisterError> {
    match (kind, literal) {
        (Kind::String, Yaml::String(s)) => return Ok(Value::String(s.clone())),
        (Kind::Unstructured, Yaml::String(s)) => return decode_text(subject, kind, s),
        (Kind::String | Kind::Unstructured, _) => {
            return Err(RegisterError::invalid(
                subject,
                format!("{kind} literal must be a string"),
            ))
        }
        _ => {}
    }

    let items: Vec<&Yaml> = match literal {
        Yaml::Sequence(items) => items.iter().collect(),
        scalar => vec![scalar],
    };
    let tokens = items
        .into_iter()
        .map(|item| match item {
            Yaml::Bool(b) => Ok(b.to_string()),
            Yaml::Number(n) if n.is_f64() => Ok(n.as_f64().unwrap_or(f64::NAN).to_string()),
            Yaml::Number(n) => Ok(n.to_string()),
            _ => Err(RegisterError::invalid(
                subject,
                format!("{kind} elements must be booleans or numbers"),
            )),
        })
        .collect::<Result<Vec<_>, _>>()?;
    decode_text(subject, kind, &tokens.join(","))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
