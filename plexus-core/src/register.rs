//! Register names and register snapshots.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegisterError;
use crate::value::{Kind, Value};

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// A hierarchical dotted register name, e.g. `uavcan.node.id`.
///
/// Segments are non-empty, lowercase ASCII alphanumerics or `_`. An
/// underscore never starts or ends a segment and never doubles, so every name
/// survives the `__`-joined hierarchical-name form unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegisterName(String);

impl RegisterName {
    pub fn parse(raw: &str) -> Result<Self, RegisterError> {
        if raw.is_empty() {
            return Err(RegisterError::invalid(raw, "register name is empty"));
        }
        for segment in raw.split('.') {
            if segment.is_empty() {
                return Err(RegisterError::invalid(raw, "empty name segment"));
            }
            if segment.contains("__") || segment.starts_with('_') || segment.ends_with('_') {
                return Err(RegisterError::invalid(
                    raw,
                    "segments cannot contain '__' or start or end with '_'",
                ));
            }
            if let Some(c) = segment
                .chars()
                .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_'))
            {
                return Err(RegisterError::invalid(
                    raw,
                    format!("character {c:?} is not allowed in register names"),
                ));
            }
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for RegisterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RegisterName {
    type Err = RegisterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RegisterName {
    type Error = RegisterError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

// Ord on `RegisterName` is the derived `String` order, so map lookups by `&str` agree.
impl Borrow<str> for RegisterName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<RegisterName> for String {
    fn from(name: RegisterName) -> Self {
        name.0
    }
}

// ---------------------------------------------------------------------------
// Registers
// ---------------------------------------------------------------------------

/// Mutability and persistence of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterFlags {
    pub mutable: bool,
    pub persistent: bool,
}

impl RegisterFlags {
    /// Mutable and persistent: ordinary configuration.
    pub const CONFIG: RegisterFlags = RegisterFlags {
        mutable: true,
        persistent: true,
    };
    /// Mutable but reset to its default on restart.
    pub const VOLATILE: RegisterFlags = RegisterFlags {
        mutable: true,
        persistent: false,
    };
    /// Read-only, never persisted.
    pub const READ_ONLY: RegisterFlags = RegisterFlags {
        mutable: false,
        persistent: false,
    };
}

impl Default for RegisterFlags {
    fn default() -> Self {
        Self::CONFIG
    }
}

/// A point-in-time view of one register, as returned to readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Register {
    pub name: RegisterName,
    pub value: Value,
    pub mutable: bool,
    pub persistent: bool,
    /// Last time the stored value changed. Always `None` for computed registers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Register {
    pub fn kind(&self) -> Kind {
        self.value.kind()
    }

    pub fn flags(&self) -> RegisterFlags {
        RegisterFlags {
            mutable: self.mutable,
            persistent: self.persistent,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
