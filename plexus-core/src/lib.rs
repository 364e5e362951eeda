//! plexus core library: typed register values, register names, the
//! assignment parser and the shared error taxonomy.
//!
//! - [`value`]: [`Value`], [`Kind`] and coercion
//! - [`register`]: [`RegisterName`], [`Register`], [`RegisterFlags`]
//! - [`assign`]: hierarchical-name and declarative-literal parsing
//! - [`error`]: [`RegisterError`]

pub mod assign;
pub mod error;
pub mod register;
pub mod value;

pub use error::RegisterError;
pub use register::{Register, RegisterFlags, RegisterName};
pub use value::{Family, Kind, Value};
