//! Argument encoding and response decoding.
//!
//! The codec is pure: it converts typed arguments into wire tokens according
//! to a command's parameter descriptors, and matches raw response text
//! against a [`ResponseGrammar`]. It never touches a transport.

mod format;
mod grammar;
mod params;

pub use self::format::{AngleFormat, AngleUnit, FixedWidth, SexagesimalFormat, TemplatePart};
pub use self::grammar::{Field, ResponseGrammar, ScalarKind, Separator, Value};
pub use self::params::{Angle, Argument, FlagStyle, ParamDescriptor, ParamKind, encode};

use crate::error::ParseError;

/// Decodes `raw` according to `grammar`.
///
/// # Errors
///
/// Returns [`ParseError`] when the response does not match.
pub fn decode(grammar: &ResponseGrammar, raw: &str) -> Result<Value, ParseError> {
    grammar.decode(raw)
}
