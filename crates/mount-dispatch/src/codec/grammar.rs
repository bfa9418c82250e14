//! Response grammars and the typed values they decode into.

use serde::Serialize;

use super::format::{FixedWidth, SexagesimalFormat, TemplatePart, structured_parts, take_digits, take_sign};
use super::params::{Angle, parse_flag};
use crate::error::ParseError;

/// Typed result of a decoded response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    /// Acknowledged without a payload.
    Ack,
    /// Whole number.
    Int(i64),
    /// Decimal number.
    Float(f64),
    /// Boolean flag.
    Flag(bool),
    /// Free text token.
    Text(String),
    /// Angle.
    Angle(Angle),
    /// Several scalars in declaration order.
    Tuple(Vec<Value>),
    /// Named fields of a structured template.
    Record(Vec<Field>),
}

impl Value {
    /// Returns the value as a decimal number when it is numeric.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "mount integers are small")]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            Self::Angle(angle) => Some(angle.degrees()),
            _ => None,
        }
    }

    /// Returns every text token, depth first.
    #[must_use]
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Self::Text(text) => vec![text.as_str()],
            Self::Tuple(values) => values.iter().flat_map(Self::texts).collect(),
            _ => Vec::new(),
        }
    }
}

/// Named numeric field of a [`Value::Record`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    name: String,
    value: i64,
}

impl Field {
    /// Returns the field name (its letter run, e.g. `YY`).
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the decoded value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.value
    }
}

/// Kind of one token in a scalar or tuple grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// Whole number.
    Int,
    /// Decimal number.
    Float,
    /// Boolean flag.
    Flag,
    /// Free text.
    Text,
    /// Fixed-width integer.
    Fixed(FixedWidth),
    /// Sexagesimal angle.
    Angle(SexagesimalFormat),
}

impl ScalarKind {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "int" | "integer" => Some(Self::Int),
            "float" | "number" => Some(Self::Float),
            "bool" | "flag" | "B" => Some(Self::Flag),
            "text" | "str" | "string" => Some(Self::Text),
            other => FixedWidth::parse(other)
                .map(Self::Fixed)
                .or_else(|| SexagesimalFormat::parse(other).map(Self::Angle)),
        }
    }

    const fn describe(self) -> &'static str {
        match self {
            Self::Int => "integer",
            Self::Float => "float",
            Self::Flag => "flag",
            Self::Text => "text",
            Self::Fixed(_) => "fixed-width integer",
            Self::Angle(_) => "angle",
        }
    }

    fn decode(self, position: usize, token: &str) -> Result<Value, ParseError> {
        let decoded = match self {
            Self::Int => token.parse().ok().map(Value::Int),
            Self::Float => token
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Value::Float),
            Self::Flag => parse_flag(token).map(Value::Flag),
            Self::Text => Some(Value::Text(token.to_owned())),
            Self::Fixed(width) => width.parse_value(token).map(Value::Int),
            Self::Angle(format) => format
                .parse_value(token)
                .map(|degrees| Value::Angle(Angle::from_degrees(degrees))),
        };
        decoded.ok_or_else(|| ParseError::Token {
            position,
            expected: self.describe().to_owned(),
            token: token.to_owned(),
        })
    }
}

/// Token separator of a tuple grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    /// Any run of whitespace.
    Whitespace,
    /// A single character, surrounding whitespace ignored.
    Char(char),
}

impl Separator {
    fn split(self, text: &str) -> Vec<&str> {
        match self {
            Self::Whitespace => text.split_whitespace().collect(),
            Self::Char(separator) => {
                if text.trim().is_empty() {
                    Vec::new()
                } else {
                    text.split(separator).map(str::trim).collect()
                }
            }
        }
    }
}

/// Expected shape of a command response.
///
/// # Example
///
/// ```
/// use mount_dispatch::codec::{ResponseGrammar, Value};
///
/// let grammar = ResponseGrammar::parse("float float").unwrap();
/// assert_eq!(
///     grammar.decode("12.5 -3.2").unwrap(),
///     Value::Tuple(vec![Value::Float(12.5), Value::Float(-3.2)]),
/// );
/// assert!(grammar.decode("12.5").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseGrammar {
    /// No response is read; the command is acknowledged once delivered.
    Nothing,
    /// Exact literal acknowledgement such as `1`.
    Literal(String),
    /// One scalar, or a tuple of scalars.
    Scalars {
        /// Token separator.
        separator: Separator,
        /// Kind of each token.
        kinds: Vec<ScalarKind>,
    },
    /// Fixed-width structured template such as `sMMMYYMMDDHHMMSS`.
    Structured(Vec<TemplatePart>),
}

impl ResponseGrammar {
    /// Parses a grammar definition.
    ///
    /// Empty text means no response. Text made only of scalar type names or
    /// format patterns is a scalar or tuple grammar; a single token with two
    /// or more letter-run fields is a structured template; anything else is
    /// a literal.
    ///
    /// # Errors
    ///
    /// Returns a description when typed and literal tokens are mixed.
    pub fn parse(source: &str) -> Result<Self, String> {
        let text = source.trim();
        if text.is_empty() {
            return Ok(Self::Nothing);
        }
        let separator = if text.contains(',') {
            Separator::Char(',')
        } else {
            Separator::Whitespace
        };
        let tokens = separator.split(text);
        let kinds: Vec<Option<ScalarKind>> =
            tokens.iter().map(|token| ScalarKind::parse(token)).collect();

        if kinds.iter().all(Option::is_some) {
            return Ok(Self::Scalars {
                separator,
                kinds: kinds.into_iter().flatten().collect(),
            });
        }
        if kinds.iter().any(Option::is_some) {
            return Err(format!(
                "response grammar '{text}' mixes typed and literal tokens"
            ));
        }
        if let Some(parts) = structured_parts(text).filter(|_| tokens.len() == 1) {
            return Ok(Self::Structured(parts));
        }
        Ok(Self::Literal(text.to_owned()))
    }

    /// Returns `true` when no response is expected.
    #[must_use]
    pub const fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    /// Matches `raw` against the grammar.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] identifying the first token that does not
    /// match; no partial result is ever produced.
    pub fn decode(&self, raw: &str) -> Result<Value, ParseError> {
        let response = raw.trim();
        match self {
            Self::Nothing => Ok(Value::Ack),
            Self::Literal(expected) => {
                if response == expected {
                    Ok(Value::Ack)
                } else {
                    Err(ParseError::Literal {
                        expected: expected.clone(),
                        actual: response.to_owned(),
                    })
                }
            }
            Self::Scalars { separator, kinds } => {
                let tokens = separator.split(response);
                if tokens.len() != kinds.len() {
                    return Err(ParseError::Arity {
                        expected: kinds.len(),
                        actual: tokens.len(),
                    });
                }
                let mut values = kinds
                    .iter()
                    .zip(tokens)
                    .enumerate()
                    .map(|(position, (kind, token))| kind.decode(position, token))
                    .collect::<Result<Vec<_>, _>>()?;
                if values.len() == 1 {
                    Ok(values.pop().unwrap_or(Value::Ack))
                } else {
                    Ok(Value::Tuple(values))
                }
            }
            Self::Structured(parts) => decode_structured(parts, response),
        }
    }
}

fn decode_structured(parts: &[TemplatePart], response: &str) -> Result<Value, ParseError> {
    let mut chars = response.chars().peekable();
    let mut fields = Vec::new();
    for (position, part) in parts.iter().enumerate() {
        let mismatch = |expected: String| ParseError::Token {
            position,
            expected,
            token: response.to_owned(),
        };
        match part {
            TemplatePart::Separator(separator) => {
                chars
                    .next_if_eq(separator)
                    .ok_or_else(|| mismatch(format!("separator '{separator}'")))?;
            }
            TemplatePart::Field {
                name,
                width,
                signed,
            } => {
                let field_error = || mismatch(format!("{width}-digit field {name}"));
                let negative = if *signed {
                    take_sign(&mut chars).ok_or_else(field_error)?
                } else {
                    false
                };
                let magnitude = take_digits(&mut chars, *width)
                    .and_then(|digits| i64::try_from(digits).ok())
                    .ok_or_else(field_error)?;
                fields.push(Field {
                    name: name.clone(),
                    value: if negative { -magnitude } else { magnitude },
                });
            }
        }
    }
    if chars.next().is_some() {
        return Err(ParseError::Token {
            position: parts.len(),
            expected: String::from("end of response"),
            token: response.to_owned(),
        });
    }
    Ok(Value::Record(fields))
}
