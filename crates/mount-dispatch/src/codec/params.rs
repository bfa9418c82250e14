//! Typed arguments and the parameter descriptors that render them.

use serde::Serialize;

use super::format::{AngleFormat, AngleUnit, FixedWidth, SexagesimalFormat};
use crate::error::ValidationError;

const DEFAULT_ANGLE_PRECISION: usize = 6;

/// Angle value stored in degrees.
///
/// # Example
///
/// ```
/// use mount_dispatch::codec::Angle;
///
/// let ra = Angle::from_hours(5.5);
/// assert_eq!(ra.degrees(), 82.5);
/// assert_eq!(ra.hours(), 5.5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Angle {
    degrees: f64,
}

impl Angle {
    /// Creates an angle from decimal degrees.
    #[must_use]
    pub const fn from_degrees(degrees: f64) -> Self {
        Self { degrees }
    }

    /// Creates an angle from decimal hours.
    #[must_use]
    pub fn from_hours(hours: f64) -> Self {
        Self {
            degrees: AngleUnit::Hours.to_degrees(hours),
        }
    }

    /// Returns the angle in degrees.
    #[must_use]
    pub const fn degrees(self) -> f64 {
        self.degrees
    }

    /// Returns the angle in hours.
    #[must_use]
    pub fn hours(self) -> f64 {
        AngleUnit::Hours.convert_degrees(self.degrees)
    }
}

/// Caller-supplied argument for a mount action.
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Whole number.
    Int(i64),
    /// Decimal number; interpreted in the descriptor's unit for angles.
    Float(f64),
    /// Angle with an explicit unit.
    Angle(Angle),
    /// Boolean flag.
    Flag(bool),
    /// Enumerated token or free text.
    Text(String),
}

impl Argument {
    /// Parses operator-supplied text into the argument kind a descriptor
    /// expects.
    ///
    /// Angles accept decimal numbers (in the descriptor's unit) or
    /// sexagesimal text such as `-12*30:00` or `05:30:00`. Flags accept
    /// `true`/`false`, `yes`/`no`, `on`/`off` and `1`/`0`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Kind`] when the text cannot be read as the
    /// expected kind.
    ///
    /// # Example
    ///
    /// ```
    /// use mount_dispatch::codec::{Argument, ParamDescriptor};
    ///
    /// let dec = ParamDescriptor::parse("sDD*MM:SS").unwrap();
    /// let argument = Argument::from_text(&dec, 0, "-12:30:00").unwrap();
    /// assert!(matches!(argument, Argument::Angle(angle) if angle.degrees() == -12.5));
    /// ```
    pub fn from_text(
        descriptor: &ParamDescriptor,
        position: usize,
        text: &str,
    ) -> Result<Self, ValidationError> {
        let trimmed = text.trim();
        let kind_error = || ValidationError::Kind {
            position,
            expected: descriptor.kind().describe(),
        };
        match descriptor.kind() {
            ParamKind::Integer(_) => trimmed.parse().map(Self::Int).map_err(|_| kind_error()),
            ParamKind::Float { .. } => trimmed.parse().map(Self::Float).map_err(|_| kind_error()),
            ParamKind::Angle(format) => trimmed.parse().map(Self::Float).or_else(|_| {
                parse_sexagesimal_text(trimmed, format.unit())
                    .map(Self::Angle)
                    .ok_or_else(kind_error)
            }),
            ParamKind::Flag(_) => parse_flag(trimmed).map(Self::Flag).ok_or_else(kind_error),
            ParamKind::Choice(_) | ParamKind::Text => Ok(Self::Text(trimmed.to_owned())),
        }
    }

    const fn describe(&self) -> &'static str {
        match self {
            Self::Int(_) => "an integer",
            Self::Float(_) => "a number",
            Self::Angle(_) => "an angle",
            Self::Flag(_) => "a flag",
            Self::Text(_) => "text",
        }
    }
}

/// How a flag is written on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagStyle {
    /// `1` or `0`.
    Digit,
    /// `true` or `false`.
    Word,
}

/// Semantic kind of a positional parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKind {
    /// Integer, optionally fixed width.
    Integer(Option<FixedWidth>),
    /// Decimal number.
    Float {
        /// Digits after the decimal point; shortest form when absent.
        precision: Option<usize>,
    },
    /// Angle.
    Angle(AngleFormat),
    /// Boolean flag.
    Flag(FlagStyle),
    /// One of a closed set of tokens.
    Choice(Vec<String>),
    /// Free text.
    Text,
}

impl ParamKind {
    fn parse(token: &str) -> Result<Self, String> {
        let kind = match token {
            "int" | "integer" => Self::Integer(None),
            "float" | "number" => Self::Float { precision: None },
            "degrees" => Self::Angle(AngleFormat::Decimal {
                unit: AngleUnit::Degrees,
                precision: DEFAULT_ANGLE_PRECISION,
            }),
            "hours" => Self::Angle(AngleFormat::Decimal {
                unit: AngleUnit::Hours,
                precision: DEFAULT_ANGLE_PRECISION,
            }),
            "B" => Self::Flag(FlagStyle::Digit),
            "bool" | "flag" => Self::Flag(FlagStyle::Word),
            "text" | "str" | "string" => Self::Text,
            choices if choices.contains('|') => {
                let values: Vec<String> = choices
                    .split('|')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_owned)
                    .collect();
                if values.is_empty() {
                    return Err(format!("choice format '{choices}' lists no values"));
                }
                Self::Choice(values)
            }
            other => FixedWidth::parse(other)
                .map(|width| Self::Integer(Some(width)))
                .or_else(|| {
                    SexagesimalFormat::parse(other)
                        .map(|format| Self::Angle(AngleFormat::Sexagesimal(format)))
                })
                .ok_or_else(|| format!("unrecognised parameter format '{other}'"))?,
        };
        Ok(kind)
    }

    fn describe(&self) -> String {
        match self {
            Self::Integer(None) => String::from("an integer"),
            Self::Integer(Some(width)) => format!("an integer of at most {} digit(s)", width.width()),
            Self::Float { .. } => String::from("a number"),
            Self::Angle(_) => String::from("an angle"),
            Self::Flag(_) => String::from("a flag"),
            Self::Choice(values) => format!("one of {}", values.join(", ")),
            Self::Text => String::from("text"),
        }
    }
}

/// Describes one positional argument of a command.
///
/// # Example
///
/// ```
/// use mount_dispatch::codec::{Argument, ParamDescriptor};
///
/// let pulse = ParamDescriptor::parse("XXXXX").unwrap();
/// assert_eq!(pulse.render(0, &Argument::Int(250)).unwrap(), "00250");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDescriptor {
    name: Option<String>,
    token: String,
    kind: ParamKind,
}

impl ParamDescriptor {
    /// Parses an anonymous descriptor from a format token.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the token is not a known
    /// format.
    pub fn parse(token: &str) -> Result<Self, String> {
        let trimmed = token.trim();
        Ok(Self {
            name: None,
            token: trimmed.to_owned(),
            kind: ParamKind::parse(trimmed)?,
        })
    }

    /// Parses a named descriptor from a format token.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the token is not a known
    /// format.
    pub fn named(name: impl Into<String>, token: &str) -> Result<Self, String> {
        let mut descriptor = Self::parse(token)?;
        descriptor.name = Some(name.into());
        Ok(descriptor)
    }

    /// Overrides the number of decimals for decimal numbers and angles.
    ///
    /// # Errors
    ///
    /// Returns a description when the descriptor is not decimal.
    pub fn with_precision(mut self, digits: usize) -> Result<Self, String> {
        match &mut self.kind {
            ParamKind::Float { precision } => *precision = Some(digits),
            ParamKind::Angle(AngleFormat::Decimal { precision, .. }) => *precision = digits,
            _ => {
                return Err(format!(
                    "precision does not apply to format '{}'",
                    self.token
                ));
            }
        }
        Ok(self)
    }

    /// Returns the declared parameter name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the format token the descriptor was parsed from.
    #[must_use]
    pub const fn token(&self) -> &str {
        self.token.as_str()
    }

    /// Returns the semantic kind.
    #[must_use]
    pub const fn kind(&self) -> &ParamKind {
        &self.kind
    }

    /// Validates `argument` and renders its wire form.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Kind`] for a mismatched argument kind and
    /// [`ValidationError::OutOfRange`] for values the format cannot carry.
    pub fn render(&self, position: usize, argument: &Argument) -> Result<String, ValidationError> {
        let out_of_range = |message: String| ValidationError::OutOfRange { position, message };
        let mismatch = || ValidationError::Kind {
            position,
            expected: format!("{}, got {}", self.kind.describe(), argument.describe()),
        };

        match (&self.kind, argument) {
            (ParamKind::Integer(None), Argument::Int(value)) => Ok(value.to_string()),
            (ParamKind::Integer(Some(width)), Argument::Int(value)) => {
                width.render(*value).map_err(out_of_range)
            }
            (ParamKind::Float { precision }, Argument::Int(_) | Argument::Float(_)) => {
                let value = numeric(argument).ok_or_else(mismatch)?;
                render_decimal(value, *precision).map_err(out_of_range)
            }
            (ParamKind::Angle(format), Argument::Int(_) | Argument::Float(_) | Argument::Angle(_)) => {
                let degrees = match argument {
                    Argument::Angle(angle) => angle.degrees(),
                    _ => format.unit().to_degrees(numeric(argument).ok_or_else(mismatch)?),
                };
                render_angle(*format, degrees).map_err(out_of_range)
            }
            (ParamKind::Flag(style), Argument::Flag(_) | Argument::Int(0 | 1)) => {
                let set = matches!(argument, Argument::Flag(true) | Argument::Int(1));
                Ok(render_flag(*style, set).to_owned())
            }
            (ParamKind::Choice(values), Argument::Text(text)) => values
                .iter()
                .find(|value| value.eq_ignore_ascii_case(text.trim()))
                .cloned()
                .ok_or_else(mismatch),
            (ParamKind::Text, Argument::Text(text)) => {
                if text.chars().any(char::is_control) {
                    Err(out_of_range(String::from(
                        "text must not contain control characters",
                    )))
                } else {
                    Ok(text.clone())
                }
            }
            _ => Err(mismatch()),
        }
    }
}

/// Validates and renders arguments against an ordered parameter list.
///
/// # Errors
///
/// Returns [`ValidationError::Arity`] when the argument count differs from
/// the declared parameter count, or the first per-argument failure.
///
/// # Example
///
/// ```
/// use mount_dispatch::codec::{encode, Angle, Argument, ParamDescriptor};
///
/// let params = vec![
///     ParamDescriptor::parse("HH:MM:SS").unwrap(),
///     ParamDescriptor::parse("sDD*MM:SS").unwrap(),
/// ];
/// let args = [Argument::Angle(Angle::from_hours(5.5)), Argument::Float(-12.5)];
/// assert_eq!(encode(&params, &args).unwrap(), ["05:30:00", "-12*30:00"]);
/// ```
pub fn encode(
    params: &[ParamDescriptor],
    args: &[Argument],
) -> Result<Vec<String>, ValidationError> {
    if params.len() != args.len() {
        return Err(ValidationError::Arity {
            expected: params.len(),
            actual: args.len(),
        });
    }
    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(position, (descriptor, argument))| descriptor.render(position, argument))
        .collect()
}

#[expect(clippy::cast_precision_loss, reason = "integers are coerced to decimals on request")]
fn numeric(argument: &Argument) -> Option<f64> {
    match argument {
        Argument::Int(value) => Some(*value as f64),
        Argument::Float(value) => Some(*value),
        _ => None,
    }
}

fn render_decimal(value: f64, precision: Option<usize>) -> Result<String, String> {
    if !value.is_finite() {
        return Err(String::from("number must be finite"));
    }
    Ok(precision.map_or_else(|| value.to_string(), |digits| format!("{value:.digits$}")))
}

fn render_angle(format: AngleFormat, degrees: f64) -> Result<String, String> {
    match format {
        AngleFormat::Decimal { unit, precision } => render_decimal_angle(unit, precision, degrees),
        AngleFormat::Sexagesimal(sexagesimal) => sexagesimal.render(degrees),
    }
}

/// Hours normalise into [0, 24), degrees into [-180, 180).
fn render_decimal_angle(unit: AngleUnit, precision: usize, degrees: f64) -> Result<String, String> {
    if !degrees.is_finite() {
        return Err(String::from("angle must be a finite number"));
    }
    let (lower, upper) = match unit {
        AngleUnit::Hours => (0.0, 360.0),
        AngleUnit::Degrees => (-180.0, 180.0),
    };
    let normalised = (degrees - lower).rem_euclid(360.0) + lower;
    let rendered = format!("{:.precision$}", unit.convert_degrees(normalised));
    // Rounding may carry onto the upper bound or leave a negative zero.
    Ok(match rendered.parse::<f64>() {
        Ok(value) if value >= unit.convert_degrees(upper) => {
            format!("{:.precision$}", unit.convert_degrees(lower))
        }
        Ok(value) if value.abs() < f64::EPSILON => format!("{:.precision$}", 0.0),
        _ => rendered,
    })
}

const fn render_flag(style: FlagStyle, set: bool) -> &'static str {
    match (style, set) {
        (FlagStyle::Digit, true) => "1",
        (FlagStyle::Digit, false) => "0",
        (FlagStyle::Word, true) => "true",
        (FlagStyle::Word, false) => "false",
    }
}

pub(crate) fn parse_flag(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Reads `[+-]L<sep>MM[<sep>SS]` with any punctuation or unit letters as
/// separators.
fn parse_sexagesimal_text(text: &str, unit: AngleUnit) -> Option<Angle> {
    let (negative, body) = text.strip_prefix('-').map_or_else(
        || (false, text.strip_prefix('+').unwrap_or(text)),
        |rest| (true, rest),
    );
    let fields: Vec<f64> = body
        .split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|field| !field.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()
        .ok()?;
    let value = match fields.as_slice() {
        [lead, minutes] => lead + minutes / 60.0,
        [lead, minutes, seconds] => lead + minutes / 60.0 + seconds / 3600.0,
        _ => return None,
    };
    let degrees = unit.to_degrees(value);
    Some(Angle::from_degrees(if negative { -degrees } else { degrees }))
}
