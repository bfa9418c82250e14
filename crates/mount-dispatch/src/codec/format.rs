//! Format tokens shared by parameter descriptors and response grammars.
//!
//! Tokens follow the notation used by mount command tables: `X` runs are
//! fixed-width digits, `D`/`H` runs followed by `MM` and `SS` are
//! sexagesimal angles, and a leading `s` marks a signed field.

use std::iter::Peekable;
use std::str::Chars;

use serde::Serialize;

const SECONDS_PER_UNIT: u64 = 3600;

/// Unit of the leading field of an angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AngleUnit {
    /// Degrees of arc.
    Degrees,
    /// Hours of right ascension (15 degrees each).
    Hours,
}

impl AngleUnit {
    /// Converts a value expressed in this unit into degrees.
    #[must_use]
    pub fn to_degrees(self, value: f64) -> f64 {
        match self {
            Self::Degrees => value,
            Self::Hours => value * 15.0,
        }
    }

    /// Converts degrees into this unit.
    #[must_use]
    pub fn convert_degrees(self, degrees: f64) -> f64 {
        match self {
            Self::Degrees => degrees,
            Self::Hours => degrees / 15.0,
        }
    }

    const fn full_turn(self) -> u64 {
        match self {
            Self::Degrees => 360,
            Self::Hours => 24,
        }
    }
}

/// Fixed-width integer field such as `XXXXX` or `sXXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWidth {
    width: usize,
    signed: bool,
}

impl FixedWidth {
    /// Recognises `X` runs with an optional leading `s`.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let (signed, body) = split_sign(token);
        if body.is_empty() || !body.chars().all(|c| c == 'X') {
            return None;
        }
        Some(Self {
            width: body.len(),
            signed,
        })
    }

    /// Number of digits in the field.
    #[must_use]
    pub const fn width(self) -> usize {
        self.width
    }

    /// Whether the field carries a sign character.
    #[must_use]
    pub const fn signed(self) -> bool {
        self.signed
    }

    /// Renders `value` zero-padded to the declared width.
    ///
    /// # Errors
    ///
    /// Returns a description when the value is negative for an unsigned
    /// field or has more digits than the field allows.
    pub fn render(self, value: i64) -> Result<String, String> {
        if !self.signed && value < 0 {
            return Err(format!("{value} is negative but the field is unsigned"));
        }
        let magnitude = value.unsigned_abs();
        if magnitude.to_string().len() > self.width {
            return Err(format!("{value} does not fit {} digit(s)", self.width));
        }
        let mut rendered = String::with_capacity(self.width + 1);
        if self.signed {
            rendered.push(if value < 0 { '-' } else { '+' });
        }
        rendered.push_str(&format!("{magnitude:0width$}", width = self.width));
        Ok(rendered)
    }

    /// Parses a token rendered in this format.
    #[must_use]
    pub fn parse_value(self, text: &str) -> Option<i64> {
        let mut chars = text.chars().peekable();
        let negative = if self.signed {
            take_sign(&mut chars)?
        } else {
            false
        };
        let magnitude = i64::try_from(take_digits(&mut chars, self.width)?).ok()?;
        if chars.next().is_some() {
            return None;
        }
        Some(if negative { -magnitude } else { magnitude })
    }
}

/// Sexagesimal angle such as `sDD*MM:SS` or `HH:MM:SS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SexagesimalFormat {
    unit: AngleUnit,
    signed: bool,
    lead_width: usize,
    separators: [Option<char>; 2],
}

impl SexagesimalFormat {
    /// Recognises a `D`/`H` run followed by `MM` and `SS`, each optionally
    /// preceded by one punctuation character.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let (signed, body) = split_sign(token);
        let mut chars = body.chars().peekable();
        let (unit, lead) = match chars.peek()? {
            'D' => (AngleUnit::Degrees, 'D'),
            'H' => (AngleUnit::Hours, 'H'),
            _ => return None,
        };
        let mut lead_width = 0;
        while chars.next_if_eq(&lead).is_some() {
            lead_width += 1;
        }
        let first = chars.next_if(|c| !c.is_ascii_alphanumeric());
        expect_pair(&mut chars, 'M')?;
        let second = chars.next_if(|c| !c.is_ascii_alphanumeric());
        expect_pair(&mut chars, 'S')?;
        if chars.next().is_some() {
            return None;
        }
        Some(Self {
            unit,
            signed,
            lead_width,
            separators: [first, second],
        })
    }

    /// Unit of the leading field.
    #[must_use]
    pub const fn unit(self) -> AngleUnit {
        self.unit
    }

    /// Whether the format carries a sign character.
    #[must_use]
    pub const fn signed(self) -> bool {
        self.signed
    }

    /// Renders an angle given in degrees.
    ///
    /// Signed formats normalise into [-180, 180) degrees, unsigned formats
    /// into [0, 360). The result is rounded to the nearest second with carry.
    ///
    /// # Errors
    ///
    /// Returns a description when the angle is not finite or its leading
    /// field does not fit the declared width.
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "the magnitude is finite, non-negative and below one turn"
    )]
    pub fn render(self, degrees: f64) -> Result<String, String> {
        if !degrees.is_finite() {
            return Err(String::from("angle must be a finite number"));
        }
        let normalised = if self.signed {
            (degrees + 180.0).rem_euclid(360.0) - 180.0
        } else {
            degrees.rem_euclid(360.0)
        };
        let magnitude = self.unit.convert_degrees(normalised.abs());
        let mut total = (magnitude * 3600.0).round() as u64;
        let full_turn = self.unit.full_turn() * SECONDS_PER_UNIT;
        if !self.signed && total >= full_turn {
            total -= full_turn;
        }
        let lead = total / SECONDS_PER_UNIT;
        let minutes = (total % SECONDS_PER_UNIT) / 60;
        let seconds = total % 60;
        if lead.to_string().len() > self.lead_width {
            return Err(format!(
                "{lead} does not fit {} digit(s)",
                self.lead_width
            ));
        }

        let mut rendered = String::new();
        if self.signed {
            rendered.push(if normalised < 0.0 && total > 0 { '-' } else { '+' });
        }
        rendered.push_str(&format!("{lead:0width$}", width = self.lead_width));
        rendered.extend(self.separators.first().copied().flatten());
        rendered.push_str(&format!("{minutes:02}"));
        rendered.extend(self.separators.get(1).copied().flatten());
        rendered.push_str(&format!("{seconds:02}"));
        Ok(rendered)
    }

    /// Parses a token rendered in this format, returning degrees.
    #[must_use]
    pub fn parse_value(self, text: &str) -> Option<f64> {
        let mut chars = text.chars().peekable();
        let negative = if self.signed {
            take_sign(&mut chars)?
        } else {
            false
        };
        let lead = take_digits(&mut chars, self.lead_width)?;
        if let Some(separator) = self.separators.first().copied().flatten() {
            chars.next_if_eq(&separator)?;
        }
        let minutes = take_digits(&mut chars, 2)?;
        if let Some(separator) = self.separators.get(1).copied().flatten() {
            chars.next_if_eq(&separator)?;
        }
        let seconds = take_digits(&mut chars, 2)?;
        if chars.next().is_some() || minutes >= 60 || seconds >= 60 {
            return None;
        }
        let total = lead * SECONDS_PER_UNIT + minutes * 60 + seconds;
        let value = self.unit.to_degrees(seconds_to_units(total));
        Some(if negative { -value } else { value })
    }
}

/// Representation of an angle argument on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AngleFormat {
    /// Decimal number in the given unit.
    Decimal {
        /// Unit of the rendered number.
        unit: AngleUnit,
        /// Digits after the decimal point.
        precision: usize,
    },
    /// Fixed-width sexagesimal fields.
    Sexagesimal(SexagesimalFormat),
}

impl AngleFormat {
    /// Unit in which bare numbers are interpreted.
    #[must_use]
    pub const fn unit(self) -> AngleUnit {
        match self {
            Self::Decimal { unit, .. } => unit,
            Self::Sexagesimal(format) => format.unit,
        }
    }
}

/// One field of a structured response template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    /// Fixed-width numeric field named by its letter run.
    Field {
        /// Letter run naming the field, e.g. `YY`.
        name: String,
        /// Number of digits.
        width: usize,
        /// Whether a sign character precedes the digits.
        signed: bool,
    },
    /// Literal punctuation that must match exactly.
    Separator(char),
}

/// Parses a structured template such as `sMMMYYMMDDHHMMSS`.
///
/// Requires at least two fields of two or more digits each; anything else
/// is a scalar or a literal.
pub(crate) fn structured_parts(token: &str) -> Option<Vec<TemplatePart>> {
    let mut parts = Vec::new();
    let mut chars = token.chars().peekable();
    while let Some(current) = chars.next() {
        if current == 's' {
            let letter = chars.next_if(char::is_ascii_uppercase)?;
            parts.push(field_run(&mut chars, letter, true));
        } else if current.is_ascii_uppercase() {
            parts.push(field_run(&mut chars, current, false));
        } else if !current.is_ascii_alphanumeric() && !current.is_whitespace() {
            parts.push(TemplatePart::Separator(current));
        } else {
            return None;
        }
    }
    let widths: Vec<usize> = parts
        .iter()
        .filter_map(|part| match part {
            TemplatePart::Field { width, .. } => Some(*width),
            TemplatePart::Separator(_) => None,
        })
        .collect();
    (widths.len() >= 2 && widths.iter().all(|width| *width >= 2)).then_some(parts)
}

fn field_run(chars: &mut Peekable<Chars<'_>>, letter: char, signed: bool) -> TemplatePart {
    let mut width = 1;
    while chars.next_if_eq(&letter).is_some() {
        width += 1;
    }
    TemplatePart::Field {
        name: std::iter::repeat_n(letter, width).collect(),
        width,
        signed,
    }
}

fn split_sign(token: &str) -> (bool, &str) {
    token
        .strip_prefix('s')
        .map_or((false, token), |rest| (true, rest))
}

fn expect_pair(chars: &mut Peekable<Chars<'_>>, letter: char) -> Option<()> {
    chars.next_if_eq(&letter)?;
    chars.next_if_eq(&letter)?;
    Some(())
}

pub(crate) fn take_sign(chars: &mut Peekable<Chars<'_>>) -> Option<bool> {
    match chars.next()? {
        '+' => Some(false),
        '-' => Some(true),
        _ => None,
    }
}

pub(crate) fn take_digits(chars: &mut Peekable<Chars<'_>>, width: usize) -> Option<u64> {
    let mut value: u64 = 0;
    for _ in 0..width {
        let digit = chars.next_if(char::is_ascii_digit)?.to_digit(10)?;
        value = value.checked_mul(10)?.checked_add(u64::from(digit))?;
    }
    Some(value)
}

#[expect(
    clippy::cast_precision_loss,
    reason = "second counts stay far below 2^52"
)]
fn seconds_to_units(total: u64) -> f64 {
    total as f64 / 3600.0
}
