//! Command and handler templates with positional `{N}` slots.

use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot(usize),
}

/// Parsed `cmd` or `file` template.
///
/// `{N}` marks the zero-based parameter `N`; `{{` and `}}` are literal
/// braces.
///
/// # Example
///
/// ```
/// use mount_dispatch::table::Template;
///
/// let template = Template::parse("Sr{0}").unwrap();
/// assert!(template.has_slots());
/// assert_eq!(template.render(&[String::from("05:30:00")]), "Sr05:30:00");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    /// Parses template text.
    ///
    /// # Errors
    ///
    /// Returns a description of the first malformed brace sequence.
    pub fn parse(source: &str) -> Result<Self, String> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(current) = chars.next() {
            match current {
                '{' if chars.next_if_eq(&'{').is_some() => literal.push('{'),
                '}' if chars.next_if_eq(&'}').is_some() => literal.push('}'),
                '{' => {
                    let mut digits = String::new();
                    while let Some(digit) = chars.next_if(char::is_ascii_digit) {
                        digits.push(digit);
                    }
                    if chars.next_if_eq(&'}').is_none() || digits.is_empty() {
                        return Err(format!(
                            "template '{source}' has a malformed slot; use {{N}} or {{{{ to escape"
                        ));
                    }
                    let index = digits
                        .parse()
                        .map_err(|_| format!("template '{source}' has an oversized slot index"))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Slot(index));
                }
                '}' => {
                    return Err(format!(
                        "template '{source}' has an unmatched '}}'; use }}}} to escape"
                    ));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Self {
            source: source.to_owned(),
            segments,
        })
    }

    /// Returns the template text as written.
    #[must_use]
    pub const fn source(&self) -> &str {
        self.source.as_str()
    }

    /// Returns `true` when the template references parameters explicitly.
    #[must_use]
    pub fn has_slots(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, Segment::Slot(_)))
    }

    /// Checks that slots and declared parameters agree.
    ///
    /// A template without slots accepts any parameter count. With slots,
    /// every index must name a declared parameter and every parameter must
    /// be referenced at least once.
    ///
    /// # Errors
    ///
    /// Returns a description of the first mismatch.
    pub fn check_arity(&self, params: usize) -> Result<(), String> {
        let slots: BTreeSet<usize> = self
            .segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Slot(index) => Some(*index),
                Segment::Literal(_) => None,
            })
            .collect();
        if slots.is_empty() {
            return Ok(());
        }
        if let Some(index) = slots.iter().find(|index| **index >= params) {
            return Err(format!(
                "template references parameter {{{index}}} but only {params} are declared"
            ));
        }
        if let Some(unused) = (0..params).find(|index| !slots.contains(index)) {
            return Err(format!(
                "parameter {unused} is declared but never referenced by the template"
            ));
        }
        Ok(())
    }

    /// Substitutes encoded arguments into the slots.
    ///
    /// Slots without a matching argument render empty; load-time arity
    /// checks keep that from happening for table entries.
    #[must_use]
    pub fn render(&self, args: &[String]) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.as_str(),
                Segment::Slot(index) => args.get(*index).map_or("", String::as_str),
            })
            .collect()
    }
}
