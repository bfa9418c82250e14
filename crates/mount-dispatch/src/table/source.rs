//! YAML source format of the command table.
//!
//! ```yaml
//! slew_to_coordinates:
//!   file: slew_to_coordinates.py
//!   params: [hours, degrees, B]
//!   response: 1
//! set_park:            # body fully commented out: inactive
//!   # cmd: MP1
//! ```

use std::fmt;

use serde::Deserialize;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use strum::IntoEnumIterator;

use super::spec::{ActionClass, CommandSpec};
use crate::codec::{ParamDescriptor, ResponseGrammar};
use crate::error::LoadError;

/// Top-level mapping, kept in document order with duplicates preserved so
/// the loader can report them by name.
pub(super) struct RawTable(pub(super) Vec<(String, Option<RawEntry>)>);

impl<'de> Deserialize<'de> for RawTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RawTableVisitor)
    }
}

struct RawTableVisitor;

impl<'de> Visitor<'de> for RawTableVisitor {
    type Value = RawTable;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a mapping of action names to command entries")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawTable(Vec::new()))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some(entry) = map.next_entry::<String, Option<RawEntry>>()? {
            entries.push(entry);
        }
        Ok(RawTable(entries))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(super) struct RawEntry {
    #[serde(default)]
    cmd: Option<RawScalar>,
    #[serde(default)]
    file: Option<RawScalar>,
    #[serde(default)]
    params: Option<RawParams>,
    #[serde(default)]
    response: Option<RawScalar>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    class: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParams {
    List(Vec<RawParam>),
    Single(RawScalar),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawParam {
    Named {
        name: String,
        format: RawScalar,
        #[serde(default)]
        precision: Option<usize>,
    },
    Token(RawScalar),
}

/// Any YAML scalar, read back as the text it was written as.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawScalar {
    fn into_text(self) -> String {
        match self {
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Text(value) => value,
        }
    }
}

/// Parses the YAML document into raw entries.
pub(super) fn parse_document(source: &str) -> Result<RawTable, LoadError> {
    let blank = source
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'));
    if blank {
        return Ok(RawTable(Vec::new()));
    }
    let parsed: Option<RawTable> =
        serde_saphyr::from_str(source).map_err(|error| LoadError::Syntax {
            message: error.to_string(),
        })?;
    Ok(parsed.unwrap_or(RawTable(Vec::new())))
}

/// Converts one raw entry, returning `None` for inactive entries.
pub(super) fn build_spec(
    name: String,
    entry: Option<RawEntry>,
) -> Result<Option<CommandSpec>, LoadError> {
    let Some(raw) = entry else {
        return Ok(None);
    };
    if raw.enabled == Some(false) {
        return Ok(None);
    }

    let params = raw
        .params
        .map(|params| convert_params(&name, params))
        .transpose()?
        .unwrap_or_default();
    let response_text = raw.response.map(RawScalar::into_text).unwrap_or_default();
    let response = ResponseGrammar::parse(&response_text)
        .map_err(|message| LoadError::invalid_entry(&name, message))?;
    let class = raw
        .class
        .map(|text| {
            text.trim().parse::<ActionClass>().map_err(|_| {
                let known: Vec<&str> = ActionClass::iter().map(<&str>::from).collect();
                LoadError::invalid_entry(
                    &name,
                    format!("unknown class '{text}' (expected one of {})", known.join(", ")),
                )
            })
        })
        .transpose()?;

    let mut spec = match (raw.cmd, raw.file) {
        (Some(command), None) => {
            CommandSpec::native(name, &command.into_text(), params, response)?
        }
        (None, Some(handler)) => {
            CommandSpec::delegated(name, &handler.into_text(), params, response)?
        }
        (Some(_), Some(_)) => {
            return Err(LoadError::invalid_entry(
                name,
                "'cmd' and 'file' are mutually exclusive",
            ));
        }
        (None, None) => {
            return Err(LoadError::invalid_entry(
                name,
                "entry needs either 'cmd' or 'file'",
            ));
        }
    };
    if let Some(declared) = class {
        spec = spec.with_class(declared);
    }
    Ok(Some(spec))
}

fn convert_params(name: &str, params: RawParams) -> Result<Vec<ParamDescriptor>, LoadError> {
    let invalid = |message: String| LoadError::invalid_entry(name, message);
    match params {
        RawParams::Single(token) => token
            .into_text()
            .split_whitespace()
            .map(|word| ParamDescriptor::parse(word).map_err(invalid))
            .collect(),
        RawParams::List(items) => items
            .into_iter()
            .map(|item| match item {
                RawParam::Token(token) => {
                    ParamDescriptor::parse(&token.into_text()).map_err(invalid)
                }
                RawParam::Named {
                    name: param,
                    format,
                    precision,
                } => {
                    let mut descriptor =
                        ParamDescriptor::named(param, &format.into_text()).map_err(invalid)?;
                    if let Some(digits) = precision {
                        descriptor = descriptor.with_precision(digits).map_err(invalid)?;
                    }
                    Ok(descriptor)
                }
            })
            .collect(),
    }
}
