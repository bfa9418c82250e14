//! Command specification records.

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use super::template::Template;
use crate::codec::{ParamDescriptor, ResponseGrammar};
use crate::error::LoadError;
use crate::transport::{Invocation, WireRequest};

/// Retry class of an action.
///
/// Only connection and query actions are safe to repeat on an unconfirmed
/// channel; the others change hardware state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ActionClass {
    /// Opens or closes the link to the mount.
    Connection,
    /// Reads state without side effects.
    Query,
    /// Changes a setting without moving the mount.
    Configure,
    /// Starts or stops motion.
    Motion,
}

impl ActionClass {
    const MOTION_PREFIXES: [&'static str; 4] = ["slew", "home", "move", "stop"];

    /// Derives the class from an action name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "connect" | "disconnect" => Self::Connection,
            "park" | "unpark" | "start_tracking" => Self::Motion,
            _ if name.starts_with("get_") || name.starts_with("is_") => Self::Query,
            _ if Self::MOTION_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix)) =>
            {
                Self::Motion
            }
            _ => Self::Configure,
        }
    }

    /// Returns `true` when a failed attempt may be repeated blindly.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Connection | Self::Query)
    }
}

/// How an action reaches the hardware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Framed command written to the mount's serial line.
    NativeProtocol {
        /// Command text template.
        command: Template,
        /// Positional parameters.
        params: Vec<ParamDescriptor>,
        /// Expected reply.
        response: ResponseGrammar,
    },
    /// External handler invoked with the encoded arguments.
    DelegatedScript {
        /// Handler reference template.
        handler: Template,
        /// Positional parameters.
        params: Vec<ParamDescriptor>,
        /// Expected output.
        response: ResponseGrammar,
    },
}

impl Strategy {
    /// Returns the declared parameters.
    #[must_use]
    pub fn params(&self) -> &[ParamDescriptor] {
        match self {
            Self::NativeProtocol { params, .. } | Self::DelegatedScript { params, .. } => params,
        }
    }

    /// Returns the response grammar.
    #[must_use]
    pub const fn response(&self) -> &ResponseGrammar {
        match self {
            Self::NativeProtocol { response, .. } | Self::DelegatedScript { response, .. } => {
                response
            }
        }
    }

    /// Returns `"native"` or `"delegated"`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NativeProtocol { .. } => "native",
            Self::DelegatedScript { .. } => "delegated",
        }
    }

    /// Returns the template text.
    #[must_use]
    pub const fn template(&self) -> &Template {
        match self {
            Self::NativeProtocol { command, .. } => command,
            Self::DelegatedScript { handler, .. } => handler,
        }
    }

    /// Builds the wire request for already encoded arguments.
    ///
    /// Templates without slots get the arguments appended: concatenated
    /// after the command text, or passed as trailing handler arguments.
    #[must_use]
    pub fn request(&self, args: &[String]) -> WireRequest {
        let template = self.template();
        let rendered = template.render(args);
        match self {
            Self::NativeProtocol { .. } => {
                let mut body = rendered;
                if !template.has_slots() {
                    body.extend(args.iter().map(String::as_str));
                }
                WireRequest::Frame(body)
            }
            Self::DelegatedScript { .. } => {
                let mut words = rendered.split_whitespace().map(str::to_owned);
                let program = words.next().unwrap_or_default();
                let mut argv: Vec<String> = words.collect();
                if !template.has_slots() {
                    argv.extend(args.iter().cloned());
                }
                WireRequest::Invocation(Invocation::new(program, argv))
            }
        }
    }
}

/// One entry of the command table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    name: String,
    strategy: Strategy,
    class: ActionClass,
}

impl CommandSpec {
    /// Builds a native protocol entry.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidEntry`] when the template is malformed or
    /// its slots disagree with `params`.
    pub fn native(
        name: impl Into<String>,
        command: &str,
        params: Vec<ParamDescriptor>,
        response: ResponseGrammar,
    ) -> Result<Self, LoadError> {
        let action = name.into();
        let template = checked_template(&action, command, params.len())?;
        Ok(Self::assemble(
            action,
            Strategy::NativeProtocol {
                command: template,
                params,
                response,
            },
        ))
    }

    /// Builds a delegated handler entry.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::InvalidEntry`] when the handler reference is
    /// empty or malformed, or its slots disagree with `params`.
    pub fn delegated(
        name: impl Into<String>,
        handler: &str,
        params: Vec<ParamDescriptor>,
        response: ResponseGrammar,
    ) -> Result<Self, LoadError> {
        let action = name.into();
        if handler.trim().is_empty() {
            return Err(LoadError::invalid_entry(action, "handler reference is empty"));
        }
        let template = checked_template(&action, handler, params.len())?;
        Ok(Self::assemble(
            action,
            Strategy::DelegatedScript {
                handler: template,
                params,
                response,
            },
        ))
    }

    fn assemble(name: String, strategy: Strategy) -> Self {
        let class = ActionClass::from_name(&name);
        Self {
            name,
            strategy,
            class,
        }
    }

    /// Overrides the class derived from the action name.
    #[must_use]
    pub fn with_class(mut self, class: ActionClass) -> Self {
        self.class = class;
        self
    }

    /// Returns the action name.
    #[must_use]
    pub const fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Returns the execution strategy.
    #[must_use]
    pub const fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Returns the retry class.
    #[must_use]
    pub const fn class(&self) -> ActionClass {
        self.class
    }

    /// Returns the declared parameters.
    #[must_use]
    pub fn params(&self) -> &[ParamDescriptor] {
        self.strategy.params()
    }

    /// Returns the response grammar.
    #[must_use]
    pub const fn response(&self) -> &ResponseGrammar {
        self.strategy.response()
    }
}

fn checked_template(action: &str, source: &str, params: usize) -> Result<Template, LoadError> {
    let template =
        Template::parse(source).map_err(|message| LoadError::invalid_entry(action, message))?;
    template
        .check_arity(params)
        .map_err(|message| LoadError::invalid_entry(action, message))?;
    Ok(template)
}
