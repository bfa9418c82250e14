//! JSON line records written to standard output.

use mount_dispatch::table::{ActionClass, CommandSpec};
use mount_dispatch::{DispatchError, ParamDescriptor, SessionState, Value};
use serde::Serialize;

/// Outcome of one dispatched action.
#[derive(Debug, Serialize)]
pub(crate) struct DispatchLine<'a> {
    pub(crate) action: &'a str,
    pub(crate) ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) value: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<ErrorBody>,
    pub(crate) state: SessionState,
}

/// Serialisable view of a failed dispatch.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    kind: &'static str,
    message: String,
    exit_status: u8,
}

impl From<&DispatchError> for ErrorBody {
    fn from(error: &DispatchError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
            exit_status: error.exit_status(),
        }
    }
}

impl<'a> DispatchLine<'a> {
    pub(crate) fn new(
        action: &'a str,
        result: &'a Result<Value, DispatchError>,
        state: SessionState,
    ) -> Self {
        Self {
            action,
            ok: result.is_ok(),
            value: result.as_ref().ok(),
            error: result.as_ref().err().map(ErrorBody::from),
            state,
        }
    }
}

/// One entry of the `actions` listing.
#[derive(Debug, Serialize)]
pub(crate) struct ActionLine<'a> {
    action: &'a str,
    strategy: &'static str,
    class: ActionClass,
    template: &'a str,
    params: Vec<&'a str>,
}

impl<'a> From<&'a CommandSpec> for ActionLine<'a> {
    fn from(spec: &'a CommandSpec) -> Self {
        Self {
            action: spec.name(),
            strategy: spec.strategy().kind(),
            class: spec.class(),
            template: spec.strategy().template().source(),
            params: spec.params().iter().map(ParamDescriptor::token).collect(),
        }
    }
}
