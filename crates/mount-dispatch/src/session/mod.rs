//! Mount session record and its state machine.
//!
//! Transitions are data: a table of `(action, permitted states, outcome)`
//! rows searched in order, the first matching row deciding. The engine
//! consults [`permits`] before any I/O and applies the [`outcome`] only after
//! a successful dispatch.

use std::sync::Arc;

use serde::Serialize;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use time::OffsetDateTime;

use crate::codec::Value;
use crate::table::CommandTable;

/// Coarse state of the mount.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Display,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SessionState {
    /// No session is open.
    Disconnected,
    /// Connected; nothing else is known yet.
    Connected,
    /// At the park position.
    Parked,
    /// Unparked and stationary.
    Idle,
    /// Following the sky.
    Tracking,
    /// Moving to a target.
    Slewing,
    /// Driven manually in one direction.
    Moving,
    /// The outcome of the last action could not be confirmed.
    Unknown,
}

impl SessionState {
    /// Interprets a word from a status report.
    #[must_use]
    pub fn from_status_word(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "stopped" => Some(Self::Idle),
            "guiding" => Some(Self::Moving),
            other => other
                .parse()
                .ok()
                .filter(|state| !matches!(state, Self::Disconnected | Self::Unknown)),
        }
    }

    /// Returns `true` for every state except [`SessionState::Disconnected`].
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

#[derive(Debug, Clone, Copy)]
enum ActionMatch {
    Exact(&'static str),
    Prefix(&'static str),
    Any,
}

impl ActionMatch {
    fn matches(self, action: &str) -> bool {
        match self {
            Self::Exact(name) => action == name,
            Self::Prefix(prefix) => action.starts_with(prefix),
            Self::Any => true,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Precondition {
    Anything,
    Connected,
    OneOf(&'static [SessionState]),
}

impl Precondition {
    fn holds(self, state: SessionState) -> bool {
        match self {
            Self::Anything => true,
            Self::Connected => state.is_connected(),
            Self::OneOf(states) => states.contains(&state),
        }
    }
}

/// Effect of a successful action on the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The state is unchanged.
    Stay,
    /// The state becomes the given one.
    Enter(SessionState),
    /// A slew starts; completion depends on the slew mode.
    Slew,
    /// The state is read from the decoded status report.
    AdoptStatus,
}

struct Rule {
    action: ActionMatch,
    from: Precondition,
    outcome: Outcome,
}

const fn rule(action: ActionMatch, from: Precondition, outcome: Outcome) -> Rule {
    Rule {
        action,
        from,
        outcome,
    }
}

use ActionMatch::{Any, Exact, Prefix};
use SessionState::{Connected, Disconnected, Idle, Moving, Parked, Slewing, Tracking};

const STATIONARY: &[SessionState] = &[Idle, Tracking];

const RULES: &[Rule] = &[
    rule(Exact("connect"), Precondition::OneOf(&[Disconnected]), Outcome::Enter(Connected)),
    rule(Exact("disconnect"), Precondition::Anything, Outcome::Enter(Disconnected)),
    rule(Exact("park"), Precondition::Connected, Outcome::Enter(Parked)),
    rule(Exact("home_and_park"), Precondition::Connected, Outcome::Enter(Parked)),
    rule(Exact("unpark"), Precondition::OneOf(&[Connected, Parked]), Outcome::Enter(Idle)),
    rule(Exact("slew_to_coordinates"), Precondition::OneOf(STATIONARY), Outcome::Slew),
    rule(Exact("slew_to_home"), Precondition::OneOf(STATIONARY), Outcome::Slew),
    rule(Exact("stop_slewing"), Precondition::OneOf(&[Slewing]), Outcome::Enter(Idle)),
    rule(Exact("start_tracking"), Precondition::OneOf(&[Idle]), Outcome::Enter(Tracking)),
    rule(Exact("stop_tracking"), Precondition::OneOf(&[Tracking]), Outcome::Enter(Idle)),
    rule(Prefix("move_ms_"), Precondition::OneOf(STATIONARY), Outcome::Stay),
    rule(Prefix("move_"), Precondition::OneOf(STATIONARY), Outcome::Enter(Moving)),
    rule(Prefix("stop_moving"), Precondition::OneOf(&[Moving]), Outcome::Enter(Idle)),
    rule(Exact("get_status"), Precondition::Connected, Outcome::AdoptStatus),
    rule(Any, Precondition::Connected, Outcome::Stay),
];

fn rule_for(action: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| rule.action.matches(action))
}

/// Returns `true` when `action` may be dispatched in `state`.
#[must_use]
pub fn permits(action: &str, state: SessionState) -> bool {
    rule_for(action).is_some_and(|rule| rule.from.holds(state))
}

/// Returns the outcome of a successful `action`.
#[must_use]
pub fn outcome(action: &str) -> Outcome {
    rule_for(action).map_or(Outcome::Stay, |rule| rule.outcome)
}

/// Derives the state reported by a decoded `get_status` value.
///
/// The first text token naming a state wins. An unrecognised report
/// resolves an [`SessionState::Unknown`] session to
/// [`SessionState::Connected`] and otherwise keeps the current state.
#[must_use]
pub fn adopt_status(current: SessionState, report: &Value) -> SessionState {
    report
        .texts()
        .into_iter()
        .find_map(SessionState::from_status_word)
        .unwrap_or(match current {
            SessionState::Unknown => SessionState::Connected,
            other => other,
        })
}

/// Outcome of the most recent dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    action: String,
    succeeded: bool,
    #[serde(with = "time::serde::rfc3339")]
    at: OffsetDateTime,
}

impl DispatchRecord {
    /// Records `action` as completed now.
    #[must_use]
    pub fn now(action: impl Into<String>, succeeded: bool) -> Self {
        Self {
            action: action.into(),
            succeeded,
            at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns the action name.
    #[must_use]
    pub const fn action(&self) -> &str {
        self.action.as_str()
    }

    /// Returns whether the dispatch succeeded.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Returns when the dispatch completed.
    #[must_use]
    pub const fn at(&self) -> OffsetDateTime {
        self.at
    }
}

/// Run-time record of one connection to the mount.
///
/// Created by `connect` and dropped by `disconnect`. The table snapshot is
/// fixed for the life of the session so a reload never changes the
/// commands of a session already open.
#[derive(Debug, Clone)]
pub struct MountSession {
    state: SessionState,
    table: Arc<CommandTable>,
    last_position: Option<Value>,
    last_dispatch: Option<DispatchRecord>,
    connected_at: OffsetDateTime,
}

impl MountSession {
    /// Opens a session in the [`SessionState::Connected`] state.
    #[must_use]
    pub fn open(table: Arc<CommandTable>) -> Self {
        Self {
            state: SessionState::Connected,
            table,
            last_position: None,
            last_dispatch: None,
            connected_at: OffsetDateTime::now_utc(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the table the session was opened with.
    #[must_use]
    pub const fn table(&self) -> &Arc<CommandTable> {
        &self.table
    }

    /// Returns the last position reported by `get_coordinates`.
    #[must_use]
    pub const fn last_position(&self) -> Option<&Value> {
        self.last_position.as_ref()
    }

    /// Returns the most recent dispatch outcome.
    #[must_use]
    pub const fn last_dispatch(&self) -> Option<&DispatchRecord> {
        self.last_dispatch.as_ref()
    }

    /// Returns when the session was opened.
    #[must_use]
    pub const fn connected_at(&self) -> OffsetDateTime {
        self.connected_at
    }

    pub(crate) const fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub(crate) fn set_last_position(&mut self, position: Value) {
        self.last_position = Some(position);
    }

    pub(crate) fn record(&mut self, action: &str, succeeded: bool) {
        self.last_dispatch = Some(DispatchRecord::now(action, succeeded));
    }
}

/// Serialisable view of a session for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Current state.
    pub state: SessionState,
    /// Last reported position.
    pub last_position: Option<Value>,
    /// Most recent dispatch.
    pub last_dispatch: Option<DispatchRecord>,
    /// When the session was opened.
    #[serde(with = "time::serde::rfc3339")]
    pub connected_at: OffsetDateTime,
}

impl From<&MountSession> for SessionSnapshot {
    fn from(session: &MountSession) -> Self {
        Self {
            state: session.state,
            last_position: session.last_position.clone(),
            last_dispatch: session.last_dispatch.clone(),
            connected_at: session.connected_at,
        }
    }
}
