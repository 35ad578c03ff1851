//! Directives returned by transition actions and the triggers they carry.
//!
//! Transition actions tell the state machine what to do next by returning a
//! [`Directive`]. Loosely shaped JSON (`null`, `"id"`, `{ "id": .., "hints": .. }`)
//! is coerced into [`Trigger`] exactly once, at deserialization time, so the
//! engine never has to re-validate the shape downstream.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Identifier of a scenario state.
pub type StateId = String;

/// Opaque, user-defined payload forwarded verbatim between states.
pub type Hints = Value;

/// A concrete move: the state to enter and the hints to enter it with.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NextState {
    pub id: StateId,
    #[serde(default)]
    pub hints: Hints,
}

impl NextState {
    pub fn new(id: impl Into<StateId>, hints: Hints) -> Self {
        Self {
            id: id.into(),
            hints,
        }
    }
}

/// What comes next: nothing (remain idle) or a move to another state.
///
/// # Example
///
/// ```rust
/// use switchboard::core::Trigger;
/// use serde_json::json;
///
/// let parsed: Trigger = serde_json::from_value(json!("ringing")).unwrap();
/// assert_eq!(parsed, Trigger::to("ringing"));
///
/// let parsed: Trigger = serde_json::from_value(json!({ "id": "ringing", "hints": 3 })).unwrap();
/// assert_eq!(parsed, Trigger::go("ringing", json!(3)));
///
/// let parsed: Trigger = serde_json::from_value(json!(null)).unwrap();
/// assert!(parsed.is_none());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Trigger {
    #[default]
    None,
    Go(NextState),
}

impl Trigger {
    /// Move to `id` with no hints.
    pub fn to(id: impl Into<StateId>) -> Self {
        Self::Go(NextState::new(id, Value::Null))
    }

    /// Move to `id` carrying `hints`.
    pub fn go(id: impl Into<StateId>, hints: Hints) -> Self {
        Self::Go(NextState::new(id, hints))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Keep `self` if it names a move, otherwise fall back to `other`.
    pub fn or(self, other: Trigger) -> Trigger {
        match self {
            Self::None => other,
            go => go,
        }
    }

    pub fn into_next(self) -> Option<NextState> {
        match self {
            Self::None => None,
            Self::Go(next) => Some(next),
        }
    }
}

impl From<NextState> for Trigger {
    fn from(next: NextState) -> Self {
        Self::Go(next)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTrigger {
    Id(StateId),
    Next(NextState),
}

impl<'de> Deserialize<'de> for Trigger {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<RawTrigger>::deserialize(deserializer)? {
            None => Trigger::None,
            Some(RawTrigger::Id(id)) => Trigger::to(id),
            Some(RawTrigger::Next(next)) => Trigger::Go(next),
        })
    }
}

impl Serialize for Trigger {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::None => serializer.serialize_none(),
            Self::Go(next) => next.serialize(serializer),
        }
    }
}

/// Value returned by a transition action.
///
/// `transition` is an explicit override and takes precedence over `trigger`;
/// when both are empty the target state's declared trigger (if any) is used.
/// `value` is carried into the final result when the target state is terminal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Directive {
    pub transition: Trigger,
    pub trigger: Trigger,
    pub value: Value,
}

impl Directive {
    /// Stay in the target state and wait for an external trigger.
    pub fn idle() -> Self {
        Self::default()
    }

    /// Continue with `trigger` once the transition settles.
    pub fn trigger(trigger: Trigger) -> Self {
        Self {
            trigger,
            ..Self::default()
        }
    }

    /// Continue with `trigger`, overriding anything else that was requested.
    pub fn transition(trigger: Trigger) -> Self {
        Self {
            transition: trigger,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    /// The move requested by this directive, override first.
    pub fn next(&self) -> Trigger {
        self.transition.clone().or(self.trigger.clone())
    }

    /// Coerce a dynamically produced JSON value into a directive.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl From<Trigger> for Directive {
    fn from(trigger: Trigger) -> Self {
        Self::trigger(trigger)
    }
}
