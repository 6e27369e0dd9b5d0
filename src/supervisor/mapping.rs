//! Signal-name normalization and the signal-to-action table.
//!
//! Configuration accepts signal names in any case, with or without the
//! `SIG` prefix, and action values as either one name or an ordered list.
//! Everything is normalized up front so the rest of the supervisor only
//! deals in [`Signal`] values and action-name lists.

use crate::error::{Result, WardenError};
use nix::sys::signal::Signal;
use serde::Deserialize;
use std::str::FromStr;

/// One action name or an ordered list of action names.
///
/// A scalar in configuration means a one-element list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ActionList {
    One(String),
    Many(Vec<String>),
}

impl ActionList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(action) => vec![action],
            Self::Many(actions) => actions,
        }
    }
}

impl From<&str> for ActionList {
    fn from(action: &str) -> Self {
        Self::One(action.to_string())
    }
}

impl From<Vec<String>> for ActionList {
    fn from(actions: Vec<String>) -> Self {
        Self::Many(actions)
    }
}

/// Normalize a signal name to its canonical `SIG<NAME>` form.
///
/// `term`, `TERM`, and `SIGTERM` all resolve to [`Signal::SIGTERM`].
pub fn normalize_signal_name(name: &str) -> Result<Signal> {
    let mut canonical = name.trim().to_uppercase();
    if !canonical.starts_with("SIG") {
        canonical.insert_str(0, "SIG");
    }
    Signal::from_str(&canonical).map_err(|_| WardenError::UnknownSignal(name.to_string()))
}

/// Mapping from OS signal to the ordered actions dispatched for it.
#[derive(Debug, Clone, Default)]
pub struct SignalMap {
    entries: Vec<(Signal, Vec<String>)>,
}

impl SignalMap {
    /// Build a map from raw configuration pairs.
    ///
    /// Signal names are normalized; two keys that normalize to the same
    /// signal are a configuration error.
    pub fn new<I, A>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, A)>,
        A: Into<ActionList>,
    {
        let mut entries: Vec<(Signal, Vec<String>)> = Vec::new();
        for (name, actions) in raw {
            let signal = normalize_signal_name(&name)?;
            if entries.iter().any(|(existing, _)| *existing == signal) {
                return Err(WardenError::DuplicateSignalMapping(
                    signal.as_str().to_string(),
                ));
            }
            entries.push((signal, actions.into().into_vec()));
        }
        Ok(Self { entries })
    }

    /// The actions mapped to `signal`, in dispatch order.
    pub fn actions(&self, signal: Signal) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(s, _)| *s == signal)
            .map(|(_, actions)| actions.as_slice())
    }

    /// All mapped signals.
    pub fn signals(&self) -> impl Iterator<Item = Signal> + '_ {
        self.entries.iter().map(|(signal, _)| *signal)
    }

    /// Every action name referenced by the map.
    pub fn action_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .flat_map(|(_, actions)| actions.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
