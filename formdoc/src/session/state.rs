//! Session record and the values the state machine hands back.

use crate::script::Script;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::time::Duration;
use tokio::time::Instant;

/// Collected answers, in script order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Answers {
    entries: Vec<(String, String)>,
}

impl Answers {
    /// Create an empty answer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the answer for `key`, keeping its original position if it
    /// was already present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    /// Answer for `key`, if collected.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of answers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no answers have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// `(key, answer)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Answers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut answers = Self::new();
        for (k, v) in iter {
            answers.insert(k, v);
        }
        answers
    }
}

impl Serialize for Answers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Result of driving a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The answer was stored; show this prompt next.
    NextPrompt(String),
    /// The last answer was stored and the session is closed. Generate the
    /// document from these answers.
    ReadyToGenerate(Answers),
    /// The session was cancelled.
    Cancelled,
    /// There is no session for this identifier.
    NoActiveSession,
}

impl Outcome {
    /// Whether this outcome reports a missing session.
    #[must_use]
    pub const fn is_no_active_session(&self) -> bool {
        matches!(self, Self::NoActiveSession)
    }
}

/// One user's progress through a script.
#[derive(Debug)]
pub struct Session {
    cursor: usize,
    answers: Answers,
    last_activity: Instant,
    retired: bool,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            cursor: 0,
            answers: Answers::new(),
            last_activity: Instant::now(),
            retired: false,
        }
    }

    /// Index of the next field to collect.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Answers collected so far.
    #[must_use]
    pub const fn answers(&self) -> &Answers {
        &self.answers
    }

    /// Time since the last answer (or since the session began).
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Whether the session has left the registry.
    #[must_use]
    pub const fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) const fn retire(&mut self) {
        self.retired = true;
    }

    /// Store `text` for the current field and advance.
    ///
    /// Retires the session when the last field is filled.
    pub(crate) fn record(&mut self, script: &Script, text: &str) -> Outcome {
        if let Some(field) = script.field(self.cursor) {
            self.answers.insert(field.key.clone(), text.trim());
            self.cursor += 1;
        }
        self.last_activity = Instant::now();

        match script.prompt(self.cursor) {
            Some(prompt) => Outcome::NextPrompt(prompt.to_string()),
            None => {
                self.retired = true;
                Outcome::ReadyToGenerate(self.answers.clone())
            }
        }
    }
}
