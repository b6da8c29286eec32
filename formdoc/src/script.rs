//! The question script: an ordered, immutable list of fields to collect.

use crate::error::ScriptError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Greeting sent before the first question of [`Script::claim_response`].
pub const DEFAULT_GREETING: &str = "Hello! I will help you put together a reply to a claim.\n\
Please answer a few questions.\n\
Send /cancel at any time to stop.";

/// A single question: the template key it fills and the prompt shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    /// Placeholder name in the template.
    pub key: String,
    /// Text shown to the user. May contain Markdown.
    pub prompt: String,
}

impl Field {
    /// Create a new field.
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
        }
    }
}

/// Validated, ordered sequence of fields.
///
/// A script always has at least one field and its keys are unique, so
/// every session built on it has a well-defined first prompt and a
/// well-formed answer map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    fields: Vec<Field>,
    greeting: String,
}

impl Script {
    /// Build a script from fields, validating them.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError`] if the list is empty, a key is blank, or a
    /// key appears twice.
    pub fn new(fields: Vec<Field>) -> Result<Self, ScriptError> {
        if fields.is_empty() {
            return Err(ScriptError::Empty);
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            if field.key.trim().is_empty() {
                return Err(ScriptError::EmptyKey { index });
            }
            if !seen.insert(field.key.as_str()) {
                return Err(ScriptError::DuplicateKey(field.key.clone()));
            }
        }

        Ok(Self {
            fields,
            greeting: DEFAULT_GREETING.to_string(),
        })
    }

    /// Replace the greeting text.
    #[must_use]
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.greeting = greeting.into();
        self
    }

    /// The claim-response questionnaire the bot ships with.
    #[must_use]
    pub fn claim_response() -> Self {
        let fields = [
            ("contractor_name", "Enter the **contractor name**:"),
            ("contractor_tax_id", "Enter the **contractor tax ID**:"),
            ("contractor_address", "Enter the **contractor address**:"),
            ("contractor_phone", "Enter the **contractor phone**:"),
            ("email", "Enter the **contractor email**:"),
            ("outgoing_ref", "Enter the **outgoing reference number**:"),
            ("reply_date", "Enter the **reply date** (dd.mm.yyyy):"),
            ("claim_date", "Enter the **claim date** (dd.mm.yyyy):"),
            ("contract_date", "Enter the **contract date** (dd.mm.yyyy):"),
            ("client_full_name", "Enter the **client full name**:"),
            ("client_address", "Enter the **client address**:"),
        ];

        Self {
            fields: fields
                .into_iter()
                .map(|(key, prompt)| Field::new(key, prompt))
                .collect(),
            greeting: DEFAULT_GREETING.to_string(),
        }
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the script has no fields. Construction rejects empty scripts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field at `index`, if any.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Prompt of the field at `index`, if any.
    #[must_use]
    pub fn prompt(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|f| f.prompt.as_str())
    }

    /// Prompt of the first field.
    #[must_use]
    pub fn first_prompt(&self) -> &str {
        &self.fields[0].prompt
    }

    /// All fields in order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    /// Text sent before the first prompt.
    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::claim_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_response_script() {
        let script = Script::claim_response();
        assert_eq!(script.len(), 11);
        assert_eq!(script.field(0).map(|f| f.key.as_str()), Some("contractor_name"));
        assert_eq!(script.keys().last(), Some("client_address"));
        assert!(script.greeting().contains("/cancel"));

        // Built-in script must pass its own validation.
        assert!(Script::new(script.fields().to_vec()).is_ok());
    }

    #[test]
    fn test_rejects_empty_script() {
        assert_eq!(Script::new(Vec::new()), Err(ScriptError::Empty));
    }

    #[test]
    fn test_rejects_blank_key() {
        let fields = vec![Field::new("name", "Name?"), Field::new("  ", "Blank?")];
        assert_eq!(Script::new(fields), Err(ScriptError::EmptyKey { index: 1 }));
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let fields = vec![
            Field::new("name", "Name?"),
            Field::new("city", "City?"),
            Field::new("name", "Name again?"),
        ];
        assert_eq!(
            Script::new(fields),
            Err(ScriptError::DuplicateKey("name".to_string()))
        );
    }

    #[test]
    fn test_prompts() {
        let script = Script::new(vec![
            Field::new("name", "Enter name:"),
            Field::new("city", "Enter city:"),
        ])
        .unwrap()
        .with_greeting("Hi");

        assert_eq!(script.first_prompt(), "Enter name:");
        assert_eq!(script.prompt(1), Some("Enter city:"));
        assert_eq!(script.prompt(2), None);
        assert_eq!(script.greeting(), "Hi");
    }

    #[test]
    fn test_field_deserialize() {
        let fields: Vec<Field> =
            serde_json::from_str(r#"[{"key":"name","prompt":"Enter name:"}]"#).unwrap();
        assert_eq!(fields, vec![Field::new("name", "Enter name:")]);
    }
}
