//! The recipe record type and its validation rules.
//!
//! A [`Recipe`] is immutable once accepted: the submission path validates it,
//! the buffer persists it verbatim, and the commit path ships it to the
//! remote dataset unchanged. The `name` field is the uniqueness key across
//! both the local buffer and the remote store.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted length of a recipe name, in bytes.
pub const MAX_NAME_LEN: usize = 256;

/// A uniquely-named recipe record submitted by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Unique name of the recipe (the dedup key).
    pub name: String,

    /// Ordered list of ingredients.
    pub ingredients: Vec<String>,

    /// Free-form preparation instructions.
    pub instructions: String,

    /// When the recipe was created by its author, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Who submitted the recipe, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
}

impl Recipe {
    /// Validate the record's fields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidField`] if:
    /// - the name is empty (or whitespace-only) or longer than
    ///   [`MAX_NAME_LEN`] bytes
    /// - the name contains control characters
    /// - any ingredient is an empty string
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidField {
                field: "name",
                reason: "must not be empty".to_string(),
            });
        }

        if self.name.len() > MAX_NAME_LEN {
            return Err(Error::InvalidField {
                field: "name",
                reason: format!("must be at most {MAX_NAME_LEN} bytes"),
            });
        }

        if self.name.chars().any(char::is_control) {
            return Err(Error::InvalidField {
                field: "name",
                reason: "must not contain control characters".to_string(),
            });
        }

        if self.ingredients.iter().any(|i| i.trim().is_empty()) {
            return Err(Error::InvalidField {
                field: "ingredients",
                reason: "entries must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Recipe {
        Recipe {
            name: "Pasta".to_string(),
            ingredients: vec!["pasta".to_string(), "water".to_string()],
            instructions: "boil".to_string(),
            created_at: None,
            creator: None,
        }
    }

    #[test]
    fn test_valid_recipe() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let mut recipe = sample();
        recipe.name = "   ".to_string();
        let err = recipe.validate().unwrap_err();
        assert!(err.to_string().contains("name"));
    }

    #[test]
    fn test_oversized_name_rejected() {
        let mut recipe = sample();
        recipe.name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_control_chars_rejected() {
        let mut recipe = sample();
        recipe.name = "Pasta\n".to_string();
        assert!(recipe.validate().is_err());
    }

    #[test]
    fn test_empty_ingredient_rejected() {
        let mut recipe = sample();
        recipe.ingredients.push(String::new());
        let err = recipe.validate().unwrap_err();
        assert!(err.to_string().contains("ingredients"));
    }

    #[test]
    fn test_json_round_trip() {
        let recipe = sample();
        let json = serde_json::to_string(&recipe).unwrap();
        // Optional fields are omitted when absent
        assert!(!json.contains("created_at"));
        assert!(!json.contains("creator"));

        let parsed: Recipe = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, recipe);
    }

    #[test]
    fn test_json_missing_optionals() {
        let parsed: Recipe = serde_json::from_str(
            r#"{"name":"Soup","ingredients":["water"],"instructions":"simmer"}"#,
        )
        .unwrap();
        assert_eq!(parsed.name, "Soup");
        assert!(parsed.created_at.is_none());
        assert!(parsed.creator.is_none());
    }
}
