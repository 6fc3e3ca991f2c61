use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entities::words::WordEntity;

/// A dictionary result before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WordDefinition {
    pub text: String,
    pub definition: String,
    pub phonetic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordDto {
    pub text: String,
    pub definition: String,
    pub phonetic: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<WordEntity> for WordDto {
    fn from(value: WordEntity) -> Self {
        Self {
            text: value.text,
            definition: value.definition,
            phonetic: value.phonetic,
            created_at: value.created_at,
        }
    }
}

/// Lowercases and trims user input so that "Apple " and "apple" share one record.
pub fn normalize_word(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() || normalized.len() > 64 {
        return None;
    }
    if !normalized
        .chars()
        .all(|c| c.is_alphabetic() || c == '-' || c == '\'' || c == ' ')
    {
        return None;
    }
    Some(normalized)
}
