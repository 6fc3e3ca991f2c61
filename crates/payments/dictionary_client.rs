use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::domain::{
    repositories::dictionary::DictionaryClient, value_objects::words::WordDefinition,
};

pub struct DictionaryApiClient {
    http: reqwest::Client,
    base_url: Url,
}

#[derive(Debug, Deserialize)]
struct Entry {
    word: String,
    phonetic: Option<String>,
    #[serde(default)]
    meanings: Vec<Meaning>,
}

#[derive(Debug, Deserialize)]
struct Meaning {
    #[serde(default)]
    definitions: Vec<Definition>,
}

#[derive(Debug, Deserialize)]
struct Definition {
    definition: String,
}

impl DictionaryApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: Url::parse(base_url).context("dictionary: invalid base url")?,
        })
    }
}

/// First definition of the first entry, which the API orders by relevance.
fn first_definition(entries: Vec<Entry>) -> Option<WordDefinition> {
    entries.into_iter().find_map(|entry| {
        let definition = entry
            .meanings
            .into_iter()
            .flat_map(|meaning| meaning.definitions)
            .next()?;
        Some(WordDefinition {
            text: entry.word.to_lowercase(),
            definition: definition.definition,
            phonetic: entry.phonetic,
        })
    })
}

#[async_trait]
impl DictionaryClient for DictionaryApiClient {
    async fn lookup(&self, word: &str) -> Result<Option<WordDefinition>> {
        let url = self
            .base_url
            .join(&format!("api/v2/entries/en/{word}"))
            .context("dictionary: invalid lookup url")?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .context("dictionary: request failed")?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            bail!("dictionary: api responded with status {}", resp.status());
        }

        let entries: Vec<Entry> = resp.json().await.context("dictionary: unreadable body")?;
        Ok(first_definition(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_available_definition() {
        let entries: Vec<Entry> = serde_json::from_str(
            r#"[
                {"word": "Apple", "phonetic": "/ˈæp.əl/", "meanings": [
                    {"definitions": []},
                    {"definitions": [{"definition": "A common, round fruit."}]}
                ]}
            ]"#,
        )
        .unwrap();

        assert_eq!(
            first_definition(entries),
            Some(WordDefinition {
                text: "apple".to_string(),
                definition: "A common, round fruit.".to_string(),
                phonetic: Some("/ˈæp.əl/".to_string()),
            })
        );
    }

    #[test]
    fn entries_without_definitions_yield_nothing() {
        let entries: Vec<Entry> =
            serde_json::from_str(r#"[{"word": "zzz", "meanings": []}]"#).unwrap();
        assert_eq!(first_definition(entries), None);
    }
}
