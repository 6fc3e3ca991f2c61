use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::{
    repositories::video_search::VideoSearchClient, value_objects::videos::VideoSummary,
};

const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const MAX_RESULTS: &str = "10";

pub struct YoutubeSearchClient {
    http: reqwest::Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snippet {
    title: String,
    channel_title: Option<String>,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

impl YoutubeSearchClient {
    pub fn new(api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
        }
    }
}

fn into_summaries(resp: SearchResponse) -> Vec<VideoSummary> {
    resp.items
        .into_iter()
        .filter_map(|item| {
            Some(VideoSummary {
                video_id: item.id.video_id?,
                title: item.snippet.title,
                channel_title: item.snippet.channel_title,
                thumbnail_url: item
                    .snippet
                    .thumbnails
                    .and_then(|thumbnails| thumbnails.default)
                    .map(|thumbnail| thumbnail.url),
            })
        })
        .collect()
}

#[async_trait]
impl VideoSearchClient for YoutubeSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<VideoSummary>> {
        let resp = self
            .http
            .get(SEARCH_URL)
            .query(&[
                ("part", "snippet"),
                ("type", "video"),
                ("maxResults", MAX_RESULTS),
                ("q", query),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .context("youtube: search request failed")?;

        if !resp.status().is_success() {
            bail!("youtube: search responded with status {}", resp.status());
        }

        let body: SearchResponse = resp.json().await.context("youtube: unreadable body")?;
        Ok(into_summaries(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_results_without_video_id_are_skipped() {
        let resp: SearchResponse = serde_json::from_str(
            r#"{"items": [
                {"id": {"kind": "youtube#channel"}, "snippet": {"title": "A channel"}},
                {"id": {"videoId": "abc123"}, "snippet": {
                    "title": "Learn English",
                    "channelTitle": "English Daily",
                    "thumbnails": {"default": {"url": "https://i.ytimg.com/vi/abc123/default.jpg"}}
                }}
            ]}"#,
        )
        .unwrap();

        let summaries = into_summaries(resp);
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].video_id, "abc123");
        assert_eq!(summaries[0].channel_title.as_deref(), Some("English Daily"));
    }
}
