use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::model::{Article, FeedDescriptor, FeedStatus};

pub const NO_ITEMS_MESSAGE: &str = "No items found";

static IMG_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<img[^>]+src="([^">]+)""#).expect("valid img regex"));

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("Invalid JSON response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Body returned by the RSS-to-JSON conversion endpoint.
#[derive(Debug, Deserialize)]
pub struct ConvertedFeed {
    #[serde(default)]
    pub items: Option<Vec<RawItem>>,
}

impl ConvertedFeed {
    /// A well-formed body that is not a JSON object carries no items.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        if value.is_object() {
            serde_json::from_value(value)
        } else {
            Ok(Self { items: None })
        }
    }
}

/// One feed entry as the conversion endpoint reports it. Every field may be
/// missing; the converter also emits `""` for absent values.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawItem {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub pub_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub iso_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumbnail: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub guid: Option<String>,
}

/// Strings pass through, numbers are stringified, anything else is absent.
fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Outcome of fetching one feed: its articles (possibly none) and the status to record.
#[derive(Debug)]
pub struct FeedFetch {
    pub articles: Vec<Article>,
    pub status: FeedStatus,
}

pub struct Fetcher {
    client: Client,
    converter_url: String,
    max_items: usize,
}

impl Fetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .user_agent("Headlinea/1.0 (News Aggregator)")
            .build()?;

        Ok(Self::with_client(
            client,
            &config.converter_url,
            config.max_articles_per_feed,
        ))
    }

    pub fn with_client(client: Client, converter_url: &str, max_items: usize) -> Self {
        Self {
            client,
            converter_url: converter_url.to_string(),
            max_items,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch one feed through the conversion endpoint. Never fails: problems
    /// are reported through the returned status.
    pub async fn fetch_feed(&self, feed: &FeedDescriptor, category: &str) -> FeedFetch {
        info!("Fetching feed: {} ({})", feed.name, feed.rss);

        match self.request(feed).await {
            Ok(ConvertedFeed { items: Some(items) }) => {
                let fetched_at = Utc::now();
                let articles: Vec<Article> = items
                    .into_iter()
                    .take(self.max_items)
                    .map(|item| normalize_item(item, feed, category, fetched_at))
                    .collect();

                info!("Got {} articles from feed '{}'", articles.len(), feed.name);
                let status = FeedStatus::success(articles.len(), fetched_at);
                FeedFetch { articles, status }
            }
            Ok(ConvertedFeed { items: None }) => {
                warn!("{} for feed '{}'", NO_ITEMS_MESSAGE, feed.name);
                FeedFetch {
                    articles: Vec::new(),
                    status: FeedStatus::error(NO_ITEMS_MESSAGE, Utc::now()),
                }
            }
            Err(e) => {
                warn!("Failed to fetch feed '{}': {}", feed.name, e);
                FeedFetch {
                    articles: Vec::new(),
                    status: FeedStatus::error(e.to_string(), Utc::now()),
                }
            }
        }
    }

    async fn request(&self, feed: &FeedDescriptor) -> Result<ConvertedFeed, FetchError> {
        let response = self
            .client
            .get(&self.converter_url)
            .query(&[("rss_url", feed.rss.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        Ok(ConvertedFeed::from_slice(&bytes)?)
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// Turn a converter item into an [`Article`], filling in fallbacks.
pub fn normalize_item(
    item: RawItem,
    feed: &FeedDescriptor,
    category: &str,
    fetched_at: DateTime<Utc>,
) -> Article {
    let description = present(item.description);
    let link = present(item.link);

    let thumbnail = present(item.thumbnail)
        .or_else(|| description.as_deref().and_then(extract_thumbnail));

    let pub_date = present(item.pub_date)
        .and_then(|d| parse_pub_date(&d))
        .or_else(|| present(item.iso_date).and_then(|d| parse_pub_date(&d)))
        .unwrap_or(fetched_at);

    Article {
        title: present(item.title).unwrap_or_else(|| "Untitled".to_string()),
        description: description
            .or_else(|| present(item.content))
            .unwrap_or_else(|| "No description available".to_string()),
        guid: present(item.guid).or_else(|| link.clone()),
        link: link.unwrap_or_else(|| feed.rss.clone()),
        source: feed.name.clone(),
        category: category.to_string(),
        pub_date,
        author: present(item.author).unwrap_or_else(|| "Unknown".to_string()),
        thumbnail,
    }
}

/// First `<img src="...">` URL found in an HTML fragment.
pub fn extract_thumbnail(html: &str) -> Option<String> {
    IMG_SRC
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse the date formats the converter is known to produce: RFC 3339,
/// RFC 2822 and `YYYY-MM-DD HH:MM:SS` (taken as UTC).
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
