//! Source catalog: the category -> feeds document loaded at startup.
//!
//! The document looks like `{"topics": {"<category>": [{"name", "rss"}, ...]}}`.
//! Category order is kept as written since it decides which duplicate
//! article wins during aggregation.

use std::fmt;
use std::path::Path;

use reqwest::Client;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::model::FeedDescriptor;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read source catalog: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to fetch source catalog: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to fetch source catalog: HTTP {0}")]
    HttpStatus(u16),

    #[error("Invalid source catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    pub key: String,
    pub feeds: Vec<FeedDescriptor>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCatalog {
    topics: Topics,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Topics(Vec<Category>);

impl SourceCatalog {
    pub fn new(categories: Vec<Category>) -> Self {
        Self {
            topics: Topics(categories),
        }
    }

    /// Load the catalog from a local path or an `http(s)://` URL.
    pub async fn load(client: &Client, location: &str) -> Result<Self, CatalogError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let response = client.get(location).send().await?;
            if !response.status().is_success() {
                return Err(CatalogError::HttpStatus(response.status().as_u16()));
            }
            let bytes = response.bytes().await?;
            Self::from_slice(&bytes)
        } else {
            Self::load_file(location).await
        }
    }

    pub async fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let bytes = tokio::fs::read(path).await?;
        Self::from_slice(&bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CatalogError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn categories(&self) -> &[Category] {
        &self.topics.0
    }

    /// Every feed paired with the category it was declared under, in document order.
    pub fn feeds(&self) -> impl Iterator<Item = (&str, &FeedDescriptor)> {
        self.topics
            .0
            .iter()
            .flat_map(|c| c.feeds.iter().map(move |f| (c.key.as_str(), f)))
    }

    pub fn feed_count(&self) -> usize {
        self.topics.0.iter().map(|c| c.feeds.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.feed_count() == 0
    }

    /// Human-readable name for a category key.
    pub fn label(category: &str) -> &str {
        match category {
            "latest_technologies" => "Technology",
            "economic_trends_and_business_models" => "Economy",
            "global_trends_world_news" => "World News",
            other => other,
        }
    }
}

impl Serialize for Topics {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for category in &self.0 {
            map.serialize_entry(&category.key, &category.feeds)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Topics {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TopicsVisitor;

        impl<'de> Visitor<'de> for TopicsVisitor {
            type Value = Topics;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of category names to feed lists")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Topics, A::Error> {
                let mut categories = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, feeds)) = access.next_entry::<String, Vec<FeedDescriptor>>()? {
                    categories.push(Category { key, feeds });
                }
                Ok(Topics(categories))
            }
        }

        deserializer.deserialize_map(TopicsVisitor)
    }
}
