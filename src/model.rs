use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One feed as declared in the source catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedDescriptor {
    pub name: String,
    pub rss: String,
}

/// A normalized news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub description: String,
    pub link: String,
    /// Name of the feed the article came from
    pub source: String,
    pub category: String,
    pub pub_date: DateTime<Utc>,
    pub author: String,
    pub thumbnail: Option<String>,
    pub guid: Option<String>,
}

impl Article {
    /// Key used to detect the same story published by several feeds.
    pub fn dedup_key(&self) -> String {
        self.title.trim().to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchState {
    Pending,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStatus {
    pub status: FetchState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub last_fetch: Option<DateTime<Utc>>,
}

impl FeedStatus {
    pub fn pending() -> Self {
        Self {
            status: FetchState::Pending,
            message: None,
            count: None,
            last_fetch: None,
        }
    }

    pub fn success(count: usize, at: DateTime<Utc>) -> Self {
        Self {
            status: FetchState::Success,
            message: None,
            count: Some(count),
            last_fetch: Some(at),
        }
    }

    pub fn error(message: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: FetchState::Error,
            message: Some(message.into()),
            count: None,
            last_fetch: Some(at),
        }
    }
}

/// Feed name -> latest fetch status.
pub type FeedStatusMap = BTreeMap<String, FeedStatus>;

/// Success/error tally shown next to the article list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSummary {
    pub success: usize,
    pub error: usize,
    pub pending: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

impl StatusSummary {
    pub fn from_statuses(statuses: &FeedStatusMap, last_refresh: Option<DateTime<Utc>>) -> Self {
        let mut summary = Self {
            last_refresh,
            ..Self::default()
        };
        for status in statuses.values() {
            match status.status {
                FetchState::Pending => summary.pending += 1,
                FetchState::Success => summary.success += 1,
                FetchState::Error => summary.error += 1,
            }
        }
        summary
    }
}
