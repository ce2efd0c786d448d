use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{error, info};

use crate::catalog::{CatalogError, SourceCatalog};
use crate::display::DisplaySink;
use crate::fetcher::{FeedFetch, Fetcher};
use crate::filter::{filter_articles, ArticleFilter};
use crate::model::{Article, FeedStatus, FeedStatusMap, StatusSummary};

/// Everything the aggregator knows at a given moment.
#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub sources: SourceCatalog,
    pub articles: Vec<Article>,
    /// Subset of `articles` passing `filter`, same order
    pub filtered: Vec<Article>,
    pub filter: ArticleFilter,
    pub last_refresh: Option<DateTime<Utc>>,
    pub feed_status: FeedStatusMap,
}

impl AppState {
    pub fn summary(&self) -> StatusSummary {
        StatusSummary::from_statuses(&self.feed_status, self.last_refresh)
    }

    fn apply_filter(&mut self) {
        self.filtered = filter_articles(&self.articles, &self.filter);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Completed(StatusSummary),
    /// Another refresh cycle was still running; nothing was done.
    AlreadyRunning,
}

/// Owns the application state and runs refresh cycles over it.
pub struct Aggregator {
    fetcher: Fetcher,
    state: RwLock<AppState>,
    sink: Arc<dyn DisplaySink>,
    refreshing: AtomicBool,
}

/// Holds the refreshing flag for one cycle. Dropping it clears the flag, so
/// a cancelled or panicking cycle cannot leave it set.
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Aggregator {
    pub fn new(fetcher: Fetcher, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            fetcher,
            state: RwLock::new(AppState::default()),
            sink,
            refreshing: AtomicBool::new(false),
        }
    }

    pub async fn state(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().await
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Load the source catalog. On failure the catalog is left empty, so
    /// later refreshes produce no articles rather than failing.
    pub async fn load_sources(&self, location: &str) -> Result<usize, CatalogError> {
        match SourceCatalog::load(self.fetcher.client(), location).await {
            Ok(catalog) => {
                let count = catalog.feed_count();
                self.set_sources(catalog).await;
                info!("Loaded {} feeds from {}", count, location);
                Ok(count)
            }
            Err(e) => {
                error!("Error loading sources from {}: {}", location, e);
                let mut state = self.state.write().await;
                state.sources = SourceCatalog::default();
                state.feed_status.clear();
                Err(e)
            }
        }
    }

    /// Install a catalog and mark every declared feed as pending.
    pub async fn set_sources(&self, catalog: SourceCatalog) {
        let mut state = self.state.write().await;
        state.feed_status = catalog
            .feeds()
            .map(|(_, feed)| (feed.name.clone(), FeedStatus::pending()))
            .collect();
        state.sources = catalog;
    }

    /// Run one refresh cycle. Feed failures end up in the status map, never
    /// in the return value.
    pub async fn refresh_news(&self) -> RefreshOutcome {
        let Some(_guard) = RefreshGuard::acquire(&self.refreshing) else {
            info!("Refresh already in progress, skipping");
            return RefreshOutcome::AlreadyRunning;
        };

        RefreshOutcome::Completed(self.do_refresh().await)
    }

    async fn do_refresh(&self) -> StatusSummary {
        self.sink.show_loading(true);

        let feeds: Vec<_> = {
            let mut state = self.state.write().await;
            state.articles.clear();
            state.filtered.clear();
            state.feed_status.clear();
            state
                .sources
                .feeds()
                .map(|(category, feed)| (category.to_string(), feed.clone()))
                .collect()
        };
        info!("Refreshing {} feeds", feeds.len());

        let fetches = feeds.iter().map(|(category, feed)| async move {
            let FeedFetch { articles, status } = self.fetcher.fetch_feed(feed, category).await;
            self.state
                .write()
                .await
                .feed_status
                .insert(feed.name.clone(), status);
            articles
        });
        let combined: Vec<Article> = join_all(fetches).await.into_iter().flatten().collect();

        let fetched = combined.len();
        let articles = sort_by_recency(deduplicate(combined));
        info!(
            "Feed refresh complete: {} articles ({} duplicates dropped)",
            articles.len(),
            fetched - articles.len()
        );

        let (filtered, summary) = {
            let mut state = self.state.write().await;
            state.articles = articles;
            state.last_refresh = Some(Utc::now());
            state.apply_filter();
            (state.filtered.clone(), state.summary())
        };

        self.sink.show_loading(false);
        self.sink.render_articles(&filtered);
        self.sink.render_status(&summary);

        summary
    }

    /// Change the active filter. `None` leaves that part unchanged.
    /// Returns the new displayed subset.
    pub async fn set_filter(&self, category: Option<&str>, search: Option<&str>) -> Vec<Article> {
        let filtered = {
            let mut state = self.state.write().await;
            if let Some(category) = category {
                state.filter.set_category(category);
            }
            if let Some(search) = search {
                state.filter.set_search(search);
            }
            state.apply_filter();
            state.filtered.clone()
        };

        self.sink.render_articles(&filtered);
        filtered
    }

    /// Filter the full article list without touching the active filter.
    pub async fn filtered_view(&self, filter: &ArticleFilter) -> Vec<Article> {
        filter_articles(&self.state.read().await.articles, filter)
    }
}

/// Keep the first article for each normalized title, preserving order.
pub fn deduplicate(articles: Vec<Article>) -> Vec<Article> {
    let mut seen = HashSet::new();
    articles
        .into_iter()
        .filter(|a| seen.insert(a.dedup_key()))
        .collect()
}

/// Newest first. Stable, so equal dates keep their relative order.
pub fn sort_by_recency(mut articles: Vec<Article>) -> Vec<Article> {
    articles.sort_by(|a, b| b.pub_date.cmp(&a.pub_date));
    articles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use crate::display::testing::RecordingSink;
    use crate::model::{FeedDescriptor, FetchState};
    use chrono::TimeZone;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn article(title: &str, source: &str, hour: u32) -> Article {
        Article {
            title: title.to_string(),
            description: "desc".to_string(),
            link: format!("https://example.com/{}", title),
            source: source.to_string(),
            category: "tech".to_string(),
            pub_date: Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap(),
            author: "Unknown".to_string(),
            thumbnail: None,
            guid: None,
        }
    }

    fn catalog(categories: Vec<(&str, Vec<(&str, &str)>)>) -> SourceCatalog {
        SourceCatalog::new(
            categories
                .into_iter()
                .map(|(key, feeds)| Category {
                    key: key.to_string(),
                    feeds: feeds
                        .into_iter()
                        .map(|(name, rss)| FeedDescriptor {
                            name: name.to_string(),
                            rss: rss.to_string(),
                        })
                        .collect(),
                })
                .collect(),
        )
    }

    fn aggregator(server: &MockServer) -> (Aggregator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let fetcher = Fetcher::with_client(
            reqwest::Client::new(),
            &format!("{}/v1/api.json", server.uri()),
            10,
        );
        (Aggregator::new(fetcher, sink.clone()), sink)
    }

    async fn mount_items(server: &MockServer, rss: &str, items: serde_json::Value) {
        Mock::given(method("GET"))
            .and(query_param("rss_url", rss))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": items })))
            .mount(server)
            .await;
    }

    mod dedup_and_sort_tests {
        use super::*;

        #[test]
        fn test_deduplicate_keeps_first_occurrence() {
            let articles = vec![
                article("Breaking News", "A", 1),
                article("Other", "A", 2),
                article("  breaking news  ", "B", 3),
                article("BREAKING NEWS", "C", 4),
            ];
            let deduped = deduplicate(articles);
            assert_eq!(deduped.len(), 2);
            assert_eq!(deduped[0].source, "A");
            assert_eq!(deduped[0].title, "Breaking News");
            assert_eq!(deduped[1].title, "Other");
        }

        #[test]
        fn test_deduplicate_empty() {
            assert!(deduplicate(Vec::new()).is_empty());
        }

        #[test]
        fn test_sort_newest_first() {
            let sorted = sort_by_recency(vec![
                article("old", "A", 1),
                article("new", "A", 9),
                article("mid", "A", 5),
            ]);
            let titles: Vec<_> = sorted.iter().map(|a| a.title.as_str()).collect();
            assert_eq!(titles, vec!["new", "mid", "old"]);
        }

        #[test]
        fn test_sort_is_stable_for_equal_dates() {
            let sorted = sort_by_recency(vec![
                article("first", "A", 5),
                article("newest", "A", 8),
                article("second", "B", 5),
                article("third", "C", 5),
            ]);
            let titles: Vec<_> = sorted.iter().map(|a| a.title.as_str()).collect();
            assert_eq!(titles, vec!["newest", "first", "second", "third"]);
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_single_feed_scenario() {
            let server = MockServer::start().await;
            mount_items(
                &server,
                "http://a",
                json!([{"title": "X", "pubDate": "2024-01-01T00:00:00Z"}]),
            )
            .await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;

            let outcome = aggregator.refresh_news().await;
            assert!(matches!(outcome, RefreshOutcome::Completed(_)));

            let state = aggregator.state().await;
            assert_eq!(state.articles.len(), 1);
            let article = &state.articles[0];
            assert_eq!(article.title, "X");
            assert_eq!(article.category, "tech");
            assert_eq!(article.source, "A");
            assert_eq!(article.author, "Unknown");
            assert_eq!(article.description, "No description available");
            assert_eq!(
                article.pub_date,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            );
            assert!(state.last_refresh.is_some());
        }

        #[tokio::test]
        async fn test_partial_failure_is_tolerated() {
            let server = MockServer::start().await;
            mount_items(&server, "http://a", json!([{"title": "From A"}])).await;
            Mock::given(method("GET"))
                .and(query_param("rss_url", "http://b"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;
            mount_items(&server, "http://c", json!([{"title": "From C"}])).await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![
                    ("tech", vec![("A", "http://a"), ("B", "http://b")]),
                    ("world", vec![("C", "http://c")]),
                ]))
                .await;

            let outcome = aggregator.refresh_news().await;
            let RefreshOutcome::Completed(summary) = outcome else {
                panic!("refresh should have run");
            };
            assert_eq!(summary.success, 2);
            assert_eq!(summary.error, 1);

            let state = aggregator.state().await;
            let mut sources: Vec<_> = state.articles.iter().map(|a| a.source.as_str()).collect();
            sources.sort();
            assert_eq!(sources, vec!["A", "C"]);
            assert_eq!(state.feed_status["B"].status, FetchState::Error);
            assert_eq!(state.feed_status["B"].message.as_deref(), Some("HTTP 500"));
            assert_eq!(state.feed_status["A"].status, FetchState::Success);

            let c = state.articles.iter().find(|a| a.source == "C").unwrap();
            assert_eq!(c.category, "world");
        }

        #[tokio::test]
        async fn test_duplicates_across_feeds_first_in_catalog_order_wins() {
            let server = MockServer::start().await;
            let date = "2024-01-01T00:00:00Z";
            mount_items(&server, "http://a", json!([{"title": "Same Story", "pubDate": date}])).await;
            mount_items(&server, "http://b", json!([{"title": "same story ", "pubDate": date}])).await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![
                    ("tech", vec![("A", "http://a")]),
                    ("world", vec![("B", "http://b")]),
                ]))
                .await;
            aggregator.refresh_news().await;

            let state = aggregator.state().await;
            assert_eq!(state.articles.len(), 1);
            assert_eq!(state.articles[0].source, "A");
            // Both feeds still count as successful
            assert_eq!(state.feed_status.len(), 2);
        }

        #[tokio::test]
        async fn test_articles_sorted_newest_first_across_feeds() {
            let server = MockServer::start().await;
            mount_items(
                &server,
                "http://a",
                json!([
                    {"title": "A old", "pubDate": "2024-01-01T00:00:00Z"},
                    {"title": "A new", "pubDate": "2024-03-01T00:00:00Z"}
                ]),
            )
            .await;
            mount_items(
                &server,
                "http://b",
                json!([{"title": "B mid", "pubDate": "2024-02-01T00:00:00Z"}]),
            )
            .await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a"), ("B", "http://b")])]))
                .await;
            aggregator.refresh_news().await;

            let state = aggregator.state().await;
            let titles: Vec<_> = state.articles.iter().map(|a| a.title.as_str()).collect();
            assert_eq!(titles, vec!["A new", "B mid", "A old"]);
        }

        #[tokio::test]
        async fn test_refresh_publishes_to_sink() {
            let server = MockServer::start().await;
            mount_items(&server, "http://a", json!([{"title": "X"}])).await;

            let (aggregator, sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;
            aggregator.refresh_news().await;

            assert_eq!(*sink.loading.lock().unwrap(), vec![true, false]);
            let renders = sink.renders.lock().unwrap();
            assert_eq!(renders.len(), 1);
            assert_eq!(renders[0][0].title, "X");
            let statuses = sink.statuses.lock().unwrap();
            assert_eq!(statuses[0].success, 1);
            assert_eq!(statuses[0].error, 0);
        }

        #[tokio::test]
        async fn test_refresh_reapplies_active_filter() {
            let server = MockServer::start().await;
            mount_items(&server, "http://a", json!([{"title": "Tech story"}])).await;
            mount_items(&server, "http://b", json!([{"title": "World story"}])).await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![
                    ("tech", vec![("A", "http://a")]),
                    ("world", vec![("B", "http://b")]),
                ]))
                .await;
            aggregator.set_filter(Some("world"), None).await;
            aggregator.refresh_news().await;

            let state = aggregator.state().await;
            assert_eq!(state.articles.len(), 2);
            assert_eq!(state.filtered.len(), 1);
            assert_eq!(state.filtered[0].title, "World story");
        }

        #[tokio::test]
        async fn test_status_map_is_reset_each_cycle() {
            let server = MockServer::start().await;
            mount_items(&server, "http://a", json!([{"title": "X"}])).await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;
            {
                let state = aggregator.state().await;
                assert_eq!(state.feed_status["A"].status, FetchState::Pending);
                assert!(state.feed_status["A"].last_fetch.is_none());
            }

            aggregator.refresh_news().await;
            // Swap in a catalog with a different feed: the old entry must disappear
            aggregator
                .set_sources(catalog(vec![("tech", vec![("C", "http://c")])]))
                .await;
            aggregator.refresh_news().await;

            let state = aggregator.state().await;
            assert!(!state.feed_status.contains_key("A"));
            assert_eq!(state.feed_status["C"].status, FetchState::Error);
        }

        #[tokio::test]
        async fn test_overlapping_refresh_is_skipped() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"items": [{"title": "Slow"}]}))
                        .set_delay(Duration::from_millis(300)),
                )
                .mount(&server)
                .await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;

            let (first, second) = tokio::join!(aggregator.refresh_news(), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                aggregator.refresh_news().await
            });

            assert!(matches!(first, RefreshOutcome::Completed(_)));
            assert_eq!(second, RefreshOutcome::AlreadyRunning);
            assert!(!aggregator.is_refreshing());

            // Once finished, a new cycle runs again
            assert!(matches!(
                aggregator.refresh_news().await,
                RefreshOutcome::Completed(_)
            ));
        }

        async fn slow_aggregator(server: &MockServer, delay: Duration) -> Aggregator {
            Mock::given(method("GET"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_json(json!({"items": [{"title": "Slow"}]}))
                        .set_delay(delay),
                )
                .mount(server)
                .await;

            let (aggregator, _sink) = aggregator(server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;
            aggregator
        }

        #[tokio::test]
        async fn test_cancelled_refresh_releases_the_flag() {
            let server = MockServer::start().await;
            let aggregator = slow_aggregator(&server, Duration::from_millis(300)).await;

            let cancelled =
                tokio::time::timeout(Duration::from_millis(50), aggregator.refresh_news()).await;
            assert!(cancelled.is_err());
            assert!(!aggregator.is_refreshing());

            assert!(matches!(
                aggregator.refresh_news().await,
                RefreshOutcome::Completed(_)
            ));
            assert_eq!(aggregator.state().await.articles.len(), 1);
        }

        #[tokio::test]
        async fn test_filtered_stays_a_subset_while_refreshing() {
            let server = MockServer::start().await;
            let aggregator = slow_aggregator(&server, Duration::from_millis(200)).await;
            aggregator.refresh_news().await;
            assert_eq!(aggregator.state().await.filtered.len(), 1);

            let (_, during) = tokio::join!(aggregator.refresh_news(), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert!(aggregator.is_refreshing());
                let state = aggregator.state().await;
                (state.articles.clone(), state.filtered.clone())
            });

            let (articles, filtered) = during;
            assert!(filtered.iter().all(|a| articles.contains(a)));
            assert!(filtered.is_empty());
            assert_eq!(aggregator.state().await.filtered.len(), 1);
        }

        #[tokio::test]
        async fn test_failed_catalog_load_yields_empty_refresh() {
            let server = MockServer::start().await;
            let (aggregator, _sink) = aggregator(&server);

            let result = aggregator.load_sources("/nonexistent/source.json").await;
            assert!(result.is_err());

            let outcome = aggregator.refresh_news().await;
            let RefreshOutcome::Completed(summary) = outcome else {
                panic!("refresh should have run");
            };
            assert_eq!(summary.success, 0);
            assert_eq!(summary.error, 0);
            assert!(aggregator.state().await.articles.is_empty());
        }
    }

    mod filter_state_tests {
        use super::*;

        #[tokio::test]
        async fn test_set_filter_updates_displayed_subset_only() {
            let server = MockServer::start().await;
            mount_items(
                &server,
                "http://a",
                json!([{"title": "Rust news"}, {"title": "Go news"}]),
            )
            .await;

            let (aggregator, sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;
            aggregator.refresh_news().await;

            let filtered = aggregator.set_filter(None, Some("RUST")).await;
            assert_eq!(filtered.len(), 1);
            assert_eq!(filtered[0].title, "Rust news");

            let state = aggregator.state().await;
            assert_eq!(state.articles.len(), 2);
            assert_eq!(state.filter.search(), "rust");
            assert_eq!(state.filter.category(), "all");
            assert_eq!(sink.renders.lock().unwrap().len(), 2);
        }

        #[tokio::test]
        async fn test_filtered_view_leaves_state_alone() {
            let server = MockServer::start().await;
            mount_items(&server, "http://a", json!([{"title": "One"}, {"title": "Two"}])).await;

            let (aggregator, _sink) = aggregator(&server);
            aggregator
                .set_sources(catalog(vec![("tech", vec![("A", "http://a")])]))
                .await;
            aggregator.refresh_news().await;

            let view = aggregator
                .filtered_view(&ArticleFilter::new("all", "two"))
                .await;
            assert_eq!(view.len(), 1);

            let state = aggregator.state().await;
            assert_eq!(state.filtered.len(), 2);
            assert_eq!(state.filter, ArticleFilter::default());
        }
    }
}
