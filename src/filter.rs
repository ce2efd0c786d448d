use serde::Serialize;

use crate::model::Article;

/// Category value that disables category filtering.
pub const ALL_CATEGORIES: &str = "all";

/// The active category and search filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleFilter {
    category: String,
    search: String,
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            category: ALL_CATEGORIES.to_string(),
            search: String::new(),
        }
    }
}

impl ArticleFilter {
    pub fn new(category: &str, search: &str) -> Self {
        let mut filter = Self::default();
        filter.set_category(category);
        filter.set_search(search);
        filter
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// An empty category means "all".
    pub fn set_category(&mut self, category: &str) {
        self.category = if category.is_empty() {
            ALL_CATEGORIES.to_string()
        } else {
            category.to_string()
        };
    }

    /// Search text is stored trimmed and lower-cased.
    pub fn set_search(&mut self, search: &str) {
        self.search = search.trim().to_lowercase();
    }

    pub fn matches(&self, article: &Article) -> bool {
        self.matches_category(article) && self.matches_search(article)
    }

    fn matches_category(&self, article: &Article) -> bool {
        self.category == ALL_CATEGORIES || article.category == self.category
    }

    fn matches_search(&self, article: &Article) -> bool {
        self.search.is_empty()
            || article.title.to_lowercase().contains(&self.search)
            || article.description.to_lowercase().contains(&self.search)
            || article.source.to_lowercase().contains(&self.search)
    }
}

/// The subset of `articles` that passes `filter`, in the original order.
pub fn filter_articles(articles: &[Article], filter: &ArticleFilter) -> Vec<Article> {
    articles
        .iter()
        .filter(|a| filter.matches_category(a))
        .filter(|a| filter.matches_search(a))
        .cloned()
        .collect()
}
