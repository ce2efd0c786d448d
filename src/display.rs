//! Where refresh results go once the pipeline is done with them.

use tracing::{debug, info};

use crate::model::{Article, StatusSummary};

pub trait DisplaySink: Send + Sync {
    fn show_loading(&self, loading: bool);

    /// Called with the currently displayed (filtered) subset.
    fn render_articles(&self, articles: &[Article]);

    fn render_status(&self, summary: &StatusSummary);
}

/// Sink that writes to the log. Used by the server binary, where clients
/// read the state through the JSON API instead.
#[derive(Debug, Default)]
pub struct LogSink;

impl DisplaySink for LogSink {
    fn show_loading(&self, loading: bool) {
        debug!("Loading: {}", loading);
    }

    fn render_articles(&self, articles: &[Article]) {
        if articles.is_empty() {
            info!("No articles match the current filter");
        } else {
            info!("Displaying {} articles", articles.len());
        }
    }

    fn render_status(&self, summary: &StatusSummary) {
        info!(
            "Sources: {} active | {} errors",
            summary.success, summary.error
        );
    }
}
