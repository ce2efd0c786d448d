//! Headlinea - a news aggregator
//!
//! Loads a catalog of RSS feeds, fetches each one through an RSS-to-JSON
//! conversion service, merges the results into a deduplicated, date-sorted
//! article list and serves it, filterable by category and search text.

pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod display;
pub mod fetcher;
pub mod filter;
pub mod model;
pub mod routes;
pub mod scheduler;
