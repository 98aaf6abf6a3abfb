//! Feed refresh engine: scheduled polling, bounded concurrent refresh
//! workers, and a per-feed pipeline that fetches, parses, filters and
//! merges entries into SQLite.

pub mod batch;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod filter;
pub mod notify;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod scraper;
pub mod storage;
pub mod tracker;
