//! # gov_scrape
//!
//! Incremental scrapers for West Virginia public-records sites. Each job
//! fetches a source, parses it into typed records, drops the ones already
//! stored and appends the rest to an append-only CSV dataset.
//!
//! ## Architecture
//!
//! 1. **Record model** ([`models`]): typed records and their natural keys
//! 2. **Source extractors** ([`scrapers`]): fetch and parse, one per site
//! 3. **Dedup** ([`dedup`]): pick the records not yet stored
//! 4. **Store** ([`store`]): locked, atomic CSV appends
//! 5. **Pipeline** ([`pipeline`]): drives 1-4 and reports counts
//!
//! [`runner`] maps command-line jobs onto pipelines and [`report`] prints the
//! outcome as one JSON line.

pub mod assets;
pub mod cli;
pub mod config;
pub mod dedup;
pub mod error;
pub mod http;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod scrapers;
pub mod store;
pub mod utils;
