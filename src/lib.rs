//! Batch downloader for SVT Play categories.
//!
//! The crate keeps four small state stores (seen items, seen episodes, an
//! error ledger and per-series staleness records) so that repeated runs only
//! fetch what is new, retry flaky items a bounded number of times, and point
//! out series that have gone quiet.

pub mod app;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod output;
pub mod staleness;
pub mod store;
