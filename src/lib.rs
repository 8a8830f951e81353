//! Harvests daily newsletter digests over a date range into SQLite.
//!
//! A run walks every calendar date in a range, skips weekends and holidays,
//! fetches and parses each publishing day's digest, optionally translates and
//! narrates the articles, and commits them atomically per day. Progress is
//! persisted after every step so an interrupted run resumes where it stopped.

pub mod calendar;
pub mod config;
pub mod digest;
pub mod enrich;
pub mod orchestrator;
pub mod storage;
pub mod util;
