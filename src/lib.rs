//! Sentiflow - financial news sentiment pipeline
//!
//! Collects articles from RSS/Atom feeds, links them to known securities,
//! scores them with several sentiment models and keeps per-symbol
//! time-bucketed aggregates in SQLite.

pub mod pipeline;
