//! Background tracker that infers which project you are working on. A daemon samples the
//! foreground window, a small screenshot around the pointer and input counts, and keeps the
//! resulting timeline in a local SQLite database. The cli starts and stops it and prints daily
//! summaries.

pub mod cli;
pub mod daemon;
pub mod utils;
pub mod window_api;
