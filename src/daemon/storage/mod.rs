//! Persistence of everything the tracker observes. [activity_store::SqliteActivityStore] keeps four
//! append-oriented tables in a single SQLite file:
//!  - `activity_windows`: intervals of work on one inferred project, at most one left open.
//!  - `input_activity`: per-minute input counts, merged additively.
//!  - `afk_periods`: intervals the user spent away.
//!  - `screenshots`: metadata of captured evidence, purged together with the files.

pub mod activity_store;
pub mod entities;
