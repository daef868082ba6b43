//! Staged load profiles: declarative concurrency schedules for spike runs.

pub mod stages;
