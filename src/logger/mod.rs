//! Run logging: JSONL append-only writer fed by a dedicated logger thread.

pub mod jsonl;
pub mod run_log;
