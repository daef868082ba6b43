//! Core types: errors, configuration, tiers, request records.

pub mod config;
pub mod errors;
pub mod record;
pub mod tier;
