//! Aggregation and scoring: confusion counts, latency trends, accuracy.

pub mod confusion;
pub mod latency;
pub mod scorer;
