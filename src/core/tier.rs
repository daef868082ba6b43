//! Tier configuration: tier identifier → requests allowed per one-minute window.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, RlvError};

/// Length of the fixed quota window every tier is measured against.
pub const QUOTA_WINDOW_SECS: u64 = 60;

/// Tier identifier. The three service tiers are built in; any other name is
/// accepted as a custom tier when the tier table defines it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TierId {
    Basic,
    Standard,
    Premium,
    Custom(String),
}

impl TierId {
    /// Canonical upper-case name used as the tier table key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Basic => "BASIC",
            Self::Standard => "STANDARD",
            Self::Premium => "PREMIUM",
            Self::Custom(name) => name,
        }
    }
}

impl FromStr for TierId {
    type Err = RlvError;

    fn from_str(raw: &str) -> Result<Self> {
        let name = raw.trim().to_ascii_uppercase();
        match name.as_str() {
            "" => Err(RlvError::UnknownTier {
                name: raw.to_string(),
            }),
            "BASIC" => Ok(Self::Basic),
            "STANDARD" => Ok(Self::Standard),
            "PREMIUM" => Ok(Self::Premium),
            _ => Ok(Self::Custom(name)),
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TierId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A resolved tier: immutable for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tier {
    pub id: TierId,
    /// Requests admitted per [`QUOTA_WINDOW_SECS`] window.
    pub quota: u64,
}

/// Static tier table, keyed by canonical tier name.
///
/// A `[tiers]` table in config layers over the built-in tiers: new names are
/// added, built-in names get their quota replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TierTable(BTreeMap<String, u64>);

impl Default for TierTable {
    fn default() -> Self {
        let mut table = BTreeMap::new();
        table.insert(TierId::Basic.to_string(), 60);
        table.insert(TierId::Standard.to_string(), 300);
        table.insert(TierId::Premium.to_string(), 1_000);
        Self(table)
    }
}

impl<'de> Deserialize<'de> for TierTable {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let declared = BTreeMap::<String, u64>::deserialize(deserializer)?;
        let mut table = Self::default();
        for (name, quota) in declared {
            table.insert(&name, quota);
        }
        Ok(table)
    }
}

impl TierTable {
    /// Resolve a tier name (case-insensitive) to its quota.
    pub fn resolve(&self, name: &str) -> Result<Tier> {
        let id: TierId = name.parse()?;
        let quota = *self
            .0
            .get(id.as_str())
            .ok_or_else(|| RlvError::UnknownTier {
                name: name.to_string(),
            })?;
        if quota == 0 {
            return Err(RlvError::InvalidConfig {
                details: format!("tier {id} quota must be > 0"),
            });
        }
        Ok(Tier { id, quota })
    }

    /// Every configured tier, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, quota)| (name.as_str(), *quota))
    }

    /// Add or replace a tier.
    pub fn insert(&mut self, name: &str, quota: u64) {
        self.0.insert(name.trim().to_ascii_uppercase(), quota);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(RlvError::InvalidConfig {
                details: "tiers table must define at least one tier".to_string(),
            });
        }
        for (name, quota) in &self.0 {
            if *quota == 0 {
                return Err(RlvError::InvalidConfig {
                    details: format!("tiers.{name} quota must be > 0"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers_match_service_quotas() {
        let table = TierTable::default();
        assert_eq!(table.resolve("BASIC").unwrap().quota, 60);
        assert_eq!(table.resolve("STANDARD").unwrap().quota, 300);
        assert_eq!(table.resolve("PREMIUM").unwrap().quota, 1_000);
    }

    #[test]
    fn tier_names_are_case_insensitive() {
        let table = TierTable::default();
        let tier = table.resolve(" premium ").unwrap();
        assert_eq!(tier.id, TierId::Premium);
        assert_eq!(tier.quota, 1_000);
    }

    #[test]
    fn unknown_tier_is_a_configuration_error() {
        let err = TierTable::default().resolve("GOLD").unwrap_err();
        assert!(matches!(err, RlvError::UnknownTier { ref name } if name == "GOLD"));
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_tier_name_rejected() {
        assert!(matches!(
            "  ".parse::<TierId>(),
            Err(RlvError::UnknownTier { .. })
        ));
    }

    #[test]
    fn custom_tiers_extend_the_table() {
        let mut table = TierTable::default();
        table.insert("enterprise", 5_000);
        let tier = table.resolve("Enterprise").unwrap();
        assert_eq!(tier.id, TierId::Custom("ENTERPRISE".to_string()));
        assert_eq!(tier.quota, 5_000);
    }

    #[test]
    fn zero_quota_rejected_on_resolve_and_validate() {
        let mut table = TierTable::default();
        table.insert("FREE", 0);
        assert!(matches!(
            table.resolve("FREE"),
            Err(RlvError::InvalidConfig { .. })
        ));
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("tiers.FREE"));
    }

    #[test]
    fn loaded_keys_are_upper_cased() {
        let table: TierTable = toml::from_str("basic = 10\nPremium = 20\n").unwrap();
        assert_eq!(table.resolve("BASIC").unwrap().quota, 10);
        assert_eq!(table.resolve("premium").unwrap().quota, 20);
    }

    #[test]
    fn loaded_tiers_layer_over_builtins() {
        let table: TierTable = toml::from_str("ENTERPRISE = 5000\n").unwrap();
        assert_eq!(table.resolve("ENTERPRISE").unwrap().quota, 5_000);
        assert_eq!(table.resolve("BASIC").unwrap().quota, 60);
        assert_eq!(table.resolve("STANDARD").unwrap().quota, 300);
        assert_eq!(table.resolve("PREMIUM").unwrap().quota, 1_000);
        table.validate().unwrap();
    }
}
