//! Tiered component metadata model.
//!
//! Metadata is a typed two-level map: precedence tier → key → record.
//! `EXPERT` (human-entered) overrides `DERIVED` (computed), which overrides
//! `SOURCE` (raw collector output). Expiration governs *refresh scheduling*
//! only; an expired record stays visible until a new write replaces it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Metadata precedence tier, most to least authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetadataTier {
    /// Human-entered values; highest precedence.
    Expert,
    /// Values computed from other metadata.
    Derived,
    /// Raw collector output; lowest precedence.
    Source,
}

/// Tiers in precedence order (most authoritative first).
pub const TIER_PRECEDENCE: [MetadataTier; 3] = [
    MetadataTier::Expert,
    MetadataTier::Derived,
    MetadataTier::Source,
];

impl MetadataTier {
    /// Canonical uppercase name, as stored and as used in `metadata-subtree`.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataTier::Expert => "EXPERT",
            MetadataTier::Derived => "DERIVED",
            MetadataTier::Source => "SOURCE",
        }
    }
}

impl fmt::Display for MetadataTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataTier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "EXPERT" => Ok(MetadataTier::Expert),
            "DERIVED" => Ok(MetadataTier::Derived),
            "SOURCE" => Ok(MetadataTier::Source),
            other => Err(Error::InvalidInput(format!(
                "Unknown metadata tier: {}",
                other
            ))),
        }
    }
}

/// A single metadata value with optional expiration and provider detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// The payload. Arbitrary JSON.
    pub value: JsonValue,
    /// Absolute timestamp after which the value is eligible for refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<DateTime<Utc>>,
    /// Auxiliary structured detail, e.g. the raw provider response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<JsonValue>,
}

impl MetadataRecord {
    /// A record holding just a value, with no expiration or properties.
    pub fn new(value: JsonValue) -> Self {
        Self {
            value,
            expiration: None,
            properties: None,
        }
    }

    /// Whether the record's expiration has passed. Records without an
    /// expiration are always considered expired (eligible for refresh).
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(exp) => exp < now,
            None => true,
        }
    }
}

/// The full metadata bag for one component: tier → key → record.
///
/// Serialized shape matches storage:
/// `{"SOURCE": {"scorecard": {"value": ..., "expiration": ...}}, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataBag {
    tiers: BTreeMap<MetadataTier, BTreeMap<String, MetadataRecord>>,
}

impl MetadataBag {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any tier holds any record.
    pub fn is_empty(&self) -> bool {
        self.tiers.values().all(|keys| keys.is_empty())
    }

    /// Write a value at (tier, key), replacing any prior record.
    ///
    /// A `null` value is a no-op returning `false`; writes never delete.
    pub fn set(&mut self, tier: MetadataTier, key: &str, value: JsonValue) -> bool {
        self.set_with(tier, key, value, None, None)
    }

    /// Write a value at (tier, key) with an optional lifetime (converted to
    /// an absolute expiration) and optional properties.
    pub fn set_with(
        &mut self,
        tier: MetadataTier,
        key: &str,
        value: JsonValue,
        lifetime: Option<Duration>,
        properties: Option<JsonValue>,
    ) -> bool {
        if value.is_null() {
            return false;
        }
        let record = MetadataRecord {
            value,
            expiration: lifetime.map(|d| Utc::now() + d),
            properties,
        };
        self.tiers.entry(tier).or_default().insert(key.to_string(), record);
        true
    }

    /// Look up the record for `key`. With a tier, only that tier is
    /// consulted; without one, tiers are searched in precedence order and
    /// the first record found wins, expired or not.
    pub fn record(&self, key: &str, tier: Option<MetadataTier>) -> Option<&MetadataRecord> {
        match tier {
            Some(t) => self.tiers.get(&t).and_then(|keys| keys.get(key)),
            None => TIER_PRECEDENCE
                .iter()
                .find_map(|t| self.tiers.get(t).and_then(|keys| keys.get(key))),
        }
    }

    /// Look up the value for `key` (precedence-resolved when no tier given).
    pub fn get(&self, key: &str, tier: Option<MetadataTier>) -> Option<&JsonValue> {
        self.record(key, tier).map(|r| &r.value)
    }

    /// Expiration of the record at `key`, if the record exists and has one.
    pub fn expiration(&self, key: &str, tier: Option<MetadataTier>) -> Option<DateTime<Utc>> {
        self.record(key, tier).and_then(|r| r.expiration)
    }

    /// All records of one tier.
    pub fn tier(&self, tier: MetadataTier) -> Option<&BTreeMap<String, MetadataRecord>> {
        self.tiers.get(&tier)
    }

    /// Flattened key → record view with higher tiers overriding lower ones.
    pub fn flattened(&self) -> BTreeMap<String, &MetadataRecord> {
        let mut result = BTreeMap::new();
        for tier in TIER_PRECEDENCE.iter().rev() {
            if let Some(keys) = self.tiers.get(tier) {
                for (key, record) in keys {
                    result.insert(key.clone(), record);
                }
            }
        }
        result
    }
}
