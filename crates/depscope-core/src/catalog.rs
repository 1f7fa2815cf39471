//! Job catalog: the static list of collector job definitions.
//!
//! Loaded read-only at process start from a JSON document of the shape
//! `{"config": [ {<job definition>}, ... ]}`. Each definition names the
//! collector command to run, the worker pool that runs it, its
//! preconditions and timeout, and the metadata subtree its result lands in.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::defaults::{JOB_TIMEOUT_SECS, SPECIAL_SUBTREE, TARGET_PLACEHOLDER};
use crate::error::{Error, Result};
use crate::metadata::MetadataTier;

/// Where a job's result is written, parsed from `metadata-subtree`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataTarget {
    /// The `$special` sentinel: handled out-of-band, never written generically.
    Special,
    /// A concrete (tier, key) destination.
    Subtree { tier: MetadataTier, key: String },
}

impl fmt::Display for MetadataTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataTarget::Special => f.write_str(SPECIAL_SUBTREE),
            MetadataTarget::Subtree { tier, key } => write!(f, "{}.{}", tier, key),
        }
    }
}

/// One catalog entry describing how to refresh one metadata subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    /// Key into the catalog; requests and responses carry this name.
    pub job_name: String,
    /// Which worker pool executes this definition.
    pub exec_environment: String,
    /// Argument vector template; `$TARGET` is substituted per component.
    #[serde(default)]
    pub cmd: Vec<String>,
    /// Preconditions of the form `env:NAME`.
    #[serde(default)]
    pub requires: Vec<String>,
    /// Wall-clock bound on the collector process, in seconds.
    #[serde(
        rename = "timeout",
        default = "default_timeout",
        deserialize_with = "timeout_from_number_or_string"
    )]
    pub timeout_secs: u64,
    /// Tie-break when multiple definitions share a job name (ascending).
    #[serde(default)]
    pub ordering: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// `"<TIER>.<key>"`, the `$special` sentinel, or absent
    /// (absent defaults to `SOURCE.<job-name>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_subtree: Option<String>,
}

fn default_timeout() -> u64 {
    JOB_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

/// Catalogs in the wild carry the timeout as either a number or a string.
fn timeout_from_number_or_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(u64),
        String(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

impl JobDefinition {
    /// Resolve the `metadata-subtree` field into a typed target.
    ///
    /// Absent defaults to `SOURCE.<job-name>`; an unknown tier or an empty
    /// key is a per-entry validation error.
    pub fn metadata_target(&self) -> Result<MetadataTarget> {
        let subtree = match &self.metadata_subtree {
            Some(s) => s.clone(),
            None => format!("SOURCE.{}", self.job_name),
        };
        if subtree == SPECIAL_SUBTREE {
            return Ok(MetadataTarget::Special);
        }
        let (tier, key) = subtree.split_once('.').ok_or_else(|| {
            Error::Catalog(format!(
                "Job [{}]: metadata-subtree [{}] is not TIER.key",
                self.job_name, subtree
            ))
        })?;
        if key.is_empty() {
            return Err(Error::Catalog(format!(
                "Job [{}]: metadata-subtree has an empty key",
                self.job_name
            )));
        }
        let tier = MetadataTier::from_str(tier).map_err(|_| {
            Error::Catalog(format!(
                "Job [{}]: unknown metadata tier [{}]",
                self.job_name, tier
            ))
        })?;
        Ok(MetadataTarget::Subtree {
            tier,
            key: key.to_string(),
        })
    }

    /// Assemble the argv for one target, substituting `$TARGET` in every token.
    pub fn build_command(&self, target: &str) -> Vec<String> {
        self.cmd
            .iter()
            .map(|token| token.replace(TARGET_PLACEHOLDER, target))
            .collect()
    }

    /// The `env:NAME` preconditions not satisfied by `lookup`.
    ///
    /// Preconditions with other prefixes are ignored, matching the original
    /// contract (only environment requirements are checkable here).
    pub fn unmet_requirements(&self, lookup: impl Fn(&str) -> bool) -> Vec<String> {
        self.requires
            .iter()
            .filter(|req| {
                req.strip_prefix("env:")
                    .map(|name| !lookup(name))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    config: Vec<JobDefinition>,
}

/// The loaded job catalog.
#[derive(Debug, Clone, Default)]
pub struct JobCatalog {
    jobs: Vec<JobDefinition>,
}

impl JobCatalog {
    /// Build a catalog from already-constructed definitions.
    pub fn from_jobs(jobs: Vec<JobDefinition>) -> Self {
        Self { jobs }
    }

    /// Parse a catalog from its JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let file: CatalogFile =
            serde_json::from_str(text).map_err(|e| Error::Catalog(e.to_string()))?;
        Ok(Self { jobs: file.config })
    }

    /// Read and parse a catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// All definitions, in catalog order.
    pub fn jobs(&self) -> &[JobDefinition] {
        &self.jobs
    }

    /// Enabled definitions, in catalog order.
    pub fn enabled(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().filter(|j| j.enabled)
    }

    /// Enabled definitions for one worker pool and job name, sorted by
    /// `ordering` ascending (stable: catalog order breaks ties). Zero, one,
    /// or many matches are all legitimate.
    pub fn matching(&self, exec_environment: &str, job_name: &str) -> Vec<&JobDefinition> {
        let mut matched: Vec<&JobDefinition> = self
            .jobs
            .iter()
            .filter(|j| {
                j.enabled && j.exec_environment == exec_environment && j.job_name == job_name
            })
            .collect();
        matched.sort_by_key(|j| j.ordering);
        matched
    }

    /// The lowest-ordering enabled definition with this job name, across
    /// all exec environments (used by the importer, which is pool-agnostic).
    pub fn find_enabled(&self, job_name: &str) -> Option<&JobDefinition> {
        self.jobs
            .iter()
            .filter(|j| j.enabled && j.job_name == job_name)
            .min_by_key(|j| j.ordering)
    }
}
