//! The tracked open-source component.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::MetadataBag;

/// An open-source component tracked by the pipeline.
///
/// Identified by its canonical package coordinate (`purl`). Created on
/// first reference by the import path; never hard-deleted by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    pub id: Uuid,
    /// Canonical package coordinate, e.g. `pkg:npm/chalk`.
    pub purl: String,
    /// Display name (defaults to `namespace/name` from the coordinate).
    pub name: String,
    /// Tiered metadata bag.
    pub metadata: MetadataBag,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
