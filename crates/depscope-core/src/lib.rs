//! # depscope-core
//!
//! Core types, traits, and abstractions for depscope.
//!
//! This crate provides the foundational data structures and trait
//! definitions the pipeline crates depend on: the tiered metadata model,
//! the job catalog, queue message shapes, package coordinates, and the
//! repository/queue/cache seams implemented by `depscope-db`.

pub mod catalog;
pub mod component;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod message;
pub mod metadata;
pub mod purl;
pub mod traits;

// Re-export commonly used types at crate root
pub use catalog::{JobCatalog, JobDefinition, MetadataTarget};
pub use component::Component;
pub use error::{Error, Result};
pub use message::JobMessage;
pub use metadata::{MetadataBag, MetadataRecord, MetadataTier, TIER_PRECEDENCE};
pub use purl::PackageUrl;
pub use traits::{ComponentRepository, DedupCache, QueuedMessage, WorkQueue};
