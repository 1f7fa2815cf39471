//! Queue message shapes: `job-request` and `job-response`.
//!
//! Messages are UTF-8 JSON text, externally tagged by `message-type`.
//! Anything else on the wire is not ours and is left alone by consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Result;

/// A job coordination message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message-type", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum JobMessage {
    /// Ask a worker pool to refresh one (component, job) pair.
    JobRequest {
        job_name: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },
    /// A collector's result for one (component, job) pair.
    JobResponse {
        job_name: String,
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
        result: JsonValue,
    },
}

impl JobMessage {
    /// Build a request message.
    pub fn request(
        job_name: impl Into<String>,
        target: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        JobMessage::JobRequest {
            job_name: job_name.into(),
            target: target.into(),
            correlation_id: Some(correlation_id.into()),
        }
    }

    /// Build a response message, echoing the request's correlation id.
    pub fn response(
        job_name: impl Into<String>,
        target: impl Into<String>,
        correlation_id: Option<String>,
        result: JsonValue,
    ) -> Self {
        JobMessage::JobResponse {
            job_name: job_name.into(),
            target: target.into(),
            correlation_id,
            result,
        }
    }

    /// The job name this message concerns.
    pub fn job_name(&self) -> &str {
        match self {
            JobMessage::JobRequest { job_name, .. } => job_name,
            JobMessage::JobResponse { job_name, .. } => job_name,
        }
    }

    /// The targeted component coordinate.
    pub fn target(&self) -> &str {
        match self {
            JobMessage::JobRequest { target, .. } => target,
            JobMessage::JobResponse { target, .. } => target,
        }
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from the wire format.
    pub fn decode(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}
