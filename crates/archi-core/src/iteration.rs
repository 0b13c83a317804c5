use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

/// Server-allocated identifier of one generation job.
///
/// The service hands out integer keys, but the client treats ids as opaque and
/// accepts either JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IterationId(String);

impl IterationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the id, when the service used an integer key.
    pub fn numeric(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for IterationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IterationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for IterationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for IterationId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Number(u64),
            Text(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Number(n) => Self::from(n),
            RawId::Text(s) => Self(s),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Pending,
    Completed,
    Failed,
}

impl IterationStatus {
    /// Map the status string reported by the service.
    ///
    /// Freshly created jobs are reported as `processing`. Anything the client
    /// does not recognise is a service error rather than an implicit pending.
    pub fn from_wire(status: &str) -> Result<Self> {
        match status {
            "pending" | "processing" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Service(format!("unrecognized job status '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for IterationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationOutputs {
    pub generated_image_url: String,
    pub narrative: String,
    pub compliance_check: String,
}

/// Local copy of one generation job. `outputs` is present iff the job completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iteration {
    pub id: IterationId,
    pub prompt: String,
    pub status: IterationStatus,
    pub outputs: Option<IterationOutputs>,
}

impl Iteration {
    pub fn pending(id: impl Into<IterationId>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            status: IterationStatus::Pending,
            outputs: None,
        }
    }

    pub fn completed(
        id: impl Into<IterationId>,
        prompt: impl Into<String>,
        outputs: IterationOutputs,
    ) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            status: IterationStatus::Completed,
            outputs: Some(outputs),
        }
    }

    pub fn failed(id: impl Into<IterationId>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            status: IterationStatus::Failed,
            outputs: None,
        }
    }

    pub fn narrative(&self) -> Option<&str> {
        self.outputs.as_ref().map(|o| o.narrative.as_str())
    }

    pub fn compliance_check(&self) -> Option<&str> {
        self.outputs.as_ref().map(|o| o.compliance_check.as_str())
    }

    pub fn generated_image_url(&self) -> Option<&str> {
        self.outputs.as_ref().map(|o| o.generated_image_url.as_str())
    }

    /// Whether this record should replace `existing`, a record with the same id.
    ///
    /// Leaving `pending` always wins. Among non-pending records the latest
    /// write wins. A pending record never overwrites a finished one.
    pub fn supersedes(&self, existing: &Iteration) -> bool {
        !self.status.is_pending() || existing.status.is_pending()
    }
}
