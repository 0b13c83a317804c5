use archi_core::error::{Error, Result};
use archi_core::iteration::{Iteration, IterationId, IterationOutputs, IterationStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobCreateResponse {
    pub id: IterationId,
}

/// Iteration as the service reports it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterationRecord {
    pub id: IterationId,
    #[serde(default)]
    pub prompt: String,
    pub status: String,
    #[serde(default)]
    pub generated_image_url: Option<String>,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub compliance_check: Option<String>,
}

impl TryFrom<IterationRecord> for Iteration {
    type Error = Error;

    fn try_from(record: IterationRecord) -> Result<Self> {
        let status = IterationStatus::from_wire(&record.status)?;
        let outputs = match status {
            IterationStatus::Completed => {
                let missing = |field: &str| {
                    Error::Service(format!(
                        "completed iteration {} has no {field}",
                        record.id
                    ))
                };
                Some(IterationOutputs {
                    generated_image_url: record
                        .generated_image_url
                        .ok_or_else(|| missing("generated_image_url"))?,
                    narrative: record.narrative.ok_or_else(|| missing("narrative"))?,
                    compliance_check: record
                        .compliance_check
                        .ok_or_else(|| missing("compliance_check"))?,
                })
            }
            IterationStatus::Pending | IterationStatus::Failed => None,
        };

        Ok(Iteration {
            id: record.id,
            prompt: record.prompt,
            status,
            outputs,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub id: u64,
    pub email: String,
}

/// FastAPI-style error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    pub detail: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: &str) -> IterationRecord {
        IterationRecord {
            id: IterationId::from(3u64),
            prompt: "cabin".into(),
            status: status.into(),
            generated_image_url: None,
            narrative: None,
            compliance_check: None,
        }
    }

    #[test]
    fn test_processing_record_is_pending() {
        let iteration = Iteration::try_from(record("processing")).unwrap();
        assert_eq!(iteration.status, IterationStatus::Pending);
        assert!(iteration.outputs.is_none());
    }

    #[test]
    fn test_completed_record_requires_outputs() {
        let err = Iteration::try_from(record("completed")).unwrap_err();
        assert!(matches!(err, Error::Service(msg) if msg.contains("generated_image_url")));
    }

    #[test]
    fn test_outputs_dropped_unless_completed() {
        let mut failed = record("failed");
        failed.narrative = Some("partial".into());
        let iteration = Iteration::try_from(failed).unwrap();
        assert_eq!(iteration.status, IterationStatus::Failed);
        assert!(iteration.outputs.is_none());
    }

    #[test]
    fn test_decodes_service_json() {
        let raw = r#"{"id": 12, "owner_id": 1, "prompt": "barn", "sketch_url": "temp/s.png",
            "status": "completed", "generated_image_url": "https://img/12.png",
            "narrative": "A red barn.", "compliance_check": "Setbacks OK."}"#;
        let record: IterationRecord = serde_json::from_str(raw).unwrap();
        let iteration = Iteration::try_from(record).unwrap();
        assert_eq!(iteration.id.as_str(), "12");
        assert_eq!(iteration.narrative(), Some("A red barn."));
    }
}
