use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{DocumentType, ExtractionResult, JobOutcome};

/// JSON body for POST /api/v1/verify_async.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AsyncVerifyRequest {
    /// Publicly fetchable URL of the source image.
    #[garde(length(min = 1, max = 2048))]
    pub file_url: String,

    /// Receiver to notify once the job reaches a terminal state.
    #[garde(length(min = 1, max = 2048))]
    pub callback_url: String,

    /// Opaque credential echoed back as `Authorization: Bearer <token>`.
    #[garde(length(min = 1, max = 512))]
    pub callback_token: String,

    /// Document type tag; alias tolerant ("DL", "LICENSE", "PAN", ...).
    #[garde(length(min = 1, max = 64))]
    pub document_type: String,
}

/// Immediate acknowledgment for accepted asynchronous jobs.
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptedResponse {
    pub status: String,
    pub message: String,
}

impl AcceptedResponse {
    pub fn queued() -> Self {
        Self {
            status: "accepted".to_string(),
            message: "Job queued for processing".to_string(),
        }
    }
}

/// Synchronous verification response.
///
/// `message` is set on soft failures (processing worked, mandatory field
/// unreadable) and `error` on intake or hard failures, so callers can tell
/// the two apart.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerifyResponse {
    pub fn intake_error(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            document_type: None,
            data: None,
            message: None,
            error: Some(error.into()),
        }
    }

    pub fn from_outcome(document_type: DocumentType, outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded { data } => Self {
                valid: true,
                document_type: Some(document_type),
                data: Some(data),
                message: None,
                error: None,
            },
            JobOutcome::SoftFailed { message, data } => Self {
                valid: false,
                document_type: Some(document_type),
                data: Some(data),
                message: Some(message),
                error: None,
            },
            JobOutcome::HardFailed { error } => Self {
                valid: false,
                document_type: Some(document_type),
                data: None,
                message: None,
                error: Some(error),
            },
        }
    }
}

/// Body POSTed to the callback receiver when an asynchronous job finishes.
#[derive(Debug, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_type: Option<DocumentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ExtractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn from_outcome(document_type: DocumentType, outcome: JobOutcome) -> Self {
        match outcome {
            JobOutcome::Succeeded { data } => Self {
                status: "success".to_string(),
                document_type: Some(document_type),
                data: Some(data),
                error: None,
            },
            JobOutcome::SoftFailed { message, data } => Self {
                status: "failed".to_string(),
                document_type: Some(document_type),
                data: Some(data),
                error: Some(message),
            },
            JobOutcome::HardFailed { error } => Self {
                status: "failed".to_string(),
                document_type: None,
                data: None,
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn success_response_omits_error_fields() {
        let mut data = BTreeMap::new();
        data.insert("Pan Number".to_string(), "ABCDE1234F".to_string());
        let resp = VerifyResponse::from_outcome(
            DocumentType::Pan,
            JobOutcome::Succeeded { data },
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["valid"], true);
        assert_eq!(json["document_type"], "PAN");
        assert!(json.get("message").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn soft_failure_keeps_partial_data() {
        let resp = VerifyResponse::from_outcome(
            DocumentType::Aadhaar,
            JobOutcome::SoftFailed {
                message: "Could not verify AADHAAR".to_string(),
                data: BTreeMap::new(),
            },
        );
        assert!(!resp.valid);
        assert!(resp.message.is_some());
        assert!(resp.data.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn hard_failure_callback_carries_only_error() {
        let payload = CallbackPayload::from_outcome(
            DocumentType::Pan,
            JobOutcome::HardFailed {
                error: "Failed to download image. Status: 404".to_string(),
            },
        );
        assert_eq!(payload.status, "failed");
        assert!(payload.data.is_none());
        assert!(payload.error.unwrap().contains("404"));
    }
}
