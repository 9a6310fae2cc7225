use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Structured fields produced by the extraction engine.
///
/// The schema varies by document type and engine version, so this is an open
/// mapping rather than a fixed struct; the validator reasons over key aliases.
pub type ExtractionResult = BTreeMap<String, String>;

/// Supported identity document types.
///
/// Parsing is ASCII-case-insensitive and alias tolerant (`"dl"`, `"LICENSE"`
/// both mean a driving license); `Display` renders the canonical token used
/// in responses and callbacks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum DocumentType {
    #[strum(to_string = "DRIVING_LICENSE", serialize = "DL", serialize = "LICENSE")]
    #[serde(rename = "DRIVING_LICENSE")]
    DrivingLicense,
    #[strum(to_string = "PAN")]
    #[serde(rename = "PAN")]
    Pan,
    #[strum(to_string = "AADHAAR")]
    #[serde(rename = "AADHAAR")]
    Aadhaar,
}

impl DocumentType {
    /// Parse a caller-supplied document type tag, trimming whitespace first.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse().ok()
    }
}

/// Status of a verification job. Transitions are strictly forward and
/// exactly one terminal status (`Succeeded` or `Failed`) is reached per job.
/// Internal to the pipeline; responses and callbacks carry their own status
/// strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Received,
    Fetching,
    Normalizing,
    Extracting,
    Validating,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// Where the source image comes from: an in-memory upload (synchronous
/// intake) or a URL to fetch (asynchronous intake).
#[derive(Debug, Clone)]
pub enum JobSource {
    Bytes(Vec<u8>),
    RemoteUrl(String),
}

/// Callback destination for asynchronous jobs. The token is opaque
/// pass-through; it is sent back as a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackTarget {
    pub url: String,
    pub token: String,
}

/// A single verification job.
#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub document_type: DocumentType,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(document_type: DocumentType) -> Self {
        Self {
            id: Uuid::new_v4(),
            document_type,
            status: JobStatus::Received,
            created_at: Utc::now(),
        }
    }

    /// Advance the state machine, logging the transition. Terminal states
    /// are entered at most once.
    pub fn advance(&mut self, next: JobStatus) {
        debug_assert!(!self.status.is_terminal(), "job already terminal");
        tracing::debug!(job_id = %self.id, from = ?self.status, to = ?next, "job state transition");
        self.status = next;
    }
}

/// Terminal result of a job. Soft failures (extraction ran but the mandatory
/// field was missing) carry the partial mapping; hard failures carry only
/// the cause.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobOutcome {
    Succeeded { data: ExtractionResult },
    SoftFailed { message: String, data: ExtractionResult },
    HardFailed { error: String },
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded { .. })
    }
}
