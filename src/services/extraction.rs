use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::job::{DocumentType, ExtractionResult};

/// Capability contract for the field-extraction backend.
///
/// The backend is consumed through this narrow interface so the orchestrator
/// never depends on a concrete engine; tests inject a fake. Dispatch by
/// document type is a pure lookup — the document types are a closed enum, so
/// unsupported types never reach this layer.
#[async_trait]
pub trait ExtractionBackend: Send + Sync {
    async fn extract(
        &self,
        image: &[u8],
        document_type: DocumentType,
    ) -> Result<ExtractionResult, ExtractionError>;
}

/// Client for an HTTP document extraction engine (a sequence-generation
/// vision model behind an inference endpoint). The engine receives the
/// image and a document-type task prompt and returns generated text that is
/// usually, but not always, JSON-shaped.
pub struct EngineClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
struct EngineRequest<'a> {
    image: String,
    task: &'a str,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct EngineResponse {
    output: String,
}

impl EngineClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            // No overall timeout: extraction is deliberately unbounded.
            http: Client::new(),
            base_url: base_url.into(),
            api_token,
        }
    }

    /// Task prompt for the engine, selected per document type.
    fn task_prompt(document_type: DocumentType) -> &'static str {
        match document_type {
            DocumentType::DrivingLicense => "<s_driving_license>",
            DocumentType::Pan => "<s_pan>",
            DocumentType::Aadhaar => "<s_aadhaar>",
        }
    }
}

#[async_trait]
impl ExtractionBackend for EngineClient {
    async fn extract(
        &self,
        image: &[u8],
        document_type: DocumentType,
    ) -> Result<ExtractionResult, ExtractionError> {
        let url = format!("{}/v1/extract", self.base_url.trim_end_matches('/'));
        let body = EngineRequest {
            image: base64::engine::general_purpose::STANDARD.encode(image),
            task: Self::task_prompt(document_type),
            max_tokens: 1024,
        };

        let mut request = self.http.post(&url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ExtractionError::Engine(format!(
                "extraction engine returned status {}",
                response.status()
            )));
        }

        let engine: EngineResponse = response.json().await?;
        Ok(decode_fields(&engine.output))
    }
}

/// Decode generated engine text into a field mapping.
///
/// JSON objects are flattened to string values (non-string values are
/// rendered with their JSON representation); anything that is not a JSON
/// object falls back to `{"raw": <text>}` so downstream validation still
/// sees a mapping.
pub fn decode_fields(output: &str) -> ExtractionResult {
    let trimmed = output.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(trimmed) {
        return map
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();
    }
    let mut fallback = ExtractionResult::new();
    fallback.insert("raw".to_string(), trimmed.to_string());
    fallback
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("extraction request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Engine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_object_becomes_field_mapping() {
        let fields = decode_fields(r#"{"Pan Number": "ABCDE1234F", "Name": "A PERSON"}"#);
        assert_eq!(fields.get("Pan Number").unwrap(), "ABCDE1234F");
        assert_eq!(fields.get("Name").unwrap(), "A PERSON");
    }

    #[test]
    fn non_string_values_are_stringified() {
        let fields = decode_fields(r#"{"Aadhaar Number": 123412341234, "Verified": true}"#);
        assert_eq!(fields.get("Aadhaar Number").unwrap(), "123412341234");
        assert_eq!(fields.get("Verified").unwrap(), "true");
    }

    #[test]
    fn non_json_output_falls_back_to_raw() {
        let fields = decode_fields("DL-1420110012345 JOHN DOE");
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("raw").unwrap(), "DL-1420110012345 JOHN DOE");
    }

    #[test]
    fn json_array_is_not_a_mapping() {
        let fields = decode_fields(r#"["a", "b"]"#);
        assert!(fields.contains_key("raw"));
    }

    #[test]
    fn each_document_type_has_a_task_prompt() {
        for doc in [
            DocumentType::DrivingLicense,
            DocumentType::Pan,
            DocumentType::Aadhaar,
        ] {
            assert!(!EngineClient::task_prompt(doc).is_empty());
        }
    }
}
