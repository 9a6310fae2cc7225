use crate::models::job::{DocumentType, ExtractionResult};

/// Outcome of the mandatory-field check for one extraction result.
#[derive(Debug, Clone)]
pub struct FieldCheck {
    /// True iff the mandatory field was found with a non-blank value.
    pub usable: bool,
    /// The result key that satisfied an alias, when usable.
    pub matched_key: Option<String>,
    /// Human-readable cause when not usable.
    pub reason: Option<String>,
}

/// Acceptable spellings of "the field that proves extraction worked", per
/// document type. Engines and engine versions disagree on key names, so the
/// check is an alias table rather than a single canonical key.
pub fn key_aliases(document_type: DocumentType) -> &'static [&'static str] {
    match document_type {
        DocumentType::DrivingLicense => &[
            "driving licence number",
            "driving license number",
            "licence number",
            "license number",
            "license_number",
            "dl number",
            "dl_number",
        ],
        DocumentType::Pan => &[
            "pan number",
            "pan_number",
            "pan no",
            "permanent account number",
        ],
        DocumentType::Aadhaar => &[
            "aadhaar number",
            "aadhaar_number",
            "aadhar number",
            "uid number",
        ],
    }
}

/// Decide whether an extraction result is usable for the given document
/// type: at least one alias must equal, or be contained in, a present key
/// (ASCII-case-insensitively) whose value is non-blank.
pub fn validate(document_type: DocumentType, result: &ExtractionResult) -> FieldCheck {
    for (key, value) in result {
        if value.trim().is_empty() {
            continue;
        }
        let key_lower = key.to_ascii_lowercase();
        for alias in key_aliases(document_type) {
            if key_lower == *alias || key_lower.contains(alias) {
                return FieldCheck {
                    usable: true,
                    matched_key: Some(key.clone()),
                    reason: None,
                };
            }
        }
    }

    FieldCheck {
        usable: false,
        matched_key: None,
        reason: Some(format!(
            "Could not verify {document_type}: number field missing or empty. Image might be blurry."
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn result_of(pairs: &[(&str, &str)]) -> ExtractionResult {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>()
    }

    #[test]
    fn canonical_key_accepted() {
        let result = result_of(&[("Driving Licence Number", "DL-1420110012345")]);
        let check = validate(DocumentType::DrivingLicense, &result);
        assert!(check.usable);
        assert_eq!(check.matched_key.as_deref(), Some("Driving Licence Number"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let result = result_of(&[("PAN NUMBER", "ABCDE1234F")]);
        assert!(validate(DocumentType::Pan, &result).usable);
    }

    #[test]
    fn alias_contained_in_longer_key_matches() {
        let result = result_of(&[("extracted driving licence number (front)", "DL-99")]);
        assert!(validate(DocumentType::DrivingLicense, &result).usable);
    }

    #[test]
    fn snake_case_engine_spelling_matches() {
        let result = result_of(&[("license_number", "KA01 20200012345")]);
        assert!(validate(DocumentType::DrivingLicense, &result).usable);
    }

    #[test]
    fn empty_values_rejected() {
        let result = result_of(&[("Pan Number", ""), ("pan_number", "   ")]);
        let check = validate(DocumentType::Pan, &result);
        assert!(!check.usable);
        assert!(check.reason.unwrap().contains("PAN"));
    }

    #[test]
    fn empty_result_rejected_with_reason() {
        let check = validate(DocumentType::Aadhaar, &BTreeMap::new());
        assert!(!check.usable);
        assert!(check.reason.unwrap().contains("AADHAAR"));
    }

    #[test]
    fn wrong_document_field_rejected() {
        let result = result_of(&[("Pan Number", "ABCDE1234F")]);
        assert!(!validate(DocumentType::Aadhaar, &result).usable);
    }
}
