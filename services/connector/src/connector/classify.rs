//! Creation Failure Classifier
//!
//! Decides whether a failed seed creation is a known per-seed rejection
//! (the run continues) or something the run must stop on.

use serde::Deserialize;
use thiserror::Error;

use crate::inventory::ApiError;

/// Status the inventory answers with when it refuses a particular seed
const BAD_REQUEST: u16 = 400;

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("error body is not a json object with a code: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("error body has no code")]
    MissingCode,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
}

/// Extract the machine-readable `code` from an error response body
pub fn error_code(body: &[u8]) -> Result<String, ClassifyError> {
    let parsed: ErrorBody = serde_json::from_slice(body)?;
    match parsed.code {
        Some(code) if !code.is_empty() => Ok(code),
        _ => Err(ClassifyError::MissingCode),
    }
}

/// How a failed creation should be handled
#[derive(Debug)]
pub enum CreateFailure {
    /// The inventory refused this seed with the given code
    Rejected { code: String },
    /// Anything else; the run aborts
    Fatal(Option<ClassifyError>),
}

/// Classify a creation error returned by the inventory client
pub fn classify_create_failure(err: &ApiError) -> CreateFailure {
    match err {
        ApiError::Status { status, body } if *status == BAD_REQUEST => match error_code(body) {
            Ok(code) => CreateFailure::Rejected { code },
            Err(e) => CreateFailure::Fatal(Some(e)),
        },
        _ => CreateFailure::Fatal(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bad_request(body: &str) -> ApiError {
        ApiError::Status {
            status: 400,
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_error_code_extracted() {
        assert_eq!(error_code(br#"{"code":"ERR123","message":"bad seed"}"#).unwrap(), "ERR123");
    }

    #[test]
    fn test_error_code_missing_or_empty() {
        assert!(matches!(error_code(b"{}"), Err(ClassifyError::MissingCode)));
        assert!(matches!(error_code(br#"{"code":""}"#), Err(ClassifyError::MissingCode)));
        assert!(matches!(error_code(b"<html>oops</html>"), Err(ClassifyError::Decode(_))));
        assert!(matches!(error_code(b""), Err(ClassifyError::Decode(_))));
    }

    #[test]
    fn test_bad_request_with_code_is_rejected() {
        match classify_create_failure(&bad_request(r#"{"code":"ERR123"}"#)) {
            CreateFailure::Rejected { code } => assert_eq!(code, "ERR123"),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_request_without_code_is_fatal() {
        assert!(matches!(
            classify_create_failure(&bad_request("{}")),
            CreateFailure::Fatal(Some(ClassifyError::MissingCode))
        ));
    }

    #[test]
    fn test_other_statuses_and_transport_are_fatal() {
        let conflict = ApiError::Status {
            status: 409,
            body: br#"{"code":"EXISTS"}"#.to_vec(),
        };
        assert!(matches!(classify_create_failure(&conflict), CreateFailure::Fatal(None)));
        assert!(matches!(
            classify_create_failure(&ApiError::Transport("timed out".into())),
            CreateFailure::Fatal(None)
        ));
        assert!(matches!(
            classify_create_failure(&ApiError::Decode("eof".into())),
            CreateFailure::Fatal(None)
        ));
    }
}
