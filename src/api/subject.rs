use axum::http::HeaderMap;
use std::fmt;

/// Header carrying the authenticated caller's subject id.
///
/// The host application authenticates its users and forwards the id; this
/// service only scopes credentials, windows and cache entries by it.
pub const SUBJECT_HEADER: &str = "x-subject-id";

/// Extract the subject id from request headers.
pub fn extract_subject(headers: &HeaderMap) -> Result<String, SubjectError> {
    let value = headers
        .get(SUBJECT_HEADER)
        .ok_or(SubjectError::Missing)?
        .to_str()
        .map_err(|_| SubjectError::InvalidFormat)?;

    let subject = value.trim();
    if subject.is_empty() {
        return Err(SubjectError::Empty);
    }
    if subject.chars().any(char::is_whitespace) {
        return Err(SubjectError::InvalidFormat);
    }

    Ok(subject.to_string())
}

/// Subject extraction errors
#[derive(Debug, PartialEq, Clone)]
pub enum SubjectError {
    /// Header not present
    Missing,
    /// Not visible ASCII, or contains whitespace
    InvalidFormat,
    Empty,
}

impl fmt::Display for SubjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectError::Missing => write!(f, "missing {} header", SUBJECT_HEADER),
            SubjectError::InvalidFormat => write!(f, "malformed {} header", SUBJECT_HEADER),
            SubjectError::Empty => write!(f, "empty {} header", SUBJECT_HEADER),
        }
    }
}

impl std::error::Error for SubjectError {}
