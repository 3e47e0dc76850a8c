//! Request parameter validation. Failures map to HTTP 400 with a
//! `{param, reason}` body and run before any store is touched.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use spyglass_core::api::FilterError;
use spyglass_core::SourceId;

/// A request parameter failed validation.
#[derive(Debug, Clone, Serialize, Error)]
#[error("{reason}")]
pub struct ValidationError {
    pub param: String,
    pub reason: String,
}

impl ValidationError {
    pub fn missing_param(key: &str) -> Self {
        Self {
            param: key.to_string(),
            reason: format!("query parameter {key} is missing"),
        }
    }

    pub fn empty_param(key: &str) -> Self {
        Self {
            param: key.to_string(),
            reason: format!("query parameter {key} is empty"),
        }
    }

    pub fn query_too_short() -> Self {
        Self {
            param: "q".to_string(),
            reason: "the query is too short".to_string(),
        }
    }

    pub fn query_incomplete() -> Self {
        Self {
            param: "q".to_string(),
            reason: "a prefix query must contain at least a '.' or ':'".to_string(),
        }
    }
}

impl From<FilterError> for ValidationError {
    fn from(err: FilterError) -> Self {
        Self {
            param: err.param.clone(),
            reason: err.to_string(),
        }
    }
}

/// Fetch a required, non-empty query parameter.
pub fn validate_query_string(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<String, ValidationError> {
    match params.get(key) {
        None => Err(ValidationError::missing_param(key)),
        Some(value) if value.is_empty() => Err(ValidationError::empty_param(key)),
        Some(value) => Ok(value.clone()),
    }
}

/// A prefix query needs at least two characters, and a `.` or `:` unless
/// it is an AS lookup (`AS64501`).
pub fn validate_prefix_query(value: &str) -> Result<&str, ValidationError> {
    if value.len() < 2 {
        return Err(ValidationError::query_too_short());
    }
    if !value.to_lowercase().starts_with("as")
        && !value.contains(':')
        && !value.contains('.')
    {
        return Err(ValidationError::query_incomplete());
    }
    Ok(value)
}

/// Validate a source ID path parameter before it reaches the stores.
pub fn validate_source_id(raw: &str) -> Result<SourceId, ValidationError> {
    SourceId::try_from(raw).map_err(|err| ValidationError {
        param: "id".to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_parameters_are_enforced() {
        let mut params = HashMap::new();
        assert!(validate_query_string(&params, "q").is_err());

        params.insert("q".to_string(), String::new());
        assert!(validate_query_string(&params, "q").is_err());

        params.insert("q".to_string(), "10.0.0.0/24".to_string());
        assert_eq!(validate_query_string(&params, "q").unwrap(), "10.0.0.0/24");
    }

    #[test]
    fn prefix_queries_need_length_and_separators() {
        assert_eq!(
            validate_prefix_query("a").unwrap_err().reason,
            "the query is too short"
        );
        assert!(validate_prefix_query("foo").is_err());
        assert!(validate_prefix_query("10.0.0").is_ok());
        assert!(validate_prefix_query("AS64501").is_ok());
    }

    #[test]
    fn source_ids_are_length_capped() {
        assert!(validate_source_id(&"x".repeat(43)).is_err());
        assert!(validate_source_id("rs1").is_ok());
    }
}
