use serde::{Deserialize, Serialize};

use super::Recordable;
use crate::client::ApiError;
use crate::constants::{RECORD_PARTIAL_ERRORS, RECORD_WARNING};

/// Errors the platform returned next to otherwise usable data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialErrors {
    pub operation: String,
    pub errors: Vec<ApiError>,
}

impl Recordable for PartialErrors {
    const RECORD_TYPE: &'static str = RECORD_PARTIAL_ERRORS;
}

/// A non-fatal condition worth surfacing in the report, e.g. a source rule
/// that could not resolve its anchor account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// Config path of the rule that raised the warning.
    pub source: String,
    pub message: String,
}

impl Recordable for Warning {
    const RECORD_TYPE: &'static str = RECORD_WARNING;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_errors_round_trip() {
        let original = PartialErrors {
            operation: "get_users_by_handles".into(),
            errors: vec![ApiError {
                title: "Not Found Error".into(),
                detail: "Could not find user with usernames: [nobody].".into(),
                value: Some("nobody".into()),
                resource_type: Some("user".into()),
                parameter: Some("usernames".into()),
            }],
        };
        let record = original.to_record().unwrap();
        assert_eq!(record.kind, "partial_errors");
        assert_eq!(PartialErrors::from_record(&record).unwrap(), original);
    }

    #[test]
    fn test_warning_round_trip() {
        let original = Warning {
            source: "plans[0].from[0]".into(),
            message: "follower u9 not found".into(),
        };
        let record = original.to_record().unwrap();
        assert_eq!(Warning::from_record(&record).unwrap(), original);
    }
}
