//! Shared API envelope types

use serde::Serialize;

/// Response envelope for every mutating operation: `{success, error?}`
/// plus a call-specific payload flattened in on success. Mutating calls
/// never surface transport-level errors.
#[derive(Debug, Serialize)]
pub struct MutationResponse<T: Serialize = ()> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl MutationResponse<()> {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            payload: None,
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            payload: None,
        }
    }
}

impl<T: Serialize> MutationResponse<T> {
    pub fn with_payload(payload: T) -> Self {
        Self {
            success: true,
            error: None,
            payload: Some(payload),
        }
    }

    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope_shape() {
        let json = serde_json::to_value(MutationResponse::ok()).unwrap();
        assert_eq!(json, serde_json::json!({"success": true}));
    }

    #[test]
    fn test_failure_envelope_shape() {
        let json = serde_json::to_value(MutationResponse::failure("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "boom"}));
    }

    #[test]
    fn test_payload_is_flattened() {
        #[derive(Serialize)]
        struct Payload {
            count: u32,
        }
        let json =
            serde_json::to_value(MutationResponse::with_payload(Payload { count: 3 })).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "count": 3}));
    }
}
