use kube::{core::ErrorResponse, Error as KubeError};
use serde_json::{json, Value};

pub const NOT_FOUND_CODE: u16 = 404;
pub const CONFLICT_CODE: u16 = 409;
pub const ALREADY_EXISTS_REASON: &str = "AlreadyExists";

pub fn api_error_response(error: &KubeError) -> Option<&ErrorResponse> {
    match error {
        KubeError::Api(response) => Some(response),
        _ => None,
    }
}

pub fn is_not_found(error: &KubeError) -> bool {
    api_error_response(error).is_some_and(|response| response.code == NOT_FOUND_CODE)
}

pub fn is_already_exists(error: &KubeError) -> bool {
    api_error_response(error).is_some_and(|response| {
        response.code == CONFLICT_CODE && response.reason == ALREADY_EXISTS_REASON
    })
}

pub fn is_conflict(error: &KubeError) -> bool {
    api_error_response(error).is_some_and(|response| {
        response.code == CONFLICT_CODE && response.reason != ALREADY_EXISTS_REASON
    })
}

/// Merge patch touching only the pod CIDR fields of a node.
pub fn node_cidr_patch(cidr: &str) -> Value {
    json!({
        "spec": {
            "podCIDR": cidr,
            "podCIDRs": [cidr],
        }
    })
}

#[cfg(test)]
mod tests {
    use kube::{core::ErrorResponse, Error as KubeError};
    use serde_json::json;

    use super::{is_already_exists, is_conflict, is_not_found, node_cidr_patch};

    fn api_error(code: u16, reason: &str) -> KubeError {
        KubeError::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: "test".to_owned(),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn api_errors_are_classified_by_code_and_reason() {
        assert!(is_not_found(&api_error(404, "NotFound")));
        assert!(is_already_exists(&api_error(409, "AlreadyExists")));
        assert!(is_conflict(&api_error(409, "Conflict")));
        assert!(!is_conflict(&api_error(409, "AlreadyExists")));
        assert!(!is_not_found(&api_error(500, "InternalError")));
    }

    #[test]
    fn node_patch_only_contains_cidr_fields() {
        assert_eq!(
            node_cidr_patch("10.0.1.0/24"),
            json!({"spec": {"podCIDR": "10.0.1.0/24", "podCIDRs": ["10.0.1.0/24"]}})
        );
    }
}
