//! Core data types shared across the planning and execution pipeline
//!
//! All of these are created and discarded within a single request: the
//! plan is built once, read-only afterwards, and the accumulated
//! [`ExecutionResult`] list is the sole durable output of a run.

use serde::{Deserialize, Serialize};

use crate::error::{ErrorType, StandardizedError};

/// Where a generated parameter is applied on the outgoing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Query,
    Path,
    Header,
}

impl std::fmt::Display for ParameterLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParameterLocation::Query => f.write_str("query"),
            ParameterLocation::Path => f.write_str("path"),
            ParameterLocation::Header => f.write_str("header"),
        }
    }
}

/// One concrete parameter value produced by the parameter generator.
///
/// The value is restricted to scalars (string, number, boolean); the
/// generator rejects anything else before an instance is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub name: String,
    pub value: serde_json::Value,
    pub location: ParameterLocation,
}

impl ParameterValue {
    /// Render the scalar value without JSON string quoting, for use in
    /// URLs and headers.
    pub fn value_as_string(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One planned call to one registered endpoint.
///
/// Step numbers are 1-based and strictly increasing in plan order;
/// that order is the execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step: u32,
    pub endpoint_id: String,
    pub api_name: String,
    pub feature_name: String,
    pub method: String,
    pub path_template: String,
    pub base_url: String,
    pub schema_locator: String,
    pub description: String,
}

/// Outcome of asking the backend to materialize parameters for a step.
///
/// Exactly one variant holds at a time; parameters and body exist only
/// on success.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterGeneration {
    Success {
        parameters: Vec<ParameterValue>,
        body: Option<serde_json::Value>,
    },
    /// The user never supplied a structurally required input and it
    /// cannot be inferred from prior steps.
    InsufficientData { message: String },
    /// The registry schema is present but empty where the operation's
    /// semantics require a body; the failure belongs to the schema.
    InsufficientSchema { message: String },
    /// The backend response was unparsable or malformed.
    Error { message: String },
}

impl ParameterGeneration {
    pub fn is_success(&self) -> bool {
        matches!(self, ParameterGeneration::Success { .. })
    }
}

/// Record of one executed (or short-circuited) step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub step: u32,
    pub endpoint: String,
    pub method: String,
    pub request_parameters: Vec<ParameterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_status: Option<u16>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<serde_json::Value>,
}

impl ExecutionResult {
    /// A completed HTTP call; `success` follows the [200,299] predicate
    /// applied by the executor, not recomputed here.
    pub fn completed(
        step: &PlanStep,
        parameters: Vec<ParameterValue>,
        body: Option<serde_json::Value>,
        status: u16,
        response: String,
        success: bool,
        error: Option<String>,
    ) -> Self {
        Self {
            step: step.step,
            endpoint: step.path_template.clone(),
            method: step.method.clone(),
            request_parameters: parameters,
            request_body: body,
            response: Some(response),
            response_status: Some(status),
            success,
            error,
            error_type: if success {
                None
            } else {
                Some(ErrorType::HttpRequestError)
            },
            error_details: None,
        }
    }

    /// A step that failed before its request was assembled; nothing to
    /// echo.
    pub fn failed(step: &PlanStep, error: StandardizedError) -> Self {
        Self::failed_with_request(step, Vec::new(), None, error)
    }

    /// A step that failed after parameters were generated; the request
    /// that would have been (or was) sent is echoed for diagnosis.
    pub fn failed_with_request(
        step: &PlanStep,
        parameters: Vec<ParameterValue>,
        body: Option<serde_json::Value>,
        error: StandardizedError,
    ) -> Self {
        Self {
            step: step.step,
            endpoint: step.path_template.clone(),
            method: step.method.clone(),
            request_parameters: parameters,
            request_body: body,
            response: None,
            response_status: None,
            success: false,
            error: Some(error.message),
            error_type: Some(error.error_type),
            error_details: error.details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> PlanStep {
        PlanStep {
            step: 1,
            endpoint_id: "ep-1".to_string(),
            api_name: "petstore".to_string(),
            feature_name: "pets".to_string(),
            method: "GET".to_string(),
            path_template: "/pets/{petId}".to_string(),
            base_url: "http://localhost:1".to_string(),
            schema_locator: "http://localhost:1/openapi.json".to_string(),
            description: "Fetch one pet".to_string(),
        }
    }

    #[test]
    fn test_value_as_string_strips_json_quoting() {
        let p = ParameterValue {
            name: "id".to_string(),
            value: serde_json::json!("123"),
            location: ParameterLocation::Path,
        };
        assert_eq!(p.value_as_string(), "123");

        let p = ParameterValue {
            name: "limit".to_string(),
            value: serde_json::json!(20),
            location: ParameterLocation::Query,
        };
        assert_eq!(p.value_as_string(), "20");
    }

    #[test]
    fn test_failed_result_carries_taxonomy() {
        let err = StandardizedError::new(ErrorType::InsufficientData, "missing owner");
        let result = ExecutionResult::failed(&step(), err);
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ErrorType::InsufficientData));
        assert_eq!(result.error.as_deref(), Some("missing owner"));
        assert!(result.response.is_none());
    }

    #[test]
    fn test_completed_result_failure_is_http_error() {
        let result = ExecutionResult::completed(
            &step(),
            vec![],
            None,
            503,
            "busy".to_string(),
            false,
            Some("HTTP 503: busy".to_string()),
        );
        assert_eq!(result.error_type, Some(ErrorType::HttpRequestError));
        assert_eq!(result.response_status, Some(503));
    }
}
