//! Error taxonomy for plan execution
//!
//! Every failure inside the engine converges to a [`StandardizedError`]
//! before being recorded on an execution result. The taxonomy is fixed:
//! downstream consumers (response formatters, monitoring) match on
//! [`ErrorType`], never on message text.

use serde::{Deserialize, Serialize};

/// Fixed classification for every failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Schema document missing, operation not found, or schema
    /// structurally insufficient for the operation.
    SwaggerError,
    /// The text-generation backend produced unparsable or malformed
    /// parameter output.
    ParameterGenerationError,
    /// The HTTP call completed with a status outside [200,299].
    HttpRequestError,
    /// A required path parameter was missing before dispatch.
    ValidationError,
    /// The user-supplied information was insufficient to fill the
    /// endpoint's inputs.
    InsufficientData,
    /// Transport failure or any error not covered above.
    UnknownError,
}

impl ErrorType {
    /// Stable wire name, identical to the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::SwaggerError => "SWAGGER_ERROR",
            ErrorType::ParameterGenerationError => "PARAMETER_GENERATION_ERROR",
            ErrorType::HttpRequestError => "HTTP_REQUEST_ERROR",
            ErrorType::ValidationError => "VALIDATION_ERROR",
            ErrorType::InsufficientData => "INSUFFICIENT_DATA",
            ErrorType::UnknownError => "UNKNOWN_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized shape every failure path converges to before being
/// recorded on an `ExecutionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardizedError {
    pub error_type: ErrorType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
}

impl StandardizedError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
            step: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn at_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }
}

impl std::fmt::Display for StandardizedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}
