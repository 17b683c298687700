//! Per-step parameter generation
//!
//! Combines the resolved schema, the user's request, and prior step
//! outcomes into a single prompt, asks the backend to decide whether it
//! has enough to proceed, and parses the reply into a
//! [`ParameterGeneration`]. Nothing here returns an error: a backend
//! failure or an unparsable reply becomes the `Error` status so the
//! executor can classify it, never a propagated exception.

use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::llm::{extract_json_object, strip_code_fence, ChatMessage, TextGenerator};
use crate::schema::ResolvedSchema;
use crate::types::{ExecutionResult, ParameterGeneration, ParameterLocation, ParameterValue, PlanStep};

/// Explicit marker used when a step has no predecessors. Downstream
/// prompts must not imply "first call" via blankness.
const NO_PRIOR_RESULTS: &str = "No prior step results.";

const INSTRUCTIONS: &str = "\
You fill in concrete parameter values for one HTTP API call.

First decide a status:
- \"SUCCESS\": the user request and prior step results contain enough \
information to fill every required input.
- \"INSUFFICIENT_DATA\": a structurally required input was never \
supplied by the user and cannot be inferred from prior results.
- \"INSUFFICIENT_SCHEMA\": the operation clearly requires a request \
body but the body schema above defines no fields.

Rules for identifiers:
- Identifiers of existing resources (ids in the path or body) must come \
only from the user request or prior step results. If none is available, \
answer INSUFFICIENT_DATA.
- Never invent server-generated identifiers.
- Non-identifying tokens (idempotency keys, client references) may be \
synthesized.

Reply with a single JSON object, no prose:
{\"status\": \"SUCCESS\", \"parameters\": [{\"name\": \"...\", \
\"value\": ..., \"location\": \"query|path|header\"}], \"body\": {...}}
or
{\"status\": \"INSUFFICIENT_DATA\" | \"INSUFFICIENT_SCHEMA\", \
\"message\": \"what is missing\"}
Parameter values must be scalars (string, number, boolean). Omit \
\"body\" when the operation takes none.";

#[derive(Deserialize)]
struct GeneratedPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    parameters: Vec<RawParameter>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawParameter {
    name: String,
    value: serde_json::Value,
    location: ParameterLocation,
}

pub struct ParameterGenerator {
    backend: Arc<dyn TextGenerator>,
}

impl ParameterGenerator {
    pub fn new(backend: Arc<dyn TextGenerator>) -> Self {
        Self { backend }
    }

    /// Produce parameter values for one step. Infallible by contract:
    /// every failure mode maps to a non-success status.
    pub async fn generate(
        &self,
        step: &PlanStep,
        schema: &ResolvedSchema,
        user_prompt: &str,
        prior: &[ExecutionResult],
    ) -> ParameterGeneration {
        let messages = [
            ChatMessage::system(INSTRUCTIONS),
            ChatMessage::user(format!(
                "Endpoint: {} {}\nDescription: {}\n\n{}\nUser request:\n{}\n\nPrior step results:\n{}",
                step.method,
                step.path_template,
                step.description,
                schema.render_for_prompt(),
                user_prompt,
                summarize_prior_results(prior),
            )),
        ];

        let response = match self.backend.generate(&messages).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("Parameter generation backend call failed: {}", e);
                return ParameterGeneration::Error {
                    message: format!("backend call failed: {}", e),
                };
            }
        };

        parse_generation_response(&response)
    }
}

/// Parse a backend reply, stripping an optional fenced code block
/// first. When the stripped text is not itself valid JSON, retries on
/// the outermost brace slice so that prose around the object does not
/// abort the step. A parse failure yields the `Error` status with the
/// parse message embedded.
pub fn parse_generation_response(response: &str) -> ParameterGeneration {
    let stripped = strip_code_fence(response);
    let payload: GeneratedPayload = match serde_json::from_str(stripped) {
        Ok(payload) => payload,
        Err(e) => match serde_json::from_str(extract_json_object(stripped)) {
            Ok(payload) => payload,
            Err(_) => {
                return ParameterGeneration::Error {
                    message: format!("failed to parse generation response: {}", e),
                }
            }
        },
    };

    let message = payload.message.unwrap_or_default();
    match payload.status.as_str() {
        "SUCCESS" => {
            let mut parameters = Vec::with_capacity(payload.parameters.len());
            for raw in payload.parameters {
                if !is_scalar(&raw.value) {
                    return ParameterGeneration::Error {
                        message: format!("non-scalar value for parameter '{}'", raw.name),
                    };
                }
                parameters.push(ParameterValue {
                    name: raw.name,
                    value: raw.value,
                    location: raw.location,
                });
            }
            ParameterGeneration::Success {
                parameters,
                body: payload.body,
            }
        }
        "INSUFFICIENT_DATA" => ParameterGeneration::InsufficientData { message },
        "INSUFFICIENT_SCHEMA" => ParameterGeneration::InsufficientSchema { message },
        "ERROR" => ParameterGeneration::Error { message },
        other => ParameterGeneration::Error {
            message: format!("unrecognized generation status '{}'", other),
        },
    }
}

fn is_scalar(value: &serde_json::Value) -> bool {
    matches!(
        value,
        serde_json::Value::String(_) | serde_json::Value::Number(_) | serde_json::Value::Bool(_)
    )
}

/// Textual summary of all prior steps, one line per step plus its
/// serialized response body.
pub fn summarize_prior_results(prior: &[ExecutionResult]) -> String {
    if prior.is_empty() {
        return NO_PRIOR_RESULTS.to_string();
    }
    let mut out = String::new();
    for result in prior {
        let outcome = if result.success { "success" } else { "failure" };
        let _ = writeln!(
            out,
            "step {}: {} {} -> {}",
            result.step, result.method, result.endpoint, outcome
        );
        if let Some(response) = &result.response {
            let _ = writeln!(out, "  response: {}", response);
        }
        if let Some(error) = &result.error {
            let _ = writeln!(out, "  error: {}", error);
        }
    }
    out
}
