//! Step execution and plan running
//!
//! [`StepExecutor`] takes one plan step and its generated parameters
//! through `GENERATE_PARAMS -> VALIDATE -> DISPATCH -> RECORD`,
//! terminal on any non-success outcome. [`PlanRunner`] drives the
//! executor across the ordered steps, fail-fast: once a step fails, no
//! later step is attempted, because later steps' prompts assume all
//! prior steps succeeded.

use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{ErrorType, StandardizedError};
use crate::generator::ParameterGenerator;
use crate::schema::SchemaResolver;
use crate::types::{
    ExecutionResult, ParameterGeneration, ParameterLocation, ParameterValue, PlanStep,
};

lazy_static! {
    static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{([A-Za-z0-9_\-]+)\}").expect("valid regex");
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Failed to create HTTP client: {0}")]
    ClientBuild(String),
}

/// Every `{name}` placeholder in a path template, in order.
pub fn extract_placeholders(template: &str) -> Vec<String> {
    PLACEHOLDER_RE
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Assemble the dispatch URL: path placeholders substituted literally,
/// query parameters percent-encoded and appended. Placeholder names are
/// unique within a path, so substitution order does not matter.
pub fn build_request_url(step: &PlanStep, parameters: &[ParameterValue]) -> String {
    let mut path = step.path_template.clone();
    for param in parameters
        .iter()
        .filter(|p| p.location == ParameterLocation::Path)
    {
        path = path.replace(&format!("{{{}}}", param.name), &param.value_as_string());
    }

    let query: Vec<String> = parameters
        .iter()
        .filter(|p| p.location == ParameterLocation::Query)
        .map(|p| {
            format!(
                "{}={}",
                urlencoding::encode(&p.name),
                urlencoding::encode(&p.value_as_string())
            )
        })
        .collect();

    let mut url = format!("{}{}", step.base_url.trim_end_matches('/'), path);
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query.join("&"));
    }
    url
}

/// Validates generated parameters against the step and issues the HTTP
/// call.
pub struct StepExecutor {
    client: reqwest::Client,
}

impl StepExecutor {
    pub fn new(timeout: Duration) -> Result<Self, ExecutorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecutorError::ClientBuild(e.to_string()))?;
        Ok(Self { client })
    }

    /// Run one step to a recorded result. Never returns an error: every
    /// failure mode is classified onto the result.
    pub async fn execute(&self, step: &PlanStep, generation: ParameterGeneration) -> ExecutionResult {
        // Short-circuit non-success generation statuses; no HTTP call is
        // made for these.
        let (parameters, body) = match generation {
            ParameterGeneration::Success { parameters, body } => (parameters, body),
            ParameterGeneration::InsufficientData { message } => {
                return ExecutionResult::failed(
                    step,
                    StandardizedError::new(ErrorType::InsufficientData, message).at_step(step.step),
                )
            }
            ParameterGeneration::InsufficientSchema { message } => {
                return ExecutionResult::failed(
                    step,
                    StandardizedError::new(ErrorType::SwaggerError, message).at_step(step.step),
                )
            }
            ParameterGeneration::Error { message } => {
                return ExecutionResult::failed(
                    step,
                    StandardizedError::new(ErrorType::ParameterGenerationError, message)
                        .at_step(step.step),
                )
            }
        };

        // An unresolved {placeholder} must never go over the wire.
        for placeholder in extract_placeholders(&step.path_template) {
            let provided = parameters.iter().any(|p| {
                p.location == ParameterLocation::Path && p.name == placeholder
            });
            if !provided {
                return ExecutionResult::failed_with_request(
                    step,
                    parameters,
                    body,
                    StandardizedError::new(
                        ErrorType::ValidationError,
                        format!("missing required path parameter '{}'", placeholder),
                    )
                    .with_details(serde_json::json!({ "placeholder": placeholder }))
                    .at_step(step.step),
                );
            }
        }

        // A malformed registry method must not be silently rewritten to
        // another verb.
        let method = match reqwest::Method::from_bytes(step.method.as_bytes()) {
            Ok(method) => method,
            Err(_) => {
                return ExecutionResult::failed_with_request(
                    step,
                    parameters,
                    body,
                    StandardizedError::new(
                        ErrorType::ValidationError,
                        format!("invalid HTTP method '{}'", step.method),
                    )
                    .at_step(step.step),
                )
            }
        };

        let url = build_request_url(step, &parameters);
        log::debug!("Dispatching step {}: {} {}", step.step, method, url);

        let mut request = self.client.request(method, url);
        for param in parameters
            .iter()
            .filter(|p| p.location == ParameterLocation::Header)
        {
            request = request.header(&param.name, param.value_as_string());
        }
        if let Some(body_value) = &body {
            request = request.json(body_value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            // Transport failure without a response is fatal for the
            // step; an error status WITH a response is a completed call
            // handled below.
            Err(e) => {
                return ExecutionResult::failed_with_request(
                    step,
                    parameters,
                    body,
                    StandardizedError::new(
                        ErrorType::UnknownError,
                        format!("request dispatch failed: {}", e),
                    )
                    .at_step(step.step),
                )
            }
        };

        let status = response.status().as_u16();
        let response_body = response.text().await.unwrap_or_default();
        let success = (200..=299).contains(&status);
        let error = if success {
            None
        } else {
            Some(format!("HTTP {}: {}", status, response_body))
        };
        ExecutionResult::completed(step, parameters, body, status, response_body, success, error)
    }
}

/// Drives the executor across an ordered plan, accumulating results.
pub struct PlanRunner {
    resolver: Arc<SchemaResolver>,
    generator: ParameterGenerator,
    executor: StepExecutor,
}

impl PlanRunner {
    pub fn new(
        resolver: Arc<SchemaResolver>,
        generator: ParameterGenerator,
        executor: StepExecutor,
    ) -> Self {
        Self {
            resolver,
            generator,
            executor,
        }
    }

    /// Execute the plan strictly in step order, stopping at the first
    /// failed result. The returned list is always a prefix of the plan:
    /// no gaps, no reordering, and nothing after a failure.
    pub async fn run(&self, plan: &[PlanStep], user_prompt: &str) -> Vec<ExecutionResult> {
        let mut results: Vec<ExecutionResult> = Vec::with_capacity(plan.len());
        for step in plan {
            let result = match self
                .resolver
                .resolve(&step.schema_locator, &step.path_template, &step.method)
                .await
            {
                Ok(schema) => {
                    let generation = self
                        .generator
                        .generate(step, &schema, user_prompt, &results)
                        .await;
                    self.executor.execute(step, generation).await
                }
                Err(e) => ExecutionResult::failed(
                    step,
                    StandardizedError::new(ErrorType::SwaggerError, e.to_string())
                        .at_step(step.step),
                ),
            };

            let failed = !result.success;
            if failed {
                log::info!(
                    "Plan run stopped at step {}: {}",
                    step.step,
                    result.error.as_deref().unwrap_or("unknown failure")
                );
            }
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }
}
