//! Three-stage plan builder
//!
//! Turns a user request into an ordered list of [`PlanStep`]s by three
//! prompt-and-parse round trips against the text-generation backend:
//! choose relevant APIs, choose relevant features within them, then
//! choose and order concrete endpoints. Each stage feeds the next a
//! strictly smaller candidate set; a stage never expands what it was
//! given.
//!
//! Model output is never trusted as an identifier: every stage parses
//! optimistically and intersects the result with its known-valid id
//! set. Unknown ids are dropped, not fatal; an empty selection degrades
//! to an empty plan. Only a failure of the backend call itself fails
//! the build.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use crate::llm::{strip_code_fence, ChatMessage, LlmError, TextGenerator};
use crate::registry::{
    ApiSummary, EndpointDescriptor, EndpointRegistry, FeatureSummary, RegistryError,
};
use crate::types::PlanStep;

/// How many APIs the first stage asks the model to pick.
const MAX_SELECTED_APIS: usize = 3;

lazy_static! {
    /// Leading ordinal in a sequenced line: "1. ", "2) ", "3: ".
    static ref ORDINAL_RE: Regex = Regex::new(r"^\s*\d+\s*[.):\-]*\s*").expect("valid regex");
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Registry lookup failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Plan generation failed: {0}")]
    Llm(#[from] LlmError),
}

pub struct PlanBuilder {
    registry: Arc<dyn EndpointRegistry>,
    backend: Arc<dyn TextGenerator>,
}

impl PlanBuilder {
    pub fn new(registry: Arc<dyn EndpointRegistry>, backend: Arc<dyn TextGenerator>) -> Self {
        Self { registry, backend }
    }

    /// Build an ordered step plan for the user request. An empty plan
    /// means no HTTP call is needed; the caller decides what to do with
    /// that.
    pub async fn build_plan(&self, user_prompt: &str) -> Result<Vec<PlanStep>, PlanError> {
        let apis = self.select_apis(user_prompt).await?;
        if apis.is_empty() {
            log::debug!("No relevant APIs selected; returning empty plan");
            return Ok(Vec::new());
        }

        let features = self.select_features(user_prompt, &apis).await?;
        if features.is_empty() {
            log::debug!("No relevant features selected; returning empty plan");
            return Ok(Vec::new());
        }

        self.sequence_endpoints(user_prompt, &features).await
    }

    /// Stage 1: choose relevant APIs from everything registered.
    async fn select_apis(&self, user_prompt: &str) -> Result<Vec<ApiSummary>, PlanError> {
        let apis = self.registry.list_apis().await?;
        if apis.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = String::new();
        for api in &apis {
            let features = self.registry.list_features(&api.id).await?;
            let feature_names: Vec<&str> =
                features.iter().map(|f| f.name.as_str()).collect();
            let _ = writeln!(
                candidates,
                "- id: {}\n  name: {}\n  description: {}\n  base URL: {}\n  features: {}",
                api.id,
                api.name,
                api.description,
                api.base_url,
                feature_names.join(", ")
            );
        }

        let messages = [
            ChatMessage::system(format!(
                "You select which registered HTTP APIs are relevant to a user request. \
                 Reply with a comma-separated list of API ids only, at most {}. \
                 Reply with an empty line if none apply.",
                MAX_SELECTED_APIS
            )),
            ChatMessage::user(format!(
                "User request:\n{}\n\nRegistered APIs:\n{}",
                user_prompt, candidates
            )),
        ];
        let response = self.backend.generate(&messages).await?;

        let known: Vec<&str> = apis.iter().map(|a| a.id.as_str()).collect();
        let selected = filter_candidate_ids(&response, &known);
        log::debug!("Stage 1 selected APIs: {:?}", selected);

        Ok(apis
            .into_iter()
            .filter(|api| selected.iter().take(MAX_SELECTED_APIS).any(|id| *id == api.id))
            .collect())
    }

    /// Stage 2: choose relevant features, restricted to the selected
    /// APIs.
    async fn select_features(
        &self,
        user_prompt: &str,
        apis: &[ApiSummary],
    ) -> Result<Vec<(ApiSummary, FeatureSummary)>, PlanError> {
        let mut candidates = String::new();
        let mut by_id: Vec<(ApiSummary, FeatureSummary)> = Vec::new();
        for api in apis {
            for feature in self.registry.list_features(&api.id).await? {
                let _ = writeln!(
                    candidates,
                    "- id: {}\n  name: {}\n  api: {}\n  description: {}",
                    feature.id, feature.name, api.name, feature.description
                );
                by_id.push((api.clone(), feature));
            }
        }
        if by_id.is_empty() {
            return Ok(Vec::new());
        }

        let messages = [
            ChatMessage::system(
                "You select which API features are relevant to a user request. \
                 Reply with a comma-separated list of feature ids only. \
                 Reply with an empty line if none apply.",
            ),
            ChatMessage::user(format!(
                "User request:\n{}\n\nCandidate features:\n{}",
                user_prompt, candidates
            )),
        ];
        let response = self.backend.generate(&messages).await?;

        let known: Vec<&str> = by_id.iter().map(|(_, f)| f.id.as_str()).collect();
        let selected = filter_candidate_ids(&response, &known);
        log::debug!("Stage 2 selected features: {:?}", selected);

        Ok(by_id
            .into_iter()
            .filter(|(_, feature)| selected.iter().any(|id| *id == feature.id))
            .collect())
    }

    /// Stage 3: choose and order endpoints under the selected features
    /// into discrete steps. Step numbers follow the model's output
    /// order, not registry order.
    async fn sequence_endpoints(
        &self,
        user_prompt: &str,
        features: &[(ApiSummary, FeatureSummary)],
    ) -> Result<Vec<PlanStep>, PlanError> {
        let mut candidates = String::new();
        let mut descriptors: HashMap<String, EndpointDescriptor> = HashMap::new();
        for (api, feature) in features {
            for endpoint in self.registry.list_endpoints(&feature.id).await? {
                let _ = writeln!(
                    candidates,
                    "- id: {}\n  method: {}\n  path: {}\n  summary: {}\n  description: {}",
                    endpoint.id,
                    endpoint.method,
                    endpoint.path,
                    endpoint.summary,
                    endpoint.description
                );
                descriptors.insert(
                    endpoint.id.clone(),
                    EndpointDescriptor {
                        id: endpoint.id,
                        method: endpoint.method,
                        path_template: endpoint.path,
                        summary: endpoint.summary,
                        description: endpoint.description,
                        feature_name: feature.name.clone(),
                        api_name: api.name.clone(),
                        base_url: api.base_url.clone(),
                        schema_locator: api.schema_locator.clone(),
                    },
                );
            }
        }
        if descriptors.is_empty() {
            return Ok(Vec::new());
        }

        let messages = [
            ChatMessage::system(
                "You order API endpoint calls to fulfill a user request. \
                 Reply with a numbered list, one endpoint id per line, in call order. \
                 Use only ids from the candidate list. \
                 Reply with an empty line if no call is needed.",
            ),
            ChatMessage::user(format!(
                "User request:\n{}\n\nCandidate endpoints:\n{}",
                user_prompt, candidates
            )),
        ];
        let response = self.backend.generate(&messages).await?;

        let known: Vec<&str> = descriptors.keys().map(String::as_str).collect();
        let ordered = parse_sequenced_ids(&response, &known);
        log::debug!("Stage 3 sequenced endpoints: {:?}", ordered);

        Ok(ordered
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                descriptors.get(id.as_str()).map(|descriptor| PlanStep {
                    step: index as u32 + 1,
                    endpoint_id: descriptor.id.clone(),
                    api_name: descriptor.api_name.clone(),
                    feature_name: descriptor.feature_name.clone(),
                    method: descriptor.method.clone(),
                    path_template: descriptor.path_template.clone(),
                    base_url: descriptor.base_url.clone(),
                    schema_locator: descriptor.schema_locator.clone(),
                    description: descriptor.description.clone(),
                })
            })
            .collect())
    }
}

/// Parse a comma/newline separated id list from free text and keep only
/// ids present in the known set, preserving response order without
/// duplicates.
pub fn filter_candidate_ids(raw: &str, known: &[&str]) -> Vec<String> {
    let mut selected = Vec::new();
    for token in strip_code_fence(raw).split([',', '\n']) {
        let token = token.trim().trim_matches(['`', '"', '\'', '.']);
        if token.is_empty() {
            continue;
        }
        if known.contains(&token) && !selected.iter().any(|s| s == token) {
            selected.push(token.to_string());
        }
    }
    selected
}

/// Parse a numbered, newline-delimited id sequence. Leading ordinals
/// are stripped; unmatched tokens are dropped, not fatal. Repeated ids
/// stay repeated: calling the same endpoint twice is a legitimate plan.
pub fn parse_sequenced_ids(raw: &str, known: &[&str]) -> Vec<String> {
    let mut ordered = Vec::new();
    for line in strip_code_fence(raw).lines() {
        let token = ORDINAL_RE.replace(line, "");
        let token = token.trim().trim_matches(['`', '"', '\'', '.', '-']).trim();
        if token.is_empty() {
            continue;
        }
        if known.contains(&token) {
            ordered.push(token.to_string());
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::StubTextGenerator;
    use crate::registry::{EndpointSummary, InMemoryRegistry};

    async fn registry() -> Arc<InMemoryRegistry> {
        let registry = InMemoryRegistry::new();
        registry
            .add_api(
                ApiSummary {
                    id: "api-pets".to_string(),
                    name: "petstore".to_string(),
                    description: "Pet store".to_string(),
                    base_url: "http://pets.local".to_string(),
                    schema_locator: "doc://pets".to_string(),
                },
                vec![(
                    FeatureSummary {
                        id: "feat-pets".to_string(),
                        name: "pets".to_string(),
                        description: "Pet management".to_string(),
                    },
                    vec![
                        EndpointSummary {
                            id: "ep-list".to_string(),
                            path: "/pets".to_string(),
                            method: "GET".to_string(),
                            summary: "List pets".to_string(),
                            description: "List all pets".to_string(),
                        },
                        EndpointSummary {
                            id: "ep-get".to_string(),
                            path: "/pets/{petId}".to_string(),
                            method: "GET".to_string(),
                            summary: "Get pet".to_string(),
                            description: "Fetch one pet".to_string(),
                        },
                    ],
                )],
            )
            .await;
        registry
            .add_api(
                ApiSummary {
                    id: "api-orders".to_string(),
                    name: "orders".to_string(),
                    description: "Order service".to_string(),
                    base_url: "http://orders.local".to_string(),
                    schema_locator: "doc://orders".to_string(),
                },
                vec![(
                    FeatureSummary {
                        id: "feat-orders".to_string(),
                        name: "orders".to_string(),
                        description: "Order management".to_string(),
                    },
                    vec![EndpointSummary {
                        id: "ep-order".to_string(),
                        path: "/orders".to_string(),
                        method: "POST".to_string(),
                        summary: "Create order".to_string(),
                        description: "Create a new order".to_string(),
                    }],
                )],
            )
            .await;
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_three_stage_plan_preserves_model_order() {
        let backend = Arc::new(StubTextGenerator::with_responses([
            "api-pets",
            "feat-pets, feat-bogus",
            "1. ep-get\n2. ep-list\n3. ep-unknown",
        ]));
        let builder = PlanBuilder::new(registry().await, backend);

        let plan = builder.build_plan("show me pet 123 then the rest").await.unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].step, 1);
        assert_eq!(plan[0].endpoint_id, "ep-get");
        assert_eq!(plan[0].base_url, "http://pets.local");
        assert_eq!(plan[1].step, 2);
        assert_eq!(plan[1].endpoint_id, "ep-list");
    }

    #[tokio::test]
    async fn test_empty_api_selection_degrades_to_empty_plan() {
        let backend = Arc::new(StubTextGenerator::with_responses([""]));
        let builder = PlanBuilder::new(registry().await, backend);
        let plan = builder.build_plan("what's the weather").await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_api_ids_are_dropped_silently() {
        let backend = Arc::new(StubTextGenerator::with_responses([
            "api-made-up, api-orders",
            "feat-orders",
            "1. ep-order",
        ]));
        let builder = PlanBuilder::new(registry().await, backend);
        let plan = builder.build_plan("order a collar").await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].endpoint_id, "ep-order");
        assert_eq!(plan[0].api_name, "orders");
    }

    #[tokio::test]
    async fn test_backend_failure_fails_the_build() {
        // Script exhausted on the first call models a backend failure.
        let backend = Arc::new(StubTextGenerator::new());
        let builder = PlanBuilder::new(registry().await, backend);
        assert!(matches!(
            builder.build_plan("anything").await,
            Err(PlanError::Llm(_))
        ));
    }

    #[test]
    fn test_filter_candidate_ids_handles_fences_and_garbage() {
        let known = ["api-1", "api-2"];
        let raw = "```\napi-2, `api-1`, api-9, not an id\n```";
        assert_eq!(filter_candidate_ids(raw, &known), vec!["api-2", "api-1"]);
    }

    #[test]
    fn test_parse_sequenced_ids_strips_ordinals_and_keeps_repeats() {
        let known = ["ep-a", "ep-b"];
        let raw = "1. ep-b\n2) ep-a\n3: ep-b\nfour. nonsense";
        assert_eq!(parse_sequenced_ids(raw, &known), vec!["ep-b", "ep-a", "ep-b"]);
    }
}
