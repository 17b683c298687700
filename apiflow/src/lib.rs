//! apiflow — natural-language-to-HTTP planning and execution engine
//!
//! Turns a free-text user request into an ordered sequence of calls
//! against externally registered HTTP APIs, using a text-generation
//! backend as the decision-making component at each stage:
//!
//! 1. [`planner::PlanBuilder`] asks the backend to pick relevant APIs,
//!    then features, then a concrete ordered endpoint sequence.
//! 2. [`schema::SchemaResolver`] fetches each API's interface document
//!    (cached per locator) and resolves its references into a
//!    prompt-ready, reference-free schema.
//! 3. [`generator::ParameterGenerator`] asks the backend to materialize
//!    parameter values per step, with all prior step results as
//!    context.
//! 4. [`executor::StepExecutor`] validates the generated path
//!    parameters, issues the HTTP call, and records a classified
//!    result; [`executor::PlanRunner`] drives it across the plan,
//!    fail-fast.
//!
//! The backend ([`llm::TextGenerator`]) and the endpoint registry
//! ([`registry::EndpointRegistry`]) are injected trait objects; the
//! crate owns no transport surface and persists nothing — the
//! accumulated [`types::ExecutionResult`] list is the sole output of a
//! run.

pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod llm;
pub mod planner;
pub mod registry;
pub mod schema;
pub mod types;

pub use config::{EngineConfig, HttpConfig, LlmConfig, ProviderKind};
pub use error::{ErrorType, StandardizedError};
pub use executor::{PlanRunner, StepExecutor};
pub use generator::ParameterGenerator;
pub use llm::{ChatMessage, ChatRole, TextGenerator, TextGeneratorFactory};
pub use planner::PlanBuilder;
pub use registry::{EndpointRegistry, InMemoryRegistry};
pub use schema::{ResolvedSchema, SchemaResolver, SchemaSource};
pub use types::{ExecutionResult, ParameterGeneration, ParameterLocation, ParameterValue, PlanStep};
