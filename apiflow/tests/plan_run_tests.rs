//! End-to-end plan execution scenarios
//!
//! Drives the full pipeline — plan build, schema resolution, parameter
//! generation, dispatch — against a scripted stub backend and a local
//! TCP listener serving canned HTTP responses.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use apiflow::error::ErrorType;
use apiflow::executor::{PlanRunner, StepExecutor};
use apiflow::generator::ParameterGenerator;
use apiflow::llm::StubTextGenerator;
use apiflow::planner::PlanBuilder;
use apiflow::registry::{ApiSummary, EndpointSummary, FeatureSummary, InMemoryRegistry};
use apiflow::schema::{SchemaResolver, StaticSchemaSource};
use apiflow::types::PlanStep;

/// Minimal canned-response HTTP server: one status/body per path,
/// recording every request target it sees.
struct MockApi {
    addr: SocketAddr,
    seen: Arc<Mutex<Vec<String>>>,
}

impl MockApi {
    async fn spawn(routes: HashMap<String, (u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock api");
        let addr = listener.local_addr().expect("local addr");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_accept = seen.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let routes = routes.clone();
                let seen = seen_accept.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    loop {
                        let Ok(n) = socket.read(&mut chunk).await else {
                            return;
                        };
                        if n == 0 {
                            break;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let head = String::from_utf8_lossy(&buf);
                    let target = head
                        .lines()
                        .next()
                        .and_then(|line| line.split_whitespace().nth(1))
                        .unwrap_or("")
                        .to_string();
                    seen.lock().expect("seen lock").push(target.clone());

                    let path_only = target.split('?').next().unwrap_or("").to_string();
                    let (status, body) = routes
                        .get(&path_only)
                        .cloned()
                        .unwrap_or((404, r#"{"error":"not found"}"#.to_string()));
                    let reason = if status < 300 { "OK" } else { "Error" };
                    let response = format!(
                        "HTTP/1.1 {} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        reason,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, seen }
    }

    fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn seen_targets(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock").clone()
    }
}

fn route(status: u16, body: &str) -> (u16, String) {
    (status, body.to_string())
}

async fn users_registry(base_url: &str) -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    registry
        .add_api(
            ApiSummary {
                id: "api-users".to_string(),
                name: "users".to_string(),
                description: "User directory".to_string(),
                base_url: base_url.to_string(),
                schema_locator: "doc://users".to_string(),
            },
            vec![(
                FeatureSummary {
                    id: "feat-users".to_string(),
                    name: "profiles".to_string(),
                    description: "User profiles".to_string(),
                },
                vec![
                    EndpointSummary {
                        id: "ep-profile".to_string(),
                        path: "/users/{id}/profile".to_string(),
                        method: "GET".to_string(),
                        summary: "Get profile".to_string(),
                        description: "Fetch one user's profile".to_string(),
                    },
                    EndpointSummary {
                        id: "ep-a".to_string(),
                        path: "/a".to_string(),
                        method: "GET".to_string(),
                        summary: "Step a".to_string(),
                        description: "First call".to_string(),
                    },
                    EndpointSummary {
                        id: "ep-b".to_string(),
                        path: "/b".to_string(),
                        method: "GET".to_string(),
                        summary: "Step b".to_string(),
                        description: "Second call".to_string(),
                    },
                    EndpointSummary {
                        id: "ep-c".to_string(),
                        path: "/c".to_string(),
                        method: "GET".to_string(),
                        summary: "Step c".to_string(),
                        description: "Third call".to_string(),
                    },
                ],
            )],
        )
        .await;
    Arc::new(registry)
}

fn users_schema_doc() -> serde_json::Value {
    serde_json::json!({
        "openapi": "3.0.0",
        "paths": {
            "/users/{id}/profile": {
                "get": {
                    "parameters": [
                        {"name": "id", "in": "path", "required": true,
                         "schema": {"type": "string"}, "description": "user id"}
                    ]
                }
            },
            "/a": {"get": {}},
            "/b": {"get": {}},
            "/c": {"get": {}}
        }
    })
}

fn resolver() -> Arc<SchemaResolver> {
    let mut source = StaticSchemaSource::new();
    source.insert("doc://users", users_schema_doc());
    Arc::new(SchemaResolver::new(Arc::new(source)))
}

fn runner(backend: Arc<StubTextGenerator>) -> PlanRunner {
    PlanRunner::new(
        resolver(),
        ParameterGenerator::new(backend),
        StepExecutor::new(Duration::from_secs(2)).expect("executor"),
    )
}

const SUCCESS_NO_PARAMS: &str = r#"{"status":"SUCCESS","parameters":[]}"#;

#[tokio::test]
async fn test_scenario_a_path_parameter_substitution() {
    let api = MockApi::spawn(HashMap::from([(
        "/users/123/profile".to_string(),
        route(200, r#"{"name":"Alex"}"#),
    )]))
    .await;

    let backend = Arc::new(StubTextGenerator::with_responses([
        "api-users",
        "feat-users",
        "1. ep-profile",
        r#"{"status":"SUCCESS","parameters":[{"name":"id","value":"123","location":"path"}]}"#,
    ]));
    let registry = users_registry(&api.base_url()).await;
    let builder = PlanBuilder::new(registry, backend.clone());

    let plan = builder.build_plan("show me user 123's profile").await.unwrap();
    assert_eq!(plan.len(), 1);

    let results = runner(backend).run(&plan, "show me user 123's profile").await;
    assert_eq!(results.len(), 1);
    assert!(results[0].success);
    assert_eq!(results[0].response_status, Some(200));
    assert_eq!(results[0].response.as_deref(), Some(r#"{"name":"Alex"}"#));
    assert_eq!(api.seen_targets(), vec!["/users/123/profile"]);
}

#[tokio::test]
async fn test_scenario_b_insufficient_data_skips_dispatch() {
    let api = MockApi::spawn(HashMap::new()).await;

    let backend = Arc::new(StubTextGenerator::with_responses([
        "api-users",
        "feat-users",
        "1. ep-profile",
        r#"{"status":"INSUFFICIENT_DATA","message":"missing X"}"#,
    ]));
    let registry = users_registry(&api.base_url()).await;
    let builder = PlanBuilder::new(registry, backend.clone());

    let plan = builder.build_plan("show me a profile").await.unwrap();
    let results = runner(backend).run(&plan, "show me a profile").await;

    assert_eq!(results.len(), 1);
    assert!(!results[0].success);
    assert_eq!(results[0].error_type, Some(ErrorType::InsufficientData));
    assert_eq!(results[0].error.as_deref(), Some("missing X"));
    assert!(api.seen_targets().is_empty(), "no HTTP call may be made");
}

#[tokio::test]
async fn test_scenario_c_fail_fast_on_http_500() {
    let api = MockApi::spawn(HashMap::from([
        ("/a".to_string(), route(200, r#"{"ok":true}"#)),
        ("/b".to_string(), route(500, r#"{"error":"boom"}"#)),
        ("/c".to_string(), route(200, r#"{"ok":true}"#)),
    ]))
    .await;

    let backend = Arc::new(StubTextGenerator::with_responses([
        "api-users",
        "feat-users",
        "1. ep-a\n2. ep-b\n3. ep-c",
        SUCCESS_NO_PARAMS,
        SUCCESS_NO_PARAMS,
        SUCCESS_NO_PARAMS,
    ]));
    let registry = users_registry(&api.base_url()).await;
    let builder = PlanBuilder::new(registry, backend.clone());

    let plan = builder.build_plan("run the abc sequence").await.unwrap();
    assert_eq!(plan.len(), 3);

    let results = runner(backend).run(&plan, "run the abc sequence").await;

    // Exactly two entries: step 3 is never attempted after step 2 fails.
    assert_eq!(results.len(), 2);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert_eq!(results[1].error_type, Some(ErrorType::HttpRequestError));
    assert_eq!(results[1].error.as_deref(), Some(r#"HTTP 500: {"error":"boom"}"#));
    assert_eq!(api.seen_targets(), vec!["/a", "/b"]);

    // Prefix property: step numbers mirror the plan with no gaps or
    // reordering.
    let steps: Vec<u32> = results.iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![1, 2]);
}

#[tokio::test]
async fn test_missing_path_parameter_never_reaches_the_wire() {
    let api = MockApi::spawn(HashMap::new()).await;

    let plan = vec![PlanStep {
        step: 1,
        endpoint_id: "ep-profile".to_string(),
        api_name: "users".to_string(),
        feature_name: "profiles".to_string(),
        method: "GET".to_string(),
        path_template: "/users/{id}/profile".to_string(),
        base_url: api.base_url(),
        schema_locator: "doc://users".to_string(),
        description: "Fetch one user's profile".to_string(),
    }];

    let backend = Arc::new(StubTextGenerator::with_responses([SUCCESS_NO_PARAMS]));
    let results = runner(backend).run(&plan, "show me the profile").await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error_type, Some(ErrorType::ValidationError));
    assert!(api.seen_targets().is_empty());
}

#[tokio::test]
async fn test_unknown_schema_operation_is_swagger_error() {
    let api = MockApi::spawn(HashMap::new()).await;

    let plan = vec![PlanStep {
        step: 1,
        endpoint_id: "ep-ghost".to_string(),
        api_name: "users".to_string(),
        feature_name: "profiles".to_string(),
        method: "DELETE".to_string(),
        path_template: "/users/{id}/profile".to_string(),
        base_url: api.base_url(),
        schema_locator: "doc://users".to_string(),
        description: "Operation absent from the document".to_string(),
    }];

    let backend = Arc::new(StubTextGenerator::new());
    let results = runner(backend).run(&plan, "delete the profile").await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].error_type, Some(ErrorType::SwaggerError));
    assert!(api.seen_targets().is_empty());
}
