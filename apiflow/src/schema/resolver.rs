//! Schema document fetch, cache, and reference resolution
//!
//! Documents are arbitrary OpenAPI-style JSON; they are kept as
//! `serde_json::Value` and walked dynamically. Resolution produces a
//! reference-free [`ResolvedSchema`]: every `$ref` is replaced by the
//! referenced component's fields, transitively, with a visited-name
//! stack so a cyclic reference chain stops at the revisited name
//! instead of looping.
//!
//! Type derivation precedence, deterministic for identical input:
//! explicit `type` > first `allOf` branch > `$ref` target > `enum` >
//! array of resolved item type > `unknown`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{BodySpec, FieldSpec, ParameterSpec, ResolvedSchema, SchemaError};
use crate::types::ParameterLocation;

/// Source of raw schema documents. Must be idempotent within a run.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn fetch(&self, locator: &str) -> Result<Value, SchemaError>;
}

/// Fetches schema documents over HTTP.
pub struct HttpSchemaSource {
    client: reqwest::Client,
}

impl HttpSchemaSource {
    pub fn new(timeout: Duration) -> Result<Self, SchemaError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SchemaError::Fetch(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SchemaSource for HttpSchemaSource {
    async fn fetch(&self, locator: &str) -> Result<Value, SchemaError> {
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| SchemaError::Fetch(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SchemaError::Fetch(format!(
                "HTTP {} fetching {}",
                status.as_u16(),
                locator
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| SchemaError::Malformed(e.to_string()))
    }
}

/// In-memory source for embedded documents and tests.
#[derive(Default)]
pub struct StaticSchemaSource {
    docs: HashMap<String, Value>,
}

impl StaticSchemaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: impl Into<String>, doc: Value) {
        self.docs.insert(locator.into(), doc);
    }
}

#[async_trait]
impl SchemaSource for StaticSchemaSource {
    async fn fetch(&self, locator: &str) -> Result<Value, SchemaError> {
        self.docs
            .get(locator)
            .cloned()
            .ok_or_else(|| SchemaError::Fetch(format!("no document registered for {}", locator)))
    }
}

/// Session-scoped document cache keyed by locator. No TTL: within one
/// plan run the document is assumed stable. Safe for concurrent
/// read/insert; duplicate fetches for the same key are wasteful but
/// not incorrect.
#[derive(Default)]
pub struct SchemaCache {
    inner: Mutex<HashMap<String, Arc<Value>>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, locator: &str) -> Option<Arc<Value>> {
        self.inner
            .lock()
            .expect("schema cache lock poisoned")
            .get(locator)
            .cloned()
    }

    pub fn store(&self, locator: impl Into<String>, doc: Arc<Value>) {
        self.inner
            .lock()
            .expect("schema cache lock poisoned")
            .insert(locator.into(), doc);
    }
}

/// Resolves `(locator, path, method)` into a [`ResolvedSchema`].
pub struct SchemaResolver {
    source: Arc<dyn SchemaSource>,
    cache: SchemaCache,
}

impl SchemaResolver {
    pub fn new(source: Arc<dyn SchemaSource>) -> Self {
        Self {
            source,
            cache: SchemaCache::new(),
        }
    }

    /// Fetch a document through the cache.
    pub async fn document(&self, locator: &str) -> Result<Arc<Value>, SchemaError> {
        if let Some(doc) = self.cache.get(locator) {
            log::debug!("Schema cache hit for {}", locator);
            return Ok(doc);
        }
        log::debug!("Fetching schema document {}", locator);
        let doc = Arc::new(self.source.fetch(locator).await?);
        self.cache.store(locator, doc.clone());
        Ok(doc)
    }

    /// Resolve the operation at `(path, method)` in the document at
    /// `locator`. A missing operation is an error, never an empty
    /// schema.
    pub async fn resolve(
        &self,
        locator: &str,
        path: &str,
        method: &str,
    ) -> Result<ResolvedSchema, SchemaError> {
        let doc = self.document(locator).await?;
        let path_item = doc
            .get("paths")
            .and_then(|paths| paths.get(path))
            .ok_or_else(|| SchemaError::OperationNotFound {
                path: path.to_string(),
                method: method.to_string(),
            })?;
        let operation = path_item.get(method.to_lowercase()).ok_or_else(|| {
            SchemaError::OperationNotFound {
                path: path.to_string(),
                method: method.to_string(),
            }
        })?;

        let mut parameters = Vec::new();
        // Operation-level parameters take precedence over path-level ones
        // with the same (name, location).
        for raw in [operation, path_item]
            .iter()
            .filter_map(|node| node.get("parameters"))
            .filter_map(Value::as_array)
            .flatten()
        {
            if let Some(spec) = parse_parameter(&doc, raw) {
                let duplicate = parameters
                    .iter()
                    .any(|p: &ParameterSpec| p.name == spec.name && p.location == spec.location);
                if !duplicate {
                    parameters.push(spec);
                }
            }
        }

        let body = parse_body(&doc, operation);

        Ok(ResolvedSchema { parameters, body })
    }
}

fn ref_path(node: &Value) -> Option<&str> {
    node.get("$ref").and_then(Value::as_str)
}

fn ref_name(reference: &str) -> &str {
    reference.rsplit('/').next().unwrap_or(reference)
}

fn deref<'a>(doc: &'a Value, reference: &str) -> Option<&'a Value> {
    let pointer = reference.strip_prefix('#')?;
    doc.pointer(pointer)
}

fn parse_parameter(doc: &Value, raw: &Value) -> Option<ParameterSpec> {
    let raw = match ref_path(raw) {
        Some(reference) => deref(doc, reference)?,
        None => raw,
    };
    let name = raw.get("name")?.as_str()?.to_string();
    let location = match raw.get("in")?.as_str()? {
        "query" => ParameterLocation::Query,
        "path" => ParameterLocation::Path,
        "header" => ParameterLocation::Header,
        // cookie and body parameters are handled elsewhere or not at all
        _ => return None,
    };
    // Path parameters are required by definition even when the flag is
    // omitted.
    let required = raw
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(location == ParameterLocation::Path);
    // OpenAPI 3 nests the type under `schema`; Swagger 2 puts it on the
    // parameter itself.
    let type_node = raw.get("schema").unwrap_or(raw);
    let param_type = derive_type(doc, type_node, &mut Vec::new());
    let description = raw
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    Some(ParameterSpec {
        name,
        location,
        required,
        param_type,
        description,
    })
}

fn parse_body(doc: &Value, operation: &Value) -> Option<BodySpec> {
    // OpenAPI 3 request body
    if let Some(request_body) = operation.get("requestBody") {
        let request_body = match ref_path(request_body) {
            Some(reference) => deref(doc, reference)?,
            None => request_body,
        };
        let required = request_body
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let content = request_body.get("content").and_then(Value::as_object)?;
        let media = content
            .get("application/json")
            .or_else(|| content.values().next())?;
        let schema = media.get("schema")?;
        return Some(BodySpec {
            required,
            fields: fields_for_schema(doc, schema, &mut Vec::new()),
        });
    }

    // Swagger 2 body parameter
    let body_param = operation
        .get("parameters")
        .and_then(Value::as_array)?
        .iter()
        .find(|p| p.get("in").and_then(Value::as_str) == Some("body"))?;
    let required = body_param
        .get("required")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let schema = body_param.get("schema")?;
    Some(BodySpec {
        required,
        fields: fields_for_schema(doc, schema, &mut Vec::new()),
    })
}

/// Field list for a schema node, following one `$ref` level with cycle
/// protection, descending into array items.
fn fields_for_schema(doc: &Value, schema: &Value, visited: &mut Vec<String>) -> Vec<FieldSpec> {
    let mut pushed = false;
    let node = match ref_path(schema) {
        Some(reference) => {
            let name = ref_name(reference).to_string();
            if visited.contains(&name) {
                return Vec::new();
            }
            match deref(doc, reference) {
                Some(target) => {
                    visited.push(name);
                    pushed = true;
                    target
                }
                None => return Vec::new(),
            }
        }
        None => schema,
    };

    let fields = if node.get("properties").is_some() {
        object_fields(doc, node, visited)
    } else if node.get("type").and_then(Value::as_str) == Some("array") {
        node.get("items")
            .map(|items| fields_for_schema(doc, items, visited))
            .unwrap_or_default()
    } else if let Some(first_branch) = node
        .get("allOf")
        .and_then(Value::as_array)
        .and_then(|branches| branches.first())
    {
        fields_for_schema(doc, first_branch, visited)
    } else {
        Vec::new()
    };

    if pushed {
        visited.pop();
    }
    fields
}

fn object_fields(doc: &Value, node: &Value, visited: &mut Vec<String>) -> Vec<FieldSpec> {
    let required: Vec<&str> = node
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    node.get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(name, prop)| {
                    field_from_property(doc, name, prop, required.contains(&name.as_str()), visited)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn field_from_property(
    doc: &Value,
    name: &str,
    prop: &Value,
    required: bool,
    visited: &mut Vec<String>,
) -> FieldSpec {
    let mut pushed = false;
    let node = match ref_path(prop) {
        Some(reference) => {
            let ref_name = ref_name(reference).to_string();
            // A revisited name stops resolution here; the unresolved
            // reference marker becomes the field type.
            if visited.contains(&ref_name) {
                return unresolved_field(name, ref_name, required);
            }
            match deref(doc, reference) {
                Some(target) => {
                    visited.push(ref_name);
                    pushed = true;
                    target
                }
                None => return unresolved_field(name, ref_name, required),
            }
        }
        None => prop,
    };

    let field_type = derive_type(doc, node, visited);
    let description = node
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let enum_values = node
        .get("enum")
        .and_then(Value::as_array)
        .map(|values| values.iter().map(render_scalar).collect())
        .unwrap_or_default();
    let example = node.get("example").map(render_scalar);
    let nested = nested_fields(doc, node, visited);

    if pushed {
        visited.pop();
    }

    FieldSpec {
        name: name.to_string(),
        field_type,
        required,
        description,
        enum_values,
        example,
        nested,
    }
}

fn unresolved_field(name: &str, reference_marker: String, required: bool) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        field_type: reference_marker,
        required,
        description: String::new(),
        enum_values: Vec::new(),
        example: None,
        nested: Vec::new(),
    }
}

fn nested_fields(doc: &Value, node: &Value, visited: &mut Vec<String>) -> Vec<FieldSpec> {
    if node.get("properties").is_some() {
        return object_fields(doc, node, visited);
    }
    if node.get("type").and_then(Value::as_str) == Some("array") {
        if let Some(items) = node.get("items") {
            return fields_for_schema(doc, items, visited);
        }
    }
    // allOf composition: take the first referenced/resolved shape.
    if let Some(first_branch) = node
        .get("allOf")
        .and_then(Value::as_array)
        .and_then(|branches| branches.first())
    {
        return fields_for_schema(doc, first_branch, visited);
    }
    Vec::new()
}

fn derive_type(doc: &Value, node: &Value, visited: &mut Vec<String>) -> String {
    if let Some(explicit) = node.get("type").and_then(Value::as_str) {
        if explicit == "array" {
            let item_type = node
                .get("items")
                .map(|items| derive_type_following_ref(doc, items, visited))
                .unwrap_or_else(|| "unknown".to_string());
            return format!("array of {}", item_type);
        }
        return explicit.to_string();
    }
    if let Some(first_branch) = node
        .get("allOf")
        .and_then(Value::as_array)
        .and_then(|branches| branches.first())
    {
        return derive_type_following_ref(doc, first_branch, visited);
    }
    if let Some(reference) = ref_path(node) {
        return derive_type_for_ref(doc, reference, visited);
    }
    if node.get("enum").is_some() {
        return "enum".to_string();
    }
    "unknown".to_string()
}

fn derive_type_following_ref(doc: &Value, node: &Value, visited: &mut Vec<String>) -> String {
    match ref_path(node) {
        Some(reference) => derive_type_for_ref(doc, reference, visited),
        None => derive_type(doc, node, visited),
    }
}

fn derive_type_for_ref(doc: &Value, reference: &str, visited: &mut Vec<String>) -> String {
    let name = ref_name(reference).to_string();
    if visited.contains(&name) {
        return name;
    }
    match deref(doc, reference) {
        Some(target) => {
            visited.push(name.clone());
            let derived = derive_type(doc, target, visited);
            visited.pop();
            if derived == "unknown" {
                name
            } else {
                derived
            }
        }
        None => name,
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
