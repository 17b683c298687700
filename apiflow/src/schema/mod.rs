//! Resolved endpoint schemas
//!
//! A [`ResolvedSchema`] is the normalized, reference-free view of one
//! operation's inputs: parameter lists by location plus an optional
//! body field tree. The prompt rendering here is part of the contract —
//! the generation backend's grounding quality depends on it — so the
//! format is exercised by tests, not just eyeballed.

mod resolver;

pub use resolver::{
    HttpSchemaSource, SchemaCache, SchemaResolver, SchemaSource, StaticSchemaSource,
};

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;

use crate::types::ParameterLocation;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Failed to fetch schema document: {0}")]
    Fetch(String),

    #[error("Malformed schema document: {0}")]
    Malformed(String),

    #[error("No operation found for {method} {path}")]
    OperationNotFound { path: String, method: String },
}

/// One query/path/header parameter of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub param_type: String,
    pub description: String,
}

/// One field of a request body, references fully resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: String,
    pub required: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nested: Vec<FieldSpec>,
}

/// Request body description for an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySpec {
    pub required: bool,
    pub fields: Vec<FieldSpec>,
}

/// Normalized, reference-free schema for one endpoint operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub parameters: Vec<ParameterSpec>,
    pub body: Option<BodySpec>,
}

impl ResolvedSchema {
    pub fn parameters_at(
        &self,
        location: ParameterLocation,
    ) -> impl Iterator<Item = &ParameterSpec> + '_ {
        self.parameters.iter().filter(move |p| p.location == location)
    }

    /// Render the parameter list for one location as prompt-ready text.
    pub fn render_parameters(&self, location: ParameterLocation) -> String {
        let mut out = String::new();
        for param in self.parameters_at(location) {
            let tag = if param.required { "required" } else { "optional" };
            let _ = writeln!(
                out,
                "- {} ({}, {}): {}",
                param.name, tag, param.param_type, param.description
            );
        }
        if out.is_empty() {
            out.push_str("none\n");
        }
        out
    }

    /// Render the body field tree as prompt-ready text; `none` when the
    /// operation takes no body.
    pub fn render_body(&self) -> String {
        match &self.body {
            None => "none\n".to_string(),
            Some(body) => {
                let mut out = String::new();
                let tag = if body.required { "required" } else { "optional" };
                let _ = writeln!(out, "body ({}):", tag);
                if body.fields.is_empty() {
                    out.push_str("  (no fields defined)\n");
                } else {
                    for field in &body.fields {
                        render_field(&mut out, field, 1);
                    }
                }
                out
            }
        }
    }

    /// Full textual rendering embedded verbatim in generation prompts.
    pub fn render_for_prompt(&self) -> String {
        format!(
            "Query parameters:\n{}Path parameters:\n{}Header parameters:\n{}Request body:\n{}",
            self.render_parameters(ParameterLocation::Query),
            self.render_parameters(ParameterLocation::Path),
            self.render_parameters(ParameterLocation::Header),
            self.render_body(),
        )
    }
}

fn render_field(out: &mut String, field: &FieldSpec, depth: usize) {
    let indent = "  ".repeat(depth);
    let tag = if field.required { "required" } else { "optional" };
    let mut line = format!(
        "{}- {} ({}, {}): {}",
        indent, field.name, tag, field.field_type, field.description
    );
    if let Some(example) = &field.example {
        let _ = write!(line, " [example: {}]", example);
    }
    if !field.enum_values.is_empty() {
        let _ = write!(line, " [one of: {}]", field.enum_values.join(" | "));
    }
    out.push_str(&line);
    out.push('\n');
    for nested in &field.nested {
        render_field(out, nested, depth + 1);
    }
}
