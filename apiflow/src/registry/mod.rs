//! Read-only endpoint registry
//!
//! The registry holds registered APIs, their features, and the
//! endpoints under each feature. How it is populated (OpenAPI
//! ingestion and the like) is outside this crate; the engine only ever
//! lists and reads. An in-memory implementation is provided for
//! embedding and tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unknown API id: {0}")]
    UnknownApi(String),

    #[error("Unknown feature id: {0}")]
    UnknownFeature(String),

    #[error("Registry backend error: {0}")]
    Backend(String),
}

/// One registered API as presented to the planner's first stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub base_url: String,
    pub schema_locator: String,
}

/// One feature (logical group of endpoints) under an API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// One endpoint under a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub id: String,
    pub path: String,
    pub method: String,
    pub summary: String,
    pub description: String,
}

/// Fully denormalized endpoint record, as the planner needs it to mint
/// a plan step. Immutable once fetched for a planning session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    pub id: String,
    pub method: String,
    pub path_template: String,
    pub summary: String,
    pub description: String,
    pub feature_name: String,
    pub api_name: String,
    pub base_url: String,
    pub schema_locator: String,
}

/// Read-only lookup interface over the registry.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    async fn list_apis(&self) -> Result<Vec<ApiSummary>, RegistryError>;

    async fn list_features(&self, api_id: &str) -> Result<Vec<FeatureSummary>, RegistryError>;

    async fn list_endpoints(&self, feature_id: &str) -> Result<Vec<EndpointSummary>, RegistryError>;
}

#[derive(Debug, Clone)]
struct ApiRecord {
    summary: ApiSummary,
    feature_ids: Vec<String>,
}

#[derive(Debug, Clone)]
struct FeatureRecord {
    summary: FeatureSummary,
    endpoints: Vec<EndpointSummary>,
}

/// In-memory registry implementation.
#[derive(Default)]
pub struct InMemoryRegistry {
    apis: RwLock<Vec<ApiRecord>>,
    features: RwLock<HashMap<String, FeatureRecord>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an API together with its features and their endpoints.
    pub async fn add_api(
        &self,
        api: ApiSummary,
        features: Vec<(FeatureSummary, Vec<EndpointSummary>)>,
    ) {
        let mut feature_ids = Vec::with_capacity(features.len());
        {
            let mut feature_map = self.features.write().await;
            for (summary, endpoints) in features {
                feature_ids.push(summary.id.clone());
                feature_map.insert(summary.id.clone(), FeatureRecord { summary, endpoints });
            }
        }
        self.apis.write().await.push(ApiRecord {
            summary: api,
            feature_ids,
        });
    }
}

#[async_trait]
impl EndpointRegistry for InMemoryRegistry {
    async fn list_apis(&self) -> Result<Vec<ApiSummary>, RegistryError> {
        Ok(self
            .apis
            .read()
            .await
            .iter()
            .map(|record| record.summary.clone())
            .collect())
    }

    async fn list_features(&self, api_id: &str) -> Result<Vec<FeatureSummary>, RegistryError> {
        let apis = self.apis.read().await;
        let record = apis
            .iter()
            .find(|record| record.summary.id == api_id)
            .ok_or_else(|| RegistryError::UnknownApi(api_id.to_string()))?;

        let features = self.features.read().await;
        Ok(record
            .feature_ids
            .iter()
            .filter_map(|id| features.get(id))
            .map(|record| record.summary.clone())
            .collect())
    }

    async fn list_endpoints(&self, feature_id: &str) -> Result<Vec<EndpointSummary>, RegistryError> {
        let features = self.features.read().await;
        let record = features
            .get(feature_id)
            .ok_or_else(|| RegistryError::UnknownFeature(feature_id.to_string()))?;
        Ok(record.endpoints.clone())
    }
}
