//! Qdrant REST vector store.
//!
//! Collections are created lazily on first upsert, sized from the first
//! vector written, with cosine distance.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::embedding::{CapabilityError, SimilarEntity, VectorStore};

#[derive(Debug, Serialize)]
struct UpsertPoints<'a> {
    points: [Point<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Point<'a> {
    id: Uuid,
    vector: &'a [f32],
    payload: &'a Value,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: Uuid,
    score: f64,
}

pub struct QdrantStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    known_collections: Mutex<HashSet<String>>,
}

impl QdrantStore {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, CapabilityError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            known_collections: Mutex::new(HashSet::new()),
        })
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/collections/{}", self.base_url, collection)
    }

    async fn ensure_collection(
        &self,
        collection: &str,
        size: usize,
    ) -> Result<(), CapabilityError> {
        let mut known = self.known_collections.lock().await;
        if known.contains(collection) {
            return Ok(());
        }

        let url = self.collection_url(collection);
        let response = self.request(self.client.get(&url)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            let body = json!({ "vectors": { "size": size, "distance": "Cosine" } });
            check(self.request(self.client.put(&url)).json(&body).send().await?).await?;
            info!("created vector collection {} ({} dims)", collection, size);
        } else {
            check(response).await?;
        }

        known.insert(collection.to_string());
        Ok(())
    }
}

async fn check(response: Response) -> Result<Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CapabilityError::Api {
            status: status.as_u16(),
            message: response.text().await.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn upsert(
        &self,
        collection: &str,
        entity_id: Uuid,
        vector: &[f32],
        metadata: &Value,
    ) -> Result<(), CapabilityError> {
        self.ensure_collection(collection, vector.len()).await?;

        let body = UpsertPoints {
            points: [Point {
                id: entity_id,
                vector,
                payload: metadata,
            }],
        };
        let url = format!("{}/points?wait=true", self.collection_url(collection));
        check(self.request(self.client.put(url)).json(&body).send().await?).await?;
        Ok(())
    }

    async fn query_similar(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarEntity>, CapabilityError> {
        let url = format!("{}/points/search", self.collection_url(collection));
        let body = SearchRequest {
            vector,
            limit: top_k,
            with_payload: false,
        };
        let response = self.request(self.client.post(url)).json(&body).send().await?;

        // Nothing indexed yet for this kind.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        let parsed: SearchResponse = check(response).await?.json().await?;
        Ok(parsed
            .result
            .into_iter()
            .map(|p| SimilarEntity {
                entity_id: p.id,
                similarity: p.score,
            })
            .collect())
    }
}
