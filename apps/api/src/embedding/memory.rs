use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::embedding::{cosine_similarity, CapabilityError, SimilarEntity, VectorStore};

/// Brute-force in-process vector store. Suitable for development and tests;
/// contents are lost on restart.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, HashMap<Uuid, Vec<f32>>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(
        &self,
        collection: &str,
        entity_id: Uuid,
        vector: &[f32],
        _metadata: &Value,
    ) -> Result<(), CapabilityError> {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(entity_id, vector.to_vec());
        Ok(())
    }

    async fn query_similar(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SimilarEntity>, CapabilityError> {
        let collections = self.collections.read().await;
        let Some(points) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<SimilarEntity> = points
            .iter()
            .map(|(id, stored)| SimilarEntity {
                entity_id: *id,
                similarity: cosine_similarity(vector, stored),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.entity_id.cmp(&b.entity_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
