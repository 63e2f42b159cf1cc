//! The retriever — embeds the query and ranks corpus chunks.

use aula_config::RetrievalConfig;
use aula_core::error::RetrievalError;
use aula_core::message::TenantId;
use aula_core::provider::{EmbeddingRequest, Provider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::corpus::KnowledgeCorpus;
use crate::vector::cosine_similarity;

/// A chunk returned to the orchestrator. Ephemeral — never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub title: String,
    pub category: String,
    pub content: String,
    /// Cosine similarity against the query embedding.
    pub relevance: f32,
}

/// Tenant-scoped semantic search over the knowledge corpus.
pub struct KnowledgeRetriever {
    config: RetrievalConfig,
    corpus: Arc<dyn KnowledgeCorpus>,
    provider: Arc<dyn Provider>,
}

impl KnowledgeRetriever {
    pub fn new(
        config: RetrievalConfig,
        corpus: Arc<dyn KnowledgeCorpus>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            config,
            corpus,
            provider,
        }
    }

    /// Top-k chunks above the relevance threshold for one tenant.
    ///
    /// Never fails the turn: any error is logged at `warn` and degrades to an
    /// empty result, which the orchestrator treats as "no additional context".
    pub async fn search(&self, query: &str, tenant: &TenantId) -> Vec<RetrievedChunk> {
        match self.search_inner(query, tenant).await {
            Ok(chunks) => {
                debug!(
                    tenant = %tenant,
                    chunks = chunks.len(),
                    "Knowledge retrieval complete"
                );
                chunks
            }
            Err(e) => {
                warn!(tenant = %tenant, error = %e, "Knowledge retrieval failed, continuing without context");
                Vec::new()
            }
        }
    }

    async fn search_inner(
        &self,
        query: &str,
        tenant: &TenantId,
    ) -> Result<Vec<RetrievedChunk>, RetrievalError> {
        let documents = self.corpus.documents(tenant).await?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.config.embedding_model.clone(),
                inputs: vec![query.to_string()],
            })
            .await
            .map_err(|e| RetrievalError::EmbeddingFailed(e.to_string()))?;

        let query_embedding = response
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingFailed("empty embedding response".into()))?;

        let mut scored: Vec<RetrievedChunk> = documents
            .iter()
            .filter_map(|doc| {
                let relevance = cosine_similarity(&doc.embedding, &query_embedding);
                if relevance >= self.config.min_relevance {
                    Some(RetrievedChunk {
                        title: doc.title.clone(),
                        category: doc.category.clone(),
                        content: doc.content.clone(),
                        relevance,
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(self.config.top_k);
        Ok(scored)
    }
}
