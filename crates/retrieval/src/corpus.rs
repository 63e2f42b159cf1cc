//! The knowledge corpus — embedded institutional documents.
//!
//! Ingestion and embedding of the corpus happen outside this pipeline; the
//! retriever only reads. Documents carry their embedding vectors so search
//! is a pure similarity scan.

use aula_core::error::RetrievalError;
use aula_core::message::TenantId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// One embedded document chunk in the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// Owning tenant.
    pub tenant: TenantId,

    /// Human-readable title.
    pub title: String,

    /// Category label (e.g. "admisiones", "pagos", "calendario").
    pub category: String,

    /// The chunk text.
    pub content: String,

    /// Precomputed embedding vector.
    pub embedding: Vec<f32>,
}

/// Read access to the embedded corpus, always tenant-scoped.
#[async_trait]
pub trait KnowledgeCorpus: Send + Sync {
    /// All documents belonging to one tenant.
    async fn documents(&self, tenant: &TenantId) -> Result<Vec<KnowledgeDocument>, RetrievalError>;
}

/// An in-memory corpus, loaded at startup or seeded in tests.
pub struct InMemoryCorpus {
    documents: RwLock<Vec<KnowledgeDocument>>,
}

impl InMemoryCorpus {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(Vec::new()),
        }
    }

    /// Add a document to the corpus.
    pub async fn insert(&self, document: KnowledgeDocument) {
        self.documents.write().await.push(document);
    }
}

impl Default for InMemoryCorpus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KnowledgeCorpus for InMemoryCorpus {
    async fn documents(&self, tenant: &TenantId) -> Result<Vec<KnowledgeDocument>, RetrievalError> {
        let docs = self.documents.read().await;
        Ok(docs.iter().filter(|d| &d.tenant == tenant).cloned().collect())
    }
}
