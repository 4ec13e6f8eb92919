use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

/// A ranked result of a similarity query.
#[derive(Clone, Debug, PartialEq)]
pub struct RetrievedItem {
    /// The text payload stored with the vector.
    pub text: String,
    /// The similarity score, higher is closer.
    pub score: f32,
}

/// The kind of curated text stored in the vector index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// A question with its answer.
    Qa,
    /// A group of speaking-style samples.
    Style,
}

/// Metadata stored along with an indexed text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// The kind of text.
    #[serde(rename = "type")]
    pub kind: IndexKind,
    /// The file stem the text was read from.
    pub source: String,
}

/// A text to be embedded and stored by the vector index.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexItem {
    /// The vector id. Upserting an existing id replaces it.
    pub id: String,
    /// The text to embed.
    pub data: String,
    /// Metadata kept with the vector.
    pub metadata: IndexMetadata,
}

/// The query side of the vector store.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns up to `top_k` items similar to `text`, best first.
    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedItem>, ServiceError>;
}

/// The write side of the vector store.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Embeds and stores `items` in one batch.
    async fn upsert(&self, items: &[IndexItem]) -> Result<(), ServiceError>;
}
