use async_trait::async_trait;
use persona_relay_model::{
    ErrorKind, IndexItem, RetrievedItem, Retriever, ServiceError, VectorIndex,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::http::{RestEndpoint, default_client, send, transport_error};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    data: &'a str,
    top_k: usize,
    include_data: bool,
    include_metadata: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    result: Vec<QueryMatch>,
}

#[derive(Deserialize)]
struct QueryMatch {
    score: f32,
    #[serde(default)]
    data: Option<String>,
}

#[derive(Deserialize)]
struct UpsertResponse {
    error: Option<String>,
}

/// A vector store backed by the Upstash Vector REST API. The index
/// embeds text server-side.
#[derive(Clone, Debug)]
pub struct UpstashVector {
    endpoint: RestEndpoint,
}

impl UpstashVector {
    /// Creates a client for the index at `base_url`.
    pub fn new(base_url: &str, token: &str) -> Self {
        Self::with_client(default_client(), base_url, token)
    }

    /// Creates a client sharing an existing HTTP client.
    pub fn with_client(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            endpoint: RestEndpoint::new(client, base_url, token),
        }
    }
}

#[async_trait]
impl Retriever for UpstashVector {
    async fn query(
        &self,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedItem>, ServiceError> {
        let body = QueryRequest {
            data: text,
            top_k,
            include_data: true,
            include_metadata: true,
        };
        let resp = send(self.endpoint.post("/query-data").json(&body)).await?;
        let resp: QueryResponse = resp.json().await.map_err(transport_error)?;
        Ok(resp
            .result
            .into_iter()
            .map(|m| RetrievedItem {
                text: m.data.unwrap_or_default(),
                score: m.score,
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for UpstashVector {
    async fn upsert(&self, items: &[IndexItem]) -> Result<(), ServiceError> {
        let resp = send(self.endpoint.post("/upsert-data").json(items)).await?;
        let resp: UpsertResponse =
            resp.json().await.map_err(transport_error)?;
        match resp.error {
            Some(err) => Err(ServiceError::new(ErrorKind::Rejected, err)),
            None => {
                debug!("upserted {} items", items.len());
                Ok(())
            }
        }
    }
}
