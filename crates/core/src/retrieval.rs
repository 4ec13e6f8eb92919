//! Best-effort context retrieval.

use std::time::Duration;

use persona_relay_model::{RetrievedItem, Retriever};
use tokio::time::timeout;

/// How many candidates are requested from the vector store.
pub const RETRIEVAL_TOP_K: usize = 5;

/// Candidates scoring at or below this value are discarded.
pub const RELEVANCE_THRESHOLD: f32 = 0.5;

/// Looks up past exchanges similar to `message`.
///
/// Never fails: a missing retriever, an error or running past `limit`
/// all yield an empty context.
pub async fn fetch_context(
    retriever: Option<&dyn Retriever>,
    message: &str,
    limit: Duration,
) -> String {
    let Some(retriever) = retriever else {
        trace!("no retriever configured, skipping retrieval");
        return String::new();
    };

    match timeout(limit, retriever.query(message, RETRIEVAL_TOP_K)).await {
        Ok(Ok(items)) => {
            let context = join_relevant(&items);
            debug!(
                "retrieved {} candidates, {} bytes of context",
                items.len(),
                context.len()
            );
            context
        }
        Ok(Err(err)) => {
            warn!("retrieval failed, continuing without context: {err}");
            String::new()
        }
        Err(_) => {
            warn!("retrieval timed out after {limit:?}, continuing without it");
            String::new()
        }
    }
}

/// Joins the texts of relevant items with blank lines, keeping the
/// store's ordering.
pub fn join_relevant(items: &[RetrievedItem]) -> String {
    items
        .iter()
        .filter(|item| item.score > RELEVANCE_THRESHOLD)
        .map(|item| item.text.as_str())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
