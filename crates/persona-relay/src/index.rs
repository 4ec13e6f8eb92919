//! Ingests curated Q&A and speaking-style samples into the vector store.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use backoff::ExponentialBackoff;
use persona_relay_model::{
    ErrorKind, IndexItem, IndexKind, IndexMetadata, ServiceError, VectorIndex,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::time::sleep;

/// Records the ids already uploaded from a data directory.
pub const MANIFEST_FILE: &str = ".index-manifest.json";

const QA_SUFFIX: &str = "_qa.txt";
const STYLE_SUFFIX: &str = "_style.txt";
const STYLE_GROUP: usize = 5;

static QA_BLOCK_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\nQ:\s*").expect("valid regex"));
static QA_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Q:\s*(.*?)\nA:\s*(.*)").expect("valid regex")
});

/// Tunes the upload loop.
#[derive(Clone, Copy, Debug)]
pub struct IndexOptions {
    /// Items per upsert call.
    pub batch_size: usize,
    /// Pause between two batches.
    pub pause: Duration,
    /// Gives up retrying a batch after this long.
    pub max_retry_time: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            pause: Duration::from_millis(500),
            max_retry_time: Duration::from_secs(30),
        }
    }
}

/// What an indexing run did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IndexSummary {
    /// `*_qa.txt` files read.
    pub qa_files: usize,
    /// `*_style.txt` files read.
    pub style_files: usize,
    /// Items parsed from all files.
    pub total: usize,
    /// Items left out because an earlier run uploaded them.
    pub unchanged: usize,
    /// Items uploaded by this run.
    pub uploaded: usize,
    /// Batches that failed even after retrying.
    pub failed_batches: usize,
}

#[derive(Default, Serialize, Deserialize)]
struct Manifest {
    uploaded: BTreeSet<String>,
}

/// Splits a Q&A file into pairs. Blocks without both a question and an
/// answer are dropped.
pub fn parse_qa(content: &str, source: &str) -> Vec<IndexItem> {
    QA_BLOCK_SEPARATOR
        .split(content)
        .filter_map(|block| {
            let block = block.trim();
            if block.is_empty() {
                return None;
            }
            let text = if block.starts_with("Q:") {
                block.to_owned()
            } else {
                format!("Q: {block}")
            };
            let captures = QA_PAIR.captures(&text)?;
            let question = captures.get(1)?.as_str().trim();
            let answer = captures.get(2)?.as_str().trim();
            if question.is_empty() || answer.is_empty() {
                return None;
            }
            let data = format!("Q: {question}\nA: {answer}");
            Some(new_item(IndexKind::Qa, source, data))
        })
        .collect()
}

/// Groups the samples of a style file, five per item. Blank lines and
/// `#` comments are skipped, and a leading `- ` is stripped.
pub fn parse_style(content: &str, source: &str) -> Vec<IndexItem> {
    let lines: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with('#'))
        .collect();
    lines
        .chunks(STYLE_GROUP)
        .filter_map(|group| {
            let samples: Vec<&str> = group
                .iter()
                .map(|line| line.strip_prefix('-').unwrap_or(line).trim())
                .filter(|line| !line.is_empty())
                .collect();
            if samples.is_empty() {
                return None;
            }
            let data =
                format!("Speaking style samples:\n{}", samples.join("\n"));
            Some(new_item(IndexKind::Style, source, data))
        })
        .collect()
}

fn new_item(kind: IndexKind, source: &str, data: String) -> IndexItem {
    IndexItem {
        id: item_id(kind, &data),
        data,
        metadata: IndexMetadata {
            kind,
            source: source.to_owned(),
        },
    }
}

/// Derives a stable id from the item's kind and text.
pub fn item_id(kind: IndexKind, data: &str) -> String {
    let prefix = match kind {
        IndexKind::Qa => "qa",
        IndexKind::Style => "style",
    };
    let digest = Sha256::new()
        .chain_update(prefix.as_bytes())
        .chain_update([0])
        .chain_update(data.as_bytes())
        .finalize();
    let hex: String = digest[..16].iter().map(|b| format!("{b:02x}")).collect();
    format!("{prefix}-{hex}")
}

/// Reads every `*_qa.txt` and `*_style.txt` file in `data_dir`.
pub async fn collect_items(
    data_dir: &Path,
) -> io::Result<(Vec<IndexItem>, IndexSummary)> {
    let mut qa_files = Vec::new();
    let mut style_files = Vec::new();
    let mut entries = fs::read_dir(data_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(source) = name.strip_suffix(QA_SUFFIX) {
            qa_files.push((source.to_owned(), path.clone()));
        } else if let Some(source) = name.strip_suffix(STYLE_SUFFIX) {
            style_files.push((source.to_owned(), path.clone()));
        }
    }
    qa_files.sort();
    style_files.sort();

    let mut items = Vec::new();
    for (source, path) in &qa_files {
        items.extend(parse_qa(&fs::read_to_string(path).await?, source));
    }
    for (source, path) in &style_files {
        items.extend(parse_style(&fs::read_to_string(path).await?, source));
    }
    // Identical texts would collide on one id anyway.
    let mut seen = BTreeSet::new();
    items.retain(|item| seen.insert(item.id.clone()));

    let summary = IndexSummary {
        qa_files: qa_files.len(),
        style_files: style_files.len(),
        total: items.len(),
        ..Default::default()
    };
    Ok((items, summary))
}

/// Uploads the items of `data_dir` that earlier runs have not uploaded.
///
/// A batch that keeps failing is reported and skipped; its items are
/// retried on the next run. `on_batch` is called with
/// `(uploaded, pending)` after each batch.
pub async fn index_directory(
    index: &dyn VectorIndex,
    data_dir: &Path,
    options: IndexOptions,
    mut on_batch: impl FnMut(usize, usize),
) -> io::Result<IndexSummary> {
    let (items, mut summary) = collect_items(data_dir).await?;
    let manifest_path = data_dir.join(MANIFEST_FILE);
    let mut manifest = load_manifest(&manifest_path).await;

    let pending: Vec<IndexItem> = items
        .into_iter()
        .filter(|item| !manifest.uploaded.contains(&item.id))
        .collect();
    summary.unchanged = summary.total - pending.len();
    debug!(
        "{} items to upload, {} unchanged",
        pending.len(),
        summary.unchanged
    );

    let batch_size = options.batch_size.max(1);
    let batch_count = pending.len().div_ceil(batch_size);
    for (idx, batch) in pending.chunks(batch_size).enumerate() {
        match upsert_with_retry(index, batch, options.max_retry_time).await {
            Ok(()) => {
                summary.uploaded += batch.len();
                manifest
                    .uploaded
                    .extend(batch.iter().map(|item| item.id.clone()));
                save_manifest(&manifest_path, &manifest).await?;
            }
            Err(err) => {
                error!("batch {} of {batch_count} failed: {err}", idx + 1);
                summary.failed_batches += 1;
            }
        }
        on_batch(summary.uploaded, pending.len());
        if idx + 1 < batch_count {
            sleep(options.pause).await;
        }
    }
    Ok(summary)
}

async fn upsert_with_retry(
    index: &dyn VectorIndex,
    batch: &[IndexItem],
    max_retry_time: Duration,
) -> Result<(), ServiceError> {
    let policy = ExponentialBackoff {
        max_elapsed_time: Some(max_retry_time),
        ..Default::default()
    };
    backoff::future::retry(policy, move || async move {
        index.upsert(batch).await.map_err(|err| match err.kind() {
            ErrorKind::Transport | ErrorKind::Timeout => {
                warn!("retrying batch: {err}");
                backoff::Error::transient(err)
            }
            _ => backoff::Error::permanent(err),
        })
    })
    .await
}

async fn load_manifest(path: &Path) -> Manifest {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!("ignoring unreadable manifest {}: {err}", path.display());
            Manifest::default()
        }),
        Err(_) => Manifest::default(),
    }
}

async fn save_manifest(path: &Path, manifest: &Manifest) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(manifest)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    fs::write(path, json).await
}

#[cfg(test)]
mod tests {
    use persona_relay_test_model::MemoryVectorIndex;

    use super::*;

    const QA_TEXT: &str = "Q: Do you like tea?\nA: Every morning.\n\n\
Q: Where do you live?\nA: Tokyo, mostly.\n\n\
Q: Lost question without answer\n\n\
Q:   \nA: empty question";

    #[test]
    fn test_parse_qa() {
        let items = parse_qa(QA_TEXT, "chat1");
        let data: Vec<_> = items.iter().map(|i| i.data.as_str()).collect();
        assert_eq!(
            data,
            [
                "Q: Do you like tea?\nA: Every morning.",
                "Q: Where do you live?\nA: Tokyo, mostly.",
            ]
        );
        assert_eq!(items[0].metadata.kind, IndexKind::Qa);
        assert_eq!(items[0].metadata.source, "chat1");
        assert!(items[0].id.starts_with("qa-"));
    }

    #[test]
    fn test_parse_style() {
        let text = "# samples\n- one\n- two\n\nthree\n-four\n- five\n- six\n-  \n";
        let items = parse_style(text, "chat1");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].data,
            "Speaking style samples:\none\ntwo\nthree\nfour\nfive"
        );
        assert_eq!(items[1].data, "Speaking style samples:\nsix");
        assert_eq!(items[1].metadata.kind, IndexKind::Style);

        let items = parse_style("--really\n- -ok\n", "chat2");
        assert_eq!(items[0].data, "Speaking style samples:\n-really\n-ok");
    }

    #[test]
    fn test_item_id_is_stable() {
        assert_eq!(item_id(IndexKind::Qa, "x"), item_id(IndexKind::Qa, "x"));
        assert_ne!(item_id(IndexKind::Qa, "x"), item_id(IndexKind::Style, "x"));
        assert_ne!(item_id(IndexKind::Qa, "x"), item_id(IndexKind::Qa, "y"));
    }

    fn options(batch_size: usize) -> IndexOptions {
        IndexOptions {
            batch_size,
            pause: Duration::ZERO,
            max_retry_time: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_index_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chat1_qa.txt"), QA_TEXT).unwrap();
        std::fs::write(dir.path().join("chat1_style.txt"), "- hey\n- yo\n")
            .unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignored").unwrap();

        let index = MemoryVectorIndex::default();
        let summary =
            index_directory(&index, dir.path(), options(2), |_, _| {})
                .await
                .unwrap();
        assert_eq!(summary.qa_files, 1);
        assert_eq!(summary.style_files, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.uploaded, 3);
        let batch_sizes: Vec<_> =
            index.batches().iter().map(Vec::len).collect();
        assert_eq!(batch_sizes, [2, 1]);
        assert!(dir.path().join(MANIFEST_FILE).exists());

        // A second run finds nothing new.
        std::fs::write(
            dir.path().join("chat2_qa.txt"),
            "Q: New?\nA: Yes.",
        )
        .unwrap();
        let summary =
            index_directory(&index, dir.path(), options(2), |_, _| {})
                .await
                .unwrap();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.unchanged, 3);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(index.batches().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_batch_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("chat1_qa.txt"), QA_TEXT).unwrap();
        let bad = parse_qa(QA_TEXT, "chat1").remove(0);

        let index = MemoryVectorIndex::default();
        index.fail_on(&bad.id);
        let summary =
            index_directory(&index, dir.path(), options(1), |_, _| {})
                .await
                .unwrap();
        assert_eq!(summary.uploaded, 1);
        assert_eq!(summary.failed_batches, 1);

        // The failed item is still pending for the next run.
        let index = MemoryVectorIndex::default();
        let summary =
            index_directory(&index, dir.path(), options(1), |_, _| {})
                .await
                .unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.uploaded, 1);
        assert_eq!(index.batches()[0][0].id, bad.id);
    }
}
