use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// A streaming chat relay that answers as a persona.
#[derive(Debug, Parser)]
#[command(name = "persona-relay", version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP relay (default).
    Serve(ServeArgs),
    /// Export chat logs from a running relay, one file per session.
    Export(ExportArgs),
    /// Upload Q&A and style samples to the vector store.
    Index(IndexArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "HTTP_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Directory of persona documents (`*.txt`).
    #[arg(long, env = "KNOWLEDGE_DIR", default_value = "./knowledge")]
    pub knowledge_dir: PathBuf,

    #[command(flatten)]
    pub upstream: UpstreamArgs,

    #[arg(long, env = "RETRIEVAL_TIMEOUT_SECS", default_value_t = 5)]
    pub retrieval_timeout_secs: u64,

    #[command(flatten)]
    pub redis: RedisArgs,

    #[command(flatten)]
    pub vector: VectorArgs,

    /// Bearer secret guarding `/logs`.
    #[arg(long, env = "LOGS_SECRET", hide_env_values = true)]
    pub logs_secret: Option<String>,

    #[arg(long, env = "RESEND_API_KEY", hide_env_values = true)]
    pub resend_api_key: Option<String>,

    /// Where contact messages are delivered.
    #[arg(long, env = "CONTACT_TO")]
    pub contact_to: Option<String>,

    #[arg(
        long,
        env = "CONTACT_FROM",
        default_value = "Chat Bot <onboarding@resend.dev>"
    )]
    pub contact_from: String,
}

#[derive(Debug, Args)]
pub struct UpstreamArgs {
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub upstream_api_key: Option<String>,

    #[arg(
        long,
        env = "UPSTREAM_BASE_URL",
        default_value = "https://api.deepseek.com"
    )]
    pub upstream_base_url: String,

    #[arg(long, env = "UPSTREAM_MODEL", default_value = "deepseek-chat")]
    pub upstream_model: String,

    #[arg(long, env = "UPSTREAM_MAX_TOKENS", default_value_t = 600)]
    pub max_tokens: u32,

    #[arg(long, env = "UPSTREAM_TEMPERATURE", default_value_t = 0.9)]
    pub temperature: f32,

    #[arg(long, env = "UPSTREAM_CONNECT_TIMEOUT_SECS", default_value_t = 30)]
    pub connect_timeout_secs: u64,

    /// Longest silence tolerated between two upstream reads.
    #[arg(long, env = "UPSTREAM_READ_TIMEOUT_SECS", default_value_t = 60)]
    pub read_timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct RedisArgs {
    #[arg(long, env = "UPSTASH_REDIS_URL")]
    pub redis_url: Option<String>,

    #[arg(long, env = "UPSTASH_REDIS_TOKEN", hide_env_values = true)]
    pub redis_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct VectorArgs {
    #[arg(long, env = "UPSTASH_VECTOR_URL")]
    pub vector_url: Option<String>,

    #[arg(long, env = "UPSTASH_VECTOR_TOKEN", hide_env_values = true)]
    pub vector_token: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Base URL of the relay, e.g. `https://chat.example.com`.
    pub api_base: String,

    #[arg(long, env = "LOGS_SECRET", hide_env_values = true)]
    pub logs_secret: String,

    #[arg(long, default_value = "./logs")]
    pub out_dir: PathBuf,

    /// Most recent sessions to export.
    #[arg(long, default_value_t = 9999)]
    pub limit: usize,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Directory holding `*_qa.txt` and `*_style.txt` files.
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub vector: VectorArgs,

    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 500)]
    pub pause_ms: u64,
}

/// Returns both values when both are set and non-empty.
pub fn credentials(
    url: &Option<String>,
    token: &Option<String>,
) -> Option<(String, String)> {
    match (url.as_deref(), token.as_deref()) {
        (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
            Some((url.to_owned(), token.to_owned()))
        }
        _ => None,
    }
}
