//! The `persona-relay` command: the HTTP relay plus its log export and
//! data indexing utilities.

#[macro_use]
extern crate tracing;

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use persona_relay::core::{ChatServiceBuilder, LogSink, RelayOptions};
use persona_relay::export::{HttpLogReader, export_sessions};
use persona_relay::index::{IndexOptions, index_directory};
use persona_relay::knowledge::load_persona;
use persona_relay::server::{self, AppState};
use persona_relay_openai::{OpenAIConfigBuilder, OpenAIProvider};
use persona_relay_services::{ResendMailer, UpstashRedis, UpstashVector};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::cli::{Cli, Command, ExportArgs, IndexArgs, ServeArgs, credentials};

const BAR_CHAR: &str = "▎";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Serve(cli.serve)) {
        Command::Serve(args) => serve(args).await,
        Command::Export(args) => export(args).await,
        Command::Index(args) => index(args).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let persona = load_persona(&args.knowledge_dir).with_context(|| {
        format!("failed to load persona from {}", args.knowledge_dir.display())
    })?;
    info!("loaded persona ({} bytes)", persona.as_str().len());

    let upstream = args.upstream;
    let mut chat = ChatServiceBuilder::with_persona(persona)
        .with_relay_options(RelayOptions {
            connect_timeout: Duration::from_secs(upstream.connect_timeout_secs),
            read_timeout: Duration::from_secs(upstream.read_timeout_secs),
        })
        .with_retrieval_timeout(Duration::from_secs(
            args.retrieval_timeout_secs,
        ));

    match upstream.upstream_api_key.filter(|key| !key.is_empty()) {
        Some(api_key) => {
            let config = OpenAIConfigBuilder::with_api_key(api_key)
                .with_base_url(upstream.upstream_base_url)
                .with_model(upstream.upstream_model)
                .with_max_tokens(upstream.max_tokens)
                .with_temperature(upstream.temperature)
                .with_connect_timeout(Duration::from_secs(
                    upstream.connect_timeout_secs,
                ))
                .build();
            chat = chat.with_provider(OpenAIProvider::new(config));
        }
        None => warn!("DEEPSEEK_API_KEY is not set, /chat will fail"),
    }

    match credentials(&args.vector.vector_url, &args.vector.vector_token) {
        Some((url, token)) => {
            let vector = UpstashVector::new(&url, &token);
            chat = chat.with_retriever(Arc::new(vector));
        }
        None => info!("vector store not configured, retrieval disabled"),
    }

    let redis = credentials(&args.redis.redis_url, &args.redis.redis_token)
        .map(|(url, token)| UpstashRedis::new(&url, &token));
    let (failure_tx, failure_rx) = mpsc::unbounded_channel();
    match &redis {
        Some(redis) => {
            let sink = LogSink::new(Arc::new(redis.clone()))
                .with_failure_reporter(failure_tx);
            chat = chat.with_log_sink(sink);
        }
        None => info!("log store not configured, exchanges are not logged"),
    }
    tokio::spawn(server::drain_log_failures(failure_rx));

    let mut state = AppState::new(chat.build());
    if let Some(redis) = redis {
        state = state.with_logs(Arc::new(redis));
    }
    if let Some(secret) = &args.logs_secret {
        state = state.with_logs_secret(secret);
    }
    match (&args.resend_api_key, &args.contact_to) {
        (Some(api_key), Some(to)) => {
            let mailer =
                ResendMailer::new(api_key, to).with_from(&args.contact_from);
            state = state.with_mailer(Arc::new(mailer));
        }
        _ => info!("mail provider not configured, /contact will fail"),
    }

    let listener = TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn export(args: ExportArgs) -> anyhow::Result<()> {
    let reader = HttpLogReader::new(&args.api_base, &args.logs_secret)?;

    let progress_bar = new_progress_bar("sessions")?;
    let on_progress = |done: usize, total: usize| {
        progress_bar.set_length(total as u64);
        progress_bar.set_position(done as u64);
    };
    let summary =
        export_sessions(&reader, &args.out_dir, args.limit, on_progress).await;
    progress_bar.finish_and_clear();
    let summary = summary?;

    let bar = BAR_CHAR.bright_cyan();
    println!("{bar}Exported to {}", args.out_dir.display().bright_white());
    println!("{bar}  written:  {}", summary.written.bright_green());
    println!("{bar}  skipped:  {}", summary.skipped.bright_white());
    println!("{bar}  messages: {}", summary.messages.bright_white());
    if summary.failed > 0 {
        println!(
            "{}  failed:   {}",
            BAR_CHAR.bright_yellow(),
            summary.failed.bright_red()
        );
    }
    Ok(())
}

async fn index(args: IndexArgs) -> anyhow::Result<()> {
    let Some((url, token)) =
        credentials(&args.vector.vector_url, &args.vector.vector_token)
    else {
        bail!("UPSTASH_VECTOR_URL and UPSTASH_VECTOR_TOKEN must be set");
    };
    if !args.data_dir.is_dir() {
        bail!("{} is not a directory", args.data_dir.display());
    }

    let vector = UpstashVector::new(&url, &token);
    let options = IndexOptions {
        batch_size: args.batch_size,
        pause: Duration::from_millis(args.pause_ms),
        ..Default::default()
    };
    let progress_bar = new_progress_bar("items")?;
    let on_batch = |uploaded: usize, pending: usize| {
        progress_bar.set_length(pending as u64);
        progress_bar.set_position(uploaded as u64);
    };
    let summary =
        index_directory(&vector, &args.data_dir, options, on_batch).await;
    progress_bar.finish_and_clear();
    let summary = summary?;

    let bar = BAR_CHAR.bright_cyan();
    println!(
        "{bar}Read {} Q&A and {} style files, {} items",
        summary.qa_files, summary.style_files, summary.total
    );
    println!("{bar}  uploaded:  {}", summary.uploaded.bright_green());
    println!("{bar}  unchanged: {}", summary.unchanged.bright_white());
    if summary.failed_batches > 0 {
        println!(
            "{}  failed batches: {} (retried on the next run)",
            BAR_CHAR.bright_yellow(),
            summary.failed_batches.bright_red()
        );
    }
    Ok(())
}

fn new_progress_bar(unit: &str) -> anyhow::Result<ProgressBar> {
    let template = format!("{{spinner}} [{{bar:30}}] {{pos}}/{{len}} {unit}");
    let style = ProgressStyle::with_template(&template)?.progress_chars("=> ");
    Ok(ProgressBar::new(0).with_style(style))
}
