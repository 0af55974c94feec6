//! Web server command.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use filecast_core::{Broadcaster, PipelineConfig, QueueConsumer, ResultFetcher};
use filecast_web::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{self, BackendKind, QueueSettings};

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Bucket that receives uploads
    #[arg(long, env = "FILECAST_BUCKET", default_value = "uploads")]
    pub bucket: String,

    /// Queue carrying analysis tasks to the worker
    #[arg(long, env = "FILECAST_TASK_QUEUE", default_value = "task-queue")]
    pub task_queue: String,

    /// Queue carrying completion messages back from the worker
    #[arg(long, env = "FILECAST_RESPONSE_QUEUE", default_value = "response-queue")]
    pub response_queue: String,

    /// Seconds a received message stays hidden before it is redelivered
    #[arg(long, default_value = "30")]
    pub visibility_timeout_secs: u64,

    /// Dead-letter a message after this many receives (unlimited if unset)
    #[arg(long)]
    pub max_receive_count: Option<u32>,

    /// Messages requested per receive
    #[arg(long, default_value = "5")]
    pub receive_batch_size: usize,

    /// Long-poll wait in seconds
    #[arg(long, default_value = "10")]
    pub receive_wait_secs: u64,

    /// Pause in seconds after a failed receive
    #[arg(long, default_value = "5")]
    pub receive_backoff_secs: u64,

    /// Largest accepted upload in bytes
    #[arg(long, default_value_t = filecast_web::state::DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,

    /// Also write logs to a file
    #[arg(long)]
    pub log: bool,

    /// Log file path (default: logs/filecast.log)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl ServeArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            receive_batch_size: self.receive_batch_size,
            receive_wait: Duration::from_secs(self.receive_wait_secs),
            receive_backoff: Duration::from_secs(self.receive_backoff_secs),
        }
    }
}

pub async fn execute(args: ServeArgs, backend_kind: BackendKind, redis_url: &str) -> Result<()> {
    let config = args.pipeline_config();
    config.validate()?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;

    let settings = QueueSettings {
        visibility_timeout: Duration::from_secs(args.visibility_timeout_secs),
        max_receive_count: args.max_receive_count,
    };
    let backends = backend::connect(
        backend_kind,
        redis_url,
        &args.task_queue,
        &args.response_queue,
        &settings,
    )
    .await?;

    let broadcaster = Broadcaster::new();
    let consumer = QueueConsumer::new(
        backends.response_queue,
        ResultFetcher::new(backends.store.clone()),
        broadcaster.clone(),
        config,
    )
    .spawn();

    let state = AppState::new(broadcaster, backends.store, backends.work_queue, &args.bucket)
        .with_max_upload_bytes(args.max_upload_bytes);

    println!();
    println!("  {} {}", "Filecast".cyan().bold(), "Server".bold());
    println!();
    println!("  {}     http://{}/upload", "Upload".green(), addr);
    println!("  {}     http://{}/events", "Events".green(), addr);
    println!("  {}     {} -> {}", "Queues".green(), args.task_queue, args.response_queue);
    println!();
    println!("  {}", "Ctrl+C to stop".dimmed());
    println!();

    let result = filecast_web::run_server(state, addr).await;
    consumer.abort();
    result
}
