//! Manual completion message, standing in for the analysis worker.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use filecast_core::CompletionMessage;
use std::time::Duration;

use crate::backend::{self, BackendKind, QueueSettings};

#[derive(Args)]
pub struct CompleteArgs {
    /// Bucket holding the result artifact
    #[arg(long, env = "FILECAST_BUCKET", default_value = "uploads")]
    pub bucket: String,

    /// Key of the result artifact
    #[arg(long)]
    pub key: String,

    /// Owning user id
    #[arg(long)]
    pub user: String,

    /// Status reported by the worker
    #[arg(long, default_value = "completed")]
    pub status: String,

    /// Response queue name
    #[arg(long, env = "FILECAST_RESPONSE_QUEUE", default_value = "response-queue")]
    pub response_queue: String,

    /// Task queue name
    #[arg(long, env = "FILECAST_TASK_QUEUE", default_value = "task-queue")]
    pub task_queue: String,
}

pub async fn execute(args: CompleteArgs, backend_kind: BackendKind, redis_url: &str) -> Result<()> {
    if backend_kind == BackendKind::Memory {
        bail!("'complete' needs a shared backend; the memory backend lives inside 'serve'");
    }

    let settings = QueueSettings {
        visibility_timeout: Duration::from_secs(30),
        max_receive_count: None,
    };
    let backends = backend::connect(
        backend_kind,
        redis_url,
        &args.task_queue,
        &args.response_queue,
        &settings,
    )
    .await?;

    let message = CompletionMessage {
        bucket: args.bucket,
        key: args.key,
        status: args.status,
        user_id: args.user,
    };
    let payload = serde_json::to_string(&message)?;
    let id = backends.response_queue.enqueue(&payload).await?;

    println!(
        "{} {} {}",
        "Queued".green().bold(),
        message.location(),
        format!("({})", id).dimmed()
    );
    Ok(())
}
