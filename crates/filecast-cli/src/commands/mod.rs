//! CLI command definitions and handlers.

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::backend::BackendKind;

pub mod complete;
pub mod serve;

/// Filecast - file uploads with live analysis notifications
#[derive(Parser)]
#[command(name = "filecast")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Redis connection URL
    #[arg(long, global = true, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Queue and object store backend
    #[arg(long, global = true, value_enum, env = "FILECAST_BACKEND", default_value = "redis")]
    pub backend: BackendKind,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the web server and the response queue consumer
    Serve(serve::ServeArgs),

    /// Push a completion message onto the response queue by hand
    Complete(complete::CompleteArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve(args) => serve::execute(args, self.backend, &self.redis_url).await,
            Commands::Complete(args) => {
                complete::execute(args, self.backend, &self.redis_url).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["filecast", "serve"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.task_queue, "task-queue");
                assert_eq!(args.response_queue, "response-queue");
                assert_eq!(args.receive_batch_size, 5);
                assert!(args.max_receive_count.is_none());
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_parse_complete() {
        let cli = Cli::try_parse_from([
            "filecast", "--backend", "redis", "complete", "--key", "users/1/a_overview.txt",
            "--user", "1",
        ])
        .unwrap();
        match cli.command {
            Commands::Complete(args) => {
                assert_eq!(args.status, "completed");
                assert_eq!(args.user, "1");
            }
            _ => panic!("expected complete"),
        }
    }
}
