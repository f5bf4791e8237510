//! warroom-queue - inspect and drive the pending chat-message queue.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use warroom_config::{init_logging, Config, Paths};

/// Pending-message queue command-line interface.
#[derive(Parser, Debug)]
#[command(name = "warroom-queue")]
#[command(about = "Deliver, inspect and repair queued War Room chat messages")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for queue files, logs and config. Defaults to ~/.warroom
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Supabase access token of the signed-in user
    #[arg(long, env = "WARROOM_ACCESS_TOKEN", global = true, hide_env_values = true)]
    access_token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Queue a message and try to deliver it
    Enqueue {
        #[arg(long)]
        conversation_id: String,
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value = "user")]
        role: String,
        /// Message id. A random one is generated when omitted
        #[arg(long)]
        id: Option<String>,
        /// Only persist the message, don't attempt delivery
        #[arg(long)]
        no_flush: bool,
        content: String,
    },
    /// Run one delivery pass
    Flush,
    /// Show queue counts
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// List queued messages
    List {
        #[arg(long)]
        json: bool,
    },
    /// Put failed messages back in rotation and deliver them
    RetryFailed,
    /// Drop failed messages
    ClearFailed,
    /// Keep delivering until interrupted
    Run {
        /// Seconds between periodic retries
        #[arg(long, default_value_t = 30)]
        poll_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir.clone() {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let foreground = matches!(cli.command, Commands::Run { .. });
    init_logging("warroom-queue", level, &paths, foreground);

    app::run(cli, config, paths).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_enqueue() {
        let cli = Cli::try_parse_from([
            "warroom-queue",
            "enqueue",
            "--conversation-id",
            "conv-A",
            "--user-id",
            "user-1",
            "What were Q3 sales?",
        ])
        .unwrap();

        match cli.command {
            Commands::Enqueue {
                conversation_id,
                role,
                id,
                no_flush,
                content,
                ..
            } => {
                assert_eq!(conversation_id, "conv-A");
                assert_eq!(role, "user");
                assert!(id.is_none());
                assert!(!no_flush);
                assert_eq!(content, "What were Q3 sales?");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "warroom-queue",
            "stats",
            "--json",
            "--base-dir",
            "/tmp/warroom",
            "-l",
            "debug",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Stats { json: true }));
        assert_eq!(cli.base_dir, Some(PathBuf::from("/tmp/warroom")));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn run_defaults_poll_interval() {
        let cli = Cli::try_parse_from(["warroom-queue", "run"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { poll_interval: 30 }));
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["warroom-queue"]).is_err());
    }
}
