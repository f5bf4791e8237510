//! Command implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use message_delivery::{DeliveryContext, SupabaseMessageClient};
use pending_message_queue::{FlushReport, NewMessage, PendingMessageQueue, QueueConfig};
use queue_storage::{DurableQueueStore, FileMedium, QueueEntry};
use tracing::{info, warn};
use warroom_config::{Config, Paths, QueueSettings};

use crate::{Cli, Commands};

pub async fn run(cli: Cli, config: Config, paths: Paths) -> anyhow::Result<()> {
    let delivers = matches!(
        cli.command,
        Commands::Enqueue { no_flush: false, .. }
            | Commands::Flush
            | Commands::RetryFailed
            | Commands::Run { .. }
    );
    let queue = build_queue(&config, &paths, cli.access_token, delivers).await?;

    match cli.command {
        Commands::Enqueue {
            conversation_id,
            user_id,
            role,
            id,
            no_flush,
            content,
        } => {
            let mut message = NewMessage::new(conversation_id, user_id, role, content);
            if let Some(id) = id {
                message = message.with_id(id);
            }
            let id = queue.enqueue(message)?;
            println!("{}", id);
            if !no_flush {
                print_report(flush_now(&queue).await);
            }
        }
        Commands::Flush => print_report(flush_now(&queue).await),
        Commands::Stats { json } => {
            let stats = queue.stats();
            if json {
                println!(
                    "{}",
                    serde_json::json!({
                        "total": stats.total,
                        "pending": stats.pending,
                        "failed": stats.failed,
                    })
                );
            } else {
                println!(
                    "total: {}  pending: {}  failed: {}",
                    stats.total, stats.pending, stats.failed
                );
            }
        }
        Commands::List { json } => {
            let entries = queue.snapshot();
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                let max_retries = queue.config().max_retries;
                for entry in &entries {
                    println!("{}", describe(entry, max_retries));
                }
            }
        }
        Commands::RetryFailed => {
            let reset = queue.retry_failed();
            println!("reset {} failed message(s)", reset);
            print_report(flush_now(&queue).await);
        }
        Commands::ClearFailed => {
            let cleared = queue.clear_failed();
            println!("cleared {} failed message(s)", cleared);
        }
        Commands::Run { poll_interval } => {
            run_worker(&queue, Duration::from_secs(poll_interval.max(1))).await?;
        }
    }

    Ok(())
}

async fn build_queue(
    config: &Config,
    paths: &Paths,
    access_token: Option<String>,
    delivers: bool,
) -> anyhow::Result<PendingMessageQueue> {
    if delivers {
        config
            .require_supabase()
            .context("delivery needs Supabase settings")?;
    }

    let client = SupabaseMessageClient::new(&config.supabase_url, &config.supabase_anon_key);
    match access_token.filter(|t| !t.trim().is_empty()) {
        Some(access_token) => client.set_context(DeliveryContext { access_token }).await,
        None if delivers => {
            warn!("No access token set (WARROOM_ACCESS_TOKEN); deliveries will fail")
        }
        None => {}
    }

    let store = DurableQueueStore::open(Box::new(FileMedium::new(paths.queue_dir())));
    Ok(PendingMessageQueue::new(
        store,
        Arc::new(client),
        queue_config(&config.queue),
    ))
}

/// Map file/env settings onto the queue's typed config.
fn queue_config(settings: &QueueSettings) -> QueueConfig {
    QueueConfig {
        max_retries: settings.max_retries,
        base_delay: Duration::from_millis(settings.base_delay_ms),
        max_delay: Duration::from_millis(settings.max_delay_ms),
        jitter: Duration::from_millis(settings.jitter_ms),
        flush_debounce: Duration::from_millis(settings.flush_debounce_ms),
        retry_window: Duration::from_millis(settings.retry_window_ms),
        attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
        callback_timeout: Duration::from_millis(settings.callback_timeout_ms),
        initial_flush_delay: Duration::from_millis(settings.initial_flush_delay_ms),
        failed_ttl: settings.failed_ttl_secs.map(Duration::from_secs),
        direct_delivery_fallback: settings.direct_delivery_fallback,
    }
}

/// Flush in the foreground, waiting out a pass a timer may have started.
async fn flush_now(queue: &PendingMessageQueue) -> FlushReport {
    loop {
        match queue.flush().await {
            FlushReport::AlreadyRunning => tokio::time::sleep(Duration::from_millis(50)).await,
            report => {
                // The process is about to exit; a retry timer would die with it.
                queue.cancel_scheduled_flush();
                return report;
            }
        }
    }
}

async fn run_worker(queue: &PendingMessageQueue, poll_interval: Duration) -> anyhow::Result<()> {
    queue.start();

    let mut events = queue.subscribe();
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down queue worker");
                break;
            }
            _ = ticker.tick() => {
                if queue.stats().pending > 0 {
                    queue.nudge();
                }
            }
            event = events.recv() => {
                if let Ok(event) = event {
                    println!("saved {} ({})", event.message_id, event.conversation_id);
                }
            }
        }
    }

    queue.cancel_scheduled_flush();
    let stats = queue.stats();
    info!(
        pending = stats.pending,
        failed = stats.failed,
        "Queue worker stopped"
    );
    Ok(())
}

fn print_report(report: FlushReport) {
    match report {
        FlushReport::Idle => println!("nothing to deliver"),
        FlushReport::AlreadyRunning => println!("a flush is already running"),
        FlushReport::Completed {
            delivered,
            failed,
            not_due,
            skipped,
        } => println!(
            "delivered: {}  failed: {}  not due: {}  skipped: {}",
            delivered, failed, not_due, skipped
        ),
    }
}

fn describe(entry: &QueueEntry, max_retries: u32) -> String {
    let state = if entry.is_failed(max_retries) {
        "failed"
    } else {
        "pending"
    };
    let mut line = format!(
        "{}  {}  {}  attempts={}  created={}",
        entry.id,
        entry.conversation_id,
        state,
        entry.attempts,
        entry.created_at.to_rfc3339()
    );
    if let Some(error) = &entry.last_error {
        line.push_str(&format!("  last_error={:?}", error));
    }
    line
}
