use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use pacer_core::{EnqueueOptions, QueueConfig, RequestError, RequestQueue, StatusPhase};

#[derive(Parser)]
#[command(name = "pacer", version, about = "Rate-limited request queue playground")]
struct Cli {
    /// TOML file with queue settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override max_concurrent
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Override retry_limit
    #[arg(long, global = true)]
    retry_limit: Option<u32>,

    /// Override base_retry_delay_ms
    #[arg(long, global = true)]
    base_delay_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push simulated profile lookups through the queue and report outcomes
    Simulate(SimulateArgs),
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args)]
struct SimulateArgs {
    /// Number of requests to enqueue
    #[arg(long, default_value_t = 8)]
    requests: usize,

    /// Probability that a single attempt fails (0.0..=1.0)
    #[arg(long, default_value_t = 0.3, value_parser = parse_probability)]
    fail_rate: f64,

    /// Base latency of one attempt
    #[arg(long, default_value_t = 200)]
    latency_ms: u64,

    /// Every Nth request is enqueued with priority 5 (0 disables)
    #[arg(long, default_value_t = 3)]
    urgent_every: usize,

    /// Clear the queue after this many milliseconds
    #[arg(long)]
    clear_after_ms: Option<u64>,
}

fn parse_probability(raw: &str) -> Result<f64, String> {
    let value: f64 = raw.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not within 0.0..=1.0"))
    }
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("upstream returned HTTP {0}")]
    Upstream(u16),
}

#[derive(Debug, Serialize)]
struct Profile {
    username: String,
    served_on_attempt: u32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum Outcome {
    Ok { profile: Profile },
    Failed { error: String },
    Cancelled,
    Aborted,
}

#[derive(Debug, Serialize)]
struct Report {
    label: String,
    priority: i32,
    attempts: u32,
    #[serde(flatten)]
    outcome: Outcome,
}

fn load_config(cli: &Cli) -> anyhow::Result<QueueConfig> {
    let mut config = match &cli.config {
        Some(path) => QueueConfig::load(path)?,
        None => QueueConfig::default(),
    };
    if let Some(n) = cli.max_concurrent {
        config.max_concurrent = n;
    }
    if let Some(n) = cli.retry_limit {
        config.retry_limit = n;
    }
    if let Some(ms) = cli.base_delay_ms {
        config.base_retry_delay_ms = ms;
    }
    config.validate().context("invalid queue configuration")?;
    Ok(config)
}

async fn simulate(config: QueueConfig, args: SimulateArgs) -> anyhow::Result<Vec<Report>> {
    let queue = RequestQueue::new(config)?;

    let _snapshots = queue.subscribe(|snapshot| {
        info!(
            version = snapshot.version,
            pending = snapshot.pending_count,
            running = snapshot.running_count,
            backing_off = snapshot.backing_off_count,
            "queue changed"
        );
    });

    let mut tickets = Vec::with_capacity(args.requests);
    for i in 0..args.requests {
        let username = format!("user{i}");
        let label = format!("GET /api/profile/{username}");
        let priority = if args.urgent_every > 0 && (i + 1) % args.urgent_every == 0 {
            5
        } else {
            0
        };
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let (latency_ms, fail_rate) = (args.latency_ms, args.fail_rate);

        let ticket = queue.enqueue(
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
                // decide up front; the rng must not live across an await
                let mut rng = rand::thread_rng();
                let latency = latency_ms + rng.gen_range(0..=latency_ms / 2);
                let failure = rng
                    .gen_bool(fail_rate)
                    .then(|| if rng.gen_bool(0.5) { 503 } else { 429 });
                let username = username.clone();
                async move {
                    sleep(Duration::from_millis(latency)).await;
                    match failure {
                        Some(status) => Err(FetchError::Upstream(status)),
                        None => Ok(Profile {
                            username,
                            served_on_attempt: attempt,
                        }),
                    }
                }
            },
            EnqueueOptions::new().priority(priority).label(label.clone()),
        );
        tickets.push((label, priority, attempts, ticket));
    }

    if let Some((label, _, _, ticket)) = tickets.first() {
        let id = ticket.id();
        let label = label.clone();
        let watcher = queue.clone();
        let mut changes = queue.watch();
        tokio::spawn(async move {
            let mut last: Option<StatusPhase> = None;
            while changes.changed().await.is_ok() {
                let Some(status) = watcher.status(id) else {
                    break;
                };
                let phase = status.phase();
                if phase != last {
                    if let Some(phase) = &phase {
                        info!(request = %label, "{phase}");
                    }
                    last = phase;
                }
            }
        });
    }

    if let Some(ms) = args.clear_after_ms {
        let clearer = queue.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(ms)).await;
            let cancelled = clearer.clear_queue();
            info!(cancelled, "cleared queue");
        });
    }

    let mut reports = Vec::with_capacity(tickets.len());
    for (label, priority, attempts, ticket) in tickets {
        let outcome = match ticket.await {
            Ok(profile) => Outcome::Ok { profile },
            Err(RequestError::Failed(err)) => Outcome::Failed {
                error: err.to_string(),
            },
            Err(RequestError::Cancelled) => Outcome::Cancelled,
            Err(RequestError::Aborted) => Outcome::Aborted,
        };
        reports.push(Report {
            label,
            priority,
            attempts: attempts.load(Ordering::SeqCst),
            outcome,
        });
    }

    Ok(reports)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .try_init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Simulate(args) => {
            let reports = simulate(config, args).await?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
            Ok(())
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probability_must_be_in_unit_range() {
        assert_eq!(parse_probability("0.25"), Ok(0.25));
        assert!(parse_probability("1.5").is_err());
        assert!(parse_probability("nope").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from(["pacer", "--max-concurrent", "1", "--retry-limit", "0", "config"]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.retry_limit, 0);
        assert_eq!(config.base_retry_delay_ms, 1000);
    }

    #[test]
    fn zero_concurrency_flag_is_rejected() {
        let cli = Cli::parse_from(["pacer", "--max-concurrent", "0", "config"]);
        assert!(load_config(&cli).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_without_failures_serves_everything_first_try() {
        let args = SimulateArgs {
            requests: 4,
            fail_rate: 0.0,
            latency_ms: 10,
            urgent_every: 2,
            clear_after_ms: None,
        };
        let reports = simulate(QueueConfig::default(), args).await.unwrap();

        assert_eq!(reports.len(), 4);
        for report in &reports {
            assert_eq!(report.attempts, 1, "{report:?}");
            assert!(
                matches!(&report.outcome, Outcome::Ok { profile } if profile.served_on_attempt == 1),
                "{report:?}"
            );
        }
        let priorities: Vec<i32> = reports.iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![0, 5, 0, 5]);
        assert_eq!(reports[0].label, "GET /api/profile/user0");
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_clear_cancels_requests_still_waiting() {
        let args = SimulateArgs {
            requests: 5,
            fail_rate: 0.0,
            latency_ms: 1_000,
            urgent_every: 0,
            clear_after_ms: Some(10),
        };
        let config = QueueConfig {
            max_concurrent: 2,
            ..QueueConfig::default()
        };
        let reports = simulate(config, args).await.unwrap();

        let served = reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Ok { .. }))
            .count();
        let cancelled: Vec<&Report> = reports
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Cancelled))
            .collect();
        assert_eq!(served, 2);
        assert_eq!(cancelled.len(), 3);
        assert!(cancelled.iter().all(|r| r.attempts == 0));
    }
}
