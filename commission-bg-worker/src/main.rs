use std::{
    env,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use common::telegram::send_telegram_message;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use warp::Filter;

const LOCK_KEY: &str = "wallet:commission-worker:lock";
const LOCK_TTL_SECS: u64 = 600;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    // Periodic loop with the status server
    Run,

    // Single tick and exit
    Once,
}

struct WorkerConfig {
    wallet_api_url: String,
    admin_token: String,
    redis_url: String,
    run_interval_secs: u64,
}

impl WorkerConfig {
    fn from_env() -> Self {
        let wallet_api_url =
            env::var("WALLET_API_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());
        let admin_token = env::var("ADMIN_TOKEN").expect("ADMIN_TOKEN must be set for admin calls");
        let redis_url =
            env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let run_interval_secs = env::var("RUN_INTERVAL_SECS")
            .unwrap_or_else(|_| "3600".to_string())
            .parse::<u64>()
            .expect("RUN_INTERVAL_SECS must be a valid number of seconds");

        WorkerConfig {
            wallet_api_url,
            admin_token,
            redis_url,
            run_interval_secs,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommissionRunOutcome {
    period: String,
    processed: u32,
    failed: u32,
    skipped: u32,
    finished: bool,
    payments: u64,
}

#[derive(Debug, Deserialize)]
struct SweepOutcome {
    closed: u64,
    settled: u64,
    failed: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
struct WorkerStatus {
    last_tick_at: Option<DateTime<Utc>>,
    last_period: Option<String>,
    commissions_processed: u32,
    commissions_failed: u32,
    commissions_skipped: u32,
    settlements_closed: u64,
    settlements_settled: u64,
    ticks: u64,
    last_error: Option<String>,
}

type SharedStatus = Arc<Mutex<WorkerStatus>>;

struct WalletApiClient {
    client: reqwest::Client,
    api_url: String,
    admin_token: String,
}

impl WalletApiClient {
    fn new(api_url: String, admin_token: String) -> Self {
        let client = reqwest::Client::new();
        WalletApiClient {
            client,
            api_url,
            admin_token,
        }
    }

    async fn run_commissions(&self) -> anyhow::Result<CommissionRunOutcome> {
        let response = self
            .client
            .post(format!("{}/admin/commissions/run", self.api_url))
            .header("X-Admin-Token", &self.admin_token)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn settlement_sweep(&self) -> anyhow::Result<SweepOutcome> {
        let response = self
            .client
            .post(format!("{}/admin/settlements/sweep", self.api_url))
            .header("X-Admin-Token", &self.admin_token)
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }
}

/// SET NX EX so overlapping workers never drive the same tick. The TTL
/// reclaims the lock if a holder dies mid-run.
async fn acquire_lock(client: &redis::Client, holder: &str) -> anyhow::Result<bool> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let reply: Option<String> = redis::cmd("SET")
        .arg(LOCK_KEY)
        .arg(holder)
        .arg("NX")
        .arg("EX")
        .arg(LOCK_TTL_SECS)
        .query_async(&mut conn)
        .await?;

    Ok(reply.is_some())
}

async fn release_lock(client: &redis::Client) -> anyhow::Result<()> {
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: i64 = redis::cmd("DEL").arg(LOCK_KEY).query_async(&mut conn).await?;

    Ok(())
}

async fn run_tick(api: &WalletApiClient, status: &SharedStatus) -> anyhow::Result<()> {
    let commissions = api.run_commissions().await?;
    info!(
        "Commission run {} processed {} users ({} failed, {} skipped, {} payments, finished: {})",
        commissions.period,
        commissions.processed,
        commissions.failed,
        commissions.skipped,
        commissions.payments,
        commissions.finished
    );

    let sweep = api.settlement_sweep().await?;
    info!(
        "Settlement sweep closed {} and settled {} predictions ({} failed)",
        sweep.closed, sweep.settled, sweep.failed
    );

    {
        let mut snapshot = status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshot.last_tick_at = Some(Utc::now());
        snapshot.last_period = Some(commissions.period.clone());
        snapshot.commissions_processed = commissions.processed;
        snapshot.commissions_failed = commissions.failed;
        snapshot.commissions_skipped = commissions.skipped;
        snapshot.settlements_closed = sweep.closed;
        snapshot.settlements_settled = sweep.settled;
        snapshot.ticks += 1;
        snapshot.last_error = None;
    }

    let message = format!(
        "Commission run {}: {} processed, {} failed, {} skipped, {} payments. Sweep: {} closed, {} settled.",
        commissions.period,
        commissions.processed,
        commissions.failed,
        commissions.skipped,
        commissions.payments,
        sweep.closed,
        sweep.settled
    );
    if let Err(e) = send_telegram_message(&message).await {
        warn!("Failed to send the telegram summary: {}", e);
    }

    Ok(())
}

async fn guarded_tick(api: &WalletApiClient, redis_client: &redis::Client, status: &SharedStatus) {
    let holder = format!("worker-{}", std::process::id());
    match acquire_lock(redis_client, &holder).await {
        Ok(true) => {
            if let Err(e) = run_tick(api, status).await {
                error!("Worker tick failed: {}", e);
                let mut snapshot = status
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                snapshot.last_error = Some(e.to_string());
            }
            if let Err(e) = release_lock(redis_client).await {
                warn!("Failed to release the worker lock: {}", e);
            }
        }
        Ok(false) => info!("Another worker holds the lock, skipping this tick"),
        Err(e) => {
            error!("Redis lock error: {}", e);
            let mut snapshot = status
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            snapshot.last_error = Some(e.to_string());
        }
    }
}

fn spawn_status_server(status: SharedStatus) {
    let health = warp::path!("health").map(|| "OK");
    let status_route = warp::path!("status").map(move || {
        let snapshot = status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        warp::reply::json(&snapshot)
    });

    info!("Serving worker status on 0.0.0.0:9100");
    tokio::spawn(warp::serve(health.or(status_route)).run(([0, 0, 0, 0], 9100)));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = WorkerConfig::from_env();

    info!("Starting the commission background worker");
    let api = WalletApiClient::new(config.wallet_api_url.clone(), config.admin_token.clone());
    let redis_client = redis::Client::open(config.redis_url.clone())?;
    let status: SharedStatus = Arc::new(Mutex::new(WorkerStatus::default()));

    match cli.command {
        Commands::Run => {
            spawn_status_server(status.clone());
            let interval = Duration::from_secs(config.run_interval_secs);
            loop {
                guarded_tick(&api, &redis_client, &status).await;
                sleep(interval).await;
            }
        }
        Commands::Once => {
            guarded_tick(&api, &redis_client, &status).await;
        }
    }

    Ok(())
}
