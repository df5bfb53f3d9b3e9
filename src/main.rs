use axum::http::HeaderName;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use permit_recon::application::engine::ReconciliationEngine;
use permit_recon::application::signature::WebhookVerifier;
use permit_recon::config::{
    EngineConfig, GatewayConfig, PaymentConfig, RecoveryConfig, SweepConfig, VelocityConfig,
    WebhookConfig,
};
use permit_recon::domain::permit::Application;
use permit_recon::domain::ports::{
    ApplicationStore, ApplicationStoreBox, PaymentEventStore, PaymentEventStoreBox, PaymentGatewayRef,
};
use permit_recon::error::PaymentError;
use permit_recon::infrastructure::http_gateway::HttpGateway;
use permit_recon::infrastructure::in_memory::InMemoryStore;
#[cfg(feature = "storage-rocksdb")]
use permit_recon::infrastructure::rocksdb::RocksDBStore;
use permit_recon::infrastructure::simulated_gateway::SimulatedGateway;
use permit_recon::infrastructure::velocity_store::InMemoryVelocityStore;
use permit_recon::interfaces::csv::application_reader::ApplicationReader;
use permit_recon::interfaces::csv::event_writer::EventWriter;
use permit_recon::interfaces::http::{AppState, router};
use rust_decimal::Decimal;
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true, env = "PERMIT_DB_PATH")]
    db_path: Option<PathBuf>,

    /// CSV file of `application_id,user_id` rows to register before running.
    #[arg(long, global = true)]
    seed: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API and run the reconciliation sweeper.
    Serve {
        #[arg(long, env = "PERMIT_LISTEN", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,

        /// Header carrying the webhook signature.
        #[arg(long, env = "PERMIT_SIGNATURE_HEADER", default_value = "stripe-signature")]
        signature_header: String,

        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Run a single reconciliation sweep and print its report.
    Sweep {
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Write the payment event log to stdout as CSV.
    ExportEvents,
    /// Check a webhook signature offline.
    VerifyWebhook {
        /// File holding the raw request body.
        #[arg(long)]
        payload: PathBuf,

        /// Value of the signature header.
        #[arg(long)]
        signature: String,

        #[arg(long, env = "PERMIT_WEBHOOK_SECRET", hide_env_values = true)]
        webhook_secret: String,

        #[arg(long, default_value_t = 300)]
        tolerance_secs: u64,

        /// Unix time to verify at. Defaults to now.
        #[arg(long)]
        at: Option<i64>,
    },
}

#[derive(Args)]
struct EngineArgs {
    #[arg(long, env = "PERMIT_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: String,
    #[arg(long, default_value_t = 300)]
    webhook_tolerance_secs: u64,

    /// Base URL of the payment gateway. The simulated gateway is used when unset.
    #[arg(long, env = "PERMIT_GATEWAY_URL")]
    gateway_url: Option<String>,
    #[arg(long, env = "PERMIT_GATEWAY_API_KEY", hide_env_values = true, default_value = "")]
    gateway_api_key: String,
    #[arg(long, default_value_t = 10)]
    gateway_timeout_secs: u64,

    #[arg(long, default_value_t = 3600)]
    velocity_window_secs: u64,
    #[arg(long, default_value_t = 5)]
    max_attempts_per_user: u32,
    #[arg(long, default_value_t = 10)]
    max_attempts_per_email: u32,
    #[arg(long, default_value_t = 20)]
    max_attempts_per_ip: u32,
    #[arg(long, default_value_t = 10)]
    max_attempts_per_card: u32,
    #[arg(long)]
    max_amount_per_user: Option<Decimal>,

    /// How long after a recorded failure a gateway success may still settle.
    #[arg(long, default_value_t = 7 * 24 * 3600)]
    reopen_window_secs: u64,
    #[arg(long, default_value_t = 900)]
    read_recovery_after_secs: u64,
    #[arg(long, default_value_t = 2000)]
    lock_wait_ms: u64,
    #[arg(long, default_value_t = 3)]
    lock_retries: u32,

    #[arg(long, default_value_t = 300)]
    sweep_interval_secs: u64,
    #[arg(long, default_value_t = 900)]
    stale_after_secs: u64,
    #[arg(long, default_value_t = 100)]
    sweep_batch_limit: usize,
    #[arg(long)]
    expire_unpaid_after_secs: Option<u64>,

    #[arg(long, env = "PERMIT_CURRENCY", default_value = "mxn")]
    currency: String,
}

impl EngineArgs {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            webhook: WebhookConfig {
                signing_secret: self.webhook_secret.clone(),
                tolerance: Duration::from_secs(self.webhook_tolerance_secs),
            },
            gateway: GatewayConfig {
                base_url: self.gateway_url.clone().unwrap_or_default(),
                api_key: self.gateway_api_key.clone(),
                timeout: Duration::from_secs(self.gateway_timeout_secs),
            },
            velocity: VelocityConfig {
                window: Duration::from_secs(self.velocity_window_secs),
                max_attempts_per_user: self.max_attempts_per_user,
                max_attempts_per_email: self.max_attempts_per_email,
                max_attempts_per_ip: self.max_attempts_per_ip,
                max_attempts_per_card: self.max_attempts_per_card,
                max_amount_per_user: self.max_amount_per_user,
            },
            recovery: RecoveryConfig {
                reopen_window: Duration::from_secs(self.reopen_window_secs),
                read_recovery_after: Duration::from_secs(self.read_recovery_after_secs),
                lock_wait: Duration::from_millis(self.lock_wait_ms),
                lock_retries: self.lock_retries,
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(self.sweep_interval_secs),
                stale_after: Duration::from_secs(self.stale_after_secs),
                batch_limit: self.sweep_batch_limit,
                expire_unpaid_after: self.expire_unpaid_after_secs.map(Duration::from_secs),
            },
            payment: PaymentConfig {
                currency: self.currency.clone(),
            },
        }
    }

    fn gateway(&self, config: &GatewayConfig) -> Result<PaymentGatewayRef> {
        if self.gateway_url.is_some() {
            let gateway = HttpGateway::new(config).into_diagnostic()?;
            Ok(Arc::new(gateway))
        } else {
            warn!("No gateway URL configured, using the simulated gateway");
            Ok(Arc::new(SimulatedGateway::new()))
        }
    }
}

fn open_stores(db_path: Option<PathBuf>) -> Result<(ApplicationStoreBox, PaymentEventStoreBox)> {
    if let Some(db_path) = db_path {
        #[cfg(feature = "storage-rocksdb")]
        {
            let store = RocksDBStore::open(db_path).into_diagnostic()?;
            return Ok((Box::new(store.clone()), Box::new(store)));
        }

        #[cfg(not(feature = "storage-rocksdb"))]
        {
            let _ = db_path;
            eprintln!(
                "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
        }
    }

    let store = InMemoryStore::new();
    Ok((Box::new(store.clone()), Box::new(store)))
}

async fn seed_applications(path: PathBuf, applications: &ApplicationStoreBox) -> Result<()> {
    let file = File::open(path).into_diagnostic()?;
    let mut imported = 0usize;
    for row in ApplicationReader::new(file).applications() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable seed row");
                continue;
            }
        };
        match applications
            .insert(Application::new(row.application_id, row.user_id, Utc::now()))
            .await
        {
            Ok(()) => imported += 1,
            Err(PaymentError::ApplicationExists(id)) => {
                debug!(application_id = %id, "Seed application already exists")
            }
            Err(e) => return Err(e).into_diagnostic(),
        }
    }
    info!(imported, "Seed applications registered");
    Ok(())
}

fn build_engine(
    args: &EngineArgs,
    applications: ApplicationStoreBox,
    events: PaymentEventStoreBox,
) -> Result<Arc<ReconciliationEngine>> {
    let config = args.config();
    let gateway = args.gateway(&config.gateway)?;
    let engine = ReconciliationEngine::new(
        config,
        applications,
        events,
        Box::new(InMemoryVelocityStore::new()),
        gateway,
    )
    .into_diagnostic()?;
    Ok(Arc::new(engine))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let (applications, events) = open_stores(cli.db_path)?;
    if let Some(seed) = cli.seed {
        seed_applications(seed, &applications).await?;
    }

    match cli.command {
        Command::Serve {
            listen,
            signature_header,
            engine,
        } => {
            let signature_header = HeaderName::try_from(signature_header.to_ascii_lowercase())
                .map_err(|e| miette!("Invalid signature header name: {}", e))?;
            let engine = build_engine(&engine, applications, events)?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let sweeper = engine.sweeper().clone();
            let sweep_task = tokio::spawn(async move { sweeper.run(shutdown_rx).await });

            let listener = tokio::net::TcpListener::bind(listen).await.into_diagnostic()?;
            info!(%listen, "Listening");
            axum::serve(listener, router(AppState::new(engine, signature_header)))
                .with_graceful_shutdown(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!(error = %e, "Could not listen for shutdown signal");
                    }
                    info!("Shutting down");
                    let _ = shutdown_tx.send(true);
                })
                .await
                .into_diagnostic()?;

            sweep_task.await.into_diagnostic()?;
        }
        Command::Sweep { engine } => {
            let engine = build_engine(&engine, applications, events)?;
            let report = engine.sweeper().sweep_once(Utc::now()).await.into_diagnostic()?;
            println!("{}", serde_json::to_string(&report).into_diagnostic()?);
        }
        Command::ExportEvents => {
            let events = events.all_events().await.into_diagnostic()?;
            let stdout = io::stdout();
            let mut writer = EventWriter::new(stdout.lock());
            writer.write_events(&events).into_diagnostic()?;
        }
        Command::VerifyWebhook {
            payload,
            signature,
            webhook_secret,
            tolerance_secs,
            at,
        } => {
            let body = std::fs::read(payload).into_diagnostic()?;
            let verifier = WebhookVerifier::new(webhook_secret, Duration::from_secs(tolerance_secs));
            verifier
                .verify(&body, &signature, at.unwrap_or_else(|| Utc::now().timestamp()))
                .into_diagnostic()?;
            println!("signature valid");
        }
    }

    Ok(())
}
