//! Recap background worker entry point.
//!
//! `recapd run` is the long-lived worker: it restores the persisted
//! session, performs an initial forced server check, and then re-checks on
//! a fixed interval. The other subcommands are one-shot operations against
//! the same core (login, logout, status, task submission) for use from
//! scripts and for exercising the client without a UI attached.

use clap::{Parser, Subcommand};
use recap_auth::AuthSessionManager;
use recap_bus::NotificationBus;
use recap_config_and_utils::{init_logging, Config, Paths};
use recap_gateway::{TaskGateway, TaskRequest};
use recap_status::ServerStatusMonitor;
use recap_storage::{CredentialStore, DiskStore, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Recap: client runtime for the Recap summarization task server.
#[derive(Parser, Debug)]
#[command(name = "recapd")]
#[command(about = "Recap client: credential lifecycle, server status, and task proxying")]
struct Args {
    /// Task server base URL.
    #[arg(long, env = "RECAP_SERVER_URL")]
    server_url: Option<String>,

    /// Base directory for runtime files (defaults to ~/.recap).
    #[arg(long, env = "RECAP_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Interval between periodic server health checks, in seconds.
    #[arg(long, env = "RECAP_POLL_INTERVAL_SECS")]
    poll_interval_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the background worker (default).
    Run,
    /// Login with the shared password.
    Login {
        /// The shared password.
        password: String,
    },
    /// Logout and clear the stored credential.
    Logout,
    /// Check server reachability and credential validity.
    Status,
    /// Submit a task to the server.
    Task {
        /// Task type (e.g. summarize_email, summarize_chat).
        task_type: String,
        /// Task payload as JSON (defaults to an empty object).
        #[arg(long, default_value = "{}")]
        data: String,
    },
}

/// Everything a subcommand needs, wired top-down with owned instances.
struct Client {
    bus: NotificationBus,
    auth: AuthSessionManager,
    monitor: ServerStatusMonitor,
    gateway: TaskGateway,
    config: Config,
}

fn build_client(args: &Args) -> anyhow::Result<Client> {
    let paths = match &args.base_dir {
        Some(dir) => Paths::with_base_dir(dir.clone()),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;

    let mut config = Config::load(&paths)?;
    if let Some(url) = &args.server_url {
        config.server_url = url.clone();
    }
    if let Some(secs) = args.poll_interval_secs {
        config.poll_interval_secs = secs;
    }
    // Fail early on an unusable server URL
    config.server_url()?;

    let fast = Arc::new(SessionStore::new());
    let durable = Arc::new(DiskStore::new(paths.store_file()));
    let store = CredentialStore::new(fast, durable);

    let bus = NotificationBus::new();
    let auth = AuthSessionManager::new(store.clone(), bus.clone(), config.server_url.clone());
    let monitor = ServerStatusMonitor::new(
        auth.clone(),
        store,
        bus.clone(),
        config.server_url.clone(),
    );
    let gateway = TaskGateway::new(auth.clone(), monitor.clone(), config.server_url.clone());

    Ok(Client {
        bus,
        auth,
        monitor,
        gateway,
        config,
    })
}

async fn run_worker(client: Client) -> anyhow::Result<()> {
    info!(server_url = %client.config.server_url, "Recap worker starting");

    // Observe the same bus UI contexts subscribe through
    let mut notifications = client.bus.subscribe();
    tokio::spawn(async move {
        while let Ok(notification) = notifications.recv().await {
            info!(kind = ?notification.kind, payload = %notification.payload, "State change");
        }
    });

    // Pull the last known status before the first push arrives
    if client.monitor.load_snapshot().is_some() {
        debug!("Starting from persisted status snapshot");
    }

    let state = client.auth.load_persisted_session().await;
    info!(
        authenticated = state.is_authenticated,
        has_credential = state.has_credential,
        "Session restored"
    );

    client.monitor.force_server_check().await;

    let mut ticker =
        tokio::time::interval(Duration::from_secs(client.config.poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                client.monitor.force_server_check().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let client = build_client(&args)?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_worker(client).await?,
        Command::Login { password } => {
            client.auth.login(&password).await?;
            let state = client.auth.get_auth_state();
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Command::Logout => {
            client.auth.load_persisted_session().await;
            client.auth.logout().await;
            println!("logged out");
        }
        Command::Status => {
            client.auth.load_persisted_session().await;
            client.monitor.force_server_check().await;
            let status = client.monitor.get_status();
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::Task { task_type, data } => {
            client.auth.load_persisted_session().await;
            let payload: serde_json::Value = serde_json::from_str(&data)?;
            let response = client
                .gateway
                .execute(TaskRequest::new(task_type, payload))
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
