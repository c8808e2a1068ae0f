use std::env;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;

use tether::checkout::{CheckoutAttempt, CheckoutVerifier};
use tether::client::backend::Backend;
use tether::client::http::HttpBackend;
use tether::config::{get_config, TetherConfig};
use tether::devices::DeviceSessionRegistry;
use tether::entitlement::EntitlementMonitor;
use tether::errors::{TetherError, TetherResult};
use tether::hardware::get_hardware_id;
use tether::identity::{Identity, SessionIdentity};
use tether::logging::init_logging;
use tether::notice::{ChannelSink, Notice, NoticeLevel, NoticeSink};
use tether::pairing::{PairingSession, PairingSnapshot};
use tether::scheduler::Scheduler;

/// Drive the Tether flows against a live backend.
///
/// The signed-in account is read from `TETHER_ACCOUNT_ID`, `TETHER_ID_TOKEN`
/// and optionally `TETHER_DISPLAY_NAME`.
#[derive(Debug, Parser)]
#[command(name = "tether_client", version, about)]
struct Cli {
    /// Only print results, no log output
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Issue a pairing code and wait until a device connects or it expires
    Pair,
    /// List paired devices
    Devices,
    /// Disconnect one paired device, or all of them
    Revoke(RevokeArgs),
    /// Check access for this machine
    Entitlement,
    /// Verify a completed checkout by session id or callback link
    Checkout {
        /// `cs_...` session id, or a `<scheme>://checkout-success?session_id=` link
        target: String,
    },
}

#[derive(Debug, Args)]
struct RevokeArgs {
    /// Session id to disconnect
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    session_id: Option<String>,

    /// Disconnect every paired device
    #[arg(long)]
    all: bool,
}

fn identity_from_env() -> Option<Identity> {
    let account_id = env::var("TETHER_ACCOUNT_ID").ok().filter(|v| !v.is_empty())?;
    let id_token = env::var("TETHER_ID_TOKEN").ok().filter(|v| !v.is_empty())?;

    let identity = Identity::new(account_id, id_token);
    Some(match env::var("TETHER_DISPLAY_NAME") {
        Ok(name) if !name.is_empty() => identity.with_display_name(name),
        _ => identity,
    })
}

struct App {
    config: TetherConfig,
    scheduler: Scheduler,
    backend: Arc<dyn Backend>,
    identity: Arc<SessionIdentity>,
    notices: Arc<dyn NoticeSink>,
    registry: Arc<DeviceSessionRegistry>,
    entitlement: Arc<EntitlementMonitor>,
}

impl App {
    fn new(config: TetherConfig, notices: Arc<dyn NoticeSink>) -> TetherResult<Self> {
        let backend: Arc<dyn Backend> = Arc::new(HttpBackend::new(&config.api)?);
        let identity = Arc::new(SessionIdentity::new(identity_from_env()));
        let registry = Arc::new(DeviceSessionRegistry::new(
            Arc::clone(&backend),
            identity.clone(),
            Arc::clone(&notices),
        ));
        let entitlement = Arc::new(EntitlementMonitor::new(
            Arc::clone(&backend),
            Arc::clone(&registry),
            Arc::clone(&notices),
            &config.entitlement,
        ));

        Ok(Self {
            config,
            scheduler: Scheduler::new(),
            backend,
            identity,
            notices,
            registry,
            entitlement,
        })
    }

    async fn pair(&self) -> TetherResult<()> {
        let session = PairingSession::new(
            &self.scheduler,
            Arc::clone(&self.backend),
            self.identity.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.notices),
            self.config.pairing.clone(),
        );

        let code = session.start().await?;
        println!("Pairing code: {}", code.code);
        println!("Open on the other device: {}", code.connect_url);
        println!("Expires at: {}", code.expires_at.to_rfc3339());

        let mut updates = session.subscribe();
        tokio::select! {
            snapshot = wait_for_terminal(&mut updates) => {
                println!("Pairing finished: {:?}", snapshot.status);
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
            }
        }

        Ok(())
    }

    async fn devices(&self) -> TetherResult<()> {
        let sessions = self.registry.list().await?;
        if sessions.is_empty() {
            println!("No paired devices");
        }
        for session in sessions {
            println!(
                "{}  {}  last active {}",
                session.session_id,
                session.device_info.describe(),
                session
                    .last_active()
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string())
            );
        }
        Ok(())
    }

    async fn revoke(&self, args: RevokeArgs) -> TetherResult<()> {
        if args.all {
            let report = self.registry.revoke_all().await?;
            println!("Disconnected {} device(s)", report.revoked.len());
            for failure in &report.failed {
                println!("Failed {}: {}", failure.session_id, failure.reason);
            }
            return Ok(());
        }

        let session_id = args.session_id.ok_or_else(|| {
            TetherError::ConfigError("a session id or --all is required".to_string())
        })?;
        let outcome = self.registry.revoke_one(&session_id).await?;
        println!("{session_id}: {outcome:?}");
        Ok(())
    }

    async fn entitlement(&self) -> TetherResult<()> {
        let state = self.entitlement.refresh(&get_hardware_id()).await;
        println!("Access: {:?}", state.tier());
        if let Some(days) = state.days_remaining {
            println!("Trial days remaining: {days}");
        }
        if let Some(reason) = state.no_trial_reason.as_deref() {
            println!("No trial: {reason}");
        }
        Ok(())
    }

    async fn checkout(&self, target: &str) -> TetherResult<()> {
        let verifier = CheckoutVerifier::new(
            &self.scheduler,
            Arc::clone(&self.backend),
            self.identity.clone(),
            Arc::clone(&self.entitlement),
            Arc::clone(&self.notices),
            get_hardware_id(),
            &self.config.checkout,
        );

        let mut progress = if target.contains("://") {
            match verifier.handle_callback(target) {
                Some(rx) => rx,
                None => {
                    println!("Nothing to verify");
                    return Ok(());
                }
            }
        } else {
            verifier.verify(target)
        };

        let attempt = wait_for_checkout(&mut progress).await;
        println!(
            "{}: {:?} after {} retr{}",
            attempt.session_id,
            attempt.outcome,
            attempt.retry_count,
            if attempt.retry_count == 1 { "y" } else { "ies" }
        );
        Ok(())
    }
}

async fn wait_for_terminal(rx: &mut watch::Receiver<PairingSnapshot>) -> PairingSnapshot {
    if let Ok(snapshot) = rx.wait_for(|s| s.status.is_terminal()).await {
        return snapshot.clone();
    }
    rx.borrow().clone()
}

async fn wait_for_checkout(rx: &mut watch::Receiver<CheckoutAttempt>) -> CheckoutAttempt {
    if let Ok(attempt) = rx.wait_for(|a| a.outcome.is_terminal()).await {
        return attempt.clone();
    }
    rx.borrow().clone()
}

fn print_notice(notice: &Notice) {
    let tag = match notice.level() {
        NoticeLevel::Info => "info",
        NoticeLevel::Success => "ok",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "error",
    };
    let marker = if notice.is_persistent() { "!! " } else { "" };

    match notice.duration() {
        Some(wait) => eprintln!("{marker}[{tag}] {notice} ({}s)", wait.as_secs()),
        None => eprintln!("{marker}[{tag}] {notice}"),
    }
}

#[tokio::main]
async fn main() -> TetherResult<()> {
    let cli = Cli::parse();
    let mut config = get_config()?.clone();

    if !cli.quiet {
        config.logging.enabled = true;
        init_logging(&config.logging);
    }

    let (sink, mut notices) = ChannelSink::new();
    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            print_notice(&notice);
        }
    });

    let app = App::new(config, Arc::new(sink))?;

    let result = match cli.command {
        Commands::Pair => app.pair().await,
        Commands::Devices => app.devices().await,
        Commands::Revoke(args) => app.revoke(args).await,
        Commands::Entitlement => app.entitlement().await,
        Commands::Checkout { target } => app.checkout(&target).await,
    };

    app.scheduler.shutdown();
    drop(app);
    let _ = printer.await;

    result
}
