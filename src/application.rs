//! Daemon lifecycle: wiring, startup, signal handling, shutdown.
//!
//! The application layer owns everything that outlives a controller
//! restart: the configuration hub, the state store, the notification
//! loop, and the key event bus. The controller itself is disposable and
//! lives under the supervisor.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    cli::Cli,
    controller::{self, RunConfig, Shared},
    event::KeyBus,
    hub::ConfigHub,
    notify::{self, LogSink, NotificationSink},
    persist::{Registry, StateStore},
    settings::Features,
    supervisor::{ChildSpec, SHUTDOWN_GRACE, Supervisor},
};

const DEFAULT_STATE_FILE: &str = "/var/lib/rogctld/state.json";

/// The assembled daemon.
pub struct Application {
    cli: Cli,
    sink: Box<dyn NotificationSink>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the daemon until SIGINT or a fatal subsystem failure.
    pub async fn run(self) -> Result<()> {
        let token = CancellationToken::new();

        let (notify, notifier) = notify::channel(self.sink);
        let notify_handle = tokio::spawn(notifier.serve(token.clone()));

        let hub = Arc::new(ConfigHub::new(seed_features(&self.cli)));
        let store = Arc::new(StateStore::open(state_file(&self.cli))?);

        // Saved feature overrides win over command-line seeding.
        let persistent: Vec<Arc<dyn Registry>> = vec![hub.clone()];
        store.restore(&persistent).await?;

        let keys = KeyBus::new();
        let shared = Shared {
            hub: hub.clone(),
            store: store.clone(),
            notify: notify.clone(),
            keys,
        };
        let run_config = RunConfig {
            dry_run: self.cli.dry_run,
        };

        let supervisor = Supervisor::new(notify).child(ChildSpec::new(
            "controller",
            move |token| controller::start(run_config.clone(), shared.clone(), token),
        ));
        let mut tree = tokio::spawn({
            let token = token.clone();
            async move { supervisor.start(token).await }
        });

        info!("rogctld running");
        let outcome = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for SIGINT")?;
                info!("interrupt received, shutting down");
                token.cancel();
                match tokio::time::timeout(grace(), &mut tree).await {
                    Ok(joined) => joined.context("supervision tree panicked")?,
                    Err(_) => {
                        warn!("supervision tree did not stop within the shutdown grace");
                        Ok(())
                    }
                }
            }
            joined = &mut tree => {
                token.cancel();
                joined.context("supervision tree panicked")?
            }
        };

        if let Err(e) = store.snapshot(&persistent).await {
            warn!("failed to save state on shutdown: {e:#}");
        }
        let _ = tokio::time::timeout(Duration::from_millis(100), notify_handle).await;

        outcome
    }
}

fn state_file(cli: &Cli) -> PathBuf {
    cli.state_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE))
}

/// Turns command-line flags into the initial feature set.
fn seed_features(cli: &Cli) -> Features {
    let mut features = Features::default();
    if !cli.remap {
        features.fn_remap.clear();
    }
    features.auto_thermal.enabled = cli.auto_thermal;
    if !cli.rog.is_empty() {
        features.rog_remap = cli.rog.clone();
    }
    features
}

fn grace() -> Duration {
    // A little headroom on top of what the children are promised.
    SHUTDOWN_GRACE + Duration::from_millis(200)
}

/// Fluent construction for [`Application`].
pub struct ApplicationBuilder {
    cli: Option<Cli>,
    sink: Option<Box<dyn NotificationSink>>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self {
            cli: None,
            sink: None,
        }
    }

    pub fn with_cli(mut self, cli: Cli) -> Self {
        self.cli = Some(cli);
        self
    }

    /// Replaces the log-backed notification sink, e.g. with an OS toast
    /// integration.
    pub fn with_sink(mut self, sink: Box<dyn NotificationSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn build(self) -> Application {
        Application {
            cli: self.cli.unwrap_or_default(),
            sink: self.sink.unwrap_or_else(|| Box::new(LogSink)),
        }
    }
}
