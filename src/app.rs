use crate::cli::{Args, Job};
use crate::config::Config;
use crate::data::{players, store};
use crate::refresh::import::import_players;
use crate::refresh::{Pipeline, RefreshConfig, RefreshPlan, RunReport};
use crate::stats::{StatsApi, StatsSource};
use anyhow::Context;
use chrono::TimeDelta;
use sqlx::Connection;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// The run completed but at least one player could not be refreshed.
pub const EXIT_PARTIAL: u8 = 2;

/// Main application struct: configuration plus the remote client.
pub struct App {
    config: Config,
    job: Job,
    source: Arc<dyn StatsSource>,
    cancel: CancellationToken,
}

impl App {
    /// Build the API client from configuration, with CLI overrides applied.
    pub fn new(mut config: Config, args: &Args) -> Result<Self, anyhow::Error> {
        if let Some(workers) = args.workers {
            config.workers = Some(workers);
        }

        let api = StatsApi::new(&config.api_base_url, config.api_options())
            .context("Failed to create stats API client")?;

        Ok(App {
            config,
            job: args.job,
            source: Arc::new(api),
            cancel: CancellationToken::new(),
        })
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the selected job to completion and map the outcome to an exit code.
    pub async fn run(self) -> ExitCode {
        let result = match self.job.plan() {
            Some(plan) => self.refresh(plan).await.map(|report| report.has_failures()),
            None => self.import_only().await.map(|()| false),
        };

        match result {
            Ok(false) => ExitCode::SUCCESS,
            Ok(true) => {
                warn!("some players could not be refreshed");
                ExitCode::from(EXIT_PARTIAL)
            }
            Err(e) => {
                error!(error = ?e, "job failed");
                ExitCode::FAILURE
            }
        }
    }

    pub fn refresh_config(&self, plan: RefreshPlan) -> anyhow::Result<RefreshConfig> {
        let mut refresh = RefreshConfig::new(plan, self.config.store_paths());
        refresh.staleness_threshold = TimeDelta::from_std(self.config.staleness_threshold)
            .context("Staleness threshold is out of range")?;
        refresh.show_progress = self.config.show_progress;
        if let Some(workers) = self.config.workers {
            refresh.concurrency = workers;
        }
        Ok(refresh)
    }

    async fn refresh(&self, plan: RefreshPlan) -> anyhow::Result<RunReport> {
        let refresh = self.refresh_config(plan)?;
        let mut pipeline =
            Pipeline::new(refresh, self.source.clone()).with_cancellation(self.cancel.clone());

        let report = pipeline.run().await?;
        if report.cancelled > 0 {
            warn!(cancelled = report.cancelled, "run was interrupted");
        }
        for sink in &report.sinks {
            info!(
                sink = sink.sink,
                written = sink.written,
                errors = sink.errors,
                "sink summary"
            );
        }
        Ok(report)
    }

    /// The standalone player import; unlike the combined job, failure here is fatal.
    async fn import_only(&self) -> anyhow::Result<()> {
        let path = self.config.store_paths().players();
        let mut conn = store::connect(&path).await?;
        players::ensure_table(&mut conn).await?;

        let counts = import_players(self.source.as_ref(), &mut conn).await?;
        conn.close().await.context("Failed to close players store")?;
        info!(
            inserted = counts.inserted,
            updated = counts.updated,
            "player import finished"
        );
        Ok(())
    }
}

/// Cancel `token` on Ctrl-C or SIGTERM so in-flight players finish and queues drain.
pub fn cancel_on_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, finishing in-flight players");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
