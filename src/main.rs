use clap::Parser;
use statsync::app::{App, cancel_on_shutdown_signal};
use statsync::cli::Args;
use statsync::config::Config;
use statsync::logging::setup_logging;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Config is needed before logging, so a bad config is reported on stderr directly.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("statsync: {e:?}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config.log_level, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        job = ?args.job,
        data_dir = %config.data_dir.display(),
        "starting statsync"
    );

    let app = match App::new(config, &args) {
        Ok(app) => app,
        Err(e) => {
            error!(error = ?e, "failed to initialize application");
            return ExitCode::FAILURE;
        }
    };

    cancel_on_shutdown_signal(app.cancellation());
    app.run().await
}
