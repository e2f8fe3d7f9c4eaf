use clap::Parser;
use multiablo::{cli::Cli, reporter::LogReporter, setup};
use orchestrator::{Monitor, Services};
use std::io::BufRead;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy)]
enum Shutdown {
    Interrupted,
    EnterPressed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // NOTE: The verbosity flag takes precedence over the environment variable.
    // `MULTIABLO_LOG` can still set levels per crate, e.g.
    // `MULTIABLO_LOG=kernel=trace multiablo` traces the native layer only.
    let env_filter = EnvFilter::builder()
        .with_env_var("MULTIABLO_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_target(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();

    let base = setup::exe_dir()?;
    let config = setup::load_config(cli.config.as_deref(), &base, cli.no_warden)?;
    debug!(?config, ?cli);

    if cli.dump_config {
        let toml = config.to_toml()?;
        #[allow(clippy::print_stdout)]
        {
            print!("{toml}");
        }
        return Ok(());
    }

    let reporter = Arc::new(LogReporter::new());
    let services = Services::system(&config, reporter)?;
    let monitor = Monitor::new(config, services);

    let (shutdown_tx, shutdown_rx) = flume::bounded(4);
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = ctrl_c_tx.send_async(Shutdown::Interrupted).await;
            }
            Err(err) => error!("failed to listen for Ctrl-C: {}", err),
        }
    });
    watch_stdin(shutdown_tx)?;

    monitor.start().await;
    info!("Monitoring started. Press Enter or Ctrl-C to exit.");

    let reason = shutdown_rx.recv_async().await?;
    debug!(?reason, "shutdown requested");

    monitor.stop().await?;
    info!(
        handles_closed = monitor.handles_closed(),
        agents_terminated = monitor.agents_terminated(),
        "Monitoring stopped"
    );
    Ok(())
}

/// Send [`Shutdown::EnterPressed`] on the first line read from stdin.
///
/// Runs on a plain thread since the read cannot be cancelled. A closed stdin
/// leaves Ctrl-C as the only way out.
fn watch_stdin(tx: flume::Sender<Shutdown>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("stdin-watch".into())
        .spawn(move || {
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) => debug!("stdin closed, waiting for Ctrl-C"),
                Ok(_) => {
                    let _ = tx.send(Shutdown::EnterPressed);
                }
                Err(err) => warn!("failed to read stdin: {}", err),
            }
        })?;
    Ok(())
}
