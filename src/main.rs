//! fps-agent-runner - drive agents through episodes of the FPS simulation
//!
//! Starts the engine (unless told not to), opens a session, plays the
//! requested number of episodes and prints a JSON run summary on stdout.

use std::io;
use std::process::ExitStatus;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fps_agent_runner::config::{Cli, Config, LogFormat};
use fps_agent_runner::engine::{EngineLauncher, EngineProcess};
use fps_agent_runner::game::{EpisodeRunner, GameConfig, Policy};
use fps_agent_runner::session::{RemoteSession, Session};
use fps_agent_runner::telemetry::RunSummary;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Config::from_env()?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.log_level.clone());
    init_tracing(&log_level, cli.log_format);

    let game_config = cli.game_config()?;
    let mut policy = cli.policy()?;

    // Signals only raise a flag; the episode loop checks it between requests
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        stop_tx.send_replace(true);
    });

    let runner = EpisodeRunner::new(cli.run_options()).with_shutdown(stop_rx.clone());

    let host = cli
        .host
        .clone()
        .unwrap_or_else(|| settings.engine_host.clone());
    let addr = format!("{}:{}", host, game_config.server_port);

    info!(
        scenario = ?cli.scenario,
        addr = %addr,
        game_mode = ?game_config.game_mode,
        agents = game_config.num_agents(),
        episodes = runner.options().num_episodes,
        config_hash = %game_config.fingerprint(),
        "Starting fps-agent-runner"
    );

    let mut engine = if cli.no_launch {
        None
    } else {
        Some(EngineLauncher::from_config(&game_config).spawn()?)
    };

    let result = drive(
        &addr,
        game_config,
        &settings,
        &mut engine,
        stop_rx,
        &runner,
        policy.as_mut(),
    )
    .await;

    if let Some(engine) = engine {
        if let Err(e) = engine.shutdown().await {
            warn!(error = %e, "Failed to stop engine");
        }
    }

    let summary = result?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Connect, play and always close the session
async fn drive(
    addr: &str,
    config: GameConfig,
    settings: &Config,
    engine: &mut Option<EngineProcess>,
    mut stop: watch::Receiver<bool>,
    runner: &EpisodeRunner,
    policy: &mut dyn Policy,
) -> anyhow::Result<RunSummary> {
    // Nothing is on the wire yet, so connecting can be abandoned outright
    let mut session = tokio::select! {
        session = RemoteSession::connect(addr, config, settings) => session?,
        status = engine_exit(engine) => {
            anyhow::bail!("Engine exited before accepting a connection: {:?}", status)
        }
        Ok(_) = stop.wait_for(|stop| *stop) => {
            anyhow::bail!("Interrupted while connecting to the engine")
        }
    };
    let mut summary = RunSummary::start();

    let outcome = play(&mut session, runner, policy, &mut summary).await;

    if let Err(e) = session.close().await {
        warn!(error = %e, "Failed to close session cleanly");
    }
    summary.finish();
    outcome?;

    info!(
        episodes = summary.episodes.len(),
        total_steps = summary.total_steps(),
        interrupted = summary.interrupted,
        "Run complete"
    );
    Ok(summary)
}

/// Resolves when a launched engine dies; never resolves without one
async fn engine_exit(engine: &mut Option<EngineProcess>) -> io::Result<ExitStatus> {
    match engine {
        Some(engine) => engine.exited().await,
        None => std::future::pending().await,
    }
}

async fn play(
    session: &mut RemoteSession,
    runner: &EpisodeRunner,
    policy: &mut dyn Policy,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    session.init().await?;

    let rtt = session.ping().await?;
    info!(
        session_id = %session.session_id(),
        rtt_ms = rtt.as_millis() as u64,
        "Engine reachable"
    );

    runner.run(session, policy, summary).await?;
    if summary.interrupted {
        warn!("Run interrupted, stopped between requests");
    }
    Ok(())
}

/// Initialize tracing/logging on stderr so stdout only carries the summary
fn init_tracing(log_level: &str, format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received terminate signal");
        }
    }
}
