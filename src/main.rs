//! MJPEG streaming CLI: `send` on the camera host, `receive` on the viewer.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mjpeg_link::config::Config;
use mjpeg_link::distributor::FrameDistributor;
use mjpeg_link::recorder::Recorder;
use mjpeg_link::state::{status_channel, StatusRx};
use mjpeg_link::{receiver, sender, web};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "mjpeg-link")]
#[command(about = "MJPEG-over-TCP streaming between a camera host and a viewer")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture from the camera and stream to the receiver
    Send {
        /// Receiver address (IP or hostname), overrides the config file
        #[arg(long)]
        host: Option<String>,
    },
    /// Accept the stream, decode frames, and serve the re-broadcast
    Receive,
    /// Write a default configuration file and exit
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    if let Command::Init = cli.command {
        if std::path::Path::new(&cli.config).exists() {
            bail!("{} already exists, not overwriting", cli.config);
        }
        Config::default()
            .save(&cli.config)
            .with_context(|| format!("writing {}", cli.config))?;
        info!(path = %cli.config, "default configuration written");
        return Ok(());
    }

    let config = if std::path::Path::new(&cli.config).exists() {
        Config::load(&cli.config)
            .with_context(|| format!("loading configuration from {}", cli.config))?
    } else {
        info!(path = %cli.config, "config file not found, using defaults");
        Config::default()
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Command::Send { host } => run_send(config, host, cancel).await,
        Command::Receive => run_receive(config, cancel).await,
        Command::Init => unreachable!("handled above"),
    }
}

async fn run_send(mut config: Config, host: Option<String>, cancel: CancellationToken) -> Result<()> {
    if let Some(host) = host {
        config.sender.host = host;
    }
    if config.sender.host.is_empty() {
        bail!("no receiver address: set [sender].host in the config file or pass --host");
    }

    let (status_tx, status_rx) = status_channel();
    spawn_status_logger(status_rx);

    sender::run_with_reconnect(&config.sender, &status_tx, &cancel).await?;
    Ok(())
}

async fn run_receive(config: Config, cancel: CancellationToken) -> Result<()> {
    let distributor = Arc::new(FrameDistributor::new());
    let (status_tx, status_rx) = status_channel();
    spawn_status_logger(status_rx.clone());

    let (recorder, recorder_handle) = Recorder::new(
        Arc::clone(&distributor),
        config.receiver.record_dir.clone(),
        config.receiver.record_fps,
        config.receiver.jpeg_quality,
    );
    let recorder_task = tokio::spawn(recorder.run(cancel.clone()));

    let web_task = {
        let config = config.receiver.clone();
        let distributor = Arc::clone(&distributor);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) =
                web::run_server(&config, distributor, recorder_handle, status_rx, cancel.clone())
                    .await
            {
                error!(error = %e, "re-broadcast server failed");
                cancel.cancel();
            }
        })
    };

    let result = receiver::serve(&config.receiver, distributor, status_tx, cancel.clone()).await;

    // Joining lets the recorder flush and close any open file before the
    // runtime drops it mid-write.
    cancel.cancel();
    let _ = recorder_task.await;
    let _ = web_task.await;

    result?;
    Ok(())
}

fn spawn_status_logger(mut status: StatusRx) {
    tokio::spawn(async move {
        loop {
            let state = *status.borrow_and_update();
            info!(state = %state, "connection state");
            if status.changed().await.is_err() {
                break;
            }
        }
    });
}
