//! Controller main loop

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use malloy_bridge::{ConfigLoader, Controller, ControllerConfig};
use tracing::{error, info, warn};

use crate::args::Cli;

/// Load the controller configuration, applying the workspace override
pub fn load_config(path: &Path, workspace: Option<&PathBuf>) -> Result<ControllerConfig> {
    let mut config = ConfigLoader::load_from_file(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(root) = workspace {
        config.workspace_root = Some(root.clone());
    }
    Ok(config)
}

/// Re-read the configuration file and push it to the running controller
///
/// Only the worker configuration is reloaded; the worker set is fixed at
/// startup.
pub fn reload(controller: &Controller, path: &Path) -> Result<()> {
    let config = ConfigLoader::load_from_file(path)
        .with_context(|| format!("Failed to reload configuration from {}", path.display()))?;
    let report = controller.update_config(config.config)?;
    for (name, e) in &report.failed {
        warn!(connection = %name, error = %e, "Connection unavailable after reload");
    }
    info!(connections = report.created.len(), "Configuration reloaded");
    Ok(())
}

/// Run the controller until interrupted
pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config, cli.workspace.as_ref())?;
    let controller = Controller::new(config).context("Failed to build controller")?;
    controller.start();
    info!(workers = controller.workers().len(), "Controller running");

    wait_for_signals(&controller, &cli.config).await?;

    controller.shutdown().await;
    info!("Controller stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signals(controller: &Controller, config_path: &Path) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for interrupt")?;
                info!("Interrupt received");
                return Ok(());
            }
            _ = hangup.recv() => {
                info!("SIGHUP received, reloading configuration");
                if let Err(e) = reload(controller, config_path) {
                    error!(error = %format!("{:#}", e), "Reload failed, keeping current configuration");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signals(_controller: &Controller, _config_path: &Path) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for interrupt")?;
    info!("Interrupt received");
    Ok(())
}
