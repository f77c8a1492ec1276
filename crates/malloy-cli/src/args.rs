use std::path::PathBuf;

use clap::Parser;

/// Malloy controller
#[derive(Parser, Debug)]
#[command(name = "malloy-controller")]
#[command(about = "Supervise Malloy workers and serve their file requests")]
#[command(version)]
pub struct Cli {
    /// Controller configuration file
    #[arg(short, long, default_value = "malloy-controller.yaml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Include targets, thread ids and source locations in log lines
    #[arg(short, long)]
    pub debug: bool,

    /// Workspace root; overrides the one in the configuration file
    #[arg(short, long)]
    pub workspace: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["malloy-controller"]);
        assert_eq!(cli.config, PathBuf::from("malloy-controller.yaml"));
        assert_eq!(cli.log_level, "info");
        assert!(!cli.debug);
        assert!(cli.workspace.is_none());
    }

    #[test]
    fn test_overrides() {
        let cli = Cli::parse_from([
            "malloy-controller",
            "--config",
            "/etc/malloy.yaml",
            "--log-level",
            "debug",
            "--debug",
            "--workspace",
            "/srv/models",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/malloy.yaml"));
        assert_eq!(cli.log_level, "debug");
        assert!(cli.debug);
        assert_eq!(cli.workspace, Some(PathBuf::from("/srv/models")));
    }
}
