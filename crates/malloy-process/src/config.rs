//! Worker process configuration

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ProcessError, Result};

/// Configuration for spawning a worker process
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Executable command
    pub command: String,
    /// Command arguments
    pub args: Vec<String>,
    /// Working directory (None = current dir)
    pub working_dir: Option<PathBuf>,
    /// Environment variables (added to parent env)
    pub env: HashMap<String, String>,
    /// Capture stderr (otherwise discarded)
    pub capture_stderr: bool,
    /// Place the worker in its own process group so shutdown reaches its children
    pub own_process_group: bool,
}

impl ProcessConfig {
    /// Create new process configuration
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec![],
            working_dir: None,
            env: HashMap::new(),
            capture_stderr: true,
            own_process_group: true,
        }
    }

    /// Set command arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Add environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Enable/disable stderr capture
    pub fn capture_stderr(mut self, capture: bool) -> Self {
        self.capture_stderr = capture;
        self
    }

    /// Enable/disable a dedicated process group
    pub fn own_process_group(mut self, enabled: bool) -> Self {
        self.own_process_group = enabled;
        self
    }

    /// Reject configurations that can never spawn
    pub fn validate(&self) -> Result<()> {
        if self.command.trim().is_empty() {
            return Err(ProcessError::InvalidConfig(
                "command must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ProcessConfig::new("node")
            .args(["server.js", "--stdio"])
            .working_dir("/tmp")
            .env("NODE_OPTIONS", "--enable-source-maps")
            .capture_stderr(false);

        assert_eq!(config.command, "node");
        assert_eq!(config.args, vec!["server.js", "--stdio"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(
            config.env.get("NODE_OPTIONS").map(String::as_str),
            Some("--enable-source-maps")
        );
        assert!(!config.capture_stderr);
        assert!(config.own_process_group);
    }

    #[test]
    fn test_validate_empty_command() {
        assert!(ProcessConfig::new("  ").validate().is_err());
        assert!(ProcessConfig::new("node").validate().is_ok());
    }
}
