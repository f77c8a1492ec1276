//! Malloy controller command line
//!
//! Argument parsing, logging setup and the signal-driven main loop live
//! here so they can be tested apart from the binary.

pub mod args;
pub mod logging;
pub mod run;

pub use args::Cli;
pub use logging::{init_logging, parse_level};
pub use run::{load_config, run};
