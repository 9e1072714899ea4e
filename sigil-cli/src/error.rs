//! CLI error type and exit handling.

use std::fmt;

use sigil::agent::AgentError;
use sigil::config::ConfigError;
use sigil::logging::LoggingError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or settings.
    Config(String),
    /// The configuration file could not be read or written.
    ConfigFile(ConfigError),
    /// Logging could not be initialised.
    Logging(LoggingError),
    /// The Tokio runtime could not be created.
    Runtime(std::io::Error),
    /// The agent failed to start.
    Agent(AgentError),
}

impl CliError {
    /// Print the error and exit with a non-zero status.
    pub fn exit(&self) -> ! {
        eprintln!("{} {}", console::style("Error:").red().bold(), self);
        std::process::exit(1);
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "{}", e),
            CliError::Runtime(e) => write!(f, "Failed to start async runtime: {}", e),
            CliError::Agent(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::ConfigFile(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Agent(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<AgentError> for CliError {
    fn from(e: AgentError) -> Self {
        CliError::Agent(e)
    }
}
