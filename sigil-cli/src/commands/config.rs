//! `sigil config get|set|list|path`.

use clap::Subcommand;
use sigil::config::{config_file_path, ConfigFile, ConfigKey};

use crate::error::CliError;

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Print one value (key as section.key, e.g. backend.url)
    Get { key: String },

    /// Store one value; an empty value clears optional settings
    Set { key: String, value: String },

    /// Print every setting as section.key = value
    List,

    /// Print the configuration file path
    Path,
}

pub fn run(command: ConfigCommands) -> Result<(), CliError> {
    match command {
        ConfigCommands::Get { key } => {
            let key = parse_key(&key)?;
            println!("{}", display_value(key, &ConfigFile::load()?));
        }
        ConfigCommands::Set { key, value } => {
            let key = parse_key(&key)?;
            let mut config = ConfigFile::load()?;
            key.set(&mut config, &value)?;
            let path = config.save()?;
            println!("{} = {} ({})", key, key.get(&config), path.display());
        }
        ConfigCommands::List => {
            let config = ConfigFile::load()?;
            for key in ConfigKey::all() {
                println!("{} = {}", key, display_value(*key, &config));
            }
        }
        ConfigCommands::Path => println!("{}", config_file_path()?.display()),
    }
    Ok(())
}

fn parse_key(key: &str) -> Result<ConfigKey, CliError> {
    key.parse().map_err(|_| {
        CliError::Config(format!(
            "Unknown configuration key '{}'. Run 'sigil config list' for valid keys.",
            key
        ))
    })
}

fn display_value(key: ConfigKey, config: &ConfigFile) -> String {
    let value = key.get(config);
    if value.is_empty() {
        "(not set)".to_string()
    } else {
        value
    }
}
