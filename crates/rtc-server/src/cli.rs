//! Command-line arguments.

use crate::config::Config;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "rtc-relay", version, about = "Presence and call-signaling relay")]
pub struct Cli {
    /// Config file to load instead of searching the default locations
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Load the configuration this invocation asks for.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or is invalid.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => {
                Config::from_file(shellexpand::tilde(&path.to_string_lossy()).into_owned())
            }
            None => Config::load(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["rtc-relay"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.print_config);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "rtc-relay",
            "--config",
            "/etc/rtc-relay/custom.toml",
            "--print-config",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/rtc-relay/custom.toml")));
        assert!(cli.print_config);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["rtc-relay", "--verbose-please"]).is_err());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["rtc-relay", "-c", "/nonexistent/rtc-relay.toml"]).unwrap();
        assert!(cli.load_config().is_err());
    }
}
