//! Command-line interface for the diamond controller.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::config::Config;

/// OpenFlow controller for a four-switch diamond
#[derive(Parser, Debug)]
#[command(
    name = "diamond-controller",
    author,
    version,
    about = "OpenFlow 1.0 controller that balances TCP flows across the two rails of a diamond",
    long_about = r#"
Controls four OpenFlow 1.0 switches wired as a diamond:

  - Two edge switches carry the hosts
  - Two relay switches form the top and bottom rails
  - Hosts announce TCP flows over a UDP side channel
  - Each announced flow is pinned to the less loaded rail

QUICK START:
  diamond-controller config --output controller.toml
  diamond-controller check --config controller.toml --rules
  diamond-controller run --config controller.toml
"#
)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Load `--config`, else the default path if it exists, else built-in
    /// defaults. Global flags are applied on top.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        let path = self.config.clone().or_else(|| Some(Config::default_path()).filter(|p| p.exists()));
        let mut config = match path {
            Some(path) => Config::load(&path).with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(level) = &self.log_level {
            config.logging.level.clone_from(level);
        }
        if self.no_color {
            config.logging.color = false;
        }
        Ok(config)
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the controller
    Run(RunArgs),

    /// Validate the configuration and print the topology
    Check(CheckArgs),

    /// Print an example configuration
    Config(ConfigArgs),
}

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the OpenFlow listen address
    #[arg(long)]
    pub openflow: Option<std::net::SocketAddr>,

    /// Override the side channel listen address
    #[arg(long)]
    pub side_channel: Option<std::net::SocketAddr>,

    /// Emit JSON logs
    #[arg(long)]
    pub json: bool,
}

/// Check command arguments
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Also print the baseline rules each switch would receive on connect
    #[arg(long)]
    pub rules: bool,
}

/// Config command arguments
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Hosts per edge in the generated topology
    #[arg(long, default_value_t = 4)]
    pub hosts: u8,

    /// Output path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_check_rules() {
        let cli = Cli::try_parse_from(["diamond-controller", "check", "--rules", "-c", "c.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.toml")));
        assert!(matches!(cli.command, Commands::Check(CheckArgs { rules: true })));
    }

    #[test]
    fn test_parse_run_overrides() {
        let cli = Cli::try_parse_from([
            "diamond-controller",
            "run",
            "--openflow",
            "0.0.0.0:6653",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.openflow, Some("0.0.0.0:6653".parse().unwrap()));
                assert!(args.side_channel.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_load_config_applies_global_flags() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("controller.toml");
        Config::example().save(&path).unwrap();

        let cli = Cli::try_parse_from([
            "diamond-controller",
            "check",
            "--config",
            path.to_str().unwrap(),
            "--log-level",
            "trace",
            "--no-color",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.logging.level, "trace");
        assert!(!config.logging.color);
        assert_eq!(config.topology, Config::example().topology);
    }

    #[test]
    fn test_load_config_names_the_failing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[controller]\nevent_queue = 0\n").unwrap();

        let cli = Cli::try_parse_from(["diamond-controller", "run", "-c", path.to_str().unwrap()]).unwrap();
        let err = cli.load_config().unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
        let cause = err.downcast_ref::<crate::error::Error>().unwrap();
        assert!(cause.is_fatal());
    }
}
