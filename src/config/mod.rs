//! Configuration management for the controller.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::topology::{Topology, TopologyConfig};
use crate::{DEFAULT_OPENFLOW_PORT, DEFAULT_SIDE_CHANNEL_PORT};

/// Largest payload of a UDP datagram over IPv4.
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// OpenFlow listener and event loop.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Flow notification listener.
    #[serde(default)]
    pub side_channel: SideChannelConfig,

    /// Timeouts and teardown of installed rules.
    #[serde(default)]
    pub rules: RulesConfig,

    /// The diamond.
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml()?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config: {e}")))?;

        Ok(())
    }

    /// Serialize to pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate configuration. Topology inconsistencies are returned as-is.
    pub fn validate(&self) -> Result<()> {
        if self.controller.event_queue == 0 {
            return Err(Error::InvalidConfig("controller.event_queue must be positive".into()));
        }

        if self.side_channel.max_datagram == 0 {
            return Err(Error::InvalidConfig("side_channel.max_datagram must be positive".into()));
        }

        if self.side_channel.max_datagram > MAX_UDP_PAYLOAD {
            return Err(Error::InvalidConfig(format!(
                "side_channel.max_datagram exceeds the largest UDP payload ({MAX_UDP_PAYLOAD} bytes)"
            )));
        }

        // Port 0 asks the OS for an ephemeral port, so two of them never collide.
        if self.controller.listen_addr.port() != 0 && self.controller.listen_addr == self.side_channel.listen_addr {
            return Err(Error::InvalidConfig(format!(
                "controller and side channel both listen on {}",
                self.controller.listen_addr
            )));
        }

        for (name, value) in [
            ("rules.mac_idle_timeout", self.rules.mac_idle_timeout),
            ("rules.flow_idle_timeout", self.rules.flow_idle_timeout),
            ("rules.flow_hard_timeout", self.rules.flow_hard_timeout),
        ] {
            if value.as_secs() > u64::from(u16::MAX) {
                return Err(Error::InvalidConfig(format!(
                    "{name} exceeds {} seconds",
                    u16::MAX
                )));
            }
        }

        self.topology()?;
        Ok(())
    }

    /// Build the validated topology.
    pub fn topology(&self) -> Result<Topology> {
        Ok(self.topology.build()?)
    }

    /// Get default config path.
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("org", "diamond", "diamond-controller").map_or_else(
            || PathBuf::from("diamond-controller.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }

    /// Create example configuration: the reference diamond with four hosts per side.
    pub fn example() -> Self {
        Self {
            topology: TopologyConfig::diamond(4),
            ..Default::default()
        }
    }
}

/// OpenFlow listener and event loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Address switches connect to.
    #[serde(default = "default_controller_addr")]
    pub listen_addr: SocketAddr,

    /// Capacity of the serialized event queue.
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,

    /// Interval of the balance report (0 disables).
    #[serde(default = "default_stats_interval", with = "humantime_serde")]
    pub stats_interval: Duration,

    /// Keepalive interval towards switches.
    #[serde(default = "default_echo_interval", with = "humantime_serde")]
    pub echo_interval: Duration,
}

fn default_controller_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_OPENFLOW_PORT))
}
fn default_event_queue() -> usize {
    1024
}
fn default_stats_interval() -> Duration {
    Duration::from_secs(30)
}
fn default_echo_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_controller_addr(),
            event_queue: default_event_queue(),
            stats_interval: default_stats_interval(),
            echo_interval: default_echo_interval(),
        }
    }
}

/// Side-channel listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideChannelConfig {
    /// UDP address hosts send notifications to.
    #[serde(default = "default_side_channel_addr")]
    pub listen_addr: SocketAddr,

    /// Larger datagrams are dropped.
    #[serde(default = "default_max_datagram")]
    pub max_datagram: usize,
}

fn default_side_channel_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], DEFAULT_SIDE_CHANNEL_PORT))
}
fn default_max_datagram() -> usize {
    2048
}

impl Default for SideChannelConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_side_channel_addr(),
            max_datagram: default_max_datagram(),
        }
    }
}

/// Rule timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Idle timeout of the router's per-host rules (0 = permanent).
    #[serde(default, with = "humantime_serde")]
    pub mac_idle_timeout: Duration,

    /// Idle timeout of the balancer's per-flow rules.
    #[serde(default = "default_flow_idle_timeout", with = "humantime_serde")]
    pub flow_idle_timeout: Duration,

    /// Hard timeout of the balancer's per-flow rules (0 = none).
    #[serde(default, with = "humantime_serde")]
    pub flow_hard_timeout: Duration,

    /// Delete per-flow rules when a flow ends.
    #[serde(default = "default_remove_on_stop")]
    pub remove_on_stop: bool,
}

fn default_flow_idle_timeout() -> Duration {
    Duration::from_secs(60)
}
fn default_remove_on_stop() -> bool {
    true
}

/// OpenFlow timeouts are whole seconds in 16 bits.
fn timeout_secs(d: Duration) -> u16 {
    u16::try_from(d.as_secs()).unwrap_or(u16::MAX)
}

impl RulesConfig {
    pub fn mac_idle_secs(&self) -> u16 {
        timeout_secs(self.mac_idle_timeout)
    }

    pub fn flow_idle_secs(&self) -> u16 {
        timeout_secs(self.flow_idle_timeout)
    }

    pub fn flow_hard_secs(&self) -> u16 {
        timeout_secs(self.flow_hard_timeout)
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            mac_idle_timeout: Duration::ZERO,
            flow_idle_timeout: default_flow_idle_timeout(),
            flow_hard_timeout: Duration::ZERO,
            remove_on_stop: default_remove_on_stop(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text or json).
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable colored output.
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "text".into()
}
fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            color: default_color(),
        }
    }
}

/// Initialize logging.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| Error::Config(format!("Failed to init logging: {e}")))?;
    }

    Ok(())
}
