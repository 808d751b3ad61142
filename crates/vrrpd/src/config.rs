//! Configuration file loading and merging with the command line.

use crate::cli::Cli;
use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use vrrp::{DEFAULT_PRIORITY, ProtocolVersion, VRRPConfig};

/// Default PID file directory
pub const DEFAULT_PID_DIR: &str = "/var/run";

/// Directory for the daemon log file when none is configured
pub const DEFAULT_LOG_DIR: &str = "/var/log";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Contents of the YAML configuration file. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub interface: Option<String>,
    pub vrid: Option<u8>,
    pub priority: Option<u8>,
    /// 2 or 3
    pub protocol: Option<u8>,
    /// Native units of the protocol version
    pub advert_interval: Option<u16>,
    pub preempt: Option<bool>,
    pub virtual_ips: Vec<Ipv4Addr>,
    pub daemonize: bool,
    pub pid_dir: Option<PathBuf>,
    pub logging: LoggingSettings,
}

/// Logging settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    pub level: Option<String>,
    /// "text" or "json"
    pub format: Option<String>,
    /// Destination of stdout and stderr when daemonized
    pub file: Option<PathBuf>,
}

impl FileConfig {
    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&contents).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }
}

/// Fully resolved daemon settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub vrrp: VRRPConfig,
    pub daemonize: bool,
    pub pid_dir: PathBuf,
    pub log_level: String,
    pub log_json: bool,
    pub log_file: PathBuf,
}

/// Merge the command line over the file and validate the result.
pub fn resolve(cli: &Cli, file: FileConfig) -> Result<Settings> {
    let version = match (cli.protocol, file.protocol) {
        (Some(version), _) => version,
        (None, Some(n)) => ProtocolVersion::from_number(n)
            .ok_or_else(|| Error::config(format!("unsupported protocol version {}", n)))?,
        (None, None) => ProtocolVersion::default(),
    };

    let interface = cli
        .ifname
        .clone()
        .or(file.interface)
        .ok_or_else(|| Error::config("interface name is required (-i)"))?;

    let vrid = cli
        .vrid
        .or(file.vrid)
        .ok_or_else(|| Error::config("virtual router ID is required (-v)"))?;

    let virtual_ips = if cli.virtual_ips.is_empty() {
        file.virtual_ips
    } else {
        cli.virtual_ips.clone()
    };

    let preempt = !cli.no_preempt && file.preempt.unwrap_or(true);

    let vrrp = VRRPConfig {
        version,
        vrid,
        priority: cli.priority.or(file.priority).unwrap_or(DEFAULT_PRIORITY),
        advert_interval: cli
            .interval
            .or(file.advert_interval)
            .unwrap_or_else(|| version.default_interval()),
        interface,
        virtual_ips,
        preempt,
    };
    vrrp.validate()?;

    let log_json = cli.log_json
        || match file.logging.format.as_deref() {
            None | Some("text") => false,
            Some("json") => true,
            Some(other) => {
                return Err(Error::config(format!(
                    "unknown log format {:?}, expected \"text\" or \"json\"",
                    other
                )));
            }
        };

    let log_file = cli
        .log_file
        .clone()
        .or(file.logging.file)
        .unwrap_or_else(|| Path::new(DEFAULT_LOG_DIR).join(format!("vrrpd_{}.log", vrrp.interface)));

    Ok(Settings {
        log_file,
        vrrp,
        daemonize: cli.daemonize || file.daemonize,
        pid_dir: cli
            .pid_dir
            .clone()
            .or(file.pid_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PID_DIR)),
        log_level: cli
            .log_level
            .clone()
            .or(file.logging.level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        log_json,
    })
}
