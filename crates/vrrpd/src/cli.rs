//! Command line interface.

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use vrrp::ProtocolVersion;

/// VRRP router redundancy daemon
#[derive(Parser, Debug)]
#[command(name = "vrrpd", author, version, about, long_about = None)]
pub struct Cli {
    /// Detach from the terminal and run in the background
    #[arg(short = 'd', long)]
    pub daemonize: bool,

    /// Interface to run the virtual router on
    #[arg(short = 'i', long = "ifname", value_name = "NAME")]
    pub ifname: Option<String>,

    /// Virtual router ID
    #[arg(short = 'v', long, value_parser = clap::value_parser!(u8).range(1..=255))]
    pub vrid: Option<u8>,

    /// Never preempt a lower priority master
    #[arg(short = 'n', long)]
    pub no_preempt: bool,

    /// Local priority (255 is taken automatically by the address owner)
    #[arg(short = 'p', long, value_parser = clap::value_parser!(u8).range(1..=255))]
    pub priority: Option<u8>,

    /// Advertisement interval: seconds for VRRPv2, centiseconds for VRRPv3
    #[arg(short = 'I', long)]
    pub interval: Option<u16>,

    /// Protocol version
    #[arg(short = 'P', long, value_name = "2|3", value_parser = parse_protocol)]
    pub protocol: Option<ProtocolVersion>,

    /// YAML configuration file; command line values take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for the PID file [default: /var/run]
    #[arg(long, value_name = "DIR")]
    pub pid_dir: Option<PathBuf>,

    /// Log level when RUST_LOG is unset [default: info]
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// File receiving log output once daemonized [default: /var/log/vrrpd_<ifname>.log]
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Virtual IPv4 addresses, in advertised order
    #[arg(value_name = "VIRTUAL_IP")]
    pub virtual_ips: Vec<Ipv4Addr>,
}

fn parse_protocol(s: &str) -> Result<ProtocolVersion, String> {
    s.parse::<u8>()
        .ok()
        .and_then(ProtocolVersion::from_number)
        .ok_or_else(|| format!("unsupported protocol version {:?}, expected 2 or 3", s))
}
