//! vrrpd: VRRPv2/v3 router redundancy daemon

mod cli;
mod config;
mod daemon;
mod pidfile;

use anyhow::Context;
use clap::Parser;
use cli::Cli;
use config::{FileConfig, Settings};
use pidfile::PidFile;
use std::sync::Arc;
use tokio::signal::unix::{Signal, SignalKind, signal};
use tracing::{error, info};
use vrrp::{
    ArpResponder, InterfaceBinding, LinuxHost, SharedState, ShutdownReport, SystemClock, VRRPNode, VRRPSocket,
    netdev,
};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file = match &cli.config {
        Some(path) => FileConfig::load_from_file(path)?,
        None => FileConfig::default(),
    };
    let settings = config::resolve(&cli, file)?;

    // Resolved while still attached so a bad interface is reported on the terminal
    let binding = netdev::resolve_binding(&settings.vrrp.interface)
        .with_context(|| format!("cannot use interface {}", settings.vrrp.interface))?;

    if settings.daemonize {
        daemon::daemonize(&settings.log_file)?;
    }

    if settings.log_json {
        common::logging::init_json(&settings.log_level);
    } else {
        common::logging::init(&settings.log_level);
    }

    info!(
        interface = %binding.name,
        index = binding.index,
        address = %binding.ipv4,
        mac = %netdev::format_mac(&binding.mac),
        "Interface resolved"
    );

    let pidfile = PidFile::claim(&settings.pid_dir, &binding.name)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("cannot start tokio runtime")?;
    let report = runtime.block_on(run(settings, binding))?;
    drop(runtime);

    pidfile.release()?;
    info!(was_master = report.was_master, "vrrpd stopped");
    Ok(())
}

async fn run(settings: Settings, binding: InterfaceBinding) -> anyhow::Result<ShutdownReport> {
    let socket = VRRPSocket::new(binding.ipv4).context("cannot open VRRP advertisement socket")?;
    let virtual_ips = settings.vrrp.virtual_ips.clone();

    let mut node = VRRPNode::new(settings.vrrp, binding.clone(), socket, LinuxHost, SystemClock)?;

    let responder = ArpResponder::new(binding.index, binding.ipv4, virtual_ips, node.virtual_mac(), node.shared())
        .context("cannot open ARP socket")?;

    let sigint = signal(SignalKind::interrupt()).context("cannot install SIGINT handler")?;
    let sigterm = signal(SignalKind::terminate()).context("cannot install SIGTERM handler")?;
    let signals = tokio::spawn(watch_signals(sigint, sigterm, node.shared()));
    let arp = tokio::spawn(async move {
        if let Err(e) = responder.run().await {
            error!(error = ?e, "ARP responder stopped");
        }
    });

    let report = node.run().await;

    arp.abort();
    signals.abort();
    info!(stats = ?node.stats(), "Final statistics");
    drop(node);

    Ok(report)
}

/// Request a cooperative shutdown on the first SIGINT or SIGTERM.
async fn watch_signals(mut sigint: Signal, mut sigterm: Signal, shared: Arc<SharedState>) {
    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    shared.request_shutdown();
}
