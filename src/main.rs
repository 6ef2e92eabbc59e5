//! Daemon entrypoint (§9.4): CLI parsing, logging init, signal handling,
//! and driving the event loop to completion.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use nhrp_core::{
    address::Address, cache::PeerCache, config::{DaemonConfig, Interface, InterfaceFlags},
    event_loop::EventLoop, kernel::KernelPort, packet::{ErrorCode, Packet, PacketPort},
    pending::PendingRequestTable, script::ScriptRunner, server::Server,
};

#[derive(Parser, Debug)]
#[command(name = "nhrpd", about = "NHRP (RFC 2332) next-hop resolution daemon")]
struct Args {
    /// Directory containing the peer-up/peer-down/peer-register hook scripts.
    #[arg(long = "script-dir", default_value = "/etc/nhrp/scripts")]
    script_dir: PathBuf,

    /// `name=protocol-address` pairs, repeatable, one per served interface.
    #[arg(long = "interface")]
    interfaces: Vec<String>,

    #[arg(long = "max-pending", default_value_t = 16)]
    max_pending: usize,

    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// Stands in for the out-of-scope wire-codec send path (§1, §6) until a
/// real transport is wired in; logs what would have been sent.
struct LoggingPacketPort;

#[async_trait::async_trait(?Send)]
impl PacketPort for LoggingPacketPort {
    async fn send(&self, packet: Packet) {
        info!(packet_type = ?packet.packet_type, dst = %packet.dst_protocol_address, "would send packet");
    }

    async fn send_error(&self, code: ErrorCode, offending: &Packet, offset: u32) {
        warn!(?code, offset, dst = %offending.dst_protocol_address, "would send error indication");
    }
}

/// Stands in for the out-of-scope kernel FIB integration (§1, §6).
struct NullKernelPort;

#[async_trait::async_trait(?Send)]
impl KernelPort for NullKernelPort {
    async fn route(&self, _destination: Address) -> Option<(nhrp_core::config::InterfaceRef, Address)> {
        None
    }

    async fn send(&self, _bytes: &[u8], _interface: &nhrp_core::config::InterfaceRef, _destination: Address) {}
}

fn parse_interface(spec: &str) -> Result<nhrp_core::config::InterfaceRef> {
    let (name, addr) = spec
        .split_once('=')
        .with_context(|| format!("interface spec `{spec}` is not in name=address form"))?;
    let protocol_address: Address = addr
        .parse()
        .with_context(|| format!("invalid protocol address `{addr}` for interface `{name}`"))?;
    Ok(Interface::new(
        name,
        InterfaceFlags::empty(),
        7200,
        protocol_address,
        protocol_address,
        1400,
    ))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = DaemonConfig {
        script_path: args.script_dir.join("nhrp-script"),
        max_pending_requests: args.max_pending,
    };

    let interfaces: Vec<_> = args
        .interfaces
        .iter()
        .map(|spec| parse_interface(spec))
        .collect::<Result<_>>()?;
    for iface in &interfaces {
        info!(interface = %iface.name, address = %iface.protocol_address, "serving interface");
    }

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async move {
            let event_loop = Rc::new(EventLoop::new());
            let script_runner = Rc::new(ScriptRunner::new(config.script_path.clone(), Rc::clone(&event_loop)));
            let cache = PeerCache::new(Rc::clone(&event_loop), Rc::clone(&script_runner));
            let pending = Rc::new(PendingRequestTable::new(config.max_pending_requests));
            let packet_port = Rc::new(LoggingPacketPort);
            let kernel_port = Rc::new(NullKernelPort);

            let server = Rc::new(Server::new(
                cache,
                script_runner,
                pending,
                packet_port,
                kernel_port,
                config,
            ));

            let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
            let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
            let mut sighup = signal(SignalKind::hangup()).expect("install SIGHUP handler");
            let mut sigusr1 = signal(SignalKind::user_defined1()).expect("install SIGUSR1 handler");

            let shutdown_loop = Rc::clone(&event_loop);
            event_loop.spawn_local(async move {
                tokio::select! {
                    _ = sigint.recv() => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
                shutdown_loop.stop();
            });

            let prune_server = Rc::clone(&server);
            event_loop.spawn_local(async move {
                loop {
                    if sighup.recv().await.is_none() {
                        break;
                    }
                    info!("SIGHUP received, pruning removable peers on all interfaces");
                    for iface in &interfaces {
                        prune_server.cache().prune_interface(iface);
                    }
                }
            });

            let dump_server = Rc::clone(&server);
            event_loop.spawn_local(async move {
                loop {
                    if sigusr1.recv().await.is_none() {
                        break;
                    }
                    info!(peer_count = dump_server.cache().len(), "SIGUSR1 received, cache dump requested");
                }
            });

            event_loop.run().await;
        })
        .await;

    Ok(())
}
