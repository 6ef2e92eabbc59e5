//! Server (§4.2): dispatches inbound NHRP control packets to the
//! per-packet-type handlers and owns the `reroute` operation they share.

mod purge;
mod registration;
mod resolution;
mod traffic_indication;

use std::rc::Rc;

use tracing::warn;

use crate::address::{address_length_bits, Address};
use crate::cache::PeerCache;
use crate::config::{DaemonConfig, InterfaceRef};
use crate::kernel::KernelPort;
use crate::packet::{Packet, PacketPort, PacketType};
use crate::peer::{PeerRef, PeerType};
use crate::pending::PendingRequestTable;
use crate::script::ScriptRunner;
use crate::selector::{PeerSelector, SelectorFlags};

/// Owns the cooperating components (§2) and dispatches by packet type.
/// Generic over the two external collaborators (§6) so tests can supply
/// fakes without the core depending on the wire codec or kernel.
pub struct Server<P: PacketPort, K: KernelPort> {
    pub(crate) cache: Rc<PeerCache>,
    pub(crate) script_runner: Rc<ScriptRunner>,
    pub(crate) pending: Rc<PendingRequestTable>,
    pub(crate) packet_port: Rc<P>,
    pub(crate) kernel_port: Rc<K>,
    pub(crate) config: DaemonConfig,
}

impl<P: PacketPort, K: KernelPort> Server<P, K> {
    pub fn new(
        cache: Rc<PeerCache>,
        script_runner: Rc<ScriptRunner>,
        pending: Rc<PendingRequestTable>,
        packet_port: Rc<P>,
        kernel_port: Rc<K>,
        config: DaemonConfig,
    ) -> Self {
        Server {
            cache,
            script_runner,
            pending,
            packet_port,
            kernel_port,
            config,
        }
    }

    pub fn cache(&self) -> &Rc<PeerCache> {
        &self.cache
    }

    pub fn pending(&self) -> &Rc<PendingRequestTable> {
        &self.pending
    }

    /// Dispatches an inbound packet by type (§2 control flow, §4.2).
    pub async fn handle(&self, packet: Packet) {
        match packet.packet_type {
            PacketType::ResolutionRequest => self.handle_resolution(packet).await,
            PacketType::RegistrationRequest => self.handle_registration(packet).await,
            PacketType::PurgeRequest => self.handle_purge(packet).await,
            PacketType::TrafficIndication => self.handle_traffic_indication(packet).await,
            other => {
                warn!(?other, "no core handler for this packet type, dropping");
            }
        }
    }

    /// Resolves an onward peer for `destination`, reached via `interface`
    /// (§6 `packet_reroute`). Tries an exact interface-scoped match first,
    /// then any interface, then falls back to the kernel route table,
    /// synthesizing a transient (uninserted) `Local` peer from whatever the
    /// kernel reports (§10 design note on the `KernelPort` fallback).
    pub(crate) async fn reroute(
        &self,
        interface: &InterfaceRef,
        destination: Address,
    ) -> Option<PeerRef> {
        let prefix = address_length_bits(&destination);

        let scoped = PeerSelector::new()
            .with_flags(SelectorFlags::ROUTE)
            .with_interface(Rc::clone(interface))
            .with_protocol_address(destination, prefix);
        if let Some(peer) = self.cache.find(&scoped) {
            return Some(peer);
        }

        let unscoped = PeerSelector::new()
            .with_flags(SelectorFlags::ROUTE)
            .with_protocol_address(destination, prefix);
        if let Some(peer) = self.cache.find(&unscoped) {
            return Some(peer);
        }

        let (kernel_interface, next_hop) = self.kernel_port.route(destination).await?;
        Some(
            self.cache
                .alloc(kernel_interface, PeerType::Local, destination, prefix, next_hop),
        )
    }
}
