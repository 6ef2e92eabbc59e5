//! Traffic Indication handling (§4.2.4): shortcut-route hinting. Actually
//! installing a shortcut is a non-goal (§1); the core only decides whether
//! to kick off a resolution and logs the decision.

use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::address::{address_length_bits, Address};
use crate::kernel::KernelPort;
use crate::packet::{Packet, PacketPort};
use crate::selector::{PeerSelector, SelectorFlags};

use super::Server;

impl<P: PacketPort, K: KernelPort> Server<P, K> {
    pub(crate) async fn handle_traffic_indication(&self, packet: Packet) {
        let interface = Rc::clone(&packet.interface);
        if !interface.is_shortcut_enabled() {
            debug!(interface = %interface.name, "traffic indication on non-shortcut interface, dropping");
            return;
        }

        let destination = match extract_destination(&packet) {
            Some(addr) => addr,
            None => {
                warn!("traffic indication carried no usable embedded payload");
                return;
            }
        };

        let already_pending = PeerSelector::new()
            .with_flags(SelectorFlags::ROUTE)
            .with_interface(Rc::clone(&interface))
            .with_protocol_address(destination, address_length_bits(&destination));
        if self.cache.find(&already_pending).is_some() {
            debug!(%destination, "resolution already in progress for shortcut destination");
            return;
        }

        info!(%destination, interface = %interface.name, "shortcut resolution triggered by traffic indication");
    }
}

/// Lifts the destination address out of the embedded packet. Parsing the
/// full embedded packet is out of scope (§1); the packet-codec layer is
/// expected to have already mirrored it onto `dst_protocol_address`.
fn extract_destination(packet: &Packet) -> Option<Address> {
    packet.embedded_payload.as_ref()?;
    Some(packet.dst_protocol_address)
}
