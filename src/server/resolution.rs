//! Resolution Request handling (§4.2.1). Synchronous: no script is
//! invoked, only a cache lookup via `reroute`.

use std::rc::Rc;

use tracing::warn;

use crate::kernel::KernelPort;
use crate::packet::{Cie, CieCode, Packet, PacketFlags, PacketPort, PacketType};

use super::Server;

impl<P: PacketPort, K: KernelPort> Server<P, K> {
    pub(crate) async fn handle_resolution(&self, mut packet: Packet) {
        packet.packet_type = PacketType::ResolutionReply;
        let preserved = packet.flags
            & (PacketFlags::SOURCE_IS_ROUTER
                | PacketFlags::SOURCE_STABLE
                | PacketFlags::UNIQUE
                | PacketFlags::NAT);
        packet.flags = preserved | PacketFlags::DESTINATION_STABLE | PacketFlags::AUTHORITATIVE;
        packet.hop_count = 0;

        let interface = Rc::clone(&packet.interface);
        let requested_destination = packet.dst_protocol_address;

        let peer = match self.reroute(&interface, requested_destination).await {
            Some(peer) => peer,
            None => {
                warn!(destination = %requested_destination, "resolution reroute failed, dropping request");
                return;
            }
        };

        std::mem::swap(&mut packet.src_protocol_address, &mut packet.dst_protocol_address);

        let (nbma_address, prefix_length, holding_time, mtu) = {
            let guard = peer.borrow();
            (
                guard.next_hop_address,
                guard.prefix_length,
                guard.holding_time,
                guard.mtu,
            )
        };

        let mut cie = Cie::new(Some(requested_destination));
        cie.code = CieCode::Success;
        cie.prefix_length = prefix_length;
        cie.holding_time = holding_time.as_secs().min(u64::from(u16::MAX)) as u16;
        cie.nbma_address = Some(nbma_address);
        cie.mtu = mtu;
        packet.cies = vec![cie];

        if packet.extensions.nat_address.is_some() {
            packet.extensions.nat_address = Some(Vec::new());
        }

        self.packet_port.send(packet).await;
    }
}
