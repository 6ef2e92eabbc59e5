//! Purge Request handling (§4.2.3): reply-then-mutate ordering, removing
//! all removable peers matching each CIE's subnet.

use std::rc::Rc;

use crate::address::normalize_prefix_length;
use crate::kernel::KernelPort;
use crate::packet::{Packet, PacketFlags, PacketPort, PacketType};
use crate::peer::{type_mask, PeerRef};
use crate::selector::PeerSelector;

use super::Server;

impl<P: PacketPort, K: KernelPort> Server<P, K> {
    pub(crate) async fn handle_purge(&self, packet: Packet) {
        let no_reply = packet.flags.contains(PacketFlags::NO_REPLY);
        let interface = Rc::clone(&packet.interface);

        let mut reply = packet.clone();
        reply.packet_type = PacketType::PurgeReply;
        reply.flags = PacketFlags::empty();
        reply.hop_count = 0;

        if !no_reply {
            // Routing failure on a Purge reply is a silent drop (§7), not
            // an Error Indication — unlike Registration.
            if self
                .reroute(&interface, reply.dst_protocol_address)
                .await
                .is_some()
            {
                self.packet_port.send(reply.clone()).await;
            }
        }

        for cie in &packet.cies {
            let Some(addr) = cie.protocol_address else {
                continue;
            };
            let prefix = normalize_prefix_length(cie.prefix_length, &addr);
            let selector = PeerSelector::exact(Rc::clone(&interface), addr, prefix)
                .with_type_mask(type_mask::REMOVABLE);

            let mut victims: Vec<PeerRef> = Vec::new();
            self.cache.foreach(&selector, |peer| {
                victims.push(Rc::clone(peer));
                0
            });
            for peer in victims {
                self.cache.purge(&peer);
            }
        }
    }
}
