//! Registration Request handling (§4.2.2) — the most intricate path: NAT
//! detection, sequential per-CIE script-driven admission, and reroute of
//! the final reply.

use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::address::normalize_prefix_length;
use crate::config::InterfaceRef;
use crate::error::CoreError;
use crate::kernel::KernelPort;
use crate::packet::{Cie, CieCode, ErrorCode, Packet, PacketFlags, PacketPort, PacketType};
use crate::peer::{PeerFlags, PeerType};
use crate::pending::RequestKey;
use crate::script::{PeerContext, ScriptAction};

use super::Server;

impl<P: PacketPort, K: KernelPort> Server<P, K> {
    pub(crate) async fn handle_registration(&self, packet: Packet) {
        let key = RequestKey::from_packet(&packet);
        if self.pending.find_duplicate(key).is_some() {
            debug!(?key, "duplicate registration request, resend ignored");
            return;
        }

        let interface = Rc::clone(&packet.interface);
        let packet = Rc::new(packet);

        let pr = match self.pending.record(Rc::clone(&packet)) {
            Ok(pr) => pr,
            Err(CoreError::AdmissionRejected) => {
                warn!("pending-request table full, dropping registration request silently");
                return;
            }
            Err(err) => {
                warn!(error = %err, "failed to admit registration request");
                return;
            }
        };

        let natted = packet
            .extensions
            .forward_transit_nhs
            .as_ref()
            .map(|cies| cies.is_empty() && packet.link_layer_source != packet.src_nbma_address)
            .unwrap_or(false);
        pr.borrow_mut().natted = natted;

        let mut reply = (*packet).clone();
        reply.packet_type = PacketType::RegistrationReply;
        reply.flags &= PacketFlags::UNIQUE | PacketFlags::NAT;
        reply.hop_count = 0;

        if natted {
            let mut nat_cie = Cie::new(Some(packet.src_protocol_address));
            nat_cie.nbma_address = Some(packet.link_layer_source);
            reply.extensions.nat_address = Some(vec![nat_cie]);
        }

        let mut reply_cies = Vec::with_capacity(packet.cies.len());
        for cie in packet.cies.iter() {
            pr.borrow_mut().cie_cursor += 1;
            let reply_cie = self
                .process_registration_cie(&packet, cie, natted, &interface)
                .await;
            reply_cies.push(reply_cie);
        }
        reply.cies = reply_cies;

        let rpeer = self.reroute(&interface, reply.dst_protocol_address).await;
        pr.borrow_mut().rpeer = rpeer.clone();

        match rpeer {
            Some(_) => self.packet_port.send(reply).await,
            None => {
                self.packet_port
                    .send_error(ErrorCode::ProtocolAddressUnreachable, &reply, 0)
                    .await
            }
        }

        self.pending.finish(&pr);
    }

    /// Processes a single CIE: admission check, peer-register script,
    /// insert-or-reject (§4.2.2 CIE iteration loop steps 1–7).
    async fn process_registration_cie(
        &self,
        packet: &Packet,
        cie: &Cie,
        natted: bool,
        interface: &InterfaceRef,
    ) -> Cie {
        let protocol_address = cie.protocol_address.unwrap_or(packet.src_protocol_address);
        let prefix_length = normalize_prefix_length(cie.prefix_length, &protocol_address);

        let mut next_hop_address = cie.nbma_address.unwrap_or(packet.src_nbma_address);
        let mut next_hop_nat_oa = None;
        if natted {
            next_hop_nat_oa = Some(next_hop_address);
            next_hop_address = packet.link_layer_source;
        }

        if self
            .cache
            .has_conflicting_non_removable(interface, protocol_address, prefix_length)
        {
            let mut reply = Cie::new(Some(protocol_address));
            reply.code = CieCode::AdministrativelyProhibited;
            reply.prefix_length = prefix_length;
            return reply;
        }

        let peer = self.cache.alloc(
            Rc::clone(interface),
            PeerType::Dynamic,
            protocol_address,
            prefix_length,
            next_hop_address,
        );
        {
            let mut guard = peer.borrow_mut();
            guard.next_hop_nat_oa = next_hop_nat_oa;
            guard.holding_time = Duration::from_secs(u64::from(cie.holding_time));
            guard.flags.insert(PeerFlags::REGISTER);
        }

        let ctx = { PeerContext::from_peer(&peer.borrow()) };
        let script_ok = self
            .script_runner
            .run(&ctx, ScriptAction::PeerRegister)
            .await;

        let mut reply = Cie::new(Some(protocol_address));
        reply.prefix_length = prefix_length;
        reply.holding_time = cie.holding_time;
        reply.mtu = peer.borrow().mtu;
        reply.nbma_address = Some(peer.borrow().next_hop_address);

        if script_ok {
            match self.cache.insert(Rc::clone(&peer)) {
                Ok(()) => {
                    reply.code = CieCode::Success;
                }
                Err(_) => {
                    reply.code = CieCode::AdministrativelyProhibited;
                }
            }
        } else {
            warn!(%protocol_address, "peer-register script failed, CIE rejected");
            peer.borrow_mut().flags.insert(PeerFlags::REPLACED);
            let ctx = { PeerContext::from_peer(&peer.borrow()) };
            self.script_runner
                .run(&ctx, ScriptAction::PeerRegisterFailed)
                .await;
            reply.code = CieCode::AdministrativelyProhibited;
        }

        reply
    }
}
