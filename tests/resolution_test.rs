//! End-to-end scenario 1 (§8): simple resolution against a statically
//! configured, `Up` peer.

mod support;

use std::rc::Rc;

use nhrp_core::config::{Interface, InterfaceFlags};
use nhrp_core::packet::{CieCode, Extensions, Packet, PacketFlags, PacketType};
use nhrp_core::peer::{PeerFlags, PeerType};
use nhrp_core::{DaemonConfig, EventLoop, PeerCache, PendingRequestTable, ScriptRunner, Server};

use support::{FakeKernelPort, FakePacketPort};

#[tokio::test(flavor = "current_thread")]
async fn simple_resolution_returns_cached_peer() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let iface = Interface::new(
                "gre0",
                InterfaceFlags::empty(),
                7200,
                "10.0.0.254".parse().unwrap(),
                "192.0.2.254".parse().unwrap(),
                1400,
            );

            let event_loop = Rc::new(EventLoop::new());
            let script_runner = Rc::new(ScriptRunner::new(
                "/bin/true".into(),
                Rc::clone(&event_loop),
            ));
            let cache = PeerCache::new(Rc::clone(&event_loop), Rc::clone(&script_runner));

            let peer = cache.alloc(
                Rc::clone(&iface),
                PeerType::Static,
                "10.0.0.1".parse().unwrap(),
                32,
                "192.0.2.1".parse().unwrap(),
            );
            peer.borrow_mut().flags.insert(PeerFlags::UP);
            cache.insert(Rc::clone(&peer)).unwrap();

            let pending = Rc::new(PendingRequestTable::new(16));
            let packet_port = Rc::new(FakePacketPort::default());
            let kernel_port = Rc::new(FakeKernelPort::default());

            let server = Server::new(
                cache,
                script_runner,
                pending,
                Rc::clone(&packet_port),
                kernel_port,
                DaemonConfig::default(),
            );

            let request = Packet {
                packet_type: PacketType::ResolutionRequest,
                flags: PacketFlags::empty(),
                hop_count: 0,
                afnum: 1,
                protocol_type: 0x0800,
                interface: Rc::clone(&iface),
                src_nbma_address: "192.0.2.2".parse().unwrap(),
                src_protocol_address: "10.0.0.2".parse().unwrap(),
                dst_protocol_address: "10.0.0.1".parse().unwrap(),
                link_layer_source: "192.0.2.2".parse().unwrap(),
                cies: Vec::new(),
                extensions: Extensions::default(),
                embedded_payload: None,
            };

            server.handle(request).await;

            let sent = packet_port.sent.borrow();
            assert_eq!(sent.len(), 1);
            let reply = &sent[0];
            assert_eq!(reply.packet_type, PacketType::ResolutionReply);
            assert!(reply.flags.contains(PacketFlags::DESTINATION_STABLE));
            assert!(reply.flags.contains(PacketFlags::AUTHORITATIVE));
            assert_eq!(reply.cies.len(), 1);
            let cie = &reply.cies[0];
            assert_eq!(cie.code, CieCode::Success);
            assert_eq!(cie.prefix_length, 32);
            assert_eq!(cie.holding_time, 7200);
            assert_eq!(cie.nbma_address, Some("192.0.2.1".parse().unwrap()));
        })
        .await;
}
