//! End-to-end scenario 7 (§8): the pending-request table enforces
//! `MaxPendingRequests` across concurrently in-flight registrations, not
//! just sequential ones — the 17th distinct request is silently dropped
//! while the first 16 are admitted and processed.

mod support;

use std::rc::Rc;

use tempfile::TempDir;

use futures::future::join_all;

use nhrp_core::config::{Interface, InterfaceFlags};
use nhrp_core::packet::{Cie, Extensions, Packet, PacketFlags, PacketType};
use nhrp_core::{DaemonConfig, EventLoop, PeerCache, PendingRequestTable, ScriptRunner, Server};

use support::{write_script_fixture, FakeKernelPort, FakePacketPort};

fn test_interface() -> nhrp_core::config::InterfaceRef {
    Interface::new(
        "gre0",
        InterfaceFlags::empty(),
        7200,
        "10.0.0.254".parse().unwrap(),
        "192.0.2.254".parse().unwrap(),
        1400,
    )
}

fn registration_for(iface: &nhrp_core::config::InterfaceRef, i: u8) -> Packet {
    let protocol_address: std::net::IpAddr = format!("10.1.0.{i}").parse().unwrap();
    let nbma_address: std::net::IpAddr = format!("192.0.3.{i}").parse().unwrap();

    let mut cie = Cie::new(None);
    cie.prefix_length = 0xFF;
    cie.holding_time = 7200;

    Packet {
        packet_type: PacketType::RegistrationRequest,
        flags: PacketFlags::empty(),
        hop_count: 0,
        afnum: 1,
        protocol_type: 0x0800,
        interface: Rc::clone(iface),
        src_nbma_address: nbma_address,
        src_protocol_address: protocol_address,
        // Resolve against the address this very request is registering, so
        // the closing `reroute` succeeds once the CIE loop inserts the peer.
        dst_protocol_address: protocol_address,
        link_layer_source: nbma_address,
        cies: vec![cie],
        extensions: Extensions::default(),
        embedded_payload: None,
    }
}

#[tokio::test(flavor = "current_thread")]
async fn seventeenth_concurrent_registration_is_silently_dropped() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let tmp = TempDir::new().unwrap();
            let script = write_script_fixture(tmp.path(), "nhrp-script", 0);

            let iface = test_interface();
            let event_loop = Rc::new(EventLoop::new());
            let script_runner = Rc::new(ScriptRunner::new(script, Rc::clone(&event_loop)));
            let cache = PeerCache::new(Rc::clone(&event_loop), Rc::clone(&script_runner));
            let pending = Rc::new(PendingRequestTable::new(16));
            let packet_port = Rc::new(FakePacketPort::default());
            let kernel_port = Rc::new(FakeKernelPort::default());

            let server = Rc::new(Server::new(
                cache,
                script_runner,
                pending,
                Rc::clone(&packet_port),
                kernel_port,
                DaemonConfig::default(),
            ));

            // 17 distinct (src_nbma, src_protocol, dst_protocol) triples,
            // driven concurrently so admission happens before any of them
            // finish — not sequentially, where the table would always look
            // empty by the time the next one is admitted.
            let futures = (0..17u8).map(|i| {
                let server = Rc::clone(&server);
                let packet = registration_for(&iface, i);
                async move { server.handle(packet).await }
            });
            join_all(futures).await;

            assert_eq!(packet_port.sent.borrow().len(), 16);
            assert!(packet_port.errors.borrow().is_empty());
            assert!(server.pending().is_empty());
        })
        .await;
}
