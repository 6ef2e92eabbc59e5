//! NHRP control packet shape and the external packet-codec collaborator
//! (§6). Wire-format encode/decode is explicitly out of scope (§1) — this
//! module only defines the parsed-packet structure the Server reads and
//! rewrites, plus the narrow trait the Server uses to emit replies.
//!
//! `reroute` is deliberately *not* part of [`PacketPort`]: it drives a real
//! peer-cache lookup (longest-prefix resolution) and is therefore
//! implemented as a `Server` method over the cache, not delegated to an
//! external collaborator.

use crate::address::Address;
use crate::config::InterfaceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    ResolutionRequest = 1,
    ResolutionReply = 2,
    RegistrationRequest = 3,
    RegistrationReply = 4,
    PurgeRequest = 5,
    PurgeReply = 6,
    ErrorIndication = 7,
    TrafficIndication = 8,
}

bitflags::bitflags! {
    pub struct PacketFlags: u16 {
        const SOURCE_IS_ROUTER   = 0x0001;
        const SOURCE_STABLE      = 0x0002;
        const UNIQUE             = 0x0004;
        const NAT                = 0x0008;
        const DESTINATION_STABLE = 0x0010;
        const AUTHORITATIVE      = 0x0020;
        const NO_REPLY           = 0x0040;
    }
}

/// CIE reply codes (§6 constants, bit-exact with the original protocol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CieCode {
    Success = 0,
    AdministrativelyProhibited = 4,
    InsufficientResources = 6,
    ProtocolAddressUnreachable = 7,
}

/// A Client Information Entry.
#[derive(Debug, Clone)]
pub struct Cie {
    pub code: CieCode,
    pub prefix_length: u8,
    pub mtu: u16,
    pub holding_time: u16,
    pub nbma_address: Option<Address>,
    pub protocol_address: Option<Address>,
}

impl Cie {
    pub fn new(protocol_address: Option<Address>) -> Self {
        Cie {
            code: CieCode::Success,
            prefix_length: 0,
            mtu: 0,
            holding_time: 0,
            nbma_address: None,
            protocol_address,
        }
    }
}

/// Extensions inspected/modified by the Server (§6).
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    /// Present with an empty CIE list when the responder is the first-hop
    /// NHS — the trigger condition for NAT detection (§4.2.2).
    pub forward_transit_nhs: Option<Vec<Cie>>,
    pub reverse_transit_nhs: Option<Vec<Cie>>,
    /// Populated by the Server when NAT traversal is detected.
    pub nat_address: Option<Vec<Cie>>,
}

/// A parsed NHRP control packet. Refcounted the same way peers are — the
/// pending-request table and any queued-packet peer extra hold an `Rc`
/// clone rather than a copy (§4.3: "every pending request holds exactly
/// one packet reference until `finish`").
#[derive(Debug, Clone)]
pub struct Packet {
    pub packet_type: PacketType,
    pub flags: PacketFlags,
    pub hop_count: u8,
    pub afnum: u16,
    pub protocol_type: u16,

    /// The interface the packet arrived on (or, for a reply, is to be sent
    /// on). The core only borrows this — ownership stays with the
    /// configuration layer (§9.3).
    pub interface: InterfaceRef,

    pub src_nbma_address: Address,
    pub src_protocol_address: Address,
    pub dst_protocol_address: Address,

    /// Link-layer (NBMA) source observed by the receiving interface —
    /// distinct from `src_nbma_address`, which is the *announced* value
    /// carried in the packet body. The two differ exactly when a NAT sits
    /// between the registering client and this NHS (§4.2.2).
    pub link_layer_source: Address,

    pub cies: Vec<Cie>,
    pub extensions: Extensions,

    /// Raw embedded payload for Traffic Indication packets (§4.2.4); the
    /// Server extracts a destination address from this without a full
    /// inner-packet parse, which is out of scope.
    pub embedded_payload: Option<Vec<u8>>,
}

/// Error codes usable with [`PacketPort::send_error`], per the Error
/// Indication path (§7: routing failure on Registration).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    ProtocolAddressUnreachable = 7,
}

/// The external packet-codec collaborator the Server emits replies
/// through (§6). Encoding/decoding and transport I/O live on the other
/// side of this trait, outside core scope.
#[async_trait::async_trait(?Send)]
pub trait PacketPort {
    async fn send(&self, packet: Packet);
    async fn send_error(&self, code: ErrorCode, offending: &Packet, offset: u32);
}
