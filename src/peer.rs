//! Peer records (§3) and the event-handle/extra-state sum types that stand
//! in for the original's tagged unions (§10).

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::address::Address;
use crate::config::InterfaceRef;
use crate::event_loop::{ChildHandle, TimerHandle};
use crate::packet::Packet;
use crate::pending::PendingRequestRef;

/// Peer lifecycle type (§3). Discriminants mirror the original's
/// `NHRP_PEER_TYPE_*` ordering so log output and any future wire-adjacent
/// code can compare against it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PeerType {
    Incomplete = 0,
    Negative = 1,
    Cached = 2,
    CachedRoute = 3,
    Dynamic = 4,
    DynamicNhs = 5,
    Static = 6,
    StaticDns = 7,
    Local = 8,
}

/// A bitmask over [`PeerType`] variants, used by [`crate::selector::PeerSelector`]
/// and by the cache's non-removable-conflict check (§3 invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMask(u16);

impl TypeMask {
    pub const fn single(t: PeerType) -> Self {
        TypeMask(1 << (t as u8))
    }

    pub const fn empty() -> Self {
        TypeMask(0)
    }

    pub const fn union(self, other: TypeMask) -> TypeMask {
        TypeMask(self.0 | other.0)
    }

    pub fn contains(self, t: PeerType) -> bool {
        self.0 & (1 << (t as u8)) != 0
    }
}

pub mod type_mask {
    use super::{PeerType, TypeMask};

    /// Types a new registration/insert may displace.
    pub const REMOVABLE: TypeMask = TypeMask(
        (1 << PeerType::Cached as u8)
            | (1 << PeerType::CachedRoute as u8)
            | (1 << PeerType::Dynamic as u8)
            | (1 << PeerType::Negative as u8)
            | (1 << PeerType::Incomplete as u8),
    );

    /// Types that block a conflicting insert at the same (interface,
    /// protocol_address, prefix_length) tuple (§3 invariants).
    pub const NON_REMOVABLE: TypeMask = TypeMask(
        (1 << PeerType::Static as u8)
            | (1 << PeerType::StaticDns as u8)
            | (1 << PeerType::DynamicNhs as u8)
            | (1 << PeerType::Local as u8),
    );

    pub const ALL: TypeMask = TypeMask(REMOVABLE.0 | NON_REMOVABLE.0);
}

bitflags::bitflags! {
    pub struct PeerFlags: u16 {
        /// At most one peer may hold this subnet among non-removable types.
        const UNIQUE    = 0x0001;
        /// Peer arrived via a Registration Request (vs. static config).
        const REGISTER  = 0x0002;
        /// Cisco-style NHRP extensions are in play for this peer.
        const CISCO     = 0x0004;
        const USED      = 0x0008;
        const LOWER_UP  = 0x0010;
        const UP        = 0x0020;
        /// Displaced by a newer insert; kept alive only by outstanding refs.
        const REPLACED  = 0x0040;
        /// Logically gone; invisible to selectors (§4.1 `remove`).
        const REMOVED   = 0x0080;
        /// Scratch bit used during `foreach` safe-next iteration.
        const MARK      = 0x0100;
    }
}

/// The `queued_packet`/`request` overlay (§10 "Tagged union for peer-extra").
pub enum PeerExtra {
    None,
    /// An `Incomplete` peer has a packet awaiting resolution.
    Queued(Rc<Packet>),
    /// A peer under active registration holds the pending-request record
    /// driving its CIE step.
    Registering(PendingRequestRef),
}

impl fmt::Debug for PeerExtra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerExtra::None => write!(f, "None"),
            PeerExtra::Queued(_) => write!(f, "Queued(..)"),
            PeerExtra::Registering(_) => write!(f, "Registering(..)"),
        }
    }
}

/// The `transparent_union` for timer-vs-child event handles (§10).
pub enum PeerEvent {
    Timer(TimerHandle),
    Child(ChildHandle),
}

impl PeerEvent {
    pub fn stop(&self) {
        match self {
            PeerEvent::Timer(t) => t.stop(),
            PeerEvent::Child(c) => c.stop(),
        }
    }
}

/// A cached or configured protocol-to-NBMA mapping (§3).
pub struct Peer {
    pub peer_type: PeerType,
    pub flags: PeerFlags,
    pub interface: InterfaceRef,
    pub parent: Option<Weak<RefCell<Peer>>>,

    pub protocol_address: Address,
    pub prefix_length: u8,

    pub next_hop_address: Address,
    pub next_hop_nat_oa: Option<Address>,

    pub my_nbma_address: Address,
    pub my_nbma_mtu: u16,

    pub mtu: u16,
    pub afnum: u16,
    pub protocol_type: u16,

    pub holding_time: Duration,
    pub expire_time: Option<Instant>,
    pub last_used: Option<Instant>,

    pub event: Option<PeerEvent>,
    pub extra: PeerExtra,

    pub nbma_hostname: Option<String>,

    refcount: usize,
}

/// Shared, interior-mutable peer handle. The `Rc` strong count is the
/// authoritative refcount in this rendition (§4.1 `get`/`put` map onto
/// `Rc::clone`/`Drop`); `Peer::refcount` additionally tracks the
/// spec-visible count for logging/testing parity with §8's invariants.
pub type PeerRef = Rc<RefCell<Peer>>;

impl Peer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer_type: PeerType,
        interface: InterfaceRef,
        protocol_address: Address,
        prefix_length: u8,
        next_hop_address: Address,
    ) -> PeerRef {
        let my_nbma_address = interface.my_nbma_address;
        let my_nbma_mtu = interface.my_nbma_mtu;
        let holding_time = Duration::from_secs(u64::from(interface.holding_time_secs));
        Rc::new(RefCell::new(Peer {
            peer_type,
            flags: PeerFlags::empty(),
            interface,
            parent: None,
            protocol_address,
            prefix_length,
            next_hop_address,
            next_hop_nat_oa: None,
            my_nbma_address,
            my_nbma_mtu,
            mtu: my_nbma_mtu,
            afnum: 0,
            protocol_type: 0,
            holding_time,
            expire_time: None,
            last_used: None,
            event: None,
            extra: PeerExtra::None,
            nbma_hostname: None,
            refcount: 1,
        }))
    }

    pub fn is_removable(&self) -> bool {
        type_mask::REMOVABLE.contains(self.peer_type)
    }

    pub fn is_removed(&self) -> bool {
        self.flags.contains(PeerFlags::REMOVED)
    }

    /// Stops any outstanding timer/child handle (§3: "timer and child
    /// handles are always stopped before the peer is freed").
    pub fn stop_events(&mut self) {
        if let Some(event) = self.event.take() {
            event.stop();
        }
    }

    pub fn bump_refcount(&mut self) -> usize {
        self.refcount += 1;
        self.refcount
    }

    pub fn drop_refcount(&mut self) -> usize {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount
    }

    pub fn refcount(&self) -> usize {
        self.refcount
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("type", &self.peer_type)
            .field("flags", &self.flags)
            .field("protocol_address", &self.protocol_address)
            .field("prefix_length", &self.prefix_length)
            .field("next_hop_address", &self.next_hop_address)
            .field("refcount", &self.refcount)
            .finish()
    }
}
