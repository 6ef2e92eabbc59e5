//! Peer query descriptor (§3 "PeerSelector").

use crate::address::Address;
use crate::config::InterfaceRef;
use crate::peer::{type_mask, Peer, PeerType, TypeMask};

bitflags::bitflags! {
    pub struct SelectorFlags: u8 {
        /// Longest-prefix match rather than exact subnet containment.
        const ROUTE  = 0x01;
        /// Require identical protocol_address AND prefix_length.
        const EXACT  = 0x02;
        /// Require the peer's subnet to contain the selector's address.
        const SUBNET = 0x04;
        const UP     = 0x08;
        const MARK   = 0x10;
    }
}

/// A query over the cache (§3). Not owned by the cache; callers build one
/// per lookup.
#[derive(Default)]
pub struct PeerSelector {
    pub flags: SelectorFlags,
    pub type_mask: TypeMask,
    pub interface: Option<InterfaceRef>,
    pub prefix_length: Option<u8>,
    pub protocol_address: Option<Address>,
    pub next_hop_address: Option<Address>,
}

impl Default for SelectorFlags {
    fn default() -> Self {
        SelectorFlags::empty()
    }
}

impl Default for TypeMask {
    fn default() -> Self {
        type_mask::ALL
    }
}

impl PeerSelector {
    pub fn new() -> Self {
        PeerSelector::default()
    }

    pub fn with_flags(mut self, flags: SelectorFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_type_mask(mut self, mask: TypeMask) -> Self {
        self.type_mask = mask;
        self
    }

    pub fn with_interface(mut self, iface: InterfaceRef) -> Self {
        self.interface = Some(iface);
        self
    }

    pub fn with_protocol_address(mut self, addr: Address, prefix_length: u8) -> Self {
        self.protocol_address = Some(addr);
        self.prefix_length = Some(prefix_length);
        self
    }

    pub fn with_next_hop(mut self, addr: Address) -> Self {
        self.next_hop_address = Some(addr);
        self
    }

    /// Exact-subnet selector used for the conflict check ahead of insert
    /// (§3 invariants, §4.2.2 step 3).
    pub fn exact(iface: InterfaceRef, addr: Address, prefix_length: u8) -> Self {
        PeerSelector::new()
            .with_flags(SelectorFlags::EXACT)
            .with_interface(iface)
            .with_protocol_address(addr, prefix_length)
    }

    /// Does `peer` satisfy this selector? Applies the type mask first,
    /// then flag-qualified checks, then attribute filters (§4.1 `match`).
    pub fn matches(&self, peer: &Peer) -> bool {
        if peer.is_removed() {
            return false;
        }
        if !self.type_mask.contains(peer.peer_type) {
            return false;
        }
        if self.flags.contains(SelectorFlags::UP)
            && !peer
                .flags
                .contains(crate::peer::PeerFlags::UP)
        {
            return false;
        }
        if self.flags.contains(SelectorFlags::MARK)
            && !peer
                .flags
                .contains(crate::peer::PeerFlags::MARK)
        {
            return false;
        }
        if let Some(iface) = &self.interface {
            if !std::rc::Rc::ptr_eq(iface, &peer.interface) {
                return false;
            }
        }
        if let Some(addr) = self.protocol_address {
            if self.flags.contains(SelectorFlags::EXACT) {
                let prefix = self.prefix_length.unwrap_or(peer.prefix_length);
                if peer.protocol_address != addr || peer.prefix_length != prefix {
                    return false;
                }
            } else if self.flags.contains(SelectorFlags::SUBNET) {
                if !crate::address::subnet_contains(
                    &peer.protocol_address,
                    peer.prefix_length,
                    &addr,
                ) {
                    return false;
                }
            } else if self.flags.contains(SelectorFlags::ROUTE) {
                if !crate::address::subnet_contains(
                    &peer.protocol_address,
                    peer.prefix_length,
                    &addr,
                ) {
                    return false;
                }
            }
        }
        if let Some(next_hop) = self.next_hop_address {
            if peer.next_hop_address != next_hop {
                return false;
            }
        }
        true
    }
}

/// Picks the longest matching prefix among candidates, implementing the
/// Route-flagged selector's tie-break (§4.1 "Route match accepts
/// longest-prefix").
pub fn longest_prefix<'a>(
    candidates: impl Iterator<Item = &'a crate::peer::PeerRef>,
) -> Option<crate::peer::PeerRef> {
    candidates
        .max_by_key(|p| p.borrow().prefix_length)
        .cloned()
}
