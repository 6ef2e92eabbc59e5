//! Peer Cache (§4.1): the indexed population of peers, plus the per-peer
//! liveness state machine that drives the peer-up script and expiry timer.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::time::Instant;

use tracing::{info, warn};

use crate::address::Address;
use crate::config::InterfaceRef;
use crate::error::{CoreError, CoreResult};
use crate::event_loop::EventLoop;
use crate::peer::{Peer, PeerEvent, PeerExtra, PeerFlags, PeerRef, PeerType};
use crate::script::{PeerContext, ScriptAction, ScriptRunner};
use crate::selector::{longest_prefix, PeerSelector, SelectorFlags};

/// The cache's indexes (§4.1): a global ordered list, the per-interface
/// lists living on each `Interface` record, a hash by NBMA address, and a
/// multicast-membership list.
pub struct PeerCache {
    event_loop: Rc<EventLoop>,
    script_runner: Rc<ScriptRunner>,
    peers: RefCell<Vec<PeerRef>>,
    by_nbma: RefCell<HashMap<Address, Vec<PeerRef>>>,
    multicast: RefCell<Vec<PeerRef>>,
    rate_limited: RefCell<HashSet<(Address, u8)>>,
    self_ref: RefCell<Weak<PeerCache>>,
}

impl PeerCache {
    pub fn new(event_loop: Rc<EventLoop>, script_runner: Rc<ScriptRunner>) -> Rc<Self> {
        Rc::new_cyclic(|weak| PeerCache {
            event_loop,
            script_runner,
            peers: RefCell::new(Vec::new()),
            by_nbma: RefCell::new(HashMap::new()),
            multicast: RefCell::new(Vec::new()),
            rate_limited: RefCell::new(HashSet::new()),
            self_ref: RefCell::new(weak.clone()),
        })
    }

    fn rc(&self) -> Rc<PeerCache> {
        self.self_ref
            .borrow()
            .upgrade()
            .expect("cache keeps a self-reference alive for its own lifetime")
    }

    pub fn len(&self) -> usize {
        self.peers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produces a fresh peer with refcount 1, not yet inserted (§4.1
    /// `alloc`). Allocation failure (§4.1 "caller synthesizes
    /// InsufficientResources") cannot occur under Rust's allocator model —
    /// this always succeeds.
    #[allow(clippy::too_many_arguments)]
    pub fn alloc(
        &self,
        interface: InterfaceRef,
        peer_type: PeerType,
        protocol_address: Address,
        prefix_length: u8,
        next_hop_address: Address,
    ) -> PeerRef {
        Peer::new(peer_type, interface, protocol_address, prefix_length, next_hop_address)
    }

    /// Bumps the peer's logical refcount and returns a shared handle
    /// (§4.1 `get`).
    pub fn get(&self, peer: &PeerRef) -> PeerRef {
        peer.borrow_mut().bump_refcount();
        Rc::clone(peer)
    }

    /// Drops the peer's logical refcount; at zero, tears down its event
    /// handles and extra state (§4.1 `put`).
    pub fn put(&self, peer: PeerRef) {
        let remaining = peer.borrow_mut().drop_refcount();
        if remaining == 0 {
            let mut guard = peer.borrow_mut();
            guard.stop_events();
            guard.extra = PeerExtra::None;
        }
    }

    /// Is there already a non-removable peer occupying this exact
    /// (interface, protocol_address, prefix_length) tuple? The Server
    /// calls this before running the peer-register script, per the "caller
    /// responsibility to pre-check via a selector" note in §4.1.
    pub fn has_conflicting_non_removable(
        &self,
        interface: &InterfaceRef,
        protocol_address: Address,
        prefix_length: u8,
    ) -> bool {
        let selector = PeerSelector::exact(Rc::clone(interface), protocol_address, prefix_length)
            .with_type_mask(crate::peer::type_mask::NON_REMOVABLE);
        self.peers
            .borrow()
            .iter()
            .any(|p| selector.matches(&p.borrow()))
    }

    /// Commits `peer` to all indexes and starts its liveness state machine
    /// (§4.1 `insert`). Any removable peer already occupying the same
    /// exact tuple is displaced: flagged `Replaced` and removed, with its
    /// `Up`/`LowerUp` flags inherited onto the new peer only if the old
    /// peer's `next_hop_address` also matches exactly (§4.2.2 step 5,
    /// "re-registration continuity" — a next-hop change is a real link
    /// transition, not a continuation). A conflicting non-removable peer
    /// is rejected rather than silently replacing the static configuration
    /// (§3 invariants).
    pub fn insert(&self, peer: PeerRef) -> CoreResult<()> {
        let (interface, addr, prefix) = {
            let p = peer.borrow();
            (Rc::clone(&p.interface), p.protocol_address, p.prefix_length)
        };

        let conflicting: Vec<PeerRef> = {
            let selector = PeerSelector::exact(Rc::clone(&interface), addr, prefix);
            self.peers
                .borrow()
                .iter()
                .filter(|p| selector.matches(&p.borrow()) && !Rc::ptr_eq(p, &peer))
                .cloned()
                .collect()
        };

        let new_next_hop = peer.borrow().next_hop_address;

        let mut inherit_up = false;
        let mut inherit_lower_up = false;
        for old in &conflicting {
            if !old.borrow().is_removable() {
                return Err(CoreError::PolicyRejected(
                    "conflicting non-removable peer occupies this subnet".into(),
                ));
            }
        }
        for old in conflicting {
            {
                let mut ob = old.borrow_mut();
                // Inherit Up/LowerUp only when the old peer's next hop is
                // unchanged — a move to a different NBMA address is a real
                // link transition, not a continuation (§4.2.2 step 5).
                if ob.next_hop_address == new_next_hop {
                    inherit_up |= ob.flags.contains(PeerFlags::UP);
                    inherit_lower_up |= ob.flags.contains(PeerFlags::LOWER_UP);
                }
                ob.flags.insert(PeerFlags::REPLACED);
            }
            self.remove(&old);
        }

        if inherit_up || inherit_lower_up {
            let mut pb = peer.borrow_mut();
            if inherit_up {
                pb.flags.insert(PeerFlags::UP);
            }
            if inherit_lower_up {
                pb.flags.insert(PeerFlags::LOWER_UP);
            }
        }

        self.peers.borrow_mut().push(Rc::clone(&peer));
        interface.peers.borrow_mut().push(Rc::clone(&peer));
        let nbma = peer.borrow().next_hop_address;
        self.by_nbma
            .borrow_mut()
            .entry(nbma)
            .or_default()
            .push(Rc::clone(&peer));

        info!(
            protocol_address = %addr,
            prefix_length = prefix,
            interface = %interface.name,
            "peer inserted into cache"
        );

        self.start_liveness(&peer);
        Ok(())
    }

    /// Unlinks `peer` from all indexes and flags it `Removed`, without
    /// waiting for refcount to drop (§4.1 `remove`).
    pub fn remove(&self, peer: &PeerRef) {
        {
            let mut pb = peer.borrow_mut();
            if pb.is_removed() {
                return;
            }
            pb.flags.insert(PeerFlags::REMOVED);
            pb.stop_events();
        }
        self.unlink(peer);
        self.put(Rc::clone(peer));
    }

    /// Like `remove`, but also clears registration sub-state and any
    /// rate-limit tokens for the subnet (§4.2.3 step 3).
    pub fn purge(&self, peer: &PeerRef) {
        {
            let mut pb = peer.borrow_mut();
            pb.extra = PeerExtra::None;
        }
        let (addr, prefix) = {
            let pb = peer.borrow();
            (pb.protocol_address, pb.prefix_length)
        };
        self.rate_limited.borrow_mut().remove(&(addr, prefix));
        self.remove(peer);
    }

    fn unlink(&self, peer: &PeerRef) {
        self.peers.borrow_mut().retain(|p| !Rc::ptr_eq(p, peer));
        self.multicast.borrow_mut().retain(|p| !Rc::ptr_eq(p, peer));
        let iface = Rc::clone(&peer.borrow().interface);
        iface.peers.borrow_mut().retain(|p| !Rc::ptr_eq(p, peer));
        let nbma = peer.borrow().next_hop_address;
        if let Some(bucket) = self.by_nbma.borrow_mut().get_mut(&nbma) {
            bucket.retain(|p| !Rc::ptr_eq(p, peer));
        }
    }

    /// Boolean predicate: does `peer` satisfy `selector`? (§4.1 `match`)
    pub fn matches(&self, peer: &PeerRef, selector: &PeerSelector) -> bool {
        selector.matches(&peer.borrow())
    }

    /// Iterates all live peers matching `selector`, calling `enumerator`
    /// for each; aborts on the first non-zero return and returns the sum
    /// (§4.1 `foreach`). Takes a snapshot up front so the enumerator may
    /// safely remove the current peer mid-iteration.
    pub fn foreach<F>(&self, selector: &PeerSelector, mut enumerator: F) -> i32
    where
        F: FnMut(&PeerRef) -> i32,
    {
        let snapshot: Vec<PeerRef> = self.peers.borrow().iter().cloned().collect();
        let mut sum = 0;
        for peer in snapshot {
            if peer.borrow().is_removed() {
                continue;
            }
            if !selector.matches(&peer.borrow()) {
                continue;
            }
            let rv = enumerator(&peer);
            sum += rv;
            if rv != 0 {
                break;
            }
        }
        sum
    }

    /// Finds a single peer matching `selector`; for a `Route`-flagged
    /// selector this resolves to the longest matching prefix (§4.1
    /// "Route match accepts longest-prefix").
    pub fn find(&self, selector: &PeerSelector) -> Option<PeerRef> {
        let snapshot: Vec<PeerRef> = self.peers.borrow().iter().cloned().collect();
        if selector.flags.contains(SelectorFlags::ROUTE) {
            longest_prefix(snapshot.iter().filter(|p| selector.matches(&p.borrow())))
        } else {
            snapshot.into_iter().find(|p| selector.matches(&p.borrow()))
        }
    }

    pub fn find_by_nbma(&self, nbma: Address) -> Option<PeerRef> {
        self.by_nbma
            .borrow()
            .get(&nbma)
            .and_then(|bucket| bucket.iter().find(|p| !p.borrow().is_removed()).cloned())
    }

    /// Removes every removable peer under `interface` (§5 "on SIGHUP all
    /// removable peers are pruned per interface").
    pub fn prune_interface(&self, interface: &InterfaceRef) {
        let victims: Vec<PeerRef> = interface
            .peers
            .borrow()
            .iter()
            .filter(|p| p.borrow().is_removable())
            .cloned()
            .collect();
        for peer in victims {
            self.remove(&peer);
        }
    }

    /// Starts the per-peer liveness state machine on insert (§4.1 "Peer
    /// liveness state machine"): schedules the expiry timer and kicks off
    /// the peer-up script, transitioning `LowerUp`/`Up` on success or
    /// removing the peer (flagged `Replaced`) on script failure.
    fn start_liveness(&self, peer: &PeerRef) {
        let peer_type = peer.borrow().peer_type;
        if !matches!(
            peer_type,
            PeerType::Dynamic | PeerType::Cached | PeerType::CachedRoute
        ) {
            return;
        }

        let holding_time = peer.borrow().holding_time;
        if !holding_time.is_zero() {
            peer.borrow_mut().expire_time = Some(Instant::now() + holding_time);
            let cache = self.rc();
            let expiring = Rc::clone(peer);
            let timer = self.event_loop.schedule(holding_time, async move {
                cache.on_expire(expiring);
            });
            peer.borrow_mut().event = Some(PeerEvent::Timer(timer));
        }

        let cache = self.rc();
        let script_peer = Rc::clone(peer);
        self.event_loop.spawn_local(async move {
            cache.run_peer_up(script_peer).await;
        });
    }

    async fn run_peer_up(self: Rc<Self>, peer: PeerRef) {
        let ctx = {
            let guard = peer.borrow();
            PeerContext::from_peer(&guard)
        };
        let ok = self.script_runner.run(&ctx, ScriptAction::PeerUp).await;
        if peer.borrow().is_removed() {
            return;
        }
        if ok {
            let mut guard = peer.borrow_mut();
            guard.flags.insert(PeerFlags::LOWER_UP);
            guard.flags.insert(PeerFlags::UP);
            info!(protocol_address = %guard.protocol_address, "peer-up succeeded");
        } else {
            warn!(protocol_address = %peer.borrow().protocol_address, "peer-up script failed, removing peer");
            peer.borrow_mut().flags.insert(PeerFlags::REPLACED);
            self.remove(&peer);
        }
    }

    fn on_expire(self: Rc<Self>, peer: PeerRef) {
        info!(protocol_address = %peer.borrow().protocol_address, "peer expired");
        self.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Interface, InterfaceFlags};

    fn test_iface() -> InterfaceRef {
        Interface::new(
            "gre0",
            InterfaceFlags::empty(),
            7200,
            "10.0.0.254".parse().unwrap(),
            "192.0.2.254".parse().unwrap(),
            1400,
        )
    }

    fn test_cache() -> Rc<PeerCache> {
        let event_loop = Rc::new(EventLoop::new());
        let script_runner = Rc::new(ScriptRunner::new(
            std::path::PathBuf::from("/bin/true"),
            Rc::clone(&event_loop),
        ));
        PeerCache::new(event_loop, script_runner)
    }

    #[test]
    fn insert_rejects_conflicting_non_removable() {
        let cache = test_cache();
        let iface = test_iface();
        let static_peer = cache.alloc(
            Rc::clone(&iface),
            PeerType::Static,
            "10.0.0.5".parse().unwrap(),
            32,
            "192.0.2.5".parse().unwrap(),
        );
        cache.insert(static_peer).unwrap();

        let dup = cache.alloc(
            Rc::clone(&iface),
            PeerType::Static,
            "10.0.0.5".parse().unwrap(),
            32,
            "192.0.2.9".parse().unwrap(),
        );
        assert!(matches!(cache.insert(dup), Err(CoreError::PolicyRejected(_))));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn insert_displaces_removable_and_unlinks_indexes() {
        let cache = test_cache();
        let iface = test_iface();
        let dynamic = cache.alloc(
            Rc::clone(&iface),
            PeerType::Dynamic,
            "10.0.0.7".parse().unwrap(),
            32,
            "192.0.2.7".parse().unwrap(),
        );
        dynamic.borrow_mut().flags.insert(PeerFlags::UP);
        cache.insert(dynamic).unwrap();
        assert_eq!(cache.len(), 1);

        // Re-registration moves to a different NBMA next hop: this is a
        // real link transition, not a continuation, so `Up` must NOT carry
        // over even though the subnet is the same.
        let replacement = cache.alloc(
            Rc::clone(&iface),
            PeerType::Dynamic,
            "10.0.0.7".parse().unwrap(),
            32,
            "192.0.2.8".parse().unwrap(),
        );
        cache.insert(Rc::clone(&replacement)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(!replacement.borrow().flags.contains(PeerFlags::UP));
        assert_eq!(iface.peers.borrow().len(), 1);
    }

    #[test]
    fn insert_inherits_up_when_next_hop_unchanged() {
        let cache = test_cache();
        let iface = test_iface();
        let dynamic = cache.alloc(
            Rc::clone(&iface),
            PeerType::Dynamic,
            "10.0.0.7".parse().unwrap(),
            32,
            "192.0.2.7".parse().unwrap(),
        );
        dynamic.borrow_mut().flags.insert(PeerFlags::UP);
        cache.insert(dynamic).unwrap();
        assert_eq!(cache.len(), 1);

        // Same subnet, same next hop: a genuine re-registration continuity
        // case, so `Up` carries over onto the replacement.
        let replacement = cache.alloc(
            Rc::clone(&iface),
            PeerType::Dynamic,
            "10.0.0.7".parse().unwrap(),
            32,
            "192.0.2.7".parse().unwrap(),
        );
        cache.insert(Rc::clone(&replacement)).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(replacement.borrow().flags.contains(PeerFlags::UP));
    }

    #[test]
    fn remove_makes_peer_invisible_to_selectors() {
        let cache = test_cache();
        let iface = test_iface();
        let peer = cache.alloc(
            Rc::clone(&iface),
            PeerType::Static,
            "10.0.0.9".parse().unwrap(),
            32,
            "192.0.2.9".parse().unwrap(),
        );
        cache.insert(Rc::clone(&peer)).unwrap();
        cache.remove(&peer);

        let selector = PeerSelector::exact(iface, "10.0.0.9".parse().unwrap(), 32);
        assert!(cache.find(&selector).is_none());
    }
}
