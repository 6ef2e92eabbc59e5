//! Pending-Request Table (§4.3): short-lived registry of in-flight
//! Registration Requests, used for deduplication and for holding the
//! per-CIE cursor across script invocations.

use std::cell::RefCell;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Instant;

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::event_loop::ChildHandle;
use crate::packet::Packet;
use crate::peer::PeerRef;

/// Triple used for duplicate-request detection (§4.2.2 Admission).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub src_nbma: IpAddr,
    pub src_protocol: IpAddr,
    pub dst_protocol: IpAddr,
}

impl RequestKey {
    pub fn from_packet(packet: &Packet) -> Self {
        RequestKey {
            src_nbma: packet.src_nbma_address,
            src_protocol: packet.src_protocol_address,
            dst_protocol: packet.dst_protocol_address,
        }
    }
}

/// A single in-flight registration (§3 "PendingRequest").
pub struct PendingRequest {
    pub key: RequestKey,
    pub packet: Rc<Packet>,
    pub natted: bool,
    /// Index of the CIE currently being processed.
    pub cie_cursor: usize,
    pub child: Option<ChildHandle>,
    /// Candidate peer built from the CIE currently in flight.
    pub peer: Option<PeerRef>,
    /// The peer the eventual reply is routed through.
    pub rpeer: Option<PeerRef>,
    pub created_at: Instant,
}

pub type PendingRequestRef = Rc<RefCell<PendingRequest>>;

/// The table itself: a bounded collection keyed by [`RequestKey`] (§4.3,
/// §8 "count of R records = recorded counter ≤ 16").
pub struct PendingRequestTable {
    entries: RefCell<Vec<PendingRequestRef>>,
    max_pending: usize,
}

impl PendingRequestTable {
    pub fn new(max_pending: usize) -> Self {
        PendingRequestTable {
            entries: RefCell::new(Vec::new()),
            max_pending,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Looks up an already-pending request with the same triple (§4.2.2
    /// "reject duplicates").
    pub fn find_duplicate(&self, key: RequestKey) -> Option<PendingRequestRef> {
        self.entries
            .borrow()
            .iter()
            .find(|pr| pr.borrow().key == key)
            .cloned()
    }

    /// Admits a new request, enforcing `MaxPendingRequests` (§4.2.2, §6).
    /// Excess requests are rejected with [`CoreError::AdmissionRejected`];
    /// the Server intentionally turns this into a silent drop, never a
    /// reply (§10 Open Question resolution).
    pub fn record(&self, packet: Rc<Packet>) -> CoreResult<PendingRequestRef> {
        if self.len() >= self.max_pending {
            return Err(CoreError::AdmissionRejected);
        }
        let key = RequestKey::from_packet(&packet);
        let pr = Rc::new(RefCell::new(PendingRequest {
            key,
            packet,
            natted: false,
            cie_cursor: 0,
            child: None,
            peer: None,
            rpeer: None,
            created_at: Instant::now(),
        }));
        self.entries.borrow_mut().push(Rc::clone(&pr));
        debug!(pending = self.len(), "recorded pending registration request");
        Ok(pr)
    }

    /// Unlinks and tears down a completed request (§4.3 `finish`).
    pub fn finish(&self, pr: &PendingRequestRef) {
        {
            let mut guard = pr.borrow_mut();
            if let Some(child) = guard.child.take() {
                child.stop();
            }
            guard.rpeer = None;
            guard.peer = None;
        }
        self.entries
            .borrow_mut()
            .retain(|entry| !Rc::ptr_eq(entry, pr));
        debug!(pending = self.len(), "finished pending registration request");
    }
}
