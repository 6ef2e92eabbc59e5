//! In-process configuration shape the core reads (§9.3).
//!
//! Parsing an on-disk config file is out of scope for the core (§1); this
//! module only defines the `Interface`/`DaemonConfig` types the Server and
//! Cache consume, plus the per-interface peer-list index the Cache owns
//! entries in (§4.1: "a per-interface list, in the caller-visible interface
//! record").

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::peer::PeerRef;

bitflags::bitflags! {
    pub struct InterfaceFlags: u8 {
        /// Shortcut routes may be suggested via Traffic Indication (§4.2.4).
        const SHORTCUT = 0x01;
    }
}

/// A network interface the daemon serves NHRP on.
///
/// The core only ever reads `flags`, `holding_time_secs` and
/// `protocol_address` from this struct — it never mutates interface
/// identity. The `peers` list is the one piece of cache-owned state that
/// lives here rather than inside `PeerCache`, per §4.1's index description.
pub struct Interface {
    pub name: String,
    pub flags: InterfaceFlags,
    pub holding_time_secs: u16,
    pub protocol_address: Address,
    pub my_nbma_address: Address,
    pub my_nbma_mtu: u16,
    pub(crate) peers: RefCell<Vec<PeerRef>>,
}

pub type InterfaceRef = Rc<Interface>;

impl Interface {
    pub fn new(
        name: impl Into<String>,
        flags: InterfaceFlags,
        holding_time_secs: u16,
        protocol_address: Address,
        my_nbma_address: Address,
        my_nbma_mtu: u16,
    ) -> InterfaceRef {
        Rc::new(Interface {
            name: name.into(),
            flags,
            holding_time_secs,
            protocol_address,
            my_nbma_address,
            my_nbma_mtu,
            peers: RefCell::new(Vec::new()),
        })
    }

    pub fn is_shortcut_enabled(&self) -> bool {
        self.flags.contains(InterfaceFlags::SHORTCUT)
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("name", &self.name)
            .field("flags", &self.flags)
            .field("protocol_address", &self.protocol_address)
            .finish()
    }
}

/// Top-level daemon configuration. Built programmatically (by the CLI or by
/// tests) rather than parsed from a file — see §9.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub script_path: PathBuf,
    pub max_pending_requests: usize,
}

pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 16;

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            script_path: PathBuf::from("/etc/nhrp/nhrp-script"),
            max_pending_requests: DEFAULT_MAX_PENDING_REQUESTS,
        }
    }
}
