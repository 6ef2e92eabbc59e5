//! Kernel collaborator (§6): route lookup and raw packet transmission.
//! Installing shortcut routes into the kernel FIB is a non-goal (§1); this
//! trait only covers the two operations `Server::reroute` needs when the
//! cache has no answer.

use crate::address::Address;
use crate::config::InterfaceRef;

#[async_trait::async_trait(?Send)]
pub trait KernelPort {
    /// Resolves the outgoing interface and next-hop NBMA address the
    /// kernel would use to reach `destination`, used as a fallback inside
    /// `Server::reroute` when the cache has no cached/static peer for it.
    async fn route(&self, destination: Address) -> Option<(InterfaceRef, Address)>;

    async fn send(&self, bytes: &[u8], interface: &InterfaceRef, destination: Address);
}
