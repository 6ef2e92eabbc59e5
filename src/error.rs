//! Core error taxonomy (§7).
//!
//! `CoreError` is deliberately narrow: it only has variants the Server
//! actually produces and translates into wire behavior. Nothing here ever
//! escapes a callback as a panic — the Server is the sole place that turns
//! an `Err` into a CIE code, an Error Indication, or a logged silent drop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Registration admission rejected because the pending-request table is
    /// full. Per §4.2.2 this is logged and the packet is silently dropped —
    /// it is never turned into a reply.
    #[error("registration admission rejected: pending-request table full")]
    AdmissionRejected,

    /// A conflicting non-removable peer exists, or a script exited
    /// non-zero. Translated to CIE code `AdministrativelyProhibited`.
    #[error("policy rejected: {0}")]
    PolicyRejected(String),

    /// `reroute` could not resolve an onward peer for the reply.
    #[error("no route to reply destination")]
    RouteUnreachable,

    /// The inbound packet was malformed in a way the core can detect (empty
    /// CIE list where required, unparseable embedded payload).
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// The script binary itself could not be spawned (missing file, exec
    /// permission, etc.) — distinct from the script running and exiting
    /// non-zero, which is a `PolicyRejected`.
    #[error("failed to spawn script: {0}")]
    ScriptSpawn(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
