//! Core of an NHRP (RFC 2332) next-hop resolution daemon: the peer cache,
//! its resolution/registration state machines, and the request-handling
//! pipeline built on top of a single-threaded event loop.

pub mod address;
pub mod cache;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod kernel;
pub mod packet;
pub mod pending;
pub mod peer;
pub mod script;
pub mod selector;
pub mod server;

pub use address::Address;
pub use cache::PeerCache;
pub use config::{DaemonConfig, Interface, InterfaceFlags, InterfaceRef};
pub use error::{CoreError, CoreResult};
pub use event_loop::EventLoop;
pub use kernel::KernelPort;
pub use packet::{Cie, CieCode, ErrorCode, Extensions, Packet, PacketFlags, PacketPort, PacketType};
pub use pending::{PendingRequest, PendingRequestTable};
pub use peer::{Peer, PeerFlags, PeerRef, PeerType, TypeMask};
pub use script::{ScriptAction, ScriptRunner};
pub use selector::{PeerSelector, SelectorFlags};
pub use server::Server;
