//! Script Runner (§4.4): launches the external hook program and routes its
//! exit status back to the caller via the event loop.

use std::path::PathBuf;
use std::process::Stdio;
use std::rc::Rc;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::address::Address;
use crate::event_loop::EventLoop;
use crate::peer::{Peer, PeerType};

/// Owned snapshot of the peer fields a hook script needs (§4.4 "passes peer
/// context via environment variables"). Kept separate from `&Peer` so a
/// script invocation can be awaited without holding a `RefCell` borrow
/// across the suspension point.
#[derive(Debug, Clone)]
pub struct PeerContext {
    pub interface_name: String,
    pub protocol_address: Address,
    pub prefix_length: u8,
    pub nbma_address: Address,
    pub peer_type: PeerType,
}

impl PeerContext {
    pub fn from_peer(peer: &Peer) -> Self {
        PeerContext {
            interface_name: peer.interface.name.clone(),
            protocol_address: peer.protocol_address,
            prefix_length: peer.prefix_length,
            nbma_address: peer.next_hop_address,
            peer_type: peer.peer_type,
        }
    }
}

/// Action verbs the hook program understands (§6 "Scripts").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptAction {
    PeerUp,
    PeerDown,
    PeerRegister,
    PeerRegisterFailed,
}

impl ScriptAction {
    pub fn verb(self) -> &'static str {
        match self {
            ScriptAction::PeerUp => "peer-up",
            ScriptAction::PeerDown => "peer-down",
            ScriptAction::PeerRegister => "peer-register",
            ScriptAction::PeerRegisterFailed => "peer-register-failed",
        }
    }
}

/// Spawns hook scripts, exposing peer context via the environment (§4.4,
/// §6). Held by the `Server` as an `Rc` so every peer/registration path can
/// share the same script-path configuration.
pub struct ScriptRunner {
    script_path: PathBuf,
    event_loop: Rc<EventLoop>,
}

impl ScriptRunner {
    pub fn new(script_path: PathBuf, event_loop: Rc<EventLoop>) -> Self {
        ScriptRunner {
            script_path,
            event_loop,
        }
    }

    /// Runs `action` for `peer`, returning whether the script exited
    /// successfully (exit code 0, §4.4 "by convention code zero =
    /// success"). Awaiting this future *is* the suspension point the
    /// registration CIE loop rests on between steps (§10).
    pub async fn run(&self, ctx: &PeerContext, action: ScriptAction) -> bool {
        let mut command = Command::new(&self.script_path);
        command
            .arg(action.verb())
            .env("NHRP_ACTION", action.verb())
            .env("NHRP_INTERFACE", &ctx.interface_name)
            .env("NHRP_DESTADDR", ctx.protocol_address.to_string())
            .env("NHRP_DESTPREFIX", ctx.prefix_length.to_string())
            .env("NHRP_NBMA_ADDRESS", ctx.nbma_address.to_string())
            .env("NHRP_TYPE", format!("{:?}", ctx.peer_type))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(error = %err, script = %self.script_path.display(), "failed to spawn hook script");
                return false;
            }
        };

        let (tx, rx) = tokio::sync::oneshot::channel();
        let _handle = self.event_loop.spawn_child_wait(child, move |status| {
            let _ = tx.send(status);
        });

        match rx.await {
            Ok(Ok(status)) => {
                let ok = status.success();
                debug!(action = action.verb(), success = ok, "hook script completed");
                ok
            }
            Ok(Err(err)) => {
                warn!(error = %err, "failed to wait on hook script");
                false
            }
            Err(_) => {
                warn!("hook script completion channel dropped");
                false
            }
        }
    }

    pub fn script_path(&self) -> &std::path::Path {
        &self.script_path
    }
}
