//! Test collaborators standing in for the out-of-scope wire codec and
//! kernel integration (§9.5), plus a scripted hook-script fixture writer.

use std::cell::RefCell;
use std::io::Write;
use std::path::PathBuf;

use nhrp_core::config::InterfaceRef;
use nhrp_core::packet::{ErrorCode, Packet};
use nhrp_core::{Address, KernelPort, PacketPort};

/// Captures every packet the Server attempted to send or error-indicate,
/// for assertions, mirroring the teacher's fake-collaborator test style.
#[derive(Default)]
pub struct FakePacketPort {
    pub sent: RefCell<Vec<Packet>>,
    pub errors: RefCell<Vec<(ErrorCode, Packet, u32)>>,
}

#[async_trait::async_trait(?Send)]
impl PacketPort for FakePacketPort {
    async fn send(&self, packet: Packet) {
        self.sent.borrow_mut().push(packet);
    }

    async fn send_error(&self, code: ErrorCode, offending: &Packet, offset: u32) {
        self.errors
            .borrow_mut()
            .push((code, offending.clone(), offset));
    }
}

/// Kernel collaborator that never has a route — used by tests that only
/// care about cache-resolved destinations.
#[derive(Default)]
pub struct FakeKernelPort {
    pub route_reply: RefCell<Option<(InterfaceRef, Address)>>,
}

#[async_trait::async_trait(?Send)]
impl KernelPort for FakeKernelPort {
    async fn route(&self, _destination: Address) -> Option<(InterfaceRef, Address)> {
        self.route_reply.borrow().clone()
    }

    async fn send(&self, _bytes: &[u8], _interface: &InterfaceRef, _destination: Address) {}
}

/// Writes an executable shell script fixture to `dir/name` that exits with
/// `exit_code`, for exercising the real Script Runner against a genuine
/// child process (§9.5 "a genuine child process is spawned").
pub fn write_script_fixture(dir: &std::path::Path, name: &str, exit_code: i32) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).expect("create script fixture");
    writeln!(file, "#!/bin/sh\nexit {exit_code}").expect("write script fixture");
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    path
}
