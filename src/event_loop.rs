//! Single-threaded cooperative event loop (§4.5, §5).
//!
//! The spec's C-shaped contract is `poll_fd`/`unpoll_fd`/`schedule`/`run`/
//! `stop`, dispatching three kinds of events: fd readiness, timers, and
//! child exits. This rendition keeps that contract but implements it on top
//! of `tokio::task::spawn_local`: every task spawned through it is
//! `!Send`-compatible (peers are `Rc<RefCell<_>>`), which makes "no
//! thread-level parallelism" a compile-time property instead of a
//! convention the C code just has to uphold by discipline. Callers (the
//! daemon binary, or a test) are expected to drive the ambient
//! `tokio::task::LocalSet` that these tasks land on — `EventLoop` itself
//! owns only the stop signal, not the set.

use std::future::Future;
use std::os::unix::io::RawFd;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a scheduled one-shot timer. Dropping or calling `stop` aborts
/// the underlying task before it fires — mirroring "timer and child handles
/// are always stopped before the peer is freed" (§3).
pub struct TimerHandle(JoinHandle<()>);

impl TimerHandle {
    pub fn stop(&self) {
        self.0.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Handle to a running child-process wait. Aborting this does *not* kill
/// the child (§5: "in-flight scripts are not killed" on shutdown) — it only
/// stops the loop from acting on its eventual completion.
pub struct ChildHandle(JoinHandle<()>);

impl ChildHandle {
    pub fn stop(&self) {
        self.0.abort();
    }
}

impl Drop for ChildHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The event-loop contract from §4.5. Spawns land on whichever
/// `tokio::task::LocalSet` the caller currently has entered via
/// `LocalSet::run_until` — `EventLoop` does not carry its own.
pub struct EventLoop {
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl EventLoop {
    pub fn new() -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self { stop_tx, stop_rx }
    }

    /// `schedule(task, timeout_ms, callback)` — one-shot relative timer.
    pub fn schedule<F>(&self, timeout: Duration, callback: F) -> TimerHandle
    where
        F: Future<Output = ()> + 'static,
    {
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(timeout).await;
            callback.await;
        });
        TimerHandle(handle)
    }

    /// Registers interest in `fd`'s readiness and invokes `callback`
    /// whenever it becomes ready, until `stop()` is called on the returned
    /// handle. `poll_fd`/`unpoll_fd` in the spec.
    pub fn poll_fd<F, Fut>(&self, fd: RawFd, interest: Interest, mut callback: F) -> TimerHandle
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let handle = tokio::task::spawn_local(async move {
            // SAFETY: caller guarantees `fd` stays valid and owned
            // elsewhere for the handle's lifetime; we never close it.
            let borrowed = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(fd) };
            let async_fd = match AsyncFd::with_interest(borrowed, interest) {
                Ok(a) => a,
                Err(_) => return,
            };
            loop {
                let mut guard = match async_fd.ready(interest).await {
                    Ok(g) => g,
                    Err(_) => return,
                };
                callback().await;
                guard.clear_ready();
            }
        });
        TimerHandle(handle)
    }

    /// Registers a spawned child process's exit with the loop, invoking
    /// `on_exit` with the observed exit status once it is reaped. Child
    /// reaping itself is implicit in `tokio::process::Child::wait()`
    /// resolving — no separate SIGCHLD plumbing is needed (§9.2).
    pub fn spawn_child_wait<F>(&self, mut child: tokio::process::Child, on_exit: F) -> ChildHandle
    where
        F: FnOnce(std::io::Result<std::process::ExitStatus>) + 'static,
    {
        let handle = tokio::task::spawn_local(async move {
            let status = child.wait().await;
            on_exit(status);
        });
        ChildHandle(handle)
    }

    /// Spawns an arbitrary task without tracking a handle for it — used
    /// for fire-and-forget continuations (e.g. the per-peer "peer-up"
    /// orchestration in the Cache).
    pub fn spawn_local<F>(&self, future: F)
    where
        F: Future<Output = ()> + 'static,
    {
        tokio::task::spawn_local(future);
    }

    /// Blocks until `stop()` is called. All work happens in tasks spawned
    /// via this loop's `schedule`/`poll_fd`/`spawn_local`/`spawn_child_wait`,
    /// which the caller's enclosing `LocalSet` drives concurrently with
    /// this future.
    pub async fn run(&self) {
        let mut rx = self.stop_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}
