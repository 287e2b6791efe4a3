//! Per-window bridge: navigation, evaluation, object injection and the
//! cross-thread plumbing between native code and the script host.

mod controller;
mod handle;
mod queue;
mod worker;

pub use controller::BridgeController;
pub use handle::{BridgeHandle, HostCommand, Waker};
pub use queue::CommandQueue;
pub use worker::{NativeWorker, RemoteObject, Reply, ResultSlot};

/// How long a registered object stays in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectScope {
    /// Dropped when the page it was bound to is replaced by `go()`.
    Page,
    /// Lives as long as the window; re-bound after every completed load.
    #[default]
    Persistent,
}
