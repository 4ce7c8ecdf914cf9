//! IPC fast path
//!
//! Entry points for the two IPC system calls the fast path accelerates:
//!
//! - [`fastpath_call`]: send to a waiting receiver and block for the reply
//! - [`fastpath_reply_recv`]: reply to the caller and wait on an endpoint
//!
//! ## Design
//!
//! Each entry point runs every check before it touches any kernel object.
//! A failed check hands the kernel lock back inside [`Declined`] together
//! with the [`Fallback`] reason, and the syscall entry reruns the operation
//! on the slow path from unchanged state. Once the checks pass the entry
//! point commits, switches to the other thread and never returns.
//!
//! ```text
//! syscall entry ──► checks ──fail──► Declined { reason, lock } ──► slow path
//!                     │
//!                     └─ok─► commit ─► switch_to_thread_fp ─► fastpath_restore ─► user
//! ```
//!
//! Priority and scheduling-domain checks are the scheduler's business and
//! are not made here.

use thiserror::Error;

use crate::objects::{FaultType, Tcb};
use crate::smp::{NodeLock, NodeState};

mod call;
mod reply_recv;

pub use call::fastpath_call;
pub use reply_recv::fastpath_reply_recv;

/// Why the fast path declined an IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fallback {
    #[error("message needs the slow path (length over 4 or extra caps)")]
    MessageInfo,

    #[error("no current thread on this CPU")]
    NoCurrentThread,

    #[error("current thread has a pending {0:?} fault")]
    PendingFault(FaultType),

    #[error("capability is not an endpoint with the required rights")]
    EndpointCap,

    #[error("no thread is waiting to receive on the endpoint")]
    NoReceiver,

    #[error("senders are queued on the endpoint")]
    SendersQueued,

    #[error("caller slot does not hold a usable reply capability")]
    NoReplyCap,

    #[error("reply target has a pending {0:?} fault")]
    ReplyTargetFaulted(FaultType),

    #[error("destination address space is not a mapped PML4")]
    InvalidVSpace,

    #[error("endpoint capability cannot grant the reply capability")]
    NoGrant,

    #[error("destination is bound to cpu {affinity}, running on cpu {cpu}")]
    RemoteAffinity { cpu: usize, affinity: usize },
}

/// A declined fast-path IPC: the reason and the still-held kernel lock
#[must_use = "the slow path must take over the kernel lock"]
pub struct Declined<'l> {
    pub reason: Fallback,
    pub lock: NodeLock<'l>,
}

impl<'l> Declined<'l> {
    fn new(reason: Fallback, lock: NodeLock<'l>) -> Self {
        log::trace!("fastpath declined: {}", reason);
        Self { reason, lock }
    }

    pub fn into_parts(self) -> (Fallback, NodeLock<'l>) {
        (self.reason, self.lock)
    }
}

impl core::fmt::Debug for Declined<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Declined")
            .field("reason", &self.reason)
            .field("lock_held", &self.lock.is_held())
            .finish()
    }
}

/// The node's current thread, provided it can use the fast path
///
/// # Safety
/// The node's current-thread pointer, if set, must point to a live TCB.
unsafe fn current_thread(node: &NodeState) -> Result<*mut Tcb, Fallback> {
    let thread = node.cur_thread();
    if thread.is_null() {
        return Err(Fallback::NoCurrentThread);
    }
    match (*thread).fault() {
        FaultType::Null => Ok(thread),
        fault => Err(Fallback::PendingFault(fault)),
    }
}

/// Whether `thread` may be switched to from this CPU
fn check_affinity(node: &NodeState, smp: bool, thread: &Tcb) -> Result<(), Fallback> {
    if smp && thread.affinity() != node.cpu_index() {
        return Err(Fallback::RemoteAffinity {
            cpu: node.cpu_index(),
            affinity: thread.affinity(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_messages() {
        assert_eq!(
            Fallback::RemoteAffinity { cpu: 0, affinity: 3 }.to_string(),
            "destination is bound to cpu 3, running on cpu 0"
        );
        assert_eq!(
            Fallback::PendingFault(FaultType::VmFault).to_string(),
            "current thread has a pending VmFault fault"
        );
    }

    #[test]
    fn missing_or_faulted_current_thread() {
        let mut node = NodeState::new(0);
        assert_eq!(unsafe { current_thread(&node) }, Err(Fallback::NoCurrentThread));

        let mut thread = Box::new(Tcb::new(1, 0));
        thread.set_fault(FaultType::CapFault);
        node.set_cur_thread(&mut *thread);
        assert_eq!(
            unsafe { current_thread(&node) },
            Err(Fallback::PendingFault(FaultType::CapFault))
        );
    }

    #[test]
    fn affinity_only_matters_on_smp() {
        let node = NodeState::new(1);
        let mut thread = Box::new(Tcb::new(1, 0));
        thread.set_affinity(0);

        assert_eq!(check_affinity(&node, false, &thread), Ok(()));
        assert_eq!(
            check_affinity(&node, true, &thread),
            Err(Fallback::RemoteAffinity { cpu: 1, affinity: 0 })
        );
        thread.set_affinity(1);
        assert_eq!(check_affinity(&node, true, &thread), Ok(()));
    }

    #[test]
    fn declined_returns_the_lock() {
        let lock = crate::smp::KernelLock::new();
        let declined = Declined::new(Fallback::NoReceiver, lock.acquire());
        let (reason, token) = declined.into_parts();
        assert_eq!(reason, Fallback::NoReceiver);
        assert!(lock.is_locked());
        token.release();
        assert!(!lock.is_locked());
    }
}
