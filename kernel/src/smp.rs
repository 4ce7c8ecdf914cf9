//! Per-CPU node state and the global kernel lock
//!
//! Kernel execution is non-preemptive and, on SMP builds, serialised by one
//! global lock taken at kernel entry. Everything the fast path mutates is
//! protected by it, so packed objects are updated with plain stores.
//!
//! The lock guard is released by an explicit [`NodeLock::release`] call at
//! a fixed point of the restore sequence. The fast path never returns, so
//! scope-based dropping would never run.

use core::mem::offset_of;
use core::ptr;

use spin::{Mutex, MutexGuard};
use static_assertions::const_assert_eq;

use crate::objects::Tcb;

/// Per-CPU kernel state
#[repr(C)]
#[derive(Debug)]
pub struct NodeState {
    /// Thread running on this CPU
    cur_thread: *mut Tcb,

    /// Trap-entry save area of `cur_thread` (SMP builds)
    current_user_context: *mut u64,

    /// Thread whose state is live in the FPU, if any
    fpu_owner: *mut Tcb,

    /// Lazy restores since the FPU owner last changed
    fpu_restores_since_switch: u32,

    cpu_index: usize,
}

/// Offset of `current_user_context` within [`NodeState`]
///
/// Trap entry loads the save area with a fixed-offset load from the node
/// pointer in GS base.
pub const NODE_USER_CONTEXT_OFFSET: usize = offset_of!(NodeState, current_user_context);

const_assert_eq!(NODE_USER_CONTEXT_OFFSET, 8);

impl NodeState {
    pub const fn new(cpu_index: usize) -> Self {
        Self {
            cur_thread: ptr::null_mut(),
            current_user_context: ptr::null_mut(),
            fpu_owner: ptr::null_mut(),
            fpu_restores_since_switch: 0,
            cpu_index,
        }
    }

    #[inline(always)]
    pub fn cpu_index(&self) -> usize {
        self.cpu_index
    }

    #[inline(always)]
    pub fn cur_thread(&self) -> *mut Tcb {
        self.cur_thread
    }

    #[inline(always)]
    pub fn set_cur_thread(&mut self, thread: *mut Tcb) {
        self.cur_thread = thread;
    }

    #[inline(always)]
    pub fn current_user_context(&self) -> *mut u64 {
        self.current_user_context
    }

    #[inline(always)]
    pub fn set_current_user_context(&mut self, context: *mut u64) {
        self.current_user_context = context;
    }

    #[inline(always)]
    pub fn fpu_owner(&self) -> *mut Tcb {
        self.fpu_owner
    }

    #[inline(always)]
    pub fn set_fpu_owner(&mut self, owner: *mut Tcb) {
        self.fpu_owner = owner;
    }

    #[inline(always)]
    pub fn fpu_restores_since_switch(&self) -> u32 {
        self.fpu_restores_since_switch
    }

    #[inline(always)]
    pub fn set_fpu_restores_since_switch(&mut self, count: u32) {
        self.fpu_restores_since_switch = count;
    }
}

/// The global kernel lock
pub struct KernelLock {
    inner: Mutex<()>,
}

impl KernelLock {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Spin until the lock is ours
    pub fn acquire(&self) -> NodeLock<'_> {
        NodeLock {
            guard: Some(self.inner.lock()),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for KernelLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock protecting all kernel state on SMP builds
pub static KERNEL_LOCK: KernelLock = KernelLock::new();

/// Proof that this CPU holds the kernel lock (or that no lock is needed)
#[must_use = "the kernel lock must be released explicitly"]
pub struct NodeLock<'a> {
    guard: Option<MutexGuard<'a, ()>>,
}

impl NodeLock<'static> {
    /// Token for uniprocessor builds, where there is nothing to release
    pub const fn uniprocessor() -> Self {
        Self { guard: None }
    }
}

impl NodeLock<'_> {
    /// Whether this token actually holds a lock
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    /// Release the lock
    #[inline(always)]
    pub fn release(self) {
        drop(self.guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_is_explicit() {
        let lock = KernelLock::new();
        let token = lock.acquire();
        assert!(token.is_held());
        assert!(lock.is_locked());

        token.release();
        assert!(!lock.is_locked());
    }

    #[test]
    fn uniprocessor_token_holds_nothing() {
        let token = NodeLock::uniprocessor();
        assert!(!token.is_held());
        token.release();
    }

    #[test]
    fn user_context_slot_offset() {
        let node = NodeState::new(0);
        let base = &node as *const NodeState as usize;
        let field = &node.current_user_context as *const *mut u64 as usize;
        assert_eq!(field - base, NODE_USER_CONTEXT_OFFSET);
    }

    #[test]
    fn new_node_is_empty() {
        let node = NodeState::new(3);
        assert_eq!(node.cpu_index(), 3);
        assert!(node.cur_thread().is_null());
        assert!(node.fpu_owner().is_null());
        assert_eq!(node.fpu_restores_since_switch(), 0);
    }
}
