//! Lazy FPU state management
//!
//! The FPU holds the state of at most one thread per CPU, its owner. Other
//! threads run with the FPU disabled (CR0.TS set) and fault on first use, at
//! which point the slow path switches ownership. On every return to user
//! the fast path only decides whether the FPU should be enabled.
//!
//! An owner that stops using the FPU would keep it forever, so after
//! `fpu_max_restores_since_switch` restores without an ownership change the
//! owner's state is saved and the FPU is released.

use core::ptr;

use crate::config::KernelConfig;
use crate::machine::Machine;
use crate::objects::Tcb;
use crate::smp::NodeState;

/// Size of the legacy `fxsave` area
pub const FPU_STATE_SIZE: usize = 512;

/// FPU/SSE save area
#[repr(C, align(64))]
#[derive(Clone)]
pub struct FpuState {
    bytes: [u8; FPU_STATE_SIZE],
}

impl FpuState {
    pub const fn new() -> Self {
        Self {
            bytes: [0; FPU_STATE_SIZE],
        }
    }

    pub fn as_bytes(&self) -> &[u8; FPU_STATE_SIZE] {
        &self.bytes
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }
}

impl Default for FpuState {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FpuState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FpuState").finish_non_exhaustive()
    }
}

/// Enable or disable the FPU for `thread` before it returns to user mode
#[inline(always)]
pub fn lazy_fpu_restore<M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    thread: &mut Tcb,
) {
    let owner = node.fpu_owner();
    if owner.is_null() {
        // Nobody owns the FPU, so it is already disabled.
        return;
    }

    let is_owner = ptr::eq(owner, &*thread);
    if node.fpu_restores_since_switch() > config.fpu_max_restores_since_switch {
        let state = if is_owner {
            thread.fpu_state_mut()
        } else {
            // SAFETY: the owner is a live TCB distinct from `thread`, and the
            // kernel lock (or uniprocessor execution) excludes other users.
            unsafe { (*owner).fpu_state_mut() }
        };
        machine.enable_fpu();
        machine.save_fpu_state(state);
        machine.disable_fpu();
        node.set_fpu_owner(ptr::null_mut());
        node.set_fpu_restores_since_switch(0);
        log::debug!("cpu{}: released idle FPU owner", node.cpu_index());
    } else {
        if is_owner {
            machine.enable_fpu();
        } else {
            machine.disable_fpu();
        }
        node.set_fpu_restores_since_switch(node.fpu_restores_since_switch() + 1);
    }
}
