//! Hardware seam
//!
//! Every privileged effect of the fast path goes through [`Machine`]. The
//! bare-metal backend (`arch::x86_64::machine::NativeMachine`) is inline
//! assembly; the mock backend records each effect so the sequencing can be
//! checked on a host.

use crate::arch::x86_64::fpu::FpuState;
use crate::arch::x86_64::registers::{DebugRegisters, UserContext};
use crate::arch::x86_64::vspace::Cr3;
use crate::config::ReturnMechanism;
use crate::objects::Tcb;
use crate::smp::NodeLock;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

/// Privileged operations used on the way back to user mode
pub trait Machine {
    /// Active translation root
    fn current_cr3(&self) -> Cr3;

    /// Load a new translation root
    fn set_current_cr3(&mut self, cr3: Cr3);

    /// Clear CR0.TS
    fn enable_fpu(&mut self);

    /// Set CR0.TS so the next FPU instruction traps
    fn disable_fpu(&mut self);

    /// Save the live FPU state; the FPU must be enabled
    fn save_fpu_state(&mut self, state: &mut FpuState);

    /// Load DR0-DR3, DR6 and DR7
    fn load_debug_registers(&mut self, registers: &DebugRegisters);

    /// Swap kernel and user GS base
    fn swapgs(&mut self);

    /// Set the user FS base for `cpu`
    fn write_fs_base(&mut self, base: u64, cpu: usize);

    /// Set the user GS base for `cpu`
    fn write_gs_base(&mut self, base: u64, cpu: usize);

    /// Hand `thread` to the general (slow) restore path, which returns to
    /// user mode by the fully general route. The kernel lock is released
    /// before the general path runs.
    fn restore_user_context(&mut self, thread: &mut Tcb, lock: NodeLock<'_>) -> !;

    /// Enter user mode from `context` with RDI = `badge`, RSI = `msg_info`
    ///
    /// `sysexit` leaves IF set in the saved FLAGS of `context`.
    fn return_to_user(
        &mut self,
        mechanism: ReturnMechanism,
        context: &mut UserContext,
        badge: u64,
        msg_info: u64,
    ) -> !;
}
