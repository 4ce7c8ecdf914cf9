//! Bare-metal `Machine` backend
//!
//! Each operation is a few instructions of inline assembly. The general
//! restore path lives with the slow-path syscall code and is linked in as
//! `kaal_restore_user_context`.

use core::arch::asm;

use super::fpu::FpuState;
use super::registers::{DebugRegisters, UserContext};
use super::user_return::{sysexit_to_user, sysret_to_user};
use super::vspace::Cr3;
use crate::config::ReturnMechanism;
use crate::machine::Machine;
use crate::objects::Tcb;
use crate::smp::NodeLock;

const IA32_FS_BASE: u32 = 0xC000_0100;
const IA32_GS_BASE: u32 = 0xC000_0101;

/// CR0.TS: next FPU instruction raises #NM
const CR0_TS: u64 = 1 << 3;

extern "C" {
    /// Slow-path return to user mode for the current thread
    fn kaal_restore_user_context(thread: *mut Tcb) -> !;
}

/// The real CPU; zero-sized
pub struct NativeMachine;

impl NativeMachine {
    /// # Safety
    /// Only one instance may be used per CPU, in ring 0.
    pub const unsafe fn new() -> Self {
        Self
    }
}

#[inline(always)]
unsafe fn wrmsr(msr: u32, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    asm!("wrmsr", in("ecx") msr, in("eax") low, in("edx") high, options(nostack, preserves_flags));
}

#[inline(always)]
unsafe fn read_cr0() -> u64 {
    let cr0: u64;
    asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack, preserves_flags));
    cr0
}

#[inline(always)]
unsafe fn write_cr0(cr0: u64) {
    asm!("mov cr0, {}", in(reg) cr0, options(nostack, preserves_flags));
}

impl Machine for NativeMachine {
    #[inline(always)]
    fn current_cr3(&self) -> Cr3 {
        let cr3: u64;
        // SAFETY: reading CR3 has no side effects.
        unsafe { asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags)) };
        Cr3::from_bits(cr3)
    }

    #[inline(always)]
    fn set_current_cr3(&mut self, cr3: Cr3) {
        // SAFETY: the fast path only loads roots of validated, mapped PML4 caps,
        // which all share the kernel window.
        unsafe { asm!("mov cr3, {}", in(reg) cr3.bits(), options(nostack, preserves_flags)) };
    }

    #[inline(always)]
    fn enable_fpu(&mut self) {
        // SAFETY: clears CR0.TS only.
        unsafe { asm!("clts", options(nomem, nostack, preserves_flags)) };
    }

    #[inline(always)]
    fn disable_fpu(&mut self) {
        // SAFETY: sets CR0.TS only.
        unsafe { write_cr0(read_cr0() | CR0_TS) };
    }

    #[inline(always)]
    fn save_fpu_state(&mut self, state: &mut FpuState) {
        // SAFETY: the save area is 512 bytes and 64-byte aligned.
        unsafe { asm!("fxsave64 [{}]", in(reg) state.as_mut_ptr(), options(nostack, preserves_flags)) };
    }

    #[inline(always)]
    fn load_debug_registers(&mut self, registers: &DebugRegisters) {
        // SAFETY: user breakpoints were validated when they were set.
        unsafe {
            asm!(
                "mov dr0, {0}",
                "mov dr1, {1}",
                "mov dr2, {2}",
                "mov dr3, {3}",
                "mov dr6, {4}",
                "mov dr7, {5}",
                in(reg) registers.breakpoints[0],
                in(reg) registers.breakpoints[1],
                in(reg) registers.breakpoints[2],
                in(reg) registers.breakpoints[3],
                in(reg) registers.dr6,
                in(reg) registers.dr7,
                options(nomem, nostack, preserves_flags),
            )
        };
    }

    #[inline(always)]
    fn swapgs(&mut self) {
        // SAFETY: called exactly once on the way out, after the last node access.
        unsafe { asm!("swapgs", options(nomem, nostack, preserves_flags)) };
    }

    #[inline(always)]
    fn write_fs_base(&mut self, base: u64, _cpu: usize) {
        // SAFETY: any canonical value is a valid FS base; a non-canonical one
        // faults in user mode, not here.
        unsafe { wrmsr(IA32_FS_BASE, base) };
    }

    #[inline(always)]
    fn write_gs_base(&mut self, base: u64, _cpu: usize) {
        // After swapgs the active GS base is the user's.
        // SAFETY: as for FS base.
        unsafe { wrmsr(IA32_GS_BASE, base) };
    }

    fn restore_user_context(&mut self, thread: &mut Tcb, lock: NodeLock<'_>) -> ! {
        lock.release();
        // SAFETY: `thread` is the current thread with its address space active.
        unsafe { kaal_restore_user_context(thread) }
    }

    #[inline(always)]
    fn return_to_user(
        &mut self,
        mechanism: ReturnMechanism,
        context: &mut UserContext,
        badge: u64,
        msg_info: u64,
    ) -> ! {
        // SAFETY: the restore sequence has set up segment bases, FPU and
        // FLAGS for `context`; nothing kernel-side is live past this point.
        unsafe {
            match mechanism {
                ReturnMechanism::Sysret => sysret_to_user(context, badge, msg_info),
                ReturnMechanism::Sysexit => sysexit_to_user(context, badge, msg_info),
            }
        }
    }
}
