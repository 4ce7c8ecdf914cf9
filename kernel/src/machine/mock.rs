//! Host machine backend
//!
//! [`MockMachine`] keeps a CR3 value and logs every privileged effect as a
//! [`MachineEvent`]. The two non-returning operations end the kernel's run
//! by unwinding with a [`UserEntry`] payload describing how user mode was
//! entered; [`run_to_user`] catches it.
//!
//! ```ignore
//! let outcome = run_to_user(|| unsafe {
//!     fastpath_call(&mut machine, &mut node, &config, lock, ep_cap, info)
//! });
//! match outcome {
//!     Ok(UserEntry::Fast { registers, .. }) => { /* user mode reached */ }
//!     Ok(UserEntry::SlowRestore { .. }) => { /* diverted */ }
//!     Err(declined) => { /* back on the slow path */ }
//! }
//! ```

use std::panic::{self, AssertUnwindSafe};

use super::Machine;
use crate::arch::x86_64::fpu::FpuState;
use crate::arch::x86_64::registers::{DebugRegisters, Register, Rflags, UserContext};
use crate::arch::x86_64::user_return::{user_register_file, UserRegisterFile};
use crate::arch::x86_64::vspace::Cr3;
use crate::config::ReturnMechanism;
use crate::objects::Tcb;
use crate::smp::NodeLock;

/// A privileged effect, in program order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    WriteCr3(Cr3),
    EnableFpu,
    DisableFpu,
    SaveFpuState,
    LoadDebugRegisters(DebugRegisters),
    Swapgs,
    WriteFsBase { base: u64, cpu: usize },
    WriteGsBase { base: u64, cpu: usize },
}

/// How the kernel left for user mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserEntry {
    /// Fast transition
    Fast {
        mechanism: ReturnMechanism,
        registers: UserRegisterFile,
        /// Saved FLAGS as the transition read them, before `sysexit` sets IF
        /// in the context again
        saved_flags: u64,
    },

    /// Diverted to the general restore path
    SlowRestore {
        thread: usize,
        next_ip: u64,
        /// The lock token still held the kernel lock when handed over
        lock_held: bool,
    },
}

/// Recording machine
#[derive(Debug, Default)]
pub struct MockMachine {
    cr3: Cr3,
    events: Vec<MachineEvent>,
}

impl MockMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Machine whose active translation root is already `cr3`
    pub fn with_cr3(cr3: Cr3) -> Self {
        Self {
            cr3,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[MachineEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Number of CR3 loads so far
    pub fn cr3_writes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, MachineEvent::WriteCr3(_)))
            .count()
    }
}

impl Machine for MockMachine {
    fn current_cr3(&self) -> Cr3 {
        self.cr3
    }

    fn set_current_cr3(&mut self, cr3: Cr3) {
        self.cr3 = cr3;
        self.events.push(MachineEvent::WriteCr3(cr3));
    }

    fn enable_fpu(&mut self) {
        self.events.push(MachineEvent::EnableFpu);
    }

    fn disable_fpu(&mut self) {
        self.events.push(MachineEvent::DisableFpu);
    }

    fn save_fpu_state(&mut self, _state: &mut FpuState) {
        self.events.push(MachineEvent::SaveFpuState);
    }

    fn load_debug_registers(&mut self, registers: &DebugRegisters) {
        self.events.push(MachineEvent::LoadDebugRegisters(*registers));
    }

    fn swapgs(&mut self) {
        self.events.push(MachineEvent::Swapgs);
    }

    fn write_fs_base(&mut self, base: u64, cpu: usize) {
        self.events.push(MachineEvent::WriteFsBase { base, cpu });
    }

    fn write_gs_base(&mut self, base: u64, cpu: usize) {
        self.events.push(MachineEvent::WriteGsBase { base, cpu });
    }

    fn restore_user_context(&mut self, thread: &mut Tcb, lock: NodeLock<'_>) -> ! {
        let entry = UserEntry::SlowRestore {
            thread: thread.tid(),
            next_ip: thread.context().get(Register::NextIp),
            lock_held: lock.is_held(),
        };
        lock.release();
        panic::resume_unwind(Box::new(entry))
    }

    fn return_to_user(
        &mut self,
        mechanism: ReturnMechanism,
        context: &mut UserContext,
        badge: u64,
        msg_info: u64,
    ) -> ! {
        let saved_flags = context.get(Register::Flags);
        let entry = UserEntry::Fast {
            mechanism,
            registers: user_register_file(mechanism, context, badge, msg_info),
            saved_flags,
        };
        if mechanism == ReturnMechanism::Sysexit {
            context.set(Register::Flags, saved_flags | Rflags::IF.bits());
        }
        panic::resume_unwind(Box::new(entry))
    }
}

/// Run `f` until it enters user mode
///
/// Returns the [`UserEntry`] if `f` left for user mode, or `f`'s own result
/// if it returned (the fast path declined). Genuine panics propagate.
pub fn run_to_user<R>(f: impl FnOnce() -> R) -> Result<UserEntry, R> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(declined) => Err(declined),
        Err(payload) => match payload.downcast::<UserEntry>() {
            Ok(entry) => Ok(*entry),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_effects_in_order() {
        let mut machine = MockMachine::new();
        machine.swapgs();
        machine.write_fs_base(0x10, 1);
        machine.set_current_cr3(Cr3::new(0x2000, 3));

        assert_eq!(
            machine.events(),
            &[
                MachineEvent::Swapgs,
                MachineEvent::WriteFsBase { base: 0x10, cpu: 1 },
                MachineEvent::WriteCr3(Cr3::new(0x2000, 3)),
            ]
        );
        assert_eq!(machine.cr3_writes(), 1);
    }

    #[test]
    fn return_to_user_unwinds_with_entry() {
        let mut machine = MockMachine::new();
        let mut ctx = UserContext::new();
        ctx.set(Register::NextIp, 0x40_1000);

        let entry = run_to_user(|| {
            machine.return_to_user(ReturnMechanism::Sysret, &mut ctx, 7, 9);
        })
        .unwrap();

        match entry {
            UserEntry::Fast { registers, .. } => {
                assert_eq!(registers.rip, 0x40_1000);
                assert_eq!(registers.rdi, 7);
                assert_eq!(registers.rsi, 9);
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }

    #[test]
    fn sysexit_sets_if_in_saved_flags() {
        let mut machine = MockMachine::new();
        let mut ctx = UserContext::new();
        let popped = Rflags::TF | Rflags::RESERVED1;
        ctx.set(Register::Flags, popped.bits());

        let entry = run_to_user(|| {
            machine.return_to_user(ReturnMechanism::Sysexit, &mut ctx, 0, 0);
        })
        .unwrap();

        let UserEntry::Fast { saved_flags, registers, .. } = &entry else {
            panic!("unexpected entry {:?}", entry);
        };
        assert_eq!(*saved_flags, popped.bits());
        assert_eq!(registers.rflags, (popped | Rflags::IF).bits());
        assert_eq!(ctx.flags(), popped | Rflags::IF);
    }

    #[test]
    fn sysret_leaves_saved_flags_alone() {
        let mut machine = MockMachine::new();
        let mut ctx = UserContext::new();
        ctx.set(Register::Flags, Rflags::RESERVED1.bits());

        run_to_user(|| {
            machine.return_to_user(ReturnMechanism::Sysret, &mut ctx, 0, 0);
        })
        .unwrap();

        assert_eq!(ctx.flags(), Rflags::RESERVED1);
    }

    #[test]
    fn returning_closure_is_reported_as_declined() {
        assert_eq!(run_to_user(|| 42), Err(42));
    }
}
