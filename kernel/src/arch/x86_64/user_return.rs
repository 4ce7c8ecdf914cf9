//! One-way transitions to user mode
//!
//! Both transitions point the stack at the saved context and pop registers
//! straight out of it, so the pop order must match the context layout in
//! `registers` (checked there at compile time).
//!
//! `sysretq`:
//! - pops RAX..R15, then R11 (FLAGS, loaded into RFLAGS) and RCX (NextIP,
//!   the return address)
//! - clears RSP; the user-level syscall stub restores its stack pointer from
//!   RBX
//!
//! `sysexitq`:
//! - pops the same run without RDX, restores FLAGS with `popfq`, then sets
//!   IF in the saved FLAGS slot again
//! - loads RDX = NextIP (return address), RCX = RSP (user stack), R11
//! - enables interrupts with `sti`, whose one-instruction shadow covers
//!   `sysexitq`
//!
//! [`user_register_file`] describes the resulting register file; the mock
//! machine reports it as the user entry.

use super::registers::{Register, Rflags, UserContext};
use crate::config::ReturnMechanism;

/// Register file observed by user code right after the transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserRegisterFile {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
}

impl UserRegisterFile {
    /// Message register `index` as seen by user code
    pub fn msg_register(&self, index: usize) -> Option<u64> {
        match index {
            0 => Some(self.r10),
            1 => Some(self.r8),
            2 => Some(self.r9),
            3 => Some(self.r15),
            _ => None,
        }
    }
}

/// User register file produced by `mechanism` from `context`
pub fn user_register_file(
    mechanism: ReturnMechanism,
    context: &UserContext,
    badge: u64,
    msg_info: u64,
) -> UserRegisterFile {
    let reg = |r: Register| context.get(r);
    let common = UserRegisterFile {
        rax: reg(Register::Rax),
        rbx: reg(Register::Rbx),
        rbp: reg(Register::Rbp),
        r12: reg(Register::R12),
        r13: reg(Register::R13),
        r14: reg(Register::R14),
        r10: reg(Register::R10),
        r8: reg(Register::R8),
        r9: reg(Register::R9),
        r15: reg(Register::R15),
        rdi: badge,
        rsi: msg_info,
        ..UserRegisterFile::default()
    };

    match mechanism {
        ReturnMechanism::Sysret => UserRegisterFile {
            rdx: reg(Register::Rdx),
            r11: reg(Register::Flags),
            rcx: reg(Register::NextIp),
            rsp: 0,
            rip: reg(Register::NextIp),
            rflags: reg(Register::Flags),
            ..common
        },
        ReturnMechanism::Sysexit => UserRegisterFile {
            rdx: reg(Register::NextIp),
            rcx: reg(Register::Rsp),
            r11: reg(Register::R11),
            rsp: reg(Register::Rsp),
            rip: reg(Register::NextIp),
            rflags: reg(Register::Flags) | Rflags::IF.bits(),
            ..common
        },
    }
}

#[cfg(target_arch = "x86_64")]
pub use native::{sysexit_to_user, sysret_to_user};

#[cfg(target_arch = "x86_64")]
mod native {
    use core::arch::asm;

    use super::super::registers::{Register, Rflags, UserContext};

    const FLAGS_IF: u64 = Rflags::IF.bits();

    /// Return to user mode with `sysretq`
    ///
    /// # Safety
    /// - Must run in ring 0 with the user GS base already swapped in
    /// - `context` must hold a valid user FLAGS and a canonical NextIP
    /// - Never returns; the kernel stack is abandoned
    #[inline(always)]
    pub unsafe fn sysret_to_user(context: &UserContext, badge: u64, msg_info: u64) -> ! {
        asm!(
            "mov rsp, {ctx}",
            "pop rax",
            "pop rbx",
            "pop rbp",
            "pop r12",
            "pop r13",
            "pop r14",
            "pop rdx",
            "pop r10",
            "pop r8",
            "pop r9",
            "pop r15",
            // FLAGS
            "pop r11",
            // NextIP
            "pop rcx",
            // Kernel stack must not leak; user restores RSP from RBX.
            "xor rsp, rsp",
            "sysretq",
            ctx = in(reg) context.slot_ptr(Register::Rax),
            in("rdi") badge,
            in("rsi") msg_info,
            options(noreturn),
        )
    }

    /// Return to user mode with `sysexitq`
    ///
    /// # Safety
    /// Same as [`sysret_to_user`]; additionally IF must already be clear in
    /// the saved FLAGS so `popfq` does not enable interrupts early. IF is set
    /// in the saved FLAGS again before leaving.
    #[inline(always)]
    pub unsafe fn sysexit_to_user(context: &mut UserContext, badge: u64, msg_info: u64) -> ! {
        asm!(
            "mov rsp, rcx",
            "pop rax",
            "pop rbx",
            "pop rbp",
            "pop r12",
            "pop r13",
            "pop r14",
            // RDX carries NextIP for sysexit
            "add rsp, 8",
            "pop r10",
            "pop r8",
            "pop r9",
            "pop r15",
            "popfq",
            "or qword ptr [rsp - 8], {if_flag}",
            // NextIP
            "pop rdx",
            // Error
            "add rsp, 8",
            // RSP
            "pop rcx",
            // TLS_BASE, FaultIP
            "add rsp, 16",
            "pop r11",
            "sti",
            "sysexitq",
            if_flag = const FLAGS_IF,
            in("rcx") context.slot_ptr_mut(Register::Rax),
            in("rdi") badge,
            in("rsi") msg_info,
            options(noreturn),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered_context() -> UserContext {
        let mut ctx = UserContext::new();
        for i in 0..crate::arch::x86_64::registers::N_CONTEXT_REGISTERS {
            ctx.set_index(i, 0x100 + i as u64);
        }
        ctx.set(Register::Flags, Rflags::RESERVED1.bits());
        ctx
    }

    #[test]
    fn sysret_register_file() {
        let ctx = numbered_context();
        let regs = user_register_file(ReturnMechanism::Sysret, &ctx, 0xBAD6E, 0x2);

        assert_eq!(regs.rdi, 0xBAD6E);
        assert_eq!(regs.rsi, 0x2);
        assert_eq!(regs.rdx, ctx.get(Register::Rdx));
        assert_eq!(regs.rip, ctx.get(Register::NextIp));
        assert_eq!(regs.rcx, ctx.get(Register::NextIp));
        assert_eq!(regs.r11, ctx.get(Register::Flags));
        assert_eq!(regs.rsp, 0);
        assert_eq!(regs.rbx, ctx.get(Register::Rbx));
    }

    #[test]
    fn sysexit_register_file() {
        let ctx = numbered_context();
        let regs = user_register_file(ReturnMechanism::Sysexit, &ctx, 1, 2);

        assert_eq!(regs.rdx, ctx.get(Register::NextIp));
        assert_eq!(regs.rip, ctx.get(Register::NextIp));
        assert_eq!(regs.rcx, ctx.get(Register::Rsp));
        assert_eq!(regs.rsp, ctx.get(Register::Rsp));
        assert_eq!(regs.r11, ctx.get(Register::R11));
        assert!(Rflags::from_bits_retain(regs.rflags).contains(Rflags::IF));
    }

    #[test]
    fn message_registers_come_from_context() {
        let ctx = numbered_context();
        let regs = user_register_file(ReturnMechanism::Sysret, &ctx, 0, 0);
        for (i, &reg) in crate::arch::x86_64::registers::MSG_REGISTERS.iter().enumerate() {
            assert_eq!(regs.msg_register(i), Some(ctx.get(reg)));
        }
        assert_eq!(regs.msg_register(4), None);
    }
}
