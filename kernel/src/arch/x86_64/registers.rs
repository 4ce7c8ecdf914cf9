//! x86_64 user register context
//!
//! The context is a flat array of saved registers in a fixed order. The
//! order is shared with trap entry and with the return transitions in
//! `user_return`, which pop consecutive slots; the compile-time checks at
//! the bottom pin the adjacency they rely on.
//!
//! ```text
//!  0 RDI   1 RSI   2 RAX   3 RBX   4 RBP   5 R12   6 R13   7 R14
//!  8 RDX   9 R10  10 R8   11 R9   12 R15  13 FLAGS 14 NextIP 15 Error
//! 16 RSP  17 TLS_BASE 18 FaultIP 19 R11 20 RCX 21 CS 22 SS
//! ```

use bitflags::bitflags;
use static_assertions::const_assert_eq;

/// Saved register slots, in context order
#[repr(usize)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Rdi = 0,
    Rsi = 1,
    Rax = 2,
    Rbx = 3,
    Rbp = 4,
    R12 = 5,
    R13 = 6,
    R14 = 7,
    Rdx = 8,
    R10 = 9,
    R8 = 10,
    R9 = 11,
    R15 = 12,
    Flags = 13,
    NextIp = 14,
    Error = 15,
    Rsp = 16,
    TlsBase = 17,
    FaultIp = 18,
    R11 = 19,
    Rcx = 20,
    Cs = 21,
    Ss = 22,
}

/// Number of saved register slots
pub const N_CONTEXT_REGISTERS: usize = 23;

/// Message registers, in message order
pub const MSG_REGISTERS: [Register; MSG_REGISTER_COUNT] =
    [Register::R10, Register::R8, Register::R9, Register::R15];

/// Number of message registers passed in machine registers
pub const MSG_REGISTER_COUNT: usize = 4;

/// Badge argument register on return to user
pub const BADGE_REGISTER: Register = Register::Rdi;

/// Message-info argument register on return to user
pub const MSG_INFO_REGISTER: Register = Register::Rsi;

bitflags! {
    /// RFLAGS bits the kernel cares about
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Rflags: u64 {
        const CF = 1 << 0;
        /// Always reads as one
        const RESERVED1 = 1 << 1;
        const ZF = 1 << 6;
        /// Trap (single-step)
        const TF = 1 << 8;
        /// Interrupt enable
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;
        const RF = 1 << 16;

        const _ = !0;
    }
}

impl Rflags {
    /// Initial user-mode flags: interrupts on, reserved bit set
    pub const USER_DEFAULT: Self = Self::from_bits_retain(Self::IF.bits() | Self::RESERVED1.bits());
}

/// Saved user-mode register state of one thread
#[repr(C)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    registers: [u64; N_CONTEXT_REGISTERS],
}

impl UserContext {
    pub const fn new() -> Self {
        Self {
            registers: [0; N_CONTEXT_REGISTERS],
        }
    }

    #[inline(always)]
    pub const fn get(&self, reg: Register) -> u64 {
        self.registers[reg as usize]
    }

    #[inline(always)]
    pub fn set(&mut self, reg: Register, value: u64) {
        self.registers[reg as usize] = value;
    }

    /// Slot by index (message-register arithmetic)
    #[inline(always)]
    pub const fn get_index(&self, index: usize) -> u64 {
        self.registers[index]
    }

    #[inline(always)]
    pub fn set_index(&mut self, index: usize, value: u64) {
        self.registers[index] = value;
    }

    #[inline(always)]
    pub fn flags(&self) -> Rflags {
        Rflags::from_bits_retain(self.get(Register::Flags))
    }

    #[inline]
    pub fn clear_flags(&mut self, flags: Rflags) {
        let cleared = self.flags().difference(flags);
        self.set(Register::Flags, cleared.bits());
    }

    /// Address of a slot; the return transitions pop from here
    #[inline(always)]
    pub fn slot_ptr(&self, reg: Register) -> *const u64 {
        &self.registers[reg as usize]
    }

    /// Writable address of a slot; `sysexit` patches FLAGS in place
    #[inline(always)]
    pub fn slot_ptr_mut(&mut self, reg: Register) -> *mut u64 {
        &mut self.registers[reg as usize]
    }

    /// Top of the trap-entry save area (one past `Error`)
    ///
    /// Hardware pushes SS..RSP below this and entry code pushes the rest,
    /// so trap entry points its stack here.
    #[inline(always)]
    pub fn user_context_ptr(&mut self) -> *mut u64 {
        let base = self.registers.as_mut_ptr();
        // In bounds: Error + 1 < N_CONTEXT_REGISTERS.
        base.wrapping_add(Register::Error as usize + 1)
    }

    pub fn as_slice(&self) -> &[u64; N_CONTEXT_REGISTERS] {
        &self.registers
    }
}

impl Default for UserContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Hardware debug register state (DR0-DR3 addresses, DR6 status, DR7 control)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugRegisters {
    pub breakpoints: [u64; 4],
    pub dr6: u64,
    pub dr7: u64,
}

impl DebugRegisters {
    pub const fn new() -> Self {
        Self {
            breakpoints: [0; 4],
            dr6: 0,
            dr7: 0,
        }
    }
}

// Message registers are consecutive slots.
const_assert_eq!(MSG_REGISTER_COUNT, 4);
const_assert_eq!(Register::R8 as usize, Register::R10 as usize + 1);
const_assert_eq!(Register::R9 as usize, Register::R8 as usize + 1);
const_assert_eq!(Register::R15 as usize, Register::R9 as usize + 1);

// sysret pops RAX..NextIP in one run.
const_assert_eq!(Register::NextIp as usize - Register::Rax as usize, 12);

// sysexit additionally walks Error, RSP, TLS_BASE, FaultIP to R11.
const_assert_eq!(Register::Rsp as usize, Register::NextIp as usize + 2);
const_assert_eq!(Register::R11 as usize, Register::Rsp as usize + 3);
const_assert_eq!(Register::Ss as usize + 1, N_CONTEXT_REGISTERS);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_registers_are_r10_r8_r9_r15() {
        let indices: Vec<usize> = MSG_REGISTERS.iter().map(|&r| r as usize).collect();
        assert_eq!(indices, vec![9, 10, 11, 12]);
    }

    #[test]
    fn user_context_pointer_is_one_past_error() {
        let mut ctx = UserContext::new();
        let base = ctx.as_slice().as_ptr() as usize;
        let ptr = ctx.user_context_ptr() as usize;
        assert_eq!(ptr - base, (Register::Error as usize + 1) * 8);
        assert_eq!(ptr, ctx.slot_ptr(Register::Rsp) as usize);
    }

    #[test]
    fn clear_flags_only_touches_requested_bits() {
        let mut ctx = UserContext::new();
        ctx.set(Register::Flags, (Rflags::IF | Rflags::TF | Rflags::RESERVED1).bits());
        ctx.clear_flags(Rflags::IF);
        assert_eq!(ctx.flags(), Rflags::TF | Rflags::RESERVED1);
    }

    #[test]
    fn user_default_flags() {
        assert_eq!(Rflags::USER_DEFAULT.bits(), 0x202);
    }
}
