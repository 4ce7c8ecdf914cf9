//! Thread Control Block (TCB)
//!
//! A TCB holds everything the IPC fast path needs to move a thread between
//! running and blocked:
//! - x86_64 register context (saved user state)
//! - packed thread state (type, blocking object, IPC flags, badge)
//! - endpoint queue links
//! - the IPC capability slots: `vtable` (address-space root), `caller`
//!   (reply cap installed by a call), `reply` (master reply cap)
//! - FPU save area and hardware debug registers
//!
//! ## Thread State Layout
//!
//! ```text
//! word 0: [ blocking_object (bits 4..47) | ts_type (bits 0..3) ]
//! word 1: [ ..... | blocking_ipc_diminish (bit 1) | tcb_queued (bit 0) ]
//! word 2: blocking_ipc_badge
//! ```

use core::ptr;

use super::cdt::Cte;
use super::{mask, sign_extend_48};
use crate::arch::x86_64::fpu::FpuState;
use crate::arch::x86_64::registers::{DebugRegisters, Register, Rflags, UserContext};

const TS_TYPE_MASK: u64 = mask(4);
const TS_BLOCKING_OBJECT_MASK: u64 = mask(48) & !mask(4);
const TS_TCB_QUEUED: u64 = 1 << 0;
const TS_DIMINISH_SHIFT: u32 = 1;

/// Thread state type (4 bits)
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStateType {
    Inactive = 0,
    Running = 1,
    Restart = 2,
    BlockedOnReceive = 3,
    BlockedOnSend = 4,
    BlockedOnReply = 5,
    BlockedOnNotification = 6,
    IdleThreadState = 7,
}

impl ThreadStateType {
    pub const fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            0 => Self::Inactive,
            1 => Self::Running,
            2 => Self::Restart,
            3 => Self::BlockedOnReceive,
            4 => Self::BlockedOnSend,
            5 => Self::BlockedOnReply,
            6 => Self::BlockedOnNotification,
            7 => Self::IdleThreadState,
            _ => return None,
        })
    }
}

/// Packed thread state
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThreadState {
    words: [u64; 3],
}

impl ThreadState {
    pub const fn new(ts_type: ThreadStateType) -> Self {
        Self {
            words: [ts_type as u64, 0, 0],
        }
    }

    pub const fn from_words(words: [u64; 3]) -> Self {
        Self { words }
    }

    #[inline(always)]
    pub const fn words(&self) -> [u64; 3] {
        self.words
    }

    #[inline(always)]
    pub const fn ts_type_bits(&self) -> u64 {
        self.words[0] & TS_TYPE_MASK
    }

    #[inline]
    pub const fn ts_type(&self) -> Option<ThreadStateType> {
        ThreadStateType::from_bits(self.ts_type_bits())
    }

    /// Replace the type, keeping the blocking object
    #[inline(always)]
    pub fn set_ts_type_np(&mut self, ts_type: ThreadStateType) {
        self.words[0] = (self.words[0] & !TS_TYPE_MASK) | ts_type as u64;
    }

    #[inline(always)]
    pub const fn blocking_object(&self) -> usize {
        sign_extend_48(self.words[0] & TS_BLOCKING_OBJECT_MASK)
    }

    /// Store blocking object and type together, overwriting word 0
    ///
    /// `object` must be 16-byte aligned.
    #[inline(always)]
    pub fn mset_blocking_object_ts_type(&mut self, object: usize, ts_type: ThreadStateType) {
        self.words[0] = (object as u64 & TS_BLOCKING_OBJECT_MASK) | ts_type as u64;
    }

    #[inline(always)]
    pub const fn tcb_queued(&self) -> bool {
        self.words[1] & TS_TCB_QUEUED != 0
    }

    #[inline(always)]
    pub fn set_tcb_queued(&mut self, queued: bool) {
        self.words[1] = (self.words[1] & !TS_TCB_QUEUED) | queued as u64;
    }

    #[inline(always)]
    pub const fn blocking_ipc_diminish(&self) -> bool {
        (self.words[1] >> TS_DIMINISH_SHIFT) & 1 != 0
    }

    /// Raw diminish store: bit 0 (`tcb_queued`) survives, every higher bit
    /// of word 1 comes from `value`
    #[inline(always)]
    pub fn set_blocking_ipc_diminish_np(&mut self, value: u64) {
        self.words[1] = (self.words[1] & TS_TCB_QUEUED) | (value & !TS_TCB_QUEUED);
    }

    #[inline(always)]
    pub fn set_blocking_ipc_diminish(&mut self, diminish: bool) {
        self.set_blocking_ipc_diminish_np((diminish as u64) << TS_DIMINISH_SHIFT);
    }

    #[inline(always)]
    pub const fn blocking_ipc_badge(&self) -> u64 {
        self.words[2]
    }

    #[inline(always)]
    pub fn set_blocking_ipc_badge(&mut self, badge: u64) {
        self.words[2] = badge;
    }
}

/// Pending fault kind; anything but `Null` forces the slow path
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultType {
    #[default]
    Null = 0,
    CapFault = 1,
    UnknownSyscall = 2,
    UserException = 3,
    VmFault = 5,
}

/// Thread Control Block
#[repr(C)]
pub struct Tcb {
    /// Saved user registers; first so trap entry can address it from the TCB
    context: UserContext,

    state: ThreadState,

    /// IPC buffer address, loaded into GS base on return to user
    ipc_buffer: u64,

    fault: FaultType,

    /// CPU this thread is bound to
    affinity: usize,

    ep_next: *mut Tcb,
    ep_prev: *mut Tcb,

    vtable: Cte,
    caller: Cte,
    reply: Cte,

    debug: DebugRegisters,

    tid: usize,

    fpu: FpuState,
}

impl Tcb {
    /// Create an inactive thread with an empty register file
    ///
    /// FLAGS starts with interrupts enabled and the reserved bit set, as every
    /// user-mode RFLAGS must.
    pub fn new(tid: usize, ipc_buffer: u64) -> Self {
        let mut context = UserContext::new();
        context.set(Register::Flags, Rflags::USER_DEFAULT.bits());
        Self {
            context,
            state: ThreadState::new(ThreadStateType::Inactive),
            ipc_buffer,
            fault: FaultType::Null,
            affinity: 0,
            ep_next: ptr::null_mut(),
            ep_prev: ptr::null_mut(),
            vtable: Cte::null(),
            caller: Cte::null(),
            reply: Cte::null(),
            debug: DebugRegisters::new(),
            tid,
            fpu: FpuState::new(),
        }
    }

    #[inline]
    pub fn tid(&self) -> usize {
        self.tid
    }

    #[inline(always)]
    pub fn context(&self) -> &UserContext {
        &self.context
    }

    #[inline(always)]
    pub fn context_mut(&mut self) -> &mut UserContext {
        &mut self.context
    }

    #[inline(always)]
    pub fn state(&self) -> &ThreadState {
        &self.state
    }

    #[inline(always)]
    pub fn state_mut(&mut self) -> &mut ThreadState {
        &mut self.state
    }

    #[inline(always)]
    pub fn ipc_buffer(&self) -> u64 {
        self.ipc_buffer
    }

    #[inline(always)]
    pub fn fault(&self) -> FaultType {
        self.fault
    }

    #[inline]
    pub fn set_fault(&mut self, fault: FaultType) {
        self.fault = fault;
    }

    #[inline(always)]
    pub fn affinity(&self) -> usize {
        self.affinity
    }

    #[inline]
    pub fn set_affinity(&mut self, cpu: usize) {
        self.affinity = cpu;
    }

    #[inline(always)]
    pub fn ep_next(&self) -> *mut Tcb {
        self.ep_next
    }

    #[inline(always)]
    pub fn set_ep_next(&mut self, next: *mut Tcb) {
        self.ep_next = next;
    }

    #[inline(always)]
    pub fn ep_prev(&self) -> *mut Tcb {
        self.ep_prev
    }

    #[inline(always)]
    pub fn set_ep_prev(&mut self, prev: *mut Tcb) {
        self.ep_prev = prev;
    }

    /// Address-space root slot
    #[inline(always)]
    pub fn vtable_slot(&self) -> &Cte {
        &self.vtable
    }

    #[inline(always)]
    pub fn vtable_slot_mut(&mut self) -> &mut Cte {
        &mut self.vtable
    }

    /// Slot receiving the reply cap when this thread is called
    #[inline(always)]
    pub fn caller_slot(&self) -> &Cte {
        &self.caller
    }

    #[inline(always)]
    pub fn caller_slot_mut(&mut self) -> &mut Cte {
        &mut self.caller
    }

    /// Master reply cap slot
    #[inline(always)]
    pub fn reply_slot(&self) -> &Cte {
        &self.reply
    }

    #[inline(always)]
    pub fn reply_slot_mut(&mut self) -> &mut Cte {
        &mut self.reply
    }

    #[inline(always)]
    pub fn debug_registers(&self) -> &DebugRegisters {
        &self.debug
    }

    #[inline]
    pub fn debug_registers_mut(&mut self) -> &mut DebugRegisters {
        &mut self.debug
    }

    #[inline(always)]
    pub fn fpu_state(&self) -> &FpuState {
        &self.fpu
    }

    #[inline(always)]
    pub fn fpu_state_mut(&mut self) -> &mut FpuState {
        &mut self.fpu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diminish_setter_preserves_queued_bit() {
        let mut state = ThreadState::from_words([0, 1, 0]);
        state.set_blocking_ipc_diminish_np(0b10);
        assert_eq!(state.words()[1], 0b11);
        assert!(state.tcb_queued());
        assert!(state.blocking_ipc_diminish());

        // Bit 0 of the new value is ignored, higher bits replace the old ones.
        state.set_blocking_ipc_diminish_np(0xF0 | 1);
        assert_eq!(state.words()[1], 0xF1);
        assert!(!state.blocking_ipc_diminish());
    }

    #[test]
    fn diminish_setter_over_arbitrary_words() {
        let mut seed = 0x9E37_79B9_7F4A_7C15u64;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..1024 {
            let (word0, word1, word2, value) = (next(), next(), next(), next());
            let mut state = ThreadState::from_words([word0, word1, word2]);
            state.set_blocking_ipc_diminish_np(value);

            let [new0, new1, new2] = state.words();
            assert_eq!(new1 & 1, word1 & 1);
            assert_eq!(new1 & !1, value & !1);
            assert_eq!((new0, new2), (word0, word2));
        }
    }

    #[test]
    fn diminish_setter_with_queued_clear() {
        let mut state = ThreadState::from_words([0, 0b10, 0]);
        state.set_blocking_ipc_diminish(false);
        assert_eq!(state.words()[1], 0);
        state.set_blocking_ipc_diminish(true);
        assert_eq!(state.words()[1], 0b10);
        assert!(!state.tcb_queued());
    }

    #[test]
    fn ts_type_update_keeps_blocking_object() {
        let mut state = ThreadState::default();
        state.mset_blocking_object_ts_type(0x0000_7000_0000_1230, ThreadStateType::BlockedOnReceive);
        assert_eq!(state.ts_type(), Some(ThreadStateType::BlockedOnReceive));
        assert_eq!(state.blocking_object(), 0x0000_7000_0000_1230);

        state.set_ts_type_np(ThreadStateType::Running);
        assert_eq!(state.ts_type(), Some(ThreadStateType::Running));
        assert_eq!(state.blocking_object(), 0x0000_7000_0000_1230);
    }

    #[test]
    fn kernel_blocking_object_is_sign_extended() {
        let mut state = ThreadState::default();
        state.mset_blocking_object_ts_type(0xFFFF_FF80_0000_4000, ThreadStateType::BlockedOnSend);
        assert_eq!(state.blocking_object(), 0xFFFF_FF80_0000_4000);
    }

    #[test]
    fn new_thread_defaults() {
        let tcb = Tcb::new(7, 0x5000);
        assert_eq!(tcb.tid(), 7);
        assert_eq!(tcb.ipc_buffer(), 0x5000);
        assert_eq!(tcb.fault(), FaultType::Null);
        assert_eq!(tcb.state().ts_type(), Some(ThreadStateType::Inactive));
        assert!(tcb.caller_slot().cap.is_null());
        assert!(Rflags::from_bits_retain(tcb.context().get(Register::Flags)).contains(Rflags::IF));
    }
}
