//! Endpoint Object
//!
//! Endpoints are rendezvous points for synchronous IPC. An endpoint holds a
//! single queue of blocked threads, all waiting for the same thing (to send
//! or to receive), recorded in the queue state.
//!
//! ## Layout
//!
//! ```text
//! word 0: [ ........ | queue_tail (bits 2..47) | state (bits 0..1) ]
//! word 1: queue_head
//! ```
//!
//! The tail keeps only pointer bits 2..47. TCBs live in the kernel window,
//! so the high bits are implicit and the fast-path reader ORs in the window
//! base instead of decoding.

use core::ptr::{self, NonNull};

use super::Tcb;

/// Pointer bits of the queue tail kept in word 0
pub const EP_QUEUE_TAIL_MASK: u64 = 0xFFFF_FFFF_FFFC;

const EP_STATE_MASK: u64 = 0b11;

/// What the queued threads are waiting for
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Idle = 0,
    Send = 1,
    Recv = 2,
}

/// Endpoint - rendezvous point for synchronous IPC
#[repr(C, align(16))]
#[derive(Debug, Default)]
pub struct Endpoint {
    words: [u64; 2],
}

impl Endpoint {
    /// Idle endpoint with an empty queue
    pub const fn new() -> Self {
        Self { words: [0; 2] }
    }

    /// Endpoint from its raw packed words
    ///
    /// # Arguments
    /// * `word0` - queue tail bits and state
    /// * `word1` - queue head pointer
    pub const fn from_words(word0: u64, word1: u64) -> Self {
        Self { words: [word0, word1] }
    }

    /// Raw packed words
    #[inline(always)]
    pub const fn words(&self) -> [u64; 2] {
        self.words
    }

    /// Queue state; the unused encoding 3 reads as idle
    #[inline(always)]
    pub const fn state(&self) -> EndpointState {
        match self.words[0] & EP_STATE_MASK {
            1 => EndpointState::Send,
            2 => EndpointState::Recv,
            _ => EndpointState::Idle,
        }
    }

    /// Tail of the queue, or `None` when the queue is empty
    ///
    /// `pptr_base` supplies the implicit high bits (the kernel window base).
    #[inline(always)]
    pub fn queue_tail_fp(&self, pptr_base: usize) -> Option<NonNull<Tcb>> {
        let bits = self.words[0] & EP_QUEUE_TAIL_MASK;
        if bits == 0 {
            return None;
        }
        NonNull::new((bits as usize | pptr_base) as *mut Tcb)
    }

    /// Head of the queue; null when the queue is empty
    #[inline(always)]
    pub fn queue_head(&self) -> *mut Tcb {
        self.words[1] as *mut Tcb
    }

    /// Store the queue head without touching word 0
    #[inline(always)]
    pub fn set_queue_head_np(&mut self, head: *const Tcb) {
        self.words[1] = head as u64;
    }

    /// Store tail and state together, overwriting word 0
    #[inline(always)]
    pub fn mset_queue_tail_state(&mut self, tail: *const Tcb, state: EndpointState) {
        self.words[0] = (tail as u64 & EP_QUEUE_TAIL_MASK) | state as u64;
    }

    /// Empty the queue and return to idle
    #[inline]
    pub fn clear_queue(&mut self) {
        self.set_queue_head_np(ptr::null());
        self.mset_queue_tail_state(ptr::null(), EndpointState::Idle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PPTR_BASE;

    #[test]
    fn empty_tail_reports_no_thread() {
        // State bits alone are not a tail.
        let ep = Endpoint::from_words(EndpointState::Recv as u64, 0);
        assert!(ep.queue_tail_fp(PPTR_BASE).is_none());
        assert!(Endpoint::new().queue_tail_fp(0).is_none());
    }

    #[test]
    fn tail_takes_window_base_bits() {
        let ep = Endpoint::from_words(0x0000_FFFF_FFFF_FFF0, 0);
        let tail = ep.queue_tail_fp(PPTR_BASE).unwrap();
        assert_eq!(tail.as_ptr() as usize, PPTR_BASE | 0xFFFF_FFFF_FFF0);
    }

    #[test]
    fn tail_reencodes_to_same_address_bits() {
        // Kernel-window tails: bits 39..47 are set, as in every pointer above
        // the window base.
        const WINDOW_BITS: u64 = 0xFF80_0000_0000;
        const OFFSET_MASK: u64 = 0x7F_FFFF_FFFC;

        for i in 0..4096u64 {
            let addr = WINDOW_BITS | (i.wrapping_mul(0x9E37_79B9_7F4A_7C15) & OFFSET_MASK);
            for state in [EndpointState::Send, EndpointState::Recv] {
                let ep = Endpoint::from_words(addr | state as u64, 0);
                let tail = ep.queue_tail_fp(PPTR_BASE).unwrap();
                assert_eq!(tail.as_ptr() as usize, PPTR_BASE | addr as usize);

                let mut copy = Endpoint::new();
                copy.mset_queue_tail_state(tail.as_ptr(), ep.state());
                assert_eq!(copy.words()[0], ep.words()[0]);
            }
        }
    }

    #[test]
    fn host_pointer_round_trips_with_zero_base() {
        let tcb = 0x0000_5555_0000_1000usize as *const Tcb;
        let mut ep = Endpoint::new();
        ep.mset_queue_tail_state(tcb, EndpointState::Recv);
        ep.set_queue_head_np(tcb);

        assert_eq!(ep.state(), EndpointState::Recv);
        assert_eq!(ep.queue_tail_fp(0).unwrap().as_ptr() as usize, tcb as usize);
        assert_eq!(ep.queue_head() as usize, tcb as usize);

        ep.clear_queue();
        assert_eq!(ep.state(), EndpointState::Idle);
        assert!(ep.queue_head().is_null());
    }
}
