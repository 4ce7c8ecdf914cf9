//! Address-space switch for the fast path
//!
//! An address space is a PML4 table plus the hardware ASID (PCID) it is
//! tagged with; together they form the CR3 value. The fast path writes CR3
//! only when the value actually changes, which for a ping-pong between two
//! threads of the same process is never.
//!
//! On SMP builds each PML4 records which CPUs may hold stale TLB entries for
//! it. The bitmap lives in a PML4 slot reserved for the purpose and kept
//! non-present, so the MMU never interprets it.

use core::fmt;

use static_assertions::const_assert;

use crate::config::{KernelConfig, MAX_NUM_NODES};
use crate::machine::Machine;
use crate::objects::{mask, Tcb};
use crate::smp::NodeState;

/// Entries per PML4 table
pub const PML4_ENTRIES: usize = 512;

/// PML4 slot holding the TLB shootdown bitmap
///
/// Slot 511 maps the kernel window; 510 is never used for translation.
pub const TLB_BITMAP_SLOT: usize = 510;

/// Bit 0 (present) of the bitmap slot stays clear; CPU `n` uses bit `n + 1`.
const TLB_BITMAP_SHIFT: usize = 1;

/// CPUs a TLB bitmap can track
pub const TLB_BITMAP_CPUS: usize = 64 - TLB_BITMAP_SHIFT;

const_assert!(MAX_NUM_NODES <= TLB_BITMAP_CPUS);

/// PCID width
pub const ASID_BITS: u32 = 12;

const CR3_PCID_MASK: u64 = mask(ASID_BITS);
const CR3_BASE_MASK: u64 = mask(52) & !mask(12);

/// Top-level page table
#[repr(C, align(4096))]
pub struct Pml4 {
    entries: [u64; PML4_ENTRIES],
}

const_assert!(core::mem::size_of::<Pml4>() == 4096);

impl Pml4 {
    /// Empty table: no mappings, no CPUs in the TLB bitmap
    pub const fn new() -> Self {
        Self {
            entries: [0; PML4_ENTRIES],
        }
    }

    /// Raw entry at `index`
    #[inline]
    pub fn entry(&self, index: usize) -> u64 {
        self.entries[index]
    }

    /// Overwrite the raw entry at `index`
    #[inline]
    pub fn set_entry(&mut self, index: usize, value: u64) {
        self.entries[index] = value;
    }

    /// Record that `cpu` may cache translations for this table
    #[inline(always)]
    pub fn tlb_bitmap_set(&mut self, cpu: usize) {
        debug_assert!(cpu < TLB_BITMAP_CPUS, "cpu {} outside the TLB bitmap", cpu);
        self.entries[TLB_BITMAP_SLOT] |= 1 << (cpu + TLB_BITMAP_SHIFT);
    }

    /// Forget `cpu` after its TLB has been flushed for this table
    #[inline]
    pub fn tlb_bitmap_clear(&mut self, cpu: usize) {
        debug_assert!(cpu < TLB_BITMAP_CPUS, "cpu {} outside the TLB bitmap", cpu);
        self.entries[TLB_BITMAP_SLOT] &= !(1 << (cpu + TLB_BITMAP_SHIFT));
    }

    /// CPUs that may cache translations for this table, bit `n` = CPU `n`
    #[inline]
    pub fn tlb_bitmap(&self) -> u64 {
        self.entries[TLB_BITMAP_SLOT] >> TLB_BITMAP_SHIFT
    }
}

impl Default for Pml4 {
    fn default() -> Self {
        Self::new()
    }
}

/// A CR3 value: PML4 physical base (bits 12..51) and PCID (bits 0..11)
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Cr3(u64);

impl Cr3 {
    /// CR3 value for a PML4 at `pml4_paddr` tagged with `pcid`
    ///
    /// # Arguments
    /// * `pml4_paddr` - physical base; bits outside 12..51 are dropped
    /// * `pcid` - hardware ASID; low 12 bits kept
    pub const fn new(pml4_paddr: u64, pcid: u64) -> Self {
        Self((pml4_paddr & CR3_BASE_MASK) | (pcid & CR3_PCID_MASK))
    }

    /// CR3 value as read from the register
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw register value
    #[inline(always)]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Physical base of the PML4
    #[inline]
    pub const fn pml4_base(self) -> u64 {
        self.0 & CR3_BASE_MASK
    }

    /// PCID tag
    #[inline]
    pub const fn pcid(self) -> u64 {
        self.0 & CR3_PCID_MASK
    }
}

impl fmt::Debug for Cr3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cr3({:#x}, pcid={})", self.pml4_base(), self.pcid())
    }
}

/// Make `thread` current on this node, switching to `vroot` tagged with
/// `stored_hw_asid`
///
/// `stored_hw_asid` is the mapped-ASID word of the thread's PML4 cap; only
/// its low 12 bits are used. The caller has validated the cap.
#[inline(always)]
pub fn switch_to_thread_fp<M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    thread: &mut Tcb,
    vroot: &mut Pml4,
    stored_hw_asid: u64,
) {
    let new_vroot = config.pptr_to_paddr(vroot as *const Pml4 as usize);
    let asid = stored_hw_asid & CR3_PCID_MASK;
    let new_cr3 = Cr3::new(new_vroot as u64, asid);

    if machine.current_cr3() != new_cr3 {
        if config.is_smp() {
            vroot.tlb_bitmap_set(node.cpu_index());
        }
        machine.set_current_cr3(new_cr3);
    }

    if config.is_smp() {
        node.set_current_user_context(thread.context_mut().user_context_ptr());
    }

    node.set_cur_thread(thread);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock::{MachineEvent, MockMachine};

    fn boxed_pml4() -> Box<Pml4> {
        Box::new(Pml4::new())
    }

    #[test]
    fn cr3_packs_base_and_pcid() {
        let cr3 = Cr3::new(0x0012_3000, 0x1005);
        assert_eq!(cr3.pml4_base(), 0x0012_3000);
        assert_eq!(cr3.pcid(), 0x005);
        assert_eq!(cr3.bits(), 0x0012_3005);
    }

    #[test]
    fn same_root_and_asid_never_rewrites_cr3() {
        let config = KernelConfig::host();
        let mut node = NodeState::new(0);
        let mut thread = Box::new(Tcb::new(1, 0));
        let mut root = boxed_pml4();
        let cr3 = Cr3::new(&*root as *const Pml4 as u64, 5);
        let mut machine = MockMachine::with_cr3(cr3);

        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut root, 5);
        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut root, 5);

        assert_eq!(machine.cr3_writes(), 0);
        assert_eq!(node.cur_thread(), &mut *thread as *mut Tcb);
    }

    #[test]
    fn new_root_writes_cr3_once() {
        let config = KernelConfig::host();
        let mut node = NodeState::new(0);
        let mut thread = Box::new(Tcb::new(1, 0));
        let mut first = boxed_pml4();
        let mut second = boxed_pml4();
        let mut machine = MockMachine::with_cr3(Cr3::new(&*first as *const Pml4 as u64, 5));

        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut second, 5);
        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut second, 5);

        let expected = Cr3::new(&*second as *const Pml4 as u64, 5);
        assert_eq!(machine.events(), &[MachineEvent::WriteCr3(expected)]);
        assert_eq!(machine.current_cr3(), expected);

        // A different ASID on the old root is another switch.
        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut first, 7);
        assert_eq!(machine.cr3_writes(), 2);
    }

    #[test]
    fn stored_asid_is_masked_to_pcid_width() {
        let config = KernelConfig::host();
        let mut node = NodeState::new(0);
        let mut thread = Box::new(Tcb::new(1, 0));
        let mut root = boxed_pml4();
        let mut machine = MockMachine::new();

        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut root, 0xF_F123);
        assert_eq!(machine.current_cr3().pcid(), 0x123);
    }

    #[test]
    fn smp_switch_marks_tlb_bitmap_and_user_context() {
        let config = KernelConfig::host().with_nodes(4);
        let mut node = NodeState::new(2);
        let mut thread = Box::new(Tcb::new(1, 0));
        let mut root = boxed_pml4();
        let mut machine = MockMachine::new();

        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut root, 1);

        assert_eq!(root.tlb_bitmap(), 1 << 2);
        // Present bit of the reserved slot stays clear.
        assert_eq!(root.entry(TLB_BITMAP_SLOT) & 1, 0);
        assert_eq!(
            node.current_user_context(),
            thread.context_mut().user_context_ptr()
        );
    }

    #[test]
    fn uniprocessor_switch_leaves_bitmap_and_user_context() {
        let config = KernelConfig::host();
        let mut node = NodeState::new(0);
        let mut thread = Box::new(Tcb::new(1, 0));
        let mut root = boxed_pml4();
        let mut machine = MockMachine::new();

        switch_to_thread_fp(&mut machine, &mut node, &config, &mut thread, &mut root, 1);

        assert_eq!(root.tlb_bitmap(), 0);
        assert!(node.current_user_context().is_null());
        assert_eq!(machine.cr3_writes(), 1);
    }

    #[test]
    fn tlb_bitmap_covers_every_trackable_cpu() {
        let mut root = boxed_pml4();
        let last = TLB_BITMAP_CPUS - 1;
        root.tlb_bitmap_set(0);
        root.tlb_bitmap_set(last);
        assert_eq!(root.tlb_bitmap(), 1 | (1 << last));
        assert_eq!(root.entry(TLB_BITMAP_SLOT) & 1, 0);

        root.tlb_bitmap_clear(last);
        assert_eq!(root.tlb_bitmap(), 1);
    }

    #[test]
    #[should_panic(expected = "outside the TLB bitmap")]
    fn tlb_bitmap_rejects_untrackable_cpu() {
        boxed_pml4().tlb_bitmap_set(TLB_BITMAP_CPUS);
    }
}
