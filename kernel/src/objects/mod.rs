//! Kernel Object Model
//!
//! Packed, word-level representations of the kernel objects the IPC fast path
//! touches. Every object is a small `#[repr(C)]` array of machine words whose
//! fields are read and written through named accessors; no accessor checks
//! the object's type.
//!
//! ## Object Types
//!
//! - **Capability** (`Cap`): two words, type tag in the top five bits
//! - **Endpoint**: receive/send queue (tail + state, head)
//! - **TCB**: register context, thread state, IPC capability slots
//! - **CTE / MDB node**: a capability slot and its derivation-tree links
//!
//! ## Pointer Packing
//!
//! Kernel pointers are stored as their low 48 bits. Readers either
//! sign-extend bit 47 (general accessors) or OR in the kernel window base
//! (`_fp` accessors, which know the object lives in the kernel window).

pub mod capability;
pub mod cdt;
pub mod endpoint;
pub mod tcb;

pub use capability::{Cap, CapTag, EndpointRights};
pub use cdt::{Cte, MdbNode};
pub use endpoint::{Endpoint, EndpointState};
pub use tcb::{FaultType, Tcb, ThreadState, ThreadStateType};

/// Low `bits` bits set
#[inline(always)]
pub const fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Canonical address from a 48-bit packed pointer field
#[inline(always)]
pub(crate) const fn sign_extend_48(bits: u64) -> usize {
    (((bits << 16) as i64) >> 16) as usize
}
