//! Capability Derivation Tree (CDT) nodes
//!
//! Every capability slot (CTE) pairs a capability with an MDB node linking
//! it into the derivation tree. The tree is a doubly linked list in
//! depth-first order; depth is implied by the capabilities themselves.
//!
//! ## Design
//!
//! The fast path only links and unlinks reply capabilities, so this module
//! exposes raw word-level mutators instead of a tree API:
//! - `set_prev_np` overwrites the `prev` word
//! - `mset_next_revocable_first_badged` overwrites the whole `next` word,
//!   flags included, with one store
//!
//! ## Layout
//!
//! ```text
//! word 0: prev (slot address)
//! word 1: [ next (bits 2..63) | revocable (bit 1) | first_badged (bit 0) ]
//! ```

use super::capability::Cap;

const MDB_FIRST_BADGED: u64 = 1 << 0;
const MDB_REVOCABLE: u64 = 1 << 1;
const MDB_NEXT_MASK: u64 = !0b11;

/// Derivation-tree links of one capability slot
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MdbNode {
    words: [u64; 2],
}

impl MdbNode {
    /// Unlinked node
    pub const fn null() -> Self {
        Self { words: [0; 2] }
    }

    pub const fn from_words(word0: u64, word1: u64) -> Self {
        Self { words: [word0, word1] }
    }

    #[inline(always)]
    pub const fn words(&self) -> [u64; 2] {
        self.words
    }

    #[inline(always)]
    pub const fn prev(&self) -> u64 {
        self.words[0]
    }

    #[inline(always)]
    pub const fn next(&self) -> u64 {
        self.words[1] & MDB_NEXT_MASK
    }

    #[inline(always)]
    pub const fn revocable(&self) -> bool {
        self.words[1] & MDB_REVOCABLE != 0
    }

    #[inline(always)]
    pub const fn first_badged(&self) -> bool {
        self.words[1] & MDB_FIRST_BADGED != 0
    }

    /// Overwrite `prev`
    ///
    /// # Arguments
    /// * `prev` - Address of the preceding slot (or 0)
    #[inline(always)]
    pub fn set_prev_np(&mut self, prev: u64) {
        self.words[0] = prev;
    }

    /// Overwrite `next` and both flags in a single store
    ///
    /// # Arguments
    /// * `next` - Address of the following slot; must be 4-byte aligned
    /// * `revocable` - 0 or 1
    /// * `first_badged` - 0 or 1
    #[inline(always)]
    pub fn mset_next_revocable_first_badged(&mut self, next: u64, revocable: u64, first_badged: u64) {
        self.words[1] = next | (revocable << 1) | first_badged;
    }
}

/// Capability table entry: a capability and its tree links
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cte {
    pub cap: Cap,
    pub mdb: MdbNode,
}

const _: () = assert!(core::mem::size_of::<Cte>() == 32);
const _: () = assert!(core::mem::align_of::<Cte>() >= 4);

impl Cte {
    /// Empty slot
    pub const fn null() -> Self {
        Self {
            cap: Cap::null(),
            mdb: MdbNode::null(),
        }
    }

    pub const fn new(cap: Cap) -> Self {
        Self {
            cap,
            mdb: MdbNode::null(),
        }
    }

    /// Slot address as stored in MDB words
    #[inline(always)]
    pub fn addr(&self) -> u64 {
        self as *const Cte as u64
    }

    /// Clear capability and links
    #[inline]
    pub fn clear(&mut self) {
        *self = Self::null();
    }
}
