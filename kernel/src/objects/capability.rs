//! Capability words
//!
//! A capability is two 64-bit words. Word 0 carries the type tag in bits
//! 59..63 and type-specific fields below it; word 1 is usually an object
//! pointer or a badge.
//!
//! ## Layouts used by the fast path
//!
//! ```text
//! endpoint  w0: [tag:5][grant_reply][grant][recv][send][..][ep_ptr:48]
//!           w1: badge
//! reply     w0: [tag:5][.............................][master]
//!           w1: tcb_ptr
//! pml4      w0: [tag:5][mapped][...............][mapped_asid:12]
//!           w1: base_ptr
//! ```
//!
//! Accessors assume the caller already knows the type; nothing here checks
//! the tag except the predicates at the bottom of the file.

use bitflags::bitflags;

use super::{mask, sign_extend_48, Tcb};
use super::endpoint::Endpoint;
use crate::arch::x86_64::vspace::Pml4;

/// Position of the type tag in word 0
pub const CAP_TAG_SHIFT: u32 = 59;

/// Bit of a PML4 cap's `is_mapped` flag (word 0)
pub const PML4_MAPPED_SHIFT: u32 = 58;

const CAP_PTR_MASK: u64 = mask(48);
const PML4_ASID_MASK: u64 = mask(12);

/// Capability type tags
///
/// Architecture-independent objects use even tags; x86_64 paging objects
/// use odd tags.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapTag {
    Null = 0,
    Frame = 1,
    Untyped = 2,
    PageTable = 3,
    Endpoint = 4,
    PageDirectory = 5,
    Notification = 6,
    Pdpt = 7,
    Reply = 8,
    Pml4 = 9,
    CNode = 10,
    Thread = 12,
}

impl CapTag {
    /// Decode a 5-bit tag; `None` for tags this kernel does not define
    pub const fn from_bits(bits: u64) -> Option<Self> {
        Some(match bits {
            0 => CapTag::Null,
            1 => CapTag::Frame,
            2 => CapTag::Untyped,
            3 => CapTag::PageTable,
            4 => CapTag::Endpoint,
            5 => CapTag::PageDirectory,
            6 => CapTag::Notification,
            7 => CapTag::Pdpt,
            8 => CapTag::Reply,
            9 => CapTag::Pml4,
            10 => CapTag::CNode,
            12 => CapTag::Thread,
            _ => return None,
        })
    }
}

bitflags! {
    /// Endpoint capability rights, at their positions in word 0
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EndpointRights: u64 {
        const CAN_SEND = 1 << 55;
        const CAN_RECEIVE = 1 << 56;
        const CAN_GRANT = 1 << 57;
        const CAN_GRANT_REPLY = 1 << 58;
    }
}

/// Packed capability
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cap {
    words: [u64; 2],
}

const _: () = assert!(core::mem::size_of::<Cap>() == 16);

impl Cap {
    /// Empty slot
    pub const fn null() -> Self {
        Self { words: [0; 2] }
    }

    /// Capability from its raw packed words
    pub const fn from_words(word0: u64, word1: u64) -> Self {
        Self { words: [word0, word1] }
    }

    /// Raw packed words
    #[inline(always)]
    pub const fn words(&self) -> [u64; 2] {
        self.words
    }

    /// Raw 5-bit type tag
    #[inline(always)]
    pub const fn tag_bits(&self) -> u64 {
        self.words[0] >> CAP_TAG_SHIFT
    }

    /// Decoded type tag, `None` for encodings this kernel does not define
    #[inline]
    pub const fn tag(&self) -> Option<CapTag> {
        CapTag::from_bits(self.tag_bits())
    }

    /// Compare the raw tag without decoding it
    #[inline(always)]
    pub const fn has_tag(&self, tag: CapTag) -> bool {
        self.tag_bits() == tag as u64
    }

    /// Whether the slot holding this cap is empty
    #[inline(always)]
    pub const fn is_null(&self) -> bool {
        self.has_tag(CapTag::Null)
    }

    // Endpoint capabilities

    /// Create an endpoint capability
    ///
    /// # Arguments
    /// * `ep` - endpoint object; only bits 0..47 are stored
    /// * `badge` - badge delivered to receivers
    /// * `rights` - send / receive / grant rights
    pub fn endpoint_cap_new(ep: *const Endpoint, badge: u64, rights: EndpointRights) -> Self {
        let word0 = ((CapTag::Endpoint as u64) << CAP_TAG_SHIFT)
            | rights.bits()
            | (ep as u64 & CAP_PTR_MASK);
        Self::from_words(word0, badge)
    }

    /// Endpoint object; the pointer is canonicalised from bit 47
    #[inline(always)]
    pub fn ep_ptr(&self) -> *mut Endpoint {
        sign_extend_48(self.words[0] & CAP_PTR_MASK) as *mut Endpoint
    }

    /// Badge of an endpoint cap
    #[inline(always)]
    pub const fn ep_badge(&self) -> u64 {
        self.words[1]
    }

    /// Rights of an endpoint cap
    #[inline(always)]
    pub const fn ep_rights(&self) -> EndpointRights {
        EndpointRights::from_bits_truncate(self.words[0])
    }

    // Reply capabilities

    /// Create a reply capability
    ///
    /// # Arguments
    /// * `master` - the thread's own master reply cap rather than a usable one
    /// * `tcb` - thread the reply goes to
    pub fn reply_cap_new(master: bool, tcb: *const Tcb) -> Self {
        let word0 = ((CapTag::Reply as u64) << CAP_TAG_SHIFT) | master as u64;
        Self::from_words(word0, tcb as u64)
    }

    /// Thread a reply cap replies to
    #[inline(always)]
    pub fn reply_tcb_ptr(&self) -> *mut Tcb {
        self.words[1] as *mut Tcb
    }

    /// Whether this is a master reply cap
    #[inline(always)]
    pub const fn is_reply_master(&self) -> bool {
        self.words[0] & 1 != 0
    }

    // PML4 capabilities

    /// Create a PML4 capability
    ///
    /// # Arguments
    /// * `base` - the translation root, stored unencoded in word 1
    /// * `mapped` - whether the root has been assigned an ASID
    /// * `mapped_asid` - hardware ASID (PCID); low 12 bits kept
    pub fn pml4_cap_new(base: *const Pml4, mapped: bool, mapped_asid: u64) -> Self {
        let word0 = ((CapTag::Pml4 as u64) << CAP_TAG_SHIFT)
            | ((mapped as u64) << PML4_MAPPED_SHIFT)
            | (mapped_asid & PML4_ASID_MASK);
        Self::from_words(word0, base as u64)
    }

    /// Whether a PML4 cap has been assigned an ASID
    #[inline(always)]
    pub const fn pml4_is_mapped(&self) -> bool {
        (self.words[0] >> PML4_MAPPED_SHIFT) & 1 != 0
    }

    /// Translation root of a PML4 cap (word 1, no decode)
    #[inline(always)]
    pub fn vtable_root_fp(&self) -> *mut Pml4 {
        self.words[1] as *mut Pml4
    }

    /// Mapped ASID of a PML4 cap
    ///
    /// The ASID occupies the low 12 bits and nothing else lives in the low 32,
    /// so truncating to `u32` extracts it with a single move.
    #[inline(always)]
    pub const fn pml4_mapped_asid_fp(&self) -> u64 {
        self.words[0] as u32 as u64
    }
}

/// Whether `cap` is a mapped PML4 capability
///
/// Tag and mapped bit sit next to each other at the top of word 0, so one
/// shift and one comparison check both.
#[inline(always)]
pub const fn is_valid_vtable_root_fp(cap: Cap) -> bool {
    (cap.words[0] >> PML4_MAPPED_SHIFT) == (((CapTag::Pml4 as u64) << 1) | 1)
}

/// Whether `cap` is a reply cap that may be used to reply (not the master)
#[inline(always)]
pub const fn fastpath_reply_cap_check(cap: Cap) -> bool {
    cap.has_tag(CapTag::Reply) && !cap.is_reply_master()
}
