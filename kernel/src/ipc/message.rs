//! IPC message info and message-register transfer
//!
//! ## Message Info Layout
//!
//! ```text
//! bits 12..63  label
//! bits  9..11  caps_unwrapped
//! bits  7..8   extra_caps
//! bits  0..6   length
//! ```

use static_assertions::const_assert_eq;

use crate::arch::x86_64::registers::{MSG_REGISTERS, MSG_REGISTER_COUNT};
use crate::objects::{mask, Tcb};

pub const MSG_LENGTH_BITS: u32 = 7;
pub const MSG_EXTRA_CAPS_BITS: u32 = 2;
pub const MSG_CAPS_UNWRAPPED_BITS: u32 = 3;

const EXTRA_CAPS_SHIFT: u32 = MSG_LENGTH_BITS;
const CAPS_UNWRAPPED_SHIFT: u32 = EXTRA_CAPS_SHIFT + MSG_EXTRA_CAPS_BITS;
const LABEL_SHIFT: u32 = CAPS_UNWRAPPED_SHIFT + MSG_CAPS_UNWRAPPED_BITS;

const_assert_eq!(LABEL_SHIFT, 12);

/// Packed message-info word
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageInfo(u64);

impl MessageInfo {
    pub const fn new(label: u64, caps_unwrapped: u64, extra_caps: u64, length: u64) -> Self {
        Self(
            (label << LABEL_SHIFT)
                | ((caps_unwrapped & mask(MSG_CAPS_UNWRAPPED_BITS)) << CAPS_UNWRAPPED_SHIFT)
                | ((extra_caps & mask(MSG_EXTRA_CAPS_BITS)) << EXTRA_CAPS_SHIFT)
                | (length & mask(MSG_LENGTH_BITS)),
        )
    }

    pub const fn from_word(word: u64) -> Self {
        Self(word)
    }

    #[inline(always)]
    pub const fn word(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn label(self) -> u64 {
        self.0 >> LABEL_SHIFT
    }

    #[inline]
    pub const fn caps_unwrapped(self) -> u64 {
        (self.0 >> CAPS_UNWRAPPED_SHIFT) & mask(MSG_CAPS_UNWRAPPED_BITS)
    }

    #[inline]
    pub const fn extra_caps(self) -> u64 {
        (self.0 >> EXTRA_CAPS_SHIFT) & mask(MSG_EXTRA_CAPS_BITS)
    }

    #[inline(always)]
    pub const fn length(self) -> u64 {
        self.0 & mask(MSG_LENGTH_BITS)
    }

    /// Same info with `caps_unwrapped` replaced
    #[inline(always)]
    pub const fn with_caps_unwrapped(self, caps_unwrapped: u64) -> Self {
        let cleared = self.0 & !(mask(MSG_CAPS_UNWRAPPED_BITS) << CAPS_UNWRAPPED_SHIFT);
        Self(cleared | ((caps_unwrapped & mask(MSG_CAPS_UNWRAPPED_BITS)) << CAPS_UNWRAPPED_SHIFT))
    }
}

// The check below hard-codes "at most four message registers".
const_assert_eq!(MSG_REGISTER_COUNT, 4);

/// Zero iff the message fits the fast path: `length <= 4` and no extra caps
///
/// Masking keeps length and extra_caps (bits 0..8). Adding 3 carries into
/// bit 3 exactly when length >= 5; any extra cap is already at bit 7 or 8.
/// Clearing bits 0..2 then leaves a non-zero value in both failing cases.
/// Widening either field or changing the register count breaks the trick.
#[inline(always)]
pub const fn fastpath_mi_check(msg_info: u64) -> u64 {
    ((msg_info & mask(MSG_LENGTH_BITS + MSG_EXTRA_CAPS_BITS)) + 3) & !mask(3)
}

/// Copy the first `length` message registers from `src` to `dest`
///
/// `length` must be at most four (guaranteed by [`fastpath_mi_check`]).
#[inline(always)]
pub fn fastpath_copy_mrs(length: usize, src: &Tcb, dest: &mut Tcb) {
    // Message registers are consecutive context slots.
    let first = MSG_REGISTERS[0] as usize;
    for reg in first..first + length {
        let value = src.context().get_index(reg);
        dest.context_mut().set_index(reg, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86_64::registers::Register;

    #[test]
    fn mi_check_accepts_short_messages_without_caps() {
        for length in 0..=4 {
            for label in [0, 1, 0xFFFF, u64::MAX >> LABEL_SHIFT] {
                for unwrapped in 0..8 {
                    let info = MessageInfo::new(label, unwrapped, 0, length);
                    assert_eq!(fastpath_mi_check(info.word()), 0, "{:?}", info);
                }
            }
        }
    }

    #[test]
    fn mi_check_rejects_long_messages() {
        for length in [5, 6, 7, 64, 120, 127] {
            let info = MessageInfo::new(0x55, 7, 0, length);
            assert_ne!(fastpath_mi_check(info.word()), 0, "length {}", length);
        }
    }

    #[test]
    fn mi_check_rejects_extra_caps() {
        for extra in 1..=3 {
            for length in 0..=4 {
                let info = MessageInfo::new(u64::MAX >> LABEL_SHIFT, 0, extra, length);
                assert_ne!(fastpath_mi_check(info.word()), 0);
            }
        }
    }

    #[test]
    fn mi_check_example() {
        assert_eq!(fastpath_mi_check(MessageInfo::new(0, 0, 0, 2).word()), 0);
    }

    #[test]
    fn message_info_fields() {
        let info = MessageInfo::new(0xABC, 5, 2, 33);
        assert_eq!(info.label(), 0xABC);
        assert_eq!(info.caps_unwrapped(), 5);
        assert_eq!(info.extra_caps(), 2);
        assert_eq!(info.length(), 33);

        let cleared = info.with_caps_unwrapped(0);
        assert_eq!(cleared.caps_unwrapped(), 0);
        assert_eq!(cleared.label(), 0xABC);
        assert_eq!(cleared.length(), 33);
    }

    #[test]
    fn copy_mrs_copies_prefix_only() {
        for n in 0..=MSG_REGISTER_COUNT {
            let mut src = Box::new(Tcb::new(1, 0));
            let mut dest = Box::new(Tcb::new(2, 0));
            for (i, &reg) in MSG_REGISTERS.iter().enumerate() {
                src.context_mut().set(reg, 0x1000 + i as u64);
                dest.context_mut().set(reg, 0xD000 + i as u64);
            }

            fastpath_copy_mrs(n, &src, &mut dest);

            for (i, &reg) in MSG_REGISTERS.iter().enumerate() {
                let base = if i < n { 0x1000 } else { 0xD000 };
                let expected = base + i as u64;
                assert_eq!(dest.context().get(reg), expected, "n={} mr{}", n, i);
            }
        }
    }

    #[test]
    fn copy_mrs_leaves_other_registers() {
        let mut src = Box::new(Tcb::new(1, 0));
        let mut dest = Box::new(Tcb::new(2, 0));
        src.context_mut().set(Register::Rdx, 1);
        src.context_mut().set(Register::Flags, 0);
        dest.context_mut().set(Register::Rdx, 2);

        fastpath_copy_mrs(4, &src, &mut dest);

        assert_eq!(dest.context().get(Register::Rdx), 2);
        assert_ne!(dest.context().get(Register::Flags), 0);
    }
}
