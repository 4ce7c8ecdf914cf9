//! Console that drops its output
//!
//! Used when no serial port is configured. Nothing reaches hardware, but the
//! number of dropped bytes is kept so a missing console can be told apart
//! from a silent kernel.

use core::sync::atomic::{AtomicUsize, Ordering};

use super::Console;

pub struct NullConsole {
    dropped: AtomicUsize,
}

impl NullConsole {
    pub const fn new() -> Self {
        Self {
            dropped: AtomicUsize::new(0),
        }
    }

    /// Bytes written and discarded since boot
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for NullConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl Console for NullConsole {
    #[inline(always)]
    fn putc(&self, _c: u8) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_translated_bytes() {
        let console = NullConsole::new();
        console.init();
        console.puts("ok\n");
        // CR inserted before LF.
        assert_eq!(console.dropped(), 4);
    }
}
