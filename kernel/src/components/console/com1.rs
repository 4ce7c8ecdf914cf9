//! 16550 UART console on the legacy COM1 port (minimal)
//!
//! Polled transmit only. Assumes firmware left the UART at 115200 8N1; `init`
//! reprograms it anyway so the kernel does not depend on that.

use super::Console;

/// Transmit holding register / divisor latch low
const THR: u16 = 0;
/// Interrupt enable / divisor latch high
const IER: u16 = 1;
/// FIFO control
const FCR: u16 = 2;
/// Line control
const LCR: u16 = 3;
/// Modem control
const MCR: u16 = 4;
/// Line status
const LSR: u16 = 5;

const LCR_DLAB: u8 = 1 << 7;
const LCR_8N1: u8 = 0x03;
const LSR_THR_EMPTY: u8 = 1 << 5;

/// COM1 console configuration
#[derive(Clone, Copy)]
pub struct Com1Config {
    /// I/O port base (0x3F8 for COM1)
    pub port: u16,
}

/// Minimal polled 16550 console
pub struct Com1Console {
    port: u16,
}

impl Com1Console {
    pub const fn new(config: Com1Config) -> Self {
        Self { port: config.port }
    }

    #[inline]
    fn tx_ready(&self) -> bool {
        // SAFETY: reading LSR has no side effects.
        unsafe { inb(self.port + LSR) & LSR_THR_EMPTY != 0 }
    }
}

impl Console for Com1Console {
    /// Program 115200 baud, 8N1, FIFOs on, interrupts off
    fn init(&self) {
        // SAFETY: the port range belongs to the UART and nothing else drives it.
        unsafe {
            outb(self.port + IER, 0x00);
            outb(self.port + LCR, LCR_DLAB);
            outb(self.port + THR, 0x01);
            outb(self.port + IER, 0x00);
            outb(self.port + LCR, LCR_8N1);
            outb(self.port + FCR, 0xC7);
            outb(self.port + MCR, 0x03);
        }
    }

    fn putc(&self, c: u8) {
        while !self.tx_ready() {
            core::hint::spin_loop();
        }
        // SAFETY: THR is empty, see above.
        unsafe { outb(self.port + THR, c) }
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn outb(port: u16, value: u8) {
    core::arch::asm!("out dx, al", in("dx") port, in("al") value, options(nomem, nostack, preserves_flags));
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
unsafe fn inb(port: u16) -> u8 {
    let value: u8;
    core::arch::asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
    value
}

// Port I/O only exists on x86; elsewhere the console is inert (host docs builds).
#[cfg(not(target_arch = "x86_64"))]
unsafe fn outb(_port: u16, _value: u8) {}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn inb(_port: u16) -> u8 {
    LSR_THR_EMPTY
}
