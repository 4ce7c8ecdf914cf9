//! Console component trait
//!
//! Provides a minimal console interface for kernel log output. This is NOT a
//! UART driver: `putc()` and nothing more.

use core::fmt;

/// Console trait for kernel log output
///
/// Implementations are blocking and must be usable from any CPU, hence the
/// `Send + Sync` bound.
pub trait Console: Send + Sync {
    /// Bring the device up; consoles without hardware need nothing
    fn init(&self) {}

    /// Write a single byte, waiting for the hardware if needed
    fn putc(&self, c: u8);

    /// Write a string, translating `\n` to CRLF
    fn puts(&self, s: &str) {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.putc(b'\r');
            }
            self.putc(byte);
        }
    }
}

/// Adapter exposing a [`Console`] as `core::fmt::Write`
pub struct ConsoleWriter<'a, C: Console + ?Sized> {
    console: &'a C,
}

impl<'a, C: Console + ?Sized> ConsoleWriter<'a, C> {
    pub const fn new(console: &'a C) -> Self {
        Self { console }
    }
}

impl<C: Console + ?Sized> fmt::Write for ConsoleWriter<'_, C> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.console.puts(s);
        Ok(())
    }
}

pub mod com1;
pub mod null;

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use spin::Mutex;

    struct Capture(Mutex<Vec<u8>>);

    impl Console for Capture {
        fn putc(&self, c: u8) {
            self.0.lock().push(c);
        }
    }

    #[test]
    fn puts_translates_newlines() {
        let console = Capture(Mutex::new(Vec::new()));
        console.puts("a\nb");
        assert_eq!(&*console.0.lock(), b"a\r\nb");
    }

    #[test]
    fn writer_formats_through_console() {
        let console = Capture(Mutex::new(Vec::new()));
        let mut writer = ConsoleWriter::new(&console);
        write!(writer, "cpu{}", 3).unwrap();
        assert_eq!(&*console.0.lock(), b"cpu3");
    }
}
