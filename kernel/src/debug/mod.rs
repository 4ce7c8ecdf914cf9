//! Kernel logging
//!
//! A `log::Log` implementation writing to the kernel console component. The
//! fast path only logs at `debug` and `trace`, so builds with `log-info` or
//! lower compile those calls down to a level comparison.
//!
//! ```ignore
//! config::init_console();
//! debug::init().ok();
//! log::info!("kernel up on cpu {}", cpu);
//! ```

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

use crate::components::console::{Console, ConsoleWriter};
use crate::config::{KernelConsole, CONSOLE};

/// Logger writing `[LEVEL target] message` lines to a console
pub struct KernelLogger<C: Console + 'static> {
    console: &'static C,
    level: LevelFilter,
}

impl<C: Console + 'static> KernelLogger<C> {
    pub const fn new(console: &'static C, level: LevelFilter) -> Self {
        Self { console, level }
    }

    pub const fn level(&self) -> LevelFilter {
        self.level
    }
}

impl<C: Console + 'static> Log for KernelLogger<C> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut writer = ConsoleWriter::new(self.console);
        let _ = writeln!(writer, "[{:<5} {}] {}", record.level(), record.target(), record.args());
    }

    fn flush(&self) {}
}

/// Maximum level selected by the `log-*` features (most verbose wins)
pub const fn max_level() -> LevelFilter {
    if cfg!(feature = "log-trace") {
        LevelFilter::Trace
    } else if cfg!(feature = "log-debug") {
        LevelFilter::Debug
    } else if cfg!(feature = "log-info") {
        LevelFilter::Info
    } else if cfg!(feature = "log-warn") {
        LevelFilter::Warn
    } else if cfg!(feature = "log-error") {
        LevelFilter::Error
    } else {
        LevelFilter::Off
    }
}

static LOGGER: KernelLogger<KernelConsole> = KernelLogger::new(&CONSOLE, max_level());

/// Install the kernel logger
///
/// Fails if a logger is already installed (host test binaries).
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(LOGGER.level());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use spin::Mutex;

    struct Capture(Mutex<Vec<u8>>);

    impl Console for Capture {
        fn putc(&self, c: u8) {
            self.0.lock().push(c);
        }
    }

    static CAPTURE: Capture = Capture(Mutex::new(Vec::new()));

    #[test]
    fn formats_records_and_filters_by_level() {
        let logger = KernelLogger::new(&CAPTURE, LevelFilter::Debug);

        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .target("fastpath")
                .args(format_args!("fpu owner cleared"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Trace)
                .target("fastpath")
                .args(format_args!("dropped"))
                .build(),
        );

        let out = String::from_utf8(CAPTURE.0.lock().clone()).unwrap();
        assert_eq!(out, "[DEBUG fastpath] fpu owner cleared\r\n");
    }

    #[cfg(not(feature = "console-com1"))]
    #[test]
    fn installed_logger_writes_to_kernel_console() {
        use crate::config::{console, init_console};

        init_console();
        init().expect("first logger in this binary");
        assert_eq!(log::max_level(), max_level());

        let before = CONSOLE.dropped();
        console().puts("boot\n");
        assert!(CONSOLE.dropped() >= before + 6);

        if max_level() >= LevelFilter::Error {
            log::error!(target: "fastpath", "x");
            // "[ERROR fastpath] x\r\n"
            assert!(CONSOLE.dropped() >= before + 6 + 20);
        }
        assert!(init().is_err());
    }

    #[test]
    fn feature_level_matches_default_build() {
        // Default features enable log-info only.
        if cfg!(all(feature = "log-info", not(feature = "log-debug"), not(feature = "log-trace"))) {
            assert_eq!(max_level(), LevelFilter::Info);
        }
    }
}
