//! Kernel components
//!
//! Minimal components built into the kernel, composed at compile time via
//! cargo features (see `config.rs`):
//!
//! ```ignore
//! #[cfg(feature = "console-com1")]
//! static CONSOLE: Com1Console = Com1Console::new(Com1Config { port: 0x3F8 });
//! ```
//!
//! Only the console exists today. It backs the kernel logger and nothing
//! else; full serial drivers live in user space.

pub mod console;
