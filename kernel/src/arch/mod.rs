//! Architecture-specific code
//!
//! Only x86_64 is supported. The data structures compile on every host so
//! the fast path can be exercised under the mock machine; the inline assembly
//! is gated on `target_arch = "x86_64"`.

pub mod x86_64;
