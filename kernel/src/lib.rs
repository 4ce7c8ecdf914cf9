//! KaaL Kernel IPC Fast Path
//!
//! The accelerated route for synchronous endpoint IPC on x86_64: when a
//! `Call` or `ReplyRecv` satisfies a handful of cheap predicates, the kernel
//! skips the general capability-dispatch path and performs the whole
//! "block sender, switch to receiver, deliver message, return to user mode"
//! transition directly.
//!
//! # Architecture
//!
//! - `objects`: packed kernel objects (capabilities, endpoints, TCBs,
//!   derivation-tree slots) with direct bit-field accessors
//! - `ipc`: message-info word and message-register transfer
//! - `arch::x86_64`: register context, address-space switch, lazy FPU,
//!   restore-and-return and the return-to-user transitions
//! - `machine`: the hardware seam (`Machine` trait) with a mock backend
//! - `smp`: per-CPU node state and the global kernel lock
//! - `fastpath`: the call / reply-recv sequencers that compose the above
//! - `config`, `components`, `debug`: compile-time configuration, console
//!   components and the kernel logger
//!
//! # Build Modes
//!
//! ```bash
//! # Host (mock machine, default) - unit and integration tests
//! cargo test -p kaal-kernel
//!
//! # Bare metal
//! cargo build -p kaal-kernel --no-default-features \
//!     --features console-com1,log-info --target x86_64-unknown-none
//! ```

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

pub mod arch;
pub mod components;
pub mod config;
pub mod debug;
pub mod fastpath;
pub mod ipc;
pub mod machine;
pub mod objects;
pub mod smp;

pub use config::{KernelConfig, ReturnMechanism, CONFIG};
pub use fastpath::{fastpath_call, fastpath_reply_recv, Declined, Fallback};
pub use machine::Machine;
