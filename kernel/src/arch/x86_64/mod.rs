//! x86_64 support for the IPC fast path
//!
//! - `registers`: user register context, RFLAGS, debug registers
//! - `vspace`: PML4 tables, CR3 values and the fast address-space switch
//! - `fpu`: FPU save area and lazy FPU restore
//! - `restore`: the terminal restore-and-return sequence
//! - `user_return`: the `sysretq` / `sysexitq` transitions
//! - `machine`: bare-metal `Machine` implementation

pub mod fpu;
pub mod registers;
pub mod restore;
pub mod user_return;
pub mod vspace;

#[cfg(all(target_arch = "x86_64", not(any(test, feature = "mock"))))]
pub mod machine;

pub use registers::{Register, Rflags, UserContext};
pub use restore::fastpath_restore;
pub use vspace::{switch_to_thread_fp, Cr3, Pml4};
