//! Inter-Process Communication (IPC)
//!
//! Message encoding shared by the fast path and user space.
//!
//! ## Message Model
//!
//! - The message-info word carries length, extra-cap count, the
//!   unwrapped-caps mask and a user label
//! - The first four message words travel in R10, R8, R9, R15; longer
//!   messages need the IPC buffer and therefore the slow path
//! - Capability transfer is slow-path only
//!
//! ## Usage
//!
//! ```rust,ignore
//! let info = MessageInfo::new(0x42, 0, 0, 2);
//! assert_eq!(fastpath_mi_check(info.word()), 0);
//! fastpath_copy_mrs(info.length() as usize, sender, receiver);
//! ```

pub mod message;

pub use message::{fastpath_copy_mrs, fastpath_mi_check, MessageInfo};
