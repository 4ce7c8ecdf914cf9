//! Kernel configuration and component composition
//!
//! This module handles compile-time kernel configuration and component
//! composition based on cargo features.
//!
//! Fast-path behaviour that depends on the build (SMP, return mechanism,
//! hardware debug API) is captured in a [`KernelConfig`] value rather than
//! scattered `cfg` blocks. [`CONFIG`] is the value the features select; tests
//! build their own so both uniprocessor and multiprocessor paths run in a
//! single build.

use crate::arch::x86_64::registers::Rflags;
use crate::arch::x86_64::vspace::TLB_BITMAP_CPUS;
use crate::components::console::Console;

#[cfg(feature = "console-com1")]
use crate::components::console::com1::{Com1Config, Com1Console};
#[cfg(not(feature = "console-com1"))]
use crate::components::console::null::NullConsole;

/// Base of the kernel window. Kernel objects live above it, so the high bits
/// of every kernel pointer are known.
pub const PPTR_BASE: usize = 0xFFFF_FF80_0000_0000;

/// Physical address mapped at [`PPTR_BASE`]
pub const PADDR_BASE: usize = 0;

/// Maximum number of CPUs (nodes) the kernel is built for
#[cfg(feature = "smp")]
pub const MAX_NUM_NODES: usize = 8;
#[cfg(not(feature = "smp"))]
pub const MAX_NUM_NODES: usize = 1;

/// Lazy FPU restores tolerated before the owner's state is switched out
pub const FPU_MAX_RESTORES_SINCE_SWITCH: u32 = 64;

/// Hardware mechanism used for the final return to user mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnMechanism {
    /// `sysretq`: RIP from RCX, RFLAGS from R11, user restores its own RSP
    Sysret,

    /// `sysexitq`: RIP from RDX, RSP from RCX, interrupts enabled by `sti`
    Sysexit,
}

impl ReturnMechanism {
    /// Whether this mechanism races with hardware single-stepping
    ///
    /// `sysexit` restores RFLAGS (and with it TF) with `popfq` before the
    /// final instruction, so a pending single-step trap fires in the kernel.
    /// `sysret` has not been shown to have the problem.
    pub const fn single_step_needs_slow_restore(self) -> bool {
        matches!(self, ReturnMechanism::Sysexit)
    }
}

/// Build configuration consumed by the fast path
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Number of CPUs; more than one enables the SMP-only steps
    pub max_num_nodes: usize,

    /// Return-to-user instruction
    pub return_mechanism: ReturnMechanism,

    /// Hardware debug API (breakpoints, single-step) is compiled in
    pub hardware_debug_api: bool,

    /// Divert single-stepping threads to the slow restore path
    pub single_step_needs_slow_restore: bool,

    /// High bits OR-ed into packed kernel pointers (`PPTR_BASE`)
    pub pptr_base: usize,

    /// `pptr - paddr` for addresses inside the kernel window
    pub pptr_base_offset: usize,

    /// See [`FPU_MAX_RESTORES_SINCE_SWITCH`]
    pub fpu_max_restores_since_switch: u32,

    /// Lightweight hook run on every fast-path exit (tracing, benchmarking)
    pub exit_hook: Option<fn()>,
}

impl KernelConfig {
    /// Configuration selected by cargo features
    pub const fn from_features() -> Self {
        let return_mechanism = if cfg!(feature = "sysenter") {
            ReturnMechanism::Sysexit
        } else {
            ReturnMechanism::Sysret
        };

        Self {
            max_num_nodes: MAX_NUM_NODES,
            return_mechanism,
            hardware_debug_api: cfg!(feature = "hardware-debug-api"),
            single_step_needs_slow_restore: return_mechanism.single_step_needs_slow_restore(),
            pptr_base: PPTR_BASE,
            pptr_base_offset: PPTR_BASE - PADDR_BASE,
            fpu_max_restores_since_switch: FPU_MAX_RESTORES_SINCE_SWITCH,
            exit_hook: None,
        }
    }

    /// Uniprocessor configuration for kernel objects living in ordinary
    /// (host) memory: no implicit pointer bits, identity physical mapping.
    pub const fn host() -> Self {
        Self {
            max_num_nodes: 1,
            return_mechanism: ReturnMechanism::Sysret,
            hardware_debug_api: false,
            single_step_needs_slow_restore: false,
            pptr_base: 0,
            pptr_base_offset: 0,
            fpu_max_restores_since_switch: FPU_MAX_RESTORES_SINCE_SWITCH,
            exit_hook: None,
        }
    }

    /// Same configuration with `nodes` CPUs
    ///
    /// # Panics
    /// If `nodes` exceeds what a TLB bitmap can track.
    pub const fn with_nodes(mut self, nodes: usize) -> Self {
        assert!(nodes <= TLB_BITMAP_CPUS, "more nodes than the TLB bitmap tracks");
        self.max_num_nodes = nodes;
        self
    }

    /// Same configuration returning through `mechanism`; the single-step
    /// diversion follows the mechanism's default.
    pub const fn with_return_mechanism(mut self, mechanism: ReturnMechanism) -> Self {
        self.return_mechanism = mechanism;
        self.single_step_needs_slow_restore = mechanism.single_step_needs_slow_restore();
        self
    }

    /// Same configuration with the hardware debug API enabled or disabled
    pub const fn with_hardware_debug_api(mut self, enabled: bool) -> Self {
        self.hardware_debug_api = enabled;
        self
    }

    /// Same configuration with an exit hook
    pub const fn with_exit_hook(mut self, hook: fn()) -> Self {
        self.exit_hook = Some(hook);
        self
    }

    /// Multiprocessor build
    #[inline(always)]
    pub const fn is_smp(&self) -> bool {
        self.max_num_nodes > 1
    }

    /// Physical address of a kernel-window pointer
    #[inline(always)]
    pub const fn pptr_to_paddr(&self, pptr: usize) -> usize {
        pptr.wrapping_sub(self.pptr_base_offset)
    }

    /// Whether a thread with `flags` must take the slow restore path
    #[inline(always)]
    pub fn diverts_single_step(&self, flags: Rflags) -> bool {
        self.single_step_needs_slow_restore
            && self.hardware_debug_api
            && flags.contains(Rflags::TF)
    }
}

/// Configuration selected by the enabled cargo features
pub static CONFIG: KernelConfig = KernelConfig::from_features();

/// Console component selection (compile-time)
///
/// - `console-com1`: 16550 UART on COM1
/// - `console-null`: output dropped and counted (default)
#[cfg(feature = "console-com1")]
pub type KernelConsole = Com1Console;
#[cfg(not(feature = "console-com1"))]
pub type KernelConsole = NullConsole;

#[cfg(feature = "console-com1")]
pub static CONSOLE: KernelConsole = Com1Console::new(Com1Config { port: 0x3F8 });

#[cfg(not(feature = "console-com1"))]
pub static CONSOLE: KernelConsole = NullConsole::new();

/// Initialize kernel console component
///
/// Must be called early in boot sequence before any log output.
pub fn init_console() {
    CONSOLE.init();
}

/// Get reference to the global console
pub fn console() -> &'static impl Console {
    &CONSOLE
}
