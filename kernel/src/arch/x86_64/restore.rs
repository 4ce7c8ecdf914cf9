//! Terminal restore-and-return
//!
//! [`fastpath_restore`] is the last step of every fast-path IPC. The order
//! of its steps matters:
//!
//! 1. single-stepping threads under `sysexit` are diverted to the general
//!    restore path (a `popfq`-restored TF would trap inside the kernel)
//! 2. the kernel lock is released
//! 3. the exit hook runs
//! 4. lazy FPU restore
//! 5. debug registers are loaded (hardware debug API builds)
//! 6. the CPU index is captured and GS is swapped to the user's (SMP);
//!    per-CPU node state is unreachable from here on
//! 7. FS base = TLS base, GS base = IPC buffer
//! 8. `sysexit` only: IF is cleared in the saved FLAGS
//! 9. the one-way transition

use super::fpu::lazy_fpu_restore;
use super::registers::{Register, Rflags};
use crate::config::{KernelConfig, ReturnMechanism};
use crate::machine::Machine;
use crate::objects::Tcb;
use crate::smp::{NodeLock, NodeState};

/// Return `thread` to user mode with RDI = `badge` and RSI = `msg_info`
///
/// `thread` must be the node's current thread with its address space
/// active. Consumes the kernel lock token.
pub fn fastpath_restore<M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    lock: NodeLock<'_>,
    badge: u64,
    msg_info: u64,
    thread: &mut Tcb,
) -> ! {
    if config.diverts_single_step(thread.context().flags()) {
        machine.restore_user_context(thread, lock);
    }

    lock.release();

    if let Some(hook) = config.exit_hook {
        hook();
    }

    lazy_fpu_restore(machine, node, config, thread);

    if config.hardware_debug_api {
        machine.load_debug_registers(thread.debug_registers());
    }

    let cpu = if config.is_smp() {
        let cpu = node.cpu_index();
        machine.swapgs();
        cpu
    } else {
        0
    };

    machine.write_fs_base(thread.context().get(Register::TlsBase), cpu);
    machine.write_gs_base(thread.ipc_buffer(), cpu);

    if config.return_mechanism == ReturnMechanism::Sysexit {
        thread.context_mut().clear_flags(Rflags::IF);
    }

    machine.return_to_user(config.return_mechanism, thread.context_mut(), badge, msg_info)
}
