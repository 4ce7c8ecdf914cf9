//! Fast `Call`: hand a message to a waiting receiver and block for the reply

use core::ptr::{self, NonNull};

use super::{check_affinity, current_thread, Declined, Fallback};
use crate::arch::x86_64::restore::fastpath_restore;
use crate::arch::x86_64::vspace::{switch_to_thread_fp, Pml4};
use crate::config::KernelConfig;
use crate::ipc::message::{fastpath_copy_mrs, fastpath_mi_check, MessageInfo};
use crate::machine::Machine;
use crate::objects::capability::{is_valid_vtable_root_fp, Cap, CapTag, EndpointRights};
use crate::objects::{Endpoint, EndpointState, Tcb, ThreadStateType};
use crate::smp::{NodeLock, NodeState};

/// Everything the commit phase needs, gathered by the checks
struct CallPlan {
    caller: *mut Tcb,
    dest: *mut Tcb,
    ep: *mut Endpoint,
    vroot: NonNull<Pml4>,
    stored_hw_asid: u64,
    badge: u64,
    info: MessageInfo,
}

/// Perform `Call` on `ep_cap` with `msg_info` for the node's current thread
///
/// On success control passes to the receiver in user mode and this function
/// never returns. Otherwise nothing has been modified and the returned
/// [`Declined`] carries the reason and the kernel lock.
///
/// # Safety
/// - `node`'s current thread and every object reachable from `ep_cap` (the
///   endpoint, its queued TCBs, their vtable roots) must be live kernel
///   objects
/// - `lock` must protect them for the duration of the call
pub unsafe fn fastpath_call<'l, M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    lock: NodeLock<'l>,
    ep_cap: Cap,
    msg_info: u64,
) -> Declined<'l> {
    match check_call(node, config, ep_cap, msg_info) {
        Ok(plan) => commit_call(machine, node, config, lock, plan),
        Err(reason) => Declined::new(reason, lock),
    }
}

unsafe fn check_call(
    node: &NodeState,
    config: &KernelConfig,
    ep_cap: Cap,
    msg_info: u64,
) -> Result<CallPlan, Fallback> {
    if fastpath_mi_check(msg_info) != 0 {
        return Err(Fallback::MessageInfo);
    }
    let caller = current_thread(node)?;

    if !ep_cap.has_tag(CapTag::Endpoint) || !ep_cap.ep_rights().contains(EndpointRights::CAN_SEND) {
        return Err(Fallback::EndpointCap);
    }

    // A receiver must be waiting.
    let ep = ep_cap.ep_ptr();
    if (*ep).queue_tail_fp(config.pptr_base).is_none() || (*ep).state() != EndpointState::Recv {
        return Err(Fallback::NoReceiver);
    }
    let dest = (*ep).queue_head();
    if dest.is_null() {
        return Err(Fallback::NoReceiver);
    }

    let vtable = (*dest).vtable_slot().cap;
    if !is_valid_vtable_root_fp(vtable) {
        return Err(Fallback::InvalidVSpace);
    }
    let vroot = NonNull::new(vtable.vtable_root_fp()).ok_or(Fallback::InvalidVSpace)?;

    // The reply cap is granted to the receiver.
    if !ep_cap.ep_rights().contains(EndpointRights::CAN_GRANT) {
        return Err(Fallback::NoGrant);
    }

    check_affinity(node, config.is_smp(), &*dest)?;

    Ok(CallPlan {
        caller,
        dest,
        ep,
        vroot,
        stored_hw_asid: vtable.pml4_mapped_asid_fp(),
        badge: ep_cap.ep_badge(),
        info: MessageInfo::from_word(msg_info),
    })
}

unsafe fn commit_call<M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    lock: NodeLock<'_>,
    plan: CallPlan,
) -> ! {
    let caller = &mut *plan.caller;
    let dest = &mut *plan.dest;
    let ep = &mut *plan.ep;

    // Dequeue the receiver.
    let next = dest.ep_next();
    ep.set_queue_head_np(next);
    if next.is_null() {
        ep.mset_queue_tail_state(ptr::null(), EndpointState::Idle);
    } else {
        (*next).set_ep_prev(ptr::null_mut());
    }

    caller.state_mut().set_ts_type_np(ThreadStateType::BlockedOnReply);

    // Give the receiver a reply cap to the caller, derived from the caller's
    // master reply cap.
    let reply_addr = caller.reply_slot().addr();
    let caller_slot = dest.caller_slot_mut();
    caller_slot.cap = Cap::reply_cap_new(false, plan.caller);
    caller_slot.mdb.set_prev_np(reply_addr);
    let caller_addr = caller_slot.addr();
    caller.reply_slot_mut().mdb.mset_next_revocable_first_badged(caller_addr, 1, 1);

    fastpath_copy_mrs(plan.info.length() as usize, caller, dest);

    dest.state_mut().set_ts_type_np(ThreadStateType::Running);
    switch_to_thread_fp(machine, node, config, dest, &mut *plan.vroot.as_ptr(), plan.stored_hw_asid);

    let msg_info = plan.info.with_caps_unwrapped(0).word();
    fastpath_restore(machine, node, config, lock, plan.badge, msg_info, dest)
}
