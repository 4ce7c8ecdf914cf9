//! Fast `ReplyRecv`: answer the caller, then wait on an endpoint

use core::ptr::{self, NonNull};

use super::{check_affinity, current_thread, Declined, Fallback};
use crate::arch::x86_64::restore::fastpath_restore;
use crate::arch::x86_64::vspace::{switch_to_thread_fp, Pml4};
use crate::config::KernelConfig;
use crate::ipc::message::{fastpath_copy_mrs, fastpath_mi_check, MessageInfo};
use crate::machine::Machine;
use crate::objects::capability::{fastpath_reply_cap_check, is_valid_vtable_root_fp, Cap, CapTag, EndpointRights};
use crate::objects::{Cte, Endpoint, EndpointState, FaultType, Tcb, ThreadStateType};
use crate::smp::{NodeLock, NodeState};

struct ReplyRecvPlan {
    receiver: *mut Tcb,
    reply_to: *mut Tcb,
    ep: *mut Endpoint,
    diminish: bool,
    vroot: NonNull<Pml4>,
    stored_hw_asid: u64,
    info: MessageInfo,
}

/// Perform `ReplyRecv` on `ep_cap` with `msg_info` for the node's current
/// thread: reply through the cap in its caller slot, then block receiving
/// on the endpoint
///
/// Never returns on success. On a [`Declined`] result nothing was modified.
///
/// # Safety
/// - `node`'s current thread, the endpoint behind `ep_cap`, its queued TCBs,
///   the thread named by the reply cap and its vtable root must be live
///   kernel objects
/// - the caller slot's MDB `prev` must name a live slot
/// - `lock` must protect all of them
pub unsafe fn fastpath_reply_recv<'l, M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    lock: NodeLock<'l>,
    ep_cap: Cap,
    msg_info: u64,
) -> Declined<'l> {
    match check_reply_recv(node, config, ep_cap, msg_info) {
        Ok(plan) => commit_reply_recv(machine, node, config, lock, plan),
        Err(reason) => Declined::new(reason, lock),
    }
}

unsafe fn check_reply_recv(
    node: &NodeState,
    config: &KernelConfig,
    ep_cap: Cap,
    msg_info: u64,
) -> Result<ReplyRecvPlan, Fallback> {
    if fastpath_mi_check(msg_info) != 0 {
        return Err(Fallback::MessageInfo);
    }
    let receiver = current_thread(node)?;

    let rights = ep_cap.ep_rights();
    if !ep_cap.has_tag(CapTag::Endpoint) || !rights.contains(EndpointRights::CAN_RECEIVE) {
        return Err(Fallback::EndpointCap);
    }

    // A waiting sender would be received from immediately.
    let ep = ep_cap.ep_ptr();
    if (*ep).state() == EndpointState::Send {
        return Err(Fallback::SendersQueued);
    }

    let reply_cap = (*receiver).caller_slot().cap;
    if !fastpath_reply_cap_check(reply_cap) {
        return Err(Fallback::NoReplyCap);
    }
    let reply_to = reply_cap.reply_tcb_ptr();
    if reply_to.is_null() {
        return Err(Fallback::NoReplyCap);
    }

    // Fault replies need the slow path to decode the message.
    match (*reply_to).fault() {
        FaultType::Null => {}
        fault => return Err(Fallback::ReplyTargetFaulted(fault)),
    }

    let vtable = (*reply_to).vtable_slot().cap;
    if !is_valid_vtable_root_fp(vtable) {
        return Err(Fallback::InvalidVSpace);
    }
    let vroot = NonNull::new(vtable.vtable_root_fp()).ok_or(Fallback::InvalidVSpace)?;

    check_affinity(node, config.is_smp(), &*reply_to)?;

    Ok(ReplyRecvPlan {
        receiver,
        reply_to,
        ep,
        diminish: !rights.contains(EndpointRights::CAN_SEND),
        vroot,
        stored_hw_asid: vtable.pml4_mapped_asid_fp(),
        info: MessageInfo::from_word(msg_info),
    })
}

unsafe fn commit_reply_recv<M: Machine>(
    machine: &mut M,
    node: &mut NodeState,
    config: &KernelConfig,
    lock: NodeLock<'_>,
    plan: ReplyRecvPlan,
) -> ! {
    let receiver = &mut *plan.receiver;
    let reply_to = &mut *plan.reply_to;
    let ep = &mut *plan.ep;

    let state = receiver.state_mut();
    state.mset_blocking_object_ts_type(plan.ep as usize, ThreadStateType::BlockedOnReceive);
    state.set_blocking_ipc_diminish(plan.diminish);

    // Append to the receive queue.
    match ep.queue_tail_fp(config.pptr_base) {
        None => {
            receiver.set_ep_prev(ptr::null_mut());
            ep.set_queue_head_np(plan.receiver);
        }
        Some(tail) => {
            (*tail.as_ptr()).set_ep_next(plan.receiver);
            receiver.set_ep_prev(tail.as_ptr());
        }
    }
    receiver.set_ep_next(ptr::null_mut());
    ep.mset_queue_tail_state(plan.receiver, EndpointState::Recv);

    // Delete the reply cap: its parent becomes the end of the chain.
    let caller_slot = receiver.caller_slot_mut();
    let parent = caller_slot.mdb.prev() as *mut Cte;
    (*parent).mdb.mset_next_revocable_first_badged(0, 1, 1);
    caller_slot.clear();

    fastpath_copy_mrs(plan.info.length() as usize, receiver, reply_to);

    reply_to.state_mut().set_ts_type_np(ThreadStateType::Running);
    switch_to_thread_fp(machine, node, config, reply_to, &mut *plan.vroot.as_ptr(), plan.stored_hw_asid);

    // Replies carry no badge.
    let msg_info = plan.info.with_caps_unwrapped(0).word();
    fastpath_restore(machine, node, config, lock, 0, msg_info, reply_to)
}
