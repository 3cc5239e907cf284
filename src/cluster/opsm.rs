//! The cluster operation state machine (C10): the dense (state, event) →
//! (action, next_state) table that drives a multi-phase administrative
//! transaction — lock, stage, brick op, commit, unlock — across the
//! trusted pool, plus the single-threaded FIFO driver that runs it.
//!
//! This runs only on the management daemon, only on the transaction's
//! originator. The table itself is transcribed faithfully off the
//! reference implementation; the RPC fan-out underneath it is abstracted
//! behind [`ClusterTransport`] since wire framing is out of scope here —
//! a transaction still runs end-to-end against a same-process loopback
//! transport, it just never touches a socket.

use std::collections::VecDeque;

use log::{debug, error, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::dict::Dict;

use super::ops::{self, Brick, OpKind};
use super::peer::PeerTable;

/// States from spec §4.7, in the reference implementation's table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Default,
    LockSent,
    Locked,
    StageOpSent,
    Staged,
    CommitOpSent,
    Committed,
    UnlockSent,
    StageOpFailed,
    CommitOpFailed,
    BrickOpSent,
    BrickOpFailed,
    BrickCommitted,
    BrickCommitFailed,
    AckDrain,
}

/// Events from spec §4.7. `EVENT_MAX`/`EVENT_INVALID` aren't modeled — they
/// never appear as an injected event, only as the state tables' bounds
/// check in the source this is grounded on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    None,
    StartLock,
    Lock,
    RcvdAcc,
    AllAcc,
    StageAcc,
    CommitAcc,
    RcvdRjt,
    StageOp,
    CommitOp,
    Unlock,
    StartUnlock,
    AllAck,
    LocalUnlockNoResp,
}

/// The action tag a (state, event) cell carries. [`OpStateMachine::drain`]
/// executes the tag; keeping it as data (not a function pointer) is what
/// lets [`transition`] stay a `const fn`-shaped match, independent of the
/// machinery that runs the side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    None,
    SendLock,
    Lock,
    RcvdLockAcc,
    SendStageOp,
    StageOp,
    RcvdStageOpAcc,
    StageOpFailed,
    SendBrickOp,
    RcvdBrickOpAcc,
    BrickOpFailed,
    SendCommitOp,
    CommitOp,
    RcvdCommitOpAcc,
    CommitOpFailed,
    SendCommitFailed,
    SendUnlock,
    Unlock,
    RcvdUnlockAcc,
    UnlockedAll,
    LocalUnlock,
    SendUnlockDrain,
}

/// The dense transition table. One row per state, one column per event, in
/// declaration order — a direct transcription of the per-state tables this
/// is grounded on, rather than a sparse match falling through to a default.
pub fn transition(state: State, event: Event) -> (Action, State) {
    match (state, event) {
        (State::Default, Event::None) => (Action::None, State::Default),
        (State::Default, Event::StartLock) => (Action::SendLock, State::LockSent),
        (State::Default, Event::Lock) => (Action::Lock, State::Locked),
        (State::Default, Event::RcvdAcc) => (Action::None, State::Default),
        (State::Default, Event::AllAcc) => (Action::None, State::Default),
        (State::Default, Event::StageAcc) => (Action::None, State::Default),
        (State::Default, Event::CommitAcc) => (Action::None, State::Default),
        (State::Default, Event::RcvdRjt) => (Action::None, State::Default),
        (State::Default, Event::StageOp) => (Action::None, State::Default),
        (State::Default, Event::CommitOp) => (Action::None, State::Default),
        (State::Default, Event::Unlock) => (Action::Unlock, State::Default),
        (State::Default, Event::StartUnlock) => (Action::None, State::Default),
        (State::Default, Event::AllAck) => (Action::None, State::Default),
        (State::Default, Event::LocalUnlockNoResp) => (Action::None, State::Default),

        (State::LockSent, Event::None) => (Action::None, State::LockSent),
        (State::LockSent, Event::StartLock) => (Action::None, State::LockSent),
        (State::LockSent, Event::Lock) => (Action::Lock, State::LockSent),
        (State::LockSent, Event::RcvdAcc) => (Action::RcvdLockAcc, State::LockSent),
        (State::LockSent, Event::AllAcc) => (Action::SendStageOp, State::StageOpSent),
        (State::LockSent, Event::StageAcc) => (Action::None, State::LockSent),
        (State::LockSent, Event::CommitAcc) => (Action::None, State::LockSent),
        (State::LockSent, Event::RcvdRjt) => (Action::SendUnlockDrain, State::AckDrain),
        (State::LockSent, Event::StageOp) => (Action::None, State::LockSent),
        (State::LockSent, Event::CommitOp) => (Action::None, State::LockSent),
        (State::LockSent, Event::Unlock) => (Action::Unlock, State::Default),
        (State::LockSent, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::LockSent, Event::AllAck) => (Action::None, State::LockSent),
        (State::LockSent, Event::LocalUnlockNoResp) => (Action::None, State::LockSent),

        (State::Locked, Event::None) => (Action::None, State::Locked),
        (State::Locked, Event::StartLock) => (Action::None, State::Locked),
        (State::Locked, Event::Lock) => (Action::Lock, State::Locked),
        (State::Locked, Event::RcvdAcc) => (Action::None, State::Locked),
        (State::Locked, Event::AllAcc) => (Action::None, State::Locked),
        (State::Locked, Event::StageAcc) => (Action::None, State::Locked),
        (State::Locked, Event::CommitAcc) => (Action::None, State::Locked),
        (State::Locked, Event::RcvdRjt) => (Action::None, State::Locked),
        (State::Locked, Event::StageOp) => (Action::StageOp, State::Staged),
        (State::Locked, Event::CommitOp) => (Action::None, State::Locked),
        (State::Locked, Event::Unlock) => (Action::Unlock, State::Default),
        (State::Locked, Event::StartUnlock) => (Action::None, State::Locked),
        (State::Locked, Event::AllAck) => (Action::None, State::Locked),
        (State::Locked, Event::LocalUnlockNoResp) => (Action::LocalUnlock, State::Default),

        (State::StageOpSent, Event::None) => (Action::None, State::StageOpSent),
        (State::StageOpSent, Event::StartLock) => (Action::None, State::StageOpSent),
        (State::StageOpSent, Event::Lock) => (Action::Lock, State::StageOpSent),
        (State::StageOpSent, Event::RcvdAcc) => (Action::RcvdStageOpAcc, State::StageOpSent),
        (State::StageOpSent, Event::AllAcc) => (Action::SendBrickOp, State::BrickOpSent),
        (State::StageOpSent, Event::StageAcc) => (Action::SendBrickOp, State::BrickOpSent),
        (State::StageOpSent, Event::CommitAcc) => (Action::None, State::StageOpSent),
        (State::StageOpSent, Event::RcvdRjt) => (Action::StageOpFailed, State::StageOpFailed),
        (State::StageOpSent, Event::StageOp) => (Action::None, State::StageOpSent),
        (State::StageOpSent, Event::CommitOp) => (Action::None, State::StageOpSent),
        (State::StageOpSent, Event::Unlock) => (Action::Unlock, State::Default),
        (State::StageOpSent, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::StageOpSent, Event::AllAck) => (Action::None, State::StageOpSent),
        (State::StageOpSent, Event::LocalUnlockNoResp) => (Action::None, State::StageOpSent),

        (State::StageOpFailed, Event::None) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::StartLock) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::Lock) => (Action::Lock, State::StageOpFailed),
        (State::StageOpFailed, Event::RcvdAcc) => (Action::StageOpFailed, State::StageOpFailed),
        (State::StageOpFailed, Event::AllAcc) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::StageAcc) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::CommitAcc) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::RcvdRjt) => (Action::StageOpFailed, State::StageOpFailed),
        (State::StageOpFailed, Event::StageOp) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::CommitOp) => (Action::None, State::StageOpFailed),
        (State::StageOpFailed, Event::Unlock) => (Action::Unlock, State::Default),
        (State::StageOpFailed, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::StageOpFailed, Event::AllAck) => (Action::SendUnlock, State::UnlockSent),
        (State::StageOpFailed, Event::LocalUnlockNoResp) => (Action::None, State::StageOpFailed),

        (State::Staged, Event::None) => (Action::None, State::Staged),
        (State::Staged, Event::StartLock) => (Action::None, State::Staged),
        (State::Staged, Event::Lock) => (Action::Lock, State::Staged),
        (State::Staged, Event::RcvdAcc) => (Action::None, State::Staged),
        (State::Staged, Event::AllAcc) => (Action::None, State::Staged),
        (State::Staged, Event::StageAcc) => (Action::None, State::Staged),
        (State::Staged, Event::CommitAcc) => (Action::None, State::Staged),
        (State::Staged, Event::RcvdRjt) => (Action::None, State::Staged),
        (State::Staged, Event::StageOp) => (Action::None, State::Staged),
        (State::Staged, Event::CommitOp) => (Action::SendBrickOp, State::BrickCommitted),
        (State::Staged, Event::Unlock) => (Action::Unlock, State::Default),
        (State::Staged, Event::StartUnlock) => (Action::None, State::Staged),
        (State::Staged, Event::AllAck) => (Action::None, State::Staged),
        (State::Staged, Event::LocalUnlockNoResp) => (Action::LocalUnlock, State::Default),

        (State::BrickOpSent, Event::None) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::StartLock) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::Lock) => (Action::Lock, State::BrickOpSent),
        (State::BrickOpSent, Event::RcvdAcc) => (Action::RcvdBrickOpAcc, State::BrickOpSent),
        (State::BrickOpSent, Event::AllAcc) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::StageAcc) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::CommitAcc) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::RcvdRjt) => (Action::BrickOpFailed, State::BrickOpFailed),
        (State::BrickOpSent, Event::StageOp) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::CommitOp) => (Action::None, State::BrickOpSent),
        (State::BrickOpSent, Event::Unlock) => (Action::Unlock, State::Default),
        (State::BrickOpSent, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::BrickOpSent, Event::AllAck) => (Action::SendCommitOp, State::CommitOpSent),
        (State::BrickOpSent, Event::LocalUnlockNoResp) => (Action::None, State::BrickOpSent),

        (State::BrickOpFailed, Event::None) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::StartLock) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::Lock) => (Action::Lock, State::BrickOpFailed),
        (State::BrickOpFailed, Event::RcvdAcc) => (Action::BrickOpFailed, State::BrickOpFailed),
        (State::BrickOpFailed, Event::AllAcc) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::StageAcc) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::CommitAcc) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::RcvdRjt) => (Action::BrickOpFailed, State::BrickOpFailed),
        (State::BrickOpFailed, Event::StageOp) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::CommitOp) => (Action::None, State::BrickOpFailed),
        (State::BrickOpFailed, Event::Unlock) => (Action::Unlock, State::Default),
        (State::BrickOpFailed, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::BrickOpFailed, Event::AllAck) => (Action::SendUnlock, State::UnlockSent),
        (State::BrickOpFailed, Event::LocalUnlockNoResp) => (Action::None, State::BrickOpFailed),

        (State::BrickCommitted, Event::None) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::StartLock) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::Lock) => (Action::Lock, State::BrickCommitted),
        (State::BrickCommitted, Event::RcvdAcc) => (Action::RcvdBrickOpAcc, State::BrickCommitted),
        (State::BrickCommitted, Event::AllAcc) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::StageAcc) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::CommitAcc) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::RcvdRjt) => (Action::BrickOpFailed, State::BrickCommitFailed),
        (State::BrickCommitted, Event::StageOp) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::CommitOp) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::Unlock) => (Action::Unlock, State::Default),
        (State::BrickCommitted, Event::StartUnlock) => (Action::None, State::BrickCommitted),
        (State::BrickCommitted, Event::AllAck) => (Action::CommitOp, State::Committed),
        (State::BrickCommitted, Event::LocalUnlockNoResp) => (Action::LocalUnlock, State::Default),

        (State::BrickCommitFailed, Event::None) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::StartLock) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::Lock) => (Action::Lock, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::RcvdAcc) => (Action::BrickOpFailed, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::AllAcc) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::StageAcc) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::CommitAcc) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::RcvdRjt) => (Action::BrickOpFailed, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::StageOp) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::CommitOp) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::Unlock) => (Action::Unlock, State::Default),
        (State::BrickCommitFailed, Event::StartUnlock) => (Action::None, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::AllAck) => (Action::SendCommitFailed, State::BrickCommitFailed),
        (State::BrickCommitFailed, Event::LocalUnlockNoResp) => (Action::LocalUnlock, State::Default),

        (State::CommitOpFailed, Event::None) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::StartLock) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::Lock) => (Action::Lock, State::CommitOpFailed),
        (State::CommitOpFailed, Event::RcvdAcc) => (Action::CommitOpFailed, State::CommitOpFailed),
        (State::CommitOpFailed, Event::AllAcc) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::StageAcc) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::CommitAcc) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::RcvdRjt) => (Action::CommitOpFailed, State::CommitOpFailed),
        (State::CommitOpFailed, Event::StageOp) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::CommitOp) => (Action::None, State::CommitOpFailed),
        (State::CommitOpFailed, Event::Unlock) => (Action::Unlock, State::Default),
        (State::CommitOpFailed, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::CommitOpFailed, Event::AllAck) => (Action::SendUnlock, State::UnlockSent),
        (State::CommitOpFailed, Event::LocalUnlockNoResp) => (Action::None, State::CommitOpFailed),

        (State::CommitOpSent, Event::None) => (Action::None, State::CommitOpSent),
        (State::CommitOpSent, Event::StartLock) => (Action::None, State::CommitOpSent),
        (State::CommitOpSent, Event::Lock) => (Action::Lock, State::CommitOpSent),
        (State::CommitOpSent, Event::RcvdAcc) => (Action::RcvdCommitOpAcc, State::CommitOpSent),
        (State::CommitOpSent, Event::AllAcc) => (Action::SendUnlock, State::UnlockSent),
        (State::CommitOpSent, Event::StageAcc) => (Action::None, State::CommitOpSent),
        (State::CommitOpSent, Event::CommitAcc) => (Action::SendUnlock, State::UnlockSent),
        (State::CommitOpSent, Event::RcvdRjt) => (Action::CommitOpFailed, State::CommitOpFailed),
        (State::CommitOpSent, Event::StageOp) => (Action::None, State::CommitOpSent),
        (State::CommitOpSent, Event::CommitOp) => (Action::None, State::CommitOpSent),
        (State::CommitOpSent, Event::Unlock) => (Action::Unlock, State::Default),
        (State::CommitOpSent, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::CommitOpSent, Event::AllAck) => (Action::None, State::CommitOpSent),
        (State::CommitOpSent, Event::LocalUnlockNoResp) => (Action::None, State::CommitOpSent),

        (State::Committed, Event::None) => (Action::None, State::Committed),
        (State::Committed, Event::StartLock) => (Action::None, State::Committed),
        (State::Committed, Event::Lock) => (Action::Lock, State::Committed),
        (State::Committed, Event::RcvdAcc) => (Action::None, State::Committed),
        (State::Committed, Event::AllAcc) => (Action::None, State::Committed),
        (State::Committed, Event::StageAcc) => (Action::None, State::Committed),
        (State::Committed, Event::CommitAcc) => (Action::None, State::Committed),
        (State::Committed, Event::RcvdRjt) => (Action::None, State::Committed),
        (State::Committed, Event::StageOp) => (Action::None, State::Committed),
        (State::Committed, Event::CommitOp) => (Action::None, State::Committed),
        (State::Committed, Event::Unlock) => (Action::Unlock, State::Default),
        (State::Committed, Event::StartUnlock) => (Action::None, State::Committed),
        (State::Committed, Event::AllAck) => (Action::None, State::Committed),
        (State::Committed, Event::LocalUnlockNoResp) => (Action::LocalUnlock, State::Default),

        (State::UnlockSent, Event::None) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::StartLock) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::Lock) => (Action::Lock, State::UnlockSent),
        (State::UnlockSent, Event::RcvdAcc) => (Action::RcvdUnlockAcc, State::UnlockSent),
        (State::UnlockSent, Event::AllAcc) => (Action::UnlockedAll, State::Default),
        (State::UnlockSent, Event::StageAcc) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::CommitAcc) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::RcvdRjt) => (Action::RcvdUnlockAcc, State::UnlockSent),
        (State::UnlockSent, Event::StageOp) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::CommitOp) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::Unlock) => (Action::Unlock, State::Default),
        (State::UnlockSent, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::UnlockSent, Event::AllAck) => (Action::None, State::UnlockSent),
        (State::UnlockSent, Event::LocalUnlockNoResp) => (Action::None, State::UnlockSent),

        (State::AckDrain, Event::None) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::StartLock) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::Lock) => (Action::Lock, State::AckDrain),
        (State::AckDrain, Event::RcvdAcc) => (Action::SendUnlockDrain, State::AckDrain),
        (State::AckDrain, Event::AllAcc) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::StageAcc) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::CommitAcc) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::RcvdRjt) => (Action::SendUnlockDrain, State::AckDrain),
        (State::AckDrain, Event::StageOp) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::CommitOp) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::Unlock) => (Action::Unlock, State::Default),
        (State::AckDrain, Event::StartUnlock) => (Action::None, State::AckDrain),
        (State::AckDrain, Event::AllAck) => (Action::SendUnlock, State::UnlockSent),
        (State::AckDrain, Event::LocalUnlockNoResp) => (Action::None, State::AckDrain),
    }
}

/// Peers this translator broadcasts cluster-op RPCs to, and how they
/// responded. Abstracted away from any actual wire protocol — see the
/// module doc.
pub trait ClusterTransport: Send + Sync {
    fn broadcast_lock(&self, peers: &[Uuid]) -> BroadcastResult;
    fn broadcast_stage(&self, peers: &[Uuid], payload: &Dict) -> BroadcastResult;
    fn broadcast_brick_op(&self, peers: &[Uuid], bricks: &[Brick], payload: &Dict) -> BroadcastResult;
    fn broadcast_commit(&self, peers: &[Uuid], payload: &Dict) -> BroadcastResult;
    fn broadcast_unlock(&self, peers: &[Uuid]);
    fn broadcast_unlock_drain(&self, peers: &[Uuid]);
}

#[derive(Debug, Clone, Default)]
pub struct BroadcastResult {
    pub accepted: usize,
    pub rejected: usize,
    pub errstr: Option<String>,
}

impl BroadcastResult {
    pub fn all_accepted(count: usize) -> Self {
        BroadcastResult {
            accepted: count,
            rejected: 0,
            errstr: None,
        }
    }
}

/// Loopback transport: every connected, befriended peer "accepts"
/// synchronously. The crate ships this because there is no RPC layer to
/// plug in here; a real deployment swaps in a [`ClusterTransport`] that
/// actually talks to peers and folds their replies back via
/// [`OpStateMachine::inject_event`].
pub struct LoopbackTransport;

impl ClusterTransport for LoopbackTransport {
    fn broadcast_lock(&self, peers: &[Uuid]) -> BroadcastResult {
        BroadcastResult::all_accepted(peers.len())
    }

    fn broadcast_stage(&self, peers: &[Uuid], _payload: &Dict) -> BroadcastResult {
        BroadcastResult::all_accepted(peers.len())
    }

    fn broadcast_brick_op(&self, peers: &[Uuid], _bricks: &[Brick], _payload: &Dict) -> BroadcastResult {
        BroadcastResult::all_accepted(peers.len())
    }

    fn broadcast_commit(&self, peers: &[Uuid], _payload: &Dict) -> BroadcastResult {
        BroadcastResult::all_accepted(peers.len())
    }

    fn broadcast_unlock(&self, peers: &[Uuid]) {
        debug!("loopback: unlock broadcast to {} peers", peers.len());
    }

    fn broadcast_unlock_drain(&self, peers: &[Uuid]) {
        debug!("loopback: unlock-drain broadcast to {} peers", peers.len());
    }
}

/// Transaction-scoped state: everything that resets between one cluster
/// operation and the next, guarded by the same lock as the event queue so
/// a handler and the state transition it causes are never observed apart.
struct Inner {
    state: State,
    queue: VecDeque<Event>,
    kind: Option<OpKind>,
    ctx: Dict,
    bricks: Vec<Brick>,
    selected_bricks: Vec<Brick>,
    outstanding: u32,
    drain_started: bool,
    op_ret: i32,
    op_errstr: Option<String>,
}

impl Inner {
    fn fresh() -> Self {
        Inner {
            state: State::Default,
            queue: VecDeque::new(),
            kind: None,
            ctx: Dict::new(),
            bricks: Vec::new(),
            selected_bricks: Vec::new(),
            outstanding: 0,
            drain_started: false,
            op_ret: 0,
            op_errstr: None,
        }
    }

    fn reject(&mut self, errstr: impl Into<String>) {
        self.op_ret = -1;
        self.op_errstr = Some(errstr.into());
    }

    fn decrement_and_collect(&mut self, collective: Event) {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            self.queue.push_back(collective);
        }
    }
}

/// The originator-side transaction driver: one `OpInfo`-equivalent state
/// plus the FIFO of injected events, serialized behind a single lock.
pub struct OpStateMachine {
    inner: Mutex<Inner>,
    peers: std::sync::Arc<PeerTable>,
    transport: std::sync::Arc<dyn ClusterTransport>,
}

/// A snapshot of the transaction after the queue has drained, cheap to
/// hand back to a CLI caller without holding the lock open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub state: State,
    pub op_ret: i32,
    pub op_errstr: Option<String>,
}

impl OpStateMachine {
    pub fn new(peers: std::sync::Arc<PeerTable>, transport: std::sync::Arc<dyn ClusterTransport>) -> Self {
        OpStateMachine {
            inner: Mutex::new(Inner::fresh()),
            peers,
            transport,
        }
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn outcome(&self) -> Outcome {
        let inner = self.inner.lock();
        Outcome {
            state: inner.state,
            op_ret: inner.op_ret,
            op_errstr: inner.op_errstr.clone(),
        }
    }

    /// Start a new transaction against the trusted pool. Fails if one is
    /// already in flight — the originator only ever drives one cluster
    /// operation at a time.
    pub fn start(&self, kind: OpKind, ctx: Dict, bricks: Vec<Brick>) -> Result<(), &'static str> {
        {
            let mut inner = self.inner.lock();
            if inner.state != State::Default {
                return Err("a cluster operation is already in flight");
            }
            *inner = Inner::fresh();
            inner.kind = Some(kind);
            inner.ctx = ctx;
            inner.bricks = bricks;
        }
        self.inject_event(Event::StartLock);
        Ok(())
    }

    /// Push an event onto the FIFO and drain it. Safe to call from
    /// whatever thread observed the triggering condition — an RPC
    /// callback, a timer, or (recursively, via the queue, never via a
    /// re-entrant lock) another action.
    pub fn inject_event(&self, event: Event) {
        let mut inner = self.inner.lock();
        inner.queue.push_back(event);
        self.drain(&mut inner);
    }

    /// Run every event currently queued, committing the table's
    /// `next_state` only when the action itself didn't already fail in a
    /// way that demands a different one (it never does here — action and
    /// transition are applied together, unlike the two-step source this
    /// is grounded on, because our actions can't themselves fail the way
    /// an RPC dispatch call can).
    fn drain(&self, inner: &mut Inner) {
        while let Some(event) = inner.queue.pop_front() {
            let from_state = inner.state;
            let (action, next_state) = transition(inner.state, event);
            debug!("op-sm: {from_state:?} + {event:?} -> {action:?}, {next_state:?}");
            self.run_action(inner, action, from_state);
            inner.state = next_state;
        }
    }

    fn run_action(&self, inner: &mut Inner, action: Action, from_state: State) {
        match action {
            Action::None => {}

            Action::SendLock => {
                let peers = self.peers.connected_befriended();
                inner.outstanding = peers.len() as u32;
                let result = self.transport.broadcast_lock(&peers);
                self.fold_broadcast(inner, result, Event::AllAcc);
            }

            Action::Lock => {
                // This machine only tracks the originator's own view of
                // the transaction; `Lock` (acquiring *this* node's local
                // lock) has already happened by the time `SendLock` ran.
            }

            Action::RcvdLockAcc => inner.decrement_and_collect(Event::AllAcc),

            Action::SendStageOp => {
                let kind = inner.kind.expect("stage op requires an in-flight operation");
                match ops::stage_validate(kind, &inner.ctx) {
                    Ok(()) => {
                        let payload = ops::build_payload(kind, &inner.ctx);
                        let peers = self.peers.connected_befriended();
                        inner.outstanding = peers.len() as u32;
                        let result = self.transport.broadcast_stage(&peers, &payload);
                        self.fold_broadcast(inner, result, Event::AllAcc);
                    }
                    Err(e) => {
                        inner.reject(e.message);
                        inner.queue.push_back(Event::RcvdRjt);
                    }
                }
            }

            Action::StageOp => {}

            Action::RcvdStageOpAcc => inner.decrement_and_collect(Event::AllAcc),

            Action::StageOpFailed => {
                // Also fires for every stage response still in flight once
                // the phase has already failed — `outstanding` only
                // reflects every peer that hasn't answered yet, not just
                // the one whose rejection tripped the failure, so this
                // still has to fold into the same count `RcvdStageOpAcc`
                // does (draining to `AllAck`, the failed-state row's
                // collective, not the phase's own `AllAcc`).
                warn!("stage op rejected: {:?}", inner.op_errstr);
                inner.decrement_and_collect(Event::AllAck);
            }

            Action::SendBrickOp => {
                let kind = inner.kind.expect("brick op requires an in-flight operation");
                inner.selected_bricks = ops::brick_select(kind, &inner.bricks, &inner.ctx);
                let payload = ops::build_payload(kind, &inner.ctx);
                let peers: Vec<Uuid> = inner.selected_bricks.iter().map(|b| b.peer).collect();
                inner.outstanding = peers.len() as u32;
                let result = self.transport.broadcast_brick_op(&peers, &inner.selected_bricks, &payload);
                self.fold_broadcast(inner, result, Event::AllAck);
            }

            Action::RcvdBrickOpAcc => inner.decrement_and_collect(Event::AllAck),

            Action::BrickOpFailed => {
                warn!("brick op rejected: {:?}", inner.op_errstr);
                inner.decrement_and_collect(Event::AllAck);
            }

            Action::SendCommitOp => {
                let kind = inner.kind.expect("commit requires an in-flight operation");
                let payload = ops::build_payload(kind, &inner.ctx);
                let peers = self.peers.connected_befriended();
                inner.outstanding = peers.len() as u32;
                let result = self.transport.broadcast_commit(&peers, &payload);
                self.fold_broadcast(inner, result, Event::AllAcc);
            }

            Action::CommitOp => {
                let kind = inner.kind.expect("commit requires an in-flight operation");
                match ops::commit_perform(kind, &inner.ctx) {
                    Ok(result) => inner.ctx = result,
                    Err(e) => inner.reject(e.message),
                }
            }

            Action::RcvdCommitOpAcc => inner.decrement_and_collect(Event::AllAcc),

            Action::CommitOpFailed => {
                warn!("commit rejected: {:?}", inner.op_errstr);
                inner.decrement_and_collect(Event::AllAck);
            }

            Action::SendCommitFailed => {
                error!("commit failed past the point of no return: {:?}", inner.op_errstr);
                let peers = self.peers.connected_befriended();
                self.transport.broadcast_unlock(&peers);
                inner.queue.push_back(Event::Unlock);
            }

            Action::SendUnlock => {
                let peers = self.peers.connected_befriended();
                inner.outstanding = peers.len() as u32;
                self.transport.broadcast_unlock(&peers);
                self.fold_broadcast(inner, BroadcastResult::all_accepted(peers.len()), Event::AllAcc);
            }

            Action::Unlock => {
                let peers = self.peers.connected_befriended();
                self.transport.broadcast_unlock(&peers);
                *inner = Inner::fresh();
            }

            Action::RcvdUnlockAcc => inner.decrement_and_collect(Event::AllAcc),

            Action::UnlockedAll => {
                if inner.op_ret != 0 {
                    error!("cluster op finished with an aggregated failure: op_ret={}, {:?}", inner.op_ret, inner.op_errstr);
                } else {
                    debug!("cluster op finished: op_ret={}", inner.op_ret);
                }
            }

            Action::LocalUnlock => {
                *inner = Inner::fresh();
            }

            Action::SendUnlockDrain => {
                if from_state != State::AckDrain || !inner.drain_started {
                    inner.drain_started = true;
                    let peers = self.peers.connected_befriended();
                    self.transport.broadcast_unlock_drain(&peers);
                }
                inner.decrement_and_collect(Event::AllAck);
            }
        }
    }

    /// Queue a `RcvdAcc`/`RcvdRjt` per response, for the phase-specific
    /// `Rcvd*Acc` action to fold into `outstanding` and fire `collective`
    /// once it hits zero. When there was nobody to broadcast to in the
    /// first place (an empty trusted pool, or no bricks selected), no
    /// response event will ever arrive to notice `outstanding` is already
    /// zero, so that case fires `collective` directly here instead.
    fn fold_broadcast(&self, inner: &mut Inner, result: BroadcastResult, collective: Event) {
        if let Some(errstr) = result.errstr {
            inner.reject(errstr);
        }
        if result.accepted == 0 && result.rejected == 0 {
            inner.queue.push_back(collective);
            return;
        }
        for _ in 0..result.accepted {
            inner.queue.push_back(Event::RcvdAcc);
        }
        for _ in 0..result.rejected {
            inner.queue.push_back(Event::RcvdRjt);
        }
    }
}
