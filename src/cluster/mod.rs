//! Management-daemon cluster coordination: the op state machine (C10),
//! trusted-pool peer table (C11), and per-operation plug-ins (C12).
//!
//! Everything here runs only on the side of the graph that drives
//! multi-node administrative transactions (volume create/start/stop,
//! add/remove-brick, heal, ...); it has no bearing on the per-call FOP
//! dispatch in [`crate::xlator`] and [`crate::fops`].

pub mod ops;
pub mod opsm;
pub mod peer;

pub use ops::{heal_participants, Brick, OpHandler, OpKind};
pub use opsm::{Action, BroadcastResult, ClusterTransport, Event, LoopbackTransport, Outcome, OpStateMachine, State};
pub use peer::{FriendState, Peer, PeerTable};
