//! Trusted-pool membership (C11): peers, their friend-state transitions, and
//! UUID/hostname resolution. The state machine here is intentionally a thin
//! transition log — all the interesting multi-phase coordination lives in
//! [`super::opsm`], which treats the peer table as a source of "who is
//! connected and befriended right now."

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::RwLock;
use uuid::Uuid;

/// Where a peer sits in the probe/accept handshake. Collapsed from the
/// management daemon's full friend-request protocol down to the states that
/// matter for deciding whether a peer participates in a cluster operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FriendState {
    Default,
    ProbeSent,
    ProbeRcvd,
    AccReqSent,
    AccReqRcvd,
    Befriended,
    Unfriending,
    Rejected,
}

impl FriendState {
    pub fn is_befriended(self) -> bool {
        matches!(self, FriendState::Befriended)
    }
}

/// One bounded transition-log entry: what happened and what state it left
/// the peer in. No timestamp — callers that need one stamp it themselves
/// (`Instant`/`SystemTime::now()` don't belong in a module whose tests run
/// the same transitions over and over).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FriendState,
    pub to: FriendState,
}

const TRANSITION_LOG_CAP: usize = 32;

pub struct Peer {
    pub uuid: Uuid,
    pub hostnames: Vec<String>,
    pub port: u16,
    state: FriendState,
    connected: bool,
    transitions: VecDeque<Transition>,
}

impl Peer {
    pub fn new(uuid: Uuid, hostname: impl Into<String>, port: u16) -> Self {
        Peer {
            uuid,
            hostnames: vec![hostname.into()],
            port,
            state: FriendState::Default,
            connected: false,
            transitions: VecDeque::new(),
        }
    }

    pub fn state(&self) -> FriendState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn has_hostname(&self, hostname: &str) -> bool {
        self.hostnames.iter().any(|h| h == hostname)
    }

    pub fn add_hostname(&mut self, hostname: impl Into<String>) {
        let hostname = hostname.into();
        if !self.has_hostname(&hostname) {
            self.hostnames.push(hostname);
        }
    }

    /// Record a friend-state transition, bounding the log so a flapping
    /// peer can't grow it without limit.
    pub fn transition_to(&mut self, to: FriendState) {
        let from = self.state;
        self.state = to;
        if self.transitions.len() == TRANSITION_LOG_CAP {
            self.transitions.pop_front();
        }
        self.transitions.push_back(Transition { from, to });
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }
}

/// The trusted pool: every peer this node has ever probed or been probed by.
pub struct PeerTable {
    peers: RwLock<HashMap<Uuid, Peer>>,
}

impl PeerTable {
    pub fn new() -> Self {
        PeerTable {
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, peer: Peer) {
        self.peers.write().insert(peer.uuid, peer);
    }

    pub fn remove(&self, uuid: Uuid) -> bool {
        self.peers.write().remove(&uuid).is_some()
    }

    pub fn with_peer<R>(&self, uuid: Uuid, f: impl FnOnce(&mut Peer) -> R) -> Option<R> {
        self.peers.write().get_mut(&uuid).map(f)
    }

    pub fn find_by_uuid_exists(&self, uuid: Uuid) -> bool {
        self.peers.read().contains_key(&uuid)
    }

    pub fn find_by_hostname(&self, hostname: &str) -> Option<Uuid> {
        self.peers
            .read()
            .values()
            .find(|p| p.has_hostname(hostname))
            .map(|p| p.uuid)
    }

    pub fn uuid_to_hostname(&self, uuid: Uuid) -> Option<String> {
        self.peers
            .read()
            .get(&uuid)
            .and_then(|p| p.hostnames.first().cloned())
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every peer that is both connected and befriended — the fan-out set
    /// for a cluster operation's lock/stage/brick/commit broadcasts.
    pub fn connected_befriended(&self) -> Vec<Uuid> {
        self.peers
            .read()
            .values()
            .filter(|p| p.is_connected() && p.state().is_befriended())
            .map(|p| p.uuid)
            .collect()
    }

    pub fn all_up(&self) -> bool {
        self.peers.read().values().all(|p| p.is_connected())
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}
