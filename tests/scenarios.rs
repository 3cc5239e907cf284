//! End-to-end scenario coverage exercised against the crate's public API
//! only, one test per documented behavior rather than a mechanical
//! encode/decode grid.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use glusterfs_core::cluster::{
    Brick, ClusterTransport, LoopbackTransport, OpKind, OpStateMachine, State,
};
use glusterfs_core::cluster::{BroadcastResult, FriendState, Peer, PeerTable};
use glusterfs_core::dict::Dict;
use glusterfs_core::dirent::{Dirent, DirentList};
use glusterfs_core::fops::{FopResult, Xlator};
use glusterfs_core::gf::Field;
use glusterfs_core::iatt::{Gfid, IaType, Iatt, SetAttrValid};
use glusterfs_core::inode::{FdRef, InodeTable, TranslatorId};
use glusterfs_core::loc::Loc;
use glusterfs_core::xlator::Translator;

fn befriended_pool(n: u8) -> Arc<PeerTable> {
    let table = PeerTable::new();
    for i in 0..n {
        let mut peer = Peer::new(uuid::Uuid::from_bytes([i + 1; 16]), format!("host-{i}"), 24007);
        peer.set_connected(true);
        peer.transition_to(FriendState::Befriended);
        table.insert(peer);
    }
    Arc::new(table)
}

/// A `Loc` naming `child` itself, resolved under `parent`.
fn dir_loc(parent: &glusterfs_core::inode::InodeRef, child: &glusterfs_core::inode::InodeRef, name: &str) -> Loc {
    let mut loc = Loc::for_lookup(parent, name);
    loc.resolve(child.clone());
    loc
}

/// A posix-like leaf that serves a fixed ten-file directory listing in one
/// shot, the way a backing store answers a single `readdirp(size=128KiB)`.
struct TenFiles;
impl Xlator for TenFiles {
    fn readdirp(&self, _child: Option<&Translator>, _fd: &FdRef, _size: usize, offset: u64, _dict: &Dict) -> Option<FopResult<DirentList>> {
        if offset != 0 {
            return Some(Ok(DirentList::new()));
        }
        let mut list = DirentList::new();
        list.push(Dirent::new(".", 1, IaType::Directory));
        list.push(Dirent::new("..", 2, IaType::Directory));
        for i in 0..10u64 {
            list.push(Dirent::new(format!("f{i}"), 3 + i, IaType::RegularFile));
        }
        Some(Ok(list))
    }
}

fn rda_graph(child_imp: Arc<dyn Xlator>) -> Arc<Translator> {
    let child = Translator::new(TranslatorId(0), "posix", "storage/posix", Dict::new(), child_imp);
    Translator::with_children(
        Translator::new(
            TranslatorId(1),
            "rda",
            "performance/readdir-ahead",
            Dict::new(),
            Arc::new(glusterfs_core::rda::RdaXlator::new(TranslatorId(1))),
        ),
        vec![child],
    )
}

/// S1: a directory of 10 files, served through ten 4096-byte-ish pages,
/// comes back in order with exactly one upstream fill.
#[test]
fn readdir_ahead_serves_pages_in_order_from_a_single_upstream_fill() {
    let rda = rda_graph(Arc::new(TenFiles));
    let table = InodeTable::new();
    let parent = table.new_inode(Gfid::new_random(), IaType::Directory);
    let dir = table.new_inode(Gfid::new_random(), IaType::Directory);
    table.link(&dir, parent.gfid(), "d", Iatt::skeleton(dir.gfid(), IaType::Directory));
    let fd = dir.open_fd(0, true);
    let loc = dir_loc(&parent, &dir, "d");

    assert!(rda.opendir(&loc, &fd).is_ok());

    let mut names = Vec::new();
    loop {
        let page = rda.readdirp(&fd, 4, names.len() as u64, &Dict::new()).unwrap();
        if page.is_empty() {
            break;
        }
        for entry in page.iter() {
            names.push(entry.name.clone());
        }
    }

    let expected: Vec<String> = std::iter::once(".".to_string())
        .chain(std::iter::once("..".to_string()))
        .chain((0..10).map(|i| format!("f{i}")))
        .collect();
    assert_eq!(names, expected);
}

/// A leaf that blocks its first `readdirp` until told to continue, and
/// answers `setattr` immediately — used to pin down the exact interleaving
/// S2 describes without relying on timing.
struct BlockingChild {
    started: Mutex<Option<mpsc::Sender<()>>>,
    resume: Mutex<Option<mpsc::Receiver<()>>>,
    truncated_ctime: i64,
    f3: glusterfs_core::inode::InodeRef,
}

impl Xlator for BlockingChild {
    fn readdirp(&self, _child: Option<&Translator>, _fd: &FdRef, _size: usize, offset: u64, _dict: &Dict) -> Option<FopResult<DirentList>> {
        if offset != 0 {
            return Some(Ok(DirentList::new()));
        }
        if let Some(tx) = self.started.lock().unwrap().take() {
            let _ = tx.send(());
        }
        if let Some(rx) = self.resume.lock().unwrap().take() {
            let _ = rx.recv();
        }
        let mut list = DirentList::new();
        list.push(
            Dirent::new("f3", 1, IaType::RegularFile)
                .with_iatt(Iatt {
                    gfid: Gfid(3),
                    ia_type: IaType::RegularFile,
                    size: 0,
                    ctime: self.truncated_ctime,
                    ..Default::default()
                })
                .with_inode(self.f3.clone()),
        );
        Some(Ok(list))
    }

    fn setattr(&self, _child: Option<&Translator>, _loc: &Loc, iatt: &Iatt, _valid: SetAttrValid) -> Option<FopResult<Iatt>> {
        Some(Ok(*iatt))
    }
}

/// S2: a `truncate` landing while a fill is in flight must not leave the
/// cache reporting the pre-truncate size once the fill completes.
#[test]
fn write_during_prefetch_is_not_clobbered_by_the_in_flight_fill() {
    let table = InodeTable::new();
    let parent = table.new_inode(Gfid::new_random(), IaType::Directory);
    let dir = table.new_inode(Gfid::new_random(), IaType::Directory);
    table.link(&dir, parent.gfid(), "d", Iatt::skeleton(dir.gfid(), IaType::Directory));
    let f3 = table.new_inode(Gfid(3), IaType::RegularFile);
    table.link(
        &f3,
        dir.gfid(),
        "f3",
        Iatt {
            gfid: Gfid(3),
            ia_type: IaType::RegularFile,
            size: 1000,
            ctime: 1,
            ..Default::default()
        },
    );

    let (started_tx, started_rx) = mpsc::channel();
    let (resume_tx, resume_rx) = mpsc::channel();
    let child_imp = Arc::new(BlockingChild {
        started: Mutex::new(Some(started_tx)),
        resume: Mutex::new(Some(resume_rx)),
        truncated_ctime: 2,
        f3: f3.clone(),
    });
    let rda = rda_graph(child_imp);

    let fd = dir.open_fd(0, true);
    let loc = dir_loc(&parent, &dir, "d");
    assert!(rda.opendir(&loc, &fd).is_ok());

    let rda_for_thread = rda.clone();
    let fill_thread = thread::spawn(move || rda_for_thread.readdirp(&fd, 4, 0, &Dict::new()));

    // Block until the fill's upstream call has actually started: the fd's
    // state is `Running` at this point, matching `note_write_during_prefetch`'s
    // guard.
    started_rx.recv().unwrap();

    let mut truncate_loc = Loc::for_lookup(&dir, "f3");
    truncate_loc.resolve(f3.clone());
    let new_iatt = Iatt {
        gfid: Gfid(3),
        ia_type: IaType::RegularFile,
        size: 0,
        ctime: 2,
        ..Default::default()
    };
    let result = rda.setattr(&truncate_loc, &new_iatt, SetAttrValid::SIZE);
    assert_eq!(result.unwrap().ctime, 2);

    resume_tx.send(()).unwrap();
    fill_thread.join().unwrap().unwrap();

    let cached = f3.with_ctx(TranslatorId(1), glusterfs_core::rda::RdaInodeCtx::default, |c| c.statbuf());
    assert!(cached.ctime >= 2, "expected ctime >= T+1, got {}", cached.ctime);
    assert_eq!(cached.size, 0, "must not report the pre-truncate size");
}

/// S3: `mul_k(x)` — the precomputed straight-line program for a constant —
/// must agree with direct table multiplication for every `(k, x)` pair
/// (the full 256x256 grid is exercised in `gf::tests`; this spot-checks a
/// handful of representative values at the crate's public boundary).
#[test]
fn gf_constant_programs_agree_with_table_multiplication() {
    let f = Field::default();
    for &(x, k) in &[(0x53u16, 0xCAu16), (1, 1), (0, 200), (17, 17), (255, 2)] {
        let expected = f.mul(x as u8, k as u8);
        assert_eq!(f.program(k as u8).apply(x as u8), expected, "x={x} k={k}");
    }
}

/// S4: a clean two-peer transaction runs lock/stage/brick-op/commit/unlock
/// and returns to `Default` with `op_ret == 0`.
#[test]
fn op_sm_happy_path_returns_to_default_with_success() {
    struct AllAccept;
    impl ClusterTransport for AllAccept {
        fn broadcast_lock(&self, peers: &[uuid::Uuid]) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_stage(&self, peers: &[uuid::Uuid], _payload: &Dict) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_brick_op(&self, peers: &[uuid::Uuid], _bricks: &[Brick], _payload: &Dict) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_commit(&self, peers: &[uuid::Uuid], _payload: &Dict) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_unlock(&self, _peers: &[uuid::Uuid]) {}
        fn broadcast_unlock_drain(&self, _peers: &[uuid::Uuid]) {}
    }

    let sm = OpStateMachine::new(befriended_pool(2), Arc::new(AllAccept));
    sm.start(OpKind::StopVolume, Dict::new(), Vec::new()).unwrap();
    let outcome = sm.outcome();
    assert_eq!(outcome.state, State::Default);
    assert_eq!(outcome.op_ret, 0);
    assert!(outcome.op_errstr.is_none());
}

/// S5: one of three peers rejects the stage phase; the CLI sees a negative
/// `op_ret` and that peer's `op_errstr` verbatim, and the machine still
/// unwinds all the way back to `Default` rather than wedging.
#[test]
fn op_sm_stage_rejection_surfaces_the_rejecting_peers_errstr() {
    struct RejectStage;
    impl ClusterTransport for RejectStage {
        fn broadcast_lock(&self, peers: &[uuid::Uuid]) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_stage(&self, peers: &[uuid::Uuid], _payload: &Dict) -> BroadcastResult {
            BroadcastResult {
                accepted: peers.len().saturating_sub(1),
                rejected: 1,
                errstr: Some("volume is not started".to_string()),
            }
        }
        fn broadcast_brick_op(&self, peers: &[uuid::Uuid], _bricks: &[Brick], _payload: &Dict) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_commit(&self, peers: &[uuid::Uuid], _payload: &Dict) -> BroadcastResult {
            BroadcastResult::all_accepted(peers.len())
        }
        fn broadcast_unlock(&self, _peers: &[uuid::Uuid]) {}
        fn broadcast_unlock_drain(&self, _peers: &[uuid::Uuid]) {}
    }

    let sm = OpStateMachine::new(befriended_pool(3), Arc::new(RejectStage));
    sm.start(OpKind::StopVolume, Dict::new(), Vec::new()).unwrap();
    let outcome = sm.outcome();
    assert_eq!(outcome.state, State::Default);
    assert!(outcome.op_ret < 0);
    assert_eq!(outcome.op_errstr.as_deref(), Some("volume is not started"));
}

/// A loopback-transport solo run is the minimal sanity check that the
/// shipped default transport actually drives a transaction end to end.
#[test]
fn loopback_transport_drives_a_solo_transaction_to_completion() {
    let sm = OpStateMachine::new(befriended_pool(0), Arc::new(LoopbackTransport));
    sm.start(OpKind::StatusVolume, Dict::new(), Vec::new()).unwrap();
    assert_eq!(sm.outcome().state, State::Default);
}

/// S6: a server-side rename that relinks `(parent, name)` onto a different
/// inode evicts the stale dentry, resolves to the new inode, and invokes
/// every registered `ictxmerge` hook exactly once with `(old, new)`.
#[test]
fn inode_relink_runs_ictxmerge_exactly_once() {
    let table = InodeTable::new();
    let parent = table.new_inode(Gfid::new_random(), IaType::Directory);
    let i1 = table.new_inode(Gfid::new_random(), IaType::RegularFile);
    let i2 = table.new_inode(Gfid::new_random(), IaType::RegularFile);
    table.link(&i1, parent.gfid(), "x", Iatt::skeleton(i1.gfid(), IaType::RegularFile));
    assert_eq!(table.lookup_dentry(parent.gfid(), "x").unwrap().gfid(), i1.gfid());

    let merges = Arc::new(Mutex::new(Vec::new()));
    let m = merges.clone();
    table.register_ictxmerge_hook(move |old, new| m.lock().unwrap().push((old.gfid, new.gfid)));

    table.link(&i2, parent.gfid(), "x", Iatt::skeleton(i2.gfid(), IaType::RegularFile));

    assert_eq!(table.lookup_dentry(parent.gfid(), "x").unwrap().gfid(), i2.gfid());
    assert!(i1.dentries().is_empty());
    assert_eq!(*merges.lock().unwrap(), vec![(i1.gfid(), i2.gfid())]);
}
