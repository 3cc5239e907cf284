//! Per-operation plug-in set (C12): the four functions the op-sm looks up
//! by [`OpKind`] to do the actual work of a cluster transaction —
//! `stage_validate`, `brick_select`, `commit_perform`, and a dict-builder
//! for the wire payload sent to peers. Brick selection only does real work
//! for stop/remove-brick/profile/heal; every other op runs against the
//! whole volume and the default selector returns every brick unfiltered.

use uuid::Uuid;

use crate::dict::Dict;
use crate::error::GlusterResult;

/// One brick as the op-sm sees it: which peer hosts it and its export path.
/// The wire-level brick identity (host:path) is a `String` here rather than
/// a `Loc`/`Gfid` — by the time the management daemon selects bricks it is
/// working from volfile-derived metadata, not the filesystem graph C2/C3
/// describe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Brick {
    pub peer: Uuid,
    pub path: String,
}

/// The administrative operations the op-sm drives. Mirrors the management
/// daemon's operation catalogue; not every variant needs a specialized
/// handler, so most fall through to [`DEFAULT_HANDLER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    CreateVolume,
    StartVolume,
    StopVolume,
    DeleteVolume,
    AddBrick,
    ReplaceBrick,
    RemoveBrick,
    SetVolume,
    ResetVolume,
    LogFilename,
    LogRotate,
    SyncVolume,
    GsyncSet,
    ProfileVolume,
    Quota,
    LogLevel,
    StatusVolume,
    Rebalance,
    HealVolume,
    StatedumpVolume,
}

/// The four functions a cluster operation plugs into the op-sm.
///
/// `brick_select` receives every brick in the target volume and narrows it
/// to the set the op-sm should actually fan the brick-level RPC out to;
/// returning the input unchanged (the default) means "all of them."
pub trait OpHandler: Send + Sync {
    fn stage_validate(&self, ctx: &Dict) -> GlusterResult<()> {
        let _ = ctx;
        Ok(())
    }

    fn brick_select(&self, bricks: &[Brick], ctx: &Dict) -> Vec<Brick> {
        let _ = ctx;
        bricks.to_vec()
    }

    fn commit_perform(&self, ctx: &Dict) -> GlusterResult<Dict> {
        Ok(ctx.deep_copy())
    }

    /// Build the dict payload sent to peers for this op's stage/commit
    /// phases. Defaults to forwarding the originator's own context dict
    /// unchanged, which is correct for ops that don't allocate anything
    /// op-sm-side (a `port` for create-volume being the one that does).
    fn build_payload(&self, ctx: &Dict) -> Dict {
        ctx.deep_copy()
    }
}

struct DefaultOpHandler;
impl OpHandler for DefaultOpHandler {}

struct StopVolumeHandler;
impl OpHandler for StopVolumeHandler {
    fn brick_select(&self, bricks: &[Brick], ctx: &Dict) -> Vec<Brick> {
        let _ = ctx;
        bricks.to_vec()
    }
}

struct RemoveBrickHandler;
impl OpHandler for RemoveBrickHandler {
    fn brick_select(&self, bricks: &[Brick], ctx: &Dict) -> Vec<Brick> {
        // The bricks named in the request, not the whole volume — the
        // dict carries `brick0`, `brick1`, ... as `host:path` strings.
        let mut named = Vec::new();
        let mut i = 0;
        loop {
            let Some(spec) = ctx.get_str(&format!("brick{i}")) else {
                break;
            };
            if let Some(b) = bricks.iter().find(|b| b.path == spec) {
                named.push(b.clone());
            }
            i += 1;
        }
        named
    }
}

struct ProfileVolumeHandler;
impl OpHandler for ProfileVolumeHandler {
    fn brick_select(&self, bricks: &[Brick], ctx: &Dict) -> Vec<Brick> {
        let _ = ctx;
        // Profiling fans out to every brick that is actually up; the op-sm
        // itself doesn't track liveness, so this stays "all of them" and
        // relies on the RPC layer to no-op unreachable peers.
        bricks.to_vec()
    }
}

struct HealVolumeHandler;
impl OpHandler for HealVolumeHandler {
    fn brick_select(&self, bricks: &[Brick], ctx: &Dict) -> Vec<Brick> {
        let group_size = ctx.get_u64("replica-count").unwrap_or(1).max(1) as usize;
        heal_participants(bricks, group_size)
    }
}

/// Exactly one participant per replica group, chosen by UUID-max-wins so
/// every subvolume is healed by at most one node.
pub fn heal_participants(bricks: &[Brick], group_size: usize) -> Vec<Brick> {
    if group_size == 0 {
        return Vec::new();
    }
    bricks
        .chunks(group_size)
        .filter_map(|group| group.iter().max_by_key(|b| b.peer).cloned())
        .collect()
}

/// Resolve the plug-in set for an op. Ops with no specialized handler use
/// [`DefaultOpHandler`], matching spec's "brick selection is non-trivial
/// only for stop/remove/profile/heal."
pub fn handler_for(kind: OpKind) -> &'static dyn OpHandler {
    match kind {
        OpKind::StopVolume => &StopVolumeHandler,
        OpKind::RemoveBrick => &RemoveBrickHandler,
        OpKind::ProfileVolume => &ProfileVolumeHandler,
        OpKind::HealVolume => &HealVolumeHandler,
        _ => &DefaultOpHandler,
    }
}

pub fn stage_validate(kind: OpKind, ctx: &Dict) -> GlusterResult<()> {
    handler_for(kind).stage_validate(ctx)
}

pub fn brick_select(kind: OpKind, bricks: &[Brick], ctx: &Dict) -> Vec<Brick> {
    handler_for(kind).brick_select(bricks, ctx)
}

pub fn commit_perform(kind: OpKind, ctx: &Dict) -> GlusterResult<Dict> {
    handler_for(kind).commit_perform(ctx)
}

pub fn build_payload(kind: OpKind, ctx: &Dict) -> Dict {
    handler_for(kind).build_payload(ctx)
}

/// `create-volume`'s one op-sm-allocated extra: a listener port handed to
/// every peer in the stage payload. The caller supplies the next free port
/// since the op-sm itself has no knowledge of the listening-socket pool.
pub fn build_create_volume_payload(ctx: &Dict, allocated_port: u16) -> Dict {
    let mut payload = ctx.deep_copy();
    payload.set("port", allocated_port as i64);
    payload
}
