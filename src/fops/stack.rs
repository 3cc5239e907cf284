//! Default-forwarding dispatch (`STACK_WIND`/`STACK_UNWIND_STRICT`
//! equivalent) and the suspend/replay stub primitive (C6).
//!
//! A translator's `Xlator` impl returns `None` from a FOP method to mean
//! "unimplemented, forward unchanged." The methods here are where that
//! forwarding actually happens: they call the node's own override, and on
//! `None` wind into `first_child`, recursing until some translator answers
//! or the stack bottoms out with nothing left to call.

use log::{debug, trace};

use crate::dict::Dict;
use crate::error::Errno;
use crate::iatt::{Iatt, SetAttrValid};
use crate::inode::FdRef;
use crate::iobuf::IoBref;
use crate::dirent::DirentList;
use crate::loc::Loc;
use crate::xlator::Translator;

use super::FopResult;

impl Translator {
    pub fn lookup(&self, loc: &Loc) -> FopResult<(Iatt, Dict)> {
        trace!("{}: dispatching lookup({:?})", self.name, loc.gfid);
        let first = self.first_child();
        match self.imp().lookup(first.as_deref(), loc) {
            Some(r) => r,
            None => self.wind("lookup", |child| child.lookup(loc)),
        }
    }

    pub fn opendir(&self, loc: &Loc, fd: &FdRef) -> FopResult<()> {
        trace!("{}: dispatching opendir({:?})", self.name, loc.gfid);
        let first = self.first_child();
        match self.imp().opendir(first.as_deref(), loc, fd) {
            Some(r) => r,
            None => self.wind("opendir", |child| child.opendir(loc, fd)),
        }
    }

    pub fn readdirp(&self, fd: &FdRef, size: usize, offset: u64, dict: &Dict) -> FopResult<DirentList> {
        trace!("{}: dispatching readdirp(size={size}, offset={offset})", self.name);
        let first = self.first_child();
        match self.imp().readdirp(first.as_deref(), fd, size, offset, dict) {
            Some(r) => r,
            None => self.wind("readdirp", |child| child.readdirp(fd, size, offset, dict)),
        }
    }

    pub fn releasedir(&self, fd: &FdRef) {
        trace!("{}: dispatching releasedir", self.name);
        let first = self.first_child();
        if self.imp().releasedir(first.as_deref(), fd).is_none() {
            if let Some(child) = first {
                child.releasedir(fd);
            }
        }
    }

    pub fn release(&self, fd: &FdRef) {
        trace!("{}: dispatching release", self.name);
        let first = self.first_child();
        if self.imp().release(first.as_deref(), fd).is_none() {
            if let Some(child) = first {
                child.release(fd);
            }
        }
    }

    pub fn writev(&self, fd: &FdRef, iobref: &IoBref, offset: u64) -> FopResult<Iatt> {
        trace!("{}: dispatching writev(offset={offset})", self.name);
        let first = self.first_child();
        match self.imp().writev(first.as_deref(), fd, iobref, offset) {
            Some(r) => r,
            None => self.wind("writev", |child| child.writev(fd, iobref, offset)),
        }
    }

    pub fn setattr(&self, loc: &Loc, iatt: &Iatt, valid: SetAttrValid) -> FopResult<Iatt> {
        trace!("{}: dispatching setattr({:?})", self.name, loc.gfid);
        let first = self.first_child();
        match self.imp().setattr(first.as_deref(), loc, iatt, valid) {
            Some(r) => r,
            None => self.wind("setattr", |child| child.setattr(loc, iatt, valid)),
        }
    }

    pub fn fsync(&self, fd: &FdRef, datasync: bool) -> FopResult<()> {
        trace!("{}: dispatching fsync(datasync={datasync})", self.name);
        let first = self.first_child();
        match self.imp().fsync(first.as_deref(), fd, datasync) {
            Some(r) => r,
            None => self.wind("fsync", |child| child.fsync(fd, datasync)),
        }
    }

    /// Forward to `first_child`, or fail with `EOPNOTSUPP` when this node is
    /// the bottom of the stack and never answered — the `xlator_set_type`
    /// "fill unset slot" rule applied at dispatch time instead of at
    /// construction time.
    fn wind<T>(&self, fop: &str, f: impl FnOnce(&Translator) -> FopResult<T>) -> FopResult<T> {
        match self.first_child() {
            Some(child) => {
                debug!("{}: winding {fop} to {}", self.name, child.name);
                f(&child)
            }
            None => Err(Errno::EOPNOTSUPP),
        }
    }
}

/// A suspended FOP, stored with everything it needs to replay once whatever
/// it was waiting on (a lock, a cache fill) becomes available. Spec §4.4:
/// the universal resumption primitive translators use instead of re-reading
/// a transient buffer after a wait.
pub struct Stub {
    replay: Box<dyn FnOnce() + Send>,
}

impl Stub {
    pub fn new(replay: impl FnOnce() + Send + 'static) -> Self {
        Stub { replay: Box::new(replay) }
    }

    pub fn call(self) {
        (self.replay)()
    }
}
