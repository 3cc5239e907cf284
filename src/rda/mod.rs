//! The readdir-ahead cache translator (C8): wires [`RdaFdCtx`]/[`RdaInodeCtx`]
//! into the `Xlator` trait, the write-invalidation registry that fans a
//! modifying FOP out to every fd currently prefetching the touched inode's
//! parent directory (or directories, for a hardlinked file), and
//! pass-through mode.

mod ctx;

pub use ctx::{RdaFdCtx, RdaInodeCtx, RdaState};

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};

use log::warn;
use parking_lot::Mutex;

use crate::dict::Dict;
use crate::error::GlusterError;
use crate::fops::{FopResult, Xlator};
use crate::iatt::{Gfid, Iatt, SetAttrValid};
use crate::inode::{FdRef, InodeRef, TranslatorId};
use crate::iobuf::IoBref;
use crate::loc::Loc;
use crate::xlator::{parse_bool, parse_size_bytes, OptionDescriptor, OptionSchema, OptionType, Translator};

const DEFAULT_REQUEST_SIZE: u64 = 128 * 1024;
const DEFAULT_LOW_WMARK: u64 = 4096;
const DEFAULT_HIGH_WMARK: u64 = 128 * 1024;
const DEFAULT_CACHE_LIMIT: u64 = 10 * 1024 * 1024;

struct Config {
    request_size: u64,
    low_wmark: u64,
    high_wmark: u64,
    cache_limit: u64,
    /// `priv->parallel_readdir`: brick-side fan-out hint consumed by the
    /// cluster translator above this one. This translator doesn't act on it
    /// directly, but still parses and stores it since `reconfigure` validates
    /// it alongside its own options.
    parallel_readdir: bool,
    /// `this->pass_through`: independent of `parallel_readdir` — set this
    /// and the cache is bypassed entirely regardless of fan-out mode.
    pass_through: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            request_size: DEFAULT_REQUEST_SIZE,
            low_wmark: DEFAULT_LOW_WMARK,
            high_wmark: DEFAULT_HIGH_WMARK,
            cache_limit: DEFAULT_CACHE_LIMIT,
            parallel_readdir: false,
            pass_through: false,
        }
    }
}

/// Per-fd state, parked in the fd's own context slot so it is dropped along
/// with the fd. `None` before an `opendir` has gone through this translator,
/// or after `releasedir` has torn it down.
type FdSlot = Option<Arc<RdaFdCtx>>;

/// `rda_priv_t`: this translator's configuration plus the write-invalidation
/// registry (spec §4.5's last paragraph) — every fd currently prefetching a
/// given parent directory, so a concurrent write can find and flag them.
pub struct RdaXlator {
    id: TranslatorId,
    config: Mutex<Config>,
    cache_size: Arc<AtomicU64>,
    registry: Mutex<HashMap<Gfid, Vec<Weak<RdaFdCtx>>>>,
}

impl RdaXlator {
    pub fn new(id: TranslatorId) -> Self {
        RdaXlator {
            id,
            config: Mutex::new(Config::default()),
            cache_size: Arc::new(AtomicU64::new(0)),
            registry: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, parent: Gfid, fd_ctx: &Arc<RdaFdCtx>) {
        self.registry.lock().entry(parent).or_default().push(Arc::downgrade(fd_ctx));
    }

    fn unregister(&self, parent: Gfid, fd_ctx: &Arc<RdaFdCtx>) {
        let mut reg = self.registry.lock();
        if let Some(list) = reg.get_mut(&parent) {
            list.retain(|w| w.as_ptr() != Arc::as_ptr(fd_ctx));
            if list.is_empty() {
                reg.remove(&parent);
            }
        }
    }

    /// Every live fd currently prefetching `parent`'s listing is told `gfid`
    /// was just written, so its in-flight (or next) fill force-accepts that
    /// entry's stat instead of discarding it under the ordinary ctime guard.
    fn notify_write(&self, parent: Gfid, gfid: Gfid) {
        let mut reg = self.registry.lock();
        if let Some(list) = reg.get_mut(&parent) {
            list.retain(|w| w.strong_count() > 0);
            for weak in list.iter() {
                if let Some(fd_ctx) = weak.upgrade() {
                    fd_ctx.note_write_during_prefetch(gfid);
                }
            }
        }
    }

    /// Run the write-invalidation protocol for a modifying FOP against
    /// `inode`: capture the per-inode cache's generation before the call,
    /// merge in whatever stat the call actually returned (or clear to a
    /// skeleton if it returned none), and fan the touch out to every fd
    /// prefetching the inode's parent directories.
    fn invalidate(&self, inode: &InodeRef, new_stat: Option<Iatt>) {
        let captured_generation = inode.with_ctx(self.id, RdaInodeCtx::default, |c| c.generation());
        inode.with_ctx(self.id, RdaInodeCtx::default, |c| c.update_iatts(new_stat, captured_generation));
        for (parent, _name) in inode.dentries() {
            self.notify_write(parent, inode.gfid());
        }
    }
}

impl Xlator for RdaXlator {
    fn init(&self, options: &Dict) -> Result<(), GlusterError> {
        let mut cfg = Config::default();
        if let Some(v) = options.get_str("rda-request-size") {
            cfg.request_size = parse_size_bytes(v)?;
        }
        if let Some(v) = options.get_str("rda-low-wmark") {
            cfg.low_wmark = parse_size_bytes(v)?;
        }
        if let Some(v) = options.get_str("rda-high-wmark") {
            cfg.high_wmark = parse_size_bytes(v)?;
        }
        if let Some(v) = options.get_str("rda-cache-limit") {
            cfg.cache_limit = parse_size_bytes(v)?;
        }
        if let Some(v) = options.get_str("parallel-readdir") {
            cfg.parallel_readdir = parse_bool(v)?;
        }
        if let Some(v) = options.get_str("pass-through") {
            cfg.pass_through = parse_bool(v)?;
        }
        *self.config.lock() = cfg;
        Ok(())
    }

    fn option_schema(&self) -> OptionSchema {
        OptionSchema::new()
            .with(OptionDescriptor::new("rda-request-size", OptionType::SizeBytes))
            .with(OptionDescriptor::new("rda-low-wmark", OptionType::SizeBytes))
            .with(OptionDescriptor::new("rda-high-wmark", OptionType::SizeBytes))
            .with(OptionDescriptor::new("rda-cache-limit", OptionType::SizeBytes))
            .with(OptionDescriptor::new("parallel-readdir", OptionType::Boolean))
            .with(OptionDescriptor::new("pass-through", OptionType::Boolean))
    }

    fn opendir(&self, child: Option<&Translator>, loc: &Loc, fd: &FdRef) -> Option<FopResult<()>> {
        let child = child?;
        if let Err(e) = child.opendir(loc, fd) {
            return Some(Err(e));
        }

        let cfg = self.config.lock();
        if cfg.pass_through {
            warn!("readdir-ahead: pass-through enabled, bypassing cache for {:?}", loc.gfid);
            return Some(Ok(()));
        }

        // The registry is keyed by the directory being listed, not its
        // parent: that's what a concurrent write inside it needs to find.
        let parent_gfid = loc.gfid;
        let fd_ctx = Arc::new(RdaFdCtx::new(
            Dict::new(),
            parent_gfid,
            cfg.request_size,
            cfg.low_wmark,
            cfg.high_wmark,
            cfg.cache_limit,
            self.cache_size.clone(),
            self.id,
        ));
        drop(cfg);
        self.register(parent_gfid, &fd_ctx);
        fd.with_ctx::<FdSlot, _>(self.id, || None, |slot| *slot = Some(fd_ctx));
        Some(Ok(()))
    }

    fn readdirp(&self, child: Option<&Translator>, fd: &FdRef, size: usize, offset: u64, _dict: &Dict) -> Option<FopResult<crate::dirent::DirentList>> {
        let child = child?;
        let fd_ctx = fd.with_ctx::<FdSlot, _>(self.id, || None, |slot| slot.clone());
        match fd_ctx {
            Some(ctx) => Some(ctx.service(child, fd, size, offset)),
            None => None,
        }
    }

    fn releasedir(&self, _child: Option<&Translator>, fd: &FdRef) -> Option<()> {
        let fd_ctx = fd.with_ctx::<FdSlot, _>(self.id, || None, |slot| slot.take());
        if let Some(ctx) = fd_ctx {
            self.unregister(ctx.parent_gfid, &ctx);
        }
        None
    }

    /// A write changes the target's size/mtime/ctime; invalidate any cached
    /// attributes for it and wake up anyone prefetching its parent.
    fn writev(&self, child: Option<&Translator>, fd: &FdRef, iobref: &IoBref, offset: u64) -> Option<FopResult<Iatt>> {
        let child = child?;
        let result = child.writev(fd, iobref, offset);
        self.invalidate(&fd.inode, result.as_ref().ok().copied());
        Some(result)
    }

    fn setattr(&self, child: Option<&Translator>, loc: &Loc, iatt: &Iatt, valid: SetAttrValid) -> Option<FopResult<Iatt>> {
        let child = child?;
        let result = child.setattr(loc, iatt, valid);
        if let Some(inode) = &loc.inode {
            self.invalidate(inode, result.as_ref().ok().copied());
        }
        Some(result)
    }

    fn fsync(&self, child: Option<&Translator>, fd: &FdRef, datasync: bool) -> Option<FopResult<()>> {
        let child = child?;
        let result = child.fsync(fd, datasync);
        if result.is_ok() {
            self.invalidate(&fd.inode, None);
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dirent::{Dirent, DirentList};
    use crate::iatt::IaType;
    use crate::inode::InodeTable;

    struct FixedListChild;
    impl Xlator for FixedListChild {
        fn opendir(&self, _child: Option<&Translator>, _loc: &Loc, _fd: &FdRef) -> Option<FopResult<()>> {
            Some(Ok(()))
        }

        fn readdirp(&self, _child: Option<&Translator>, _fd: &FdRef, _size: usize, _offset: u64, _dict: &Dict) -> Option<FopResult<DirentList>> {
            let mut list = DirentList::new();
            list.push(Dirent::new("a", 1, IaType::RegularFile));
            Some(Ok(list))
        }
    }

    /// A `Loc` naming `dir` itself, resolved under `parent` — the shape a
    /// real `opendir` call receives (as opposed to [`Loc::root`], which is
    /// only for the distinguished root inode).
    fn dir_loc(parent: &InodeRef, dir: &InodeRef, name: &str) -> Loc {
        let mut loc = Loc::for_lookup(parent, name);
        loc.resolve(dir.clone());
        loc
    }

    fn graph() -> (Arc<Translator>, Arc<Translator>) {
        let child = Translator::new(TranslatorId(0), "posix", "storage/posix", Dict::new(), Arc::new(FixedListChild));
        let rda = Translator::with_children(
            Translator::new(TranslatorId(1), "rda", "performance/readdir-ahead", Dict::new(), Arc::new(RdaXlator::new(TranslatorId(1)))),
            vec![child.clone()],
        );
        (rda, child)
    }

    #[test]
    fn opendir_populates_fd_slot_and_readdirp_goes_through_the_cache() {
        let (rda, _child) = graph();
        let table = InodeTable::new();
        let parent = table.new_inode(Gfid::new_random(), IaType::Directory);
        let dir = table.new_inode(Gfid::new_random(), IaType::Directory);
        table.link(&dir, parent.gfid(), "d", Iatt::skeleton(dir.gfid(), IaType::Directory));
        let fd = dir.open_fd(0, true);
        let loc = dir_loc(&parent, &dir, "d");

        assert!(rda.opendir(&loc, &fd).is_ok());
        let page = rda.readdirp(&fd, 10, 0, &Dict::new()).unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn pass_through_mode_skips_the_cache_entirely() {
        let child = Translator::new(TranslatorId(0), "posix", "storage/posix", Dict::new(), Arc::new(FixedListChild));
        let imp = RdaXlator::new(TranslatorId(1));
        let mut opts = Dict::new();
        opts.set("pass-through", "on");
        imp.init(&opts).unwrap();
        let rda = Translator::with_children(Translator::new(TranslatorId(1), "rda", "performance/readdir-ahead", Dict::new(), Arc::new(imp)), vec![child]);

        let table = InodeTable::new();
        let parent = table.new_inode(Gfid::new_random(), IaType::Directory);
        let dir = table.new_inode(Gfid::new_random(), IaType::Directory);
        table.link(&dir, parent.gfid(), "d", Iatt::skeleton(dir.gfid(), IaType::Directory));
        let fd = dir.open_fd(0, true);
        let loc = dir_loc(&parent, &dir, "d");

        assert!(rda.opendir(&loc, &fd).is_ok());
        // No fd ctx was installed, so readdirp falls straight through to the child.
        let page = rda.readdirp(&fd, 10, 0, &Dict::new()).unwrap();
        assert_eq!(page.len(), 1);
    }

    #[test]
    fn parallel_readdir_alone_does_not_enable_pass_through() {
        let imp = RdaXlator::new(TranslatorId(1));
        let mut opts = Dict::new();
        opts.set("parallel-readdir", "on");
        imp.init(&opts).unwrap();
        assert!(!imp.config.lock().pass_through);
        assert!(imp.config.lock().parallel_readdir);
    }

    #[test]
    fn releasedir_tears_down_the_fd_slot_and_registry_entry_idempotently() {
        let (rda, _child) = graph();
        let table = InodeTable::new();
        let parent = table.new_inode(Gfid::new_random(), IaType::Directory);
        let dir = table.new_inode(Gfid::new_random(), IaType::Directory);
        table.link(&dir, parent.gfid(), "d", Iatt::skeleton(dir.gfid(), IaType::Directory));
        let fd = dir.open_fd(0, true);
        let loc = dir_loc(&parent, &dir, "d");

        assert!(rda.opendir(&loc, &fd).is_ok());
        rda.releasedir(&fd);
        // A second releasedir must be a no-op, not a double-teardown panic.
        rda.releasedir(&fd);
    }
}
