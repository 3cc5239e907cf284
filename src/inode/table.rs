//! [`InodeTable`]: content-addressed inode cache keyed by [`Gfid`], plus the
//! dentry links hung off it.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::iatt::{Gfid, Iatt};

use super::fd::Fd;

/// Index of a translator in the loaded graph, used as the key for per-inode
/// and per-fd context slots (spec §4.2's "per-translator context").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TranslatorId(pub u32);

type CtxMap = HashMap<TranslatorId, Box<dyn Any + Send + Sync>>;

/// A directory entry: `(parent, name) -> child`, cached alongside the
/// attributes observed at link time so a directory read can be served
/// without a revalidate.
pub struct Dentry {
    pub parent: Gfid,
    pub name: Arc<str>,
    pub child: Gfid,
}

struct InodeState {
    ia_type: crate::iatt::IaType,
    iatt: Iatt,
    /// `(parent, name)` pairs this inode is currently linked under. Usually
    /// one entry; more than one only for hardlinked regular files.
    dentries: Vec<(Gfid, Arc<str>)>,
    fds: Vec<Weak<Fd>>,
    ctx: CtxMap,
}

/// A single cached inode. Identity is its [`Gfid`]; everything else is
/// mutable state behind one lock, matching the C source's per-inode lock
/// covering the dentry list, fd list, and context slots (spec §5).
pub struct Inode {
    pub gfid: Gfid,
    /// Kernel-visible lookup count (`nlookup`): distinct from `strong`,
    /// which is this table's own liveness refcount (spec §4.2, invariant (a)).
    nlookup: AtomicU64,
    strong: AtomicU64,
    state: Mutex<InodeState>,
}

impl Inode {
    fn new(gfid: Gfid, ia_type: crate::iatt::IaType) -> Self {
        Inode {
            gfid,
            nlookup: AtomicU64::new(0),
            strong: AtomicU64::new(0),
            state: Mutex::new(InodeState {
                ia_type,
                iatt: Iatt::skeleton(gfid, ia_type),
                dentries: Vec::new(),
                fds: Vec::new(),
                ctx: HashMap::new(),
            }),
        }
    }

    pub fn ia_type(&self) -> crate::iatt::IaType {
        self.state.lock().ia_type
    }

    pub fn iatt(&self) -> Iatt {
        self.state.lock().iatt
    }

    pub fn set_iatt(&self, iatt: Iatt) {
        self.state.lock().iatt = iatt;
    }

    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Acquire)
    }

    pub fn strong_count(&self) -> u64 {
        self.strong.load(Ordering::Acquire)
    }

    pub fn dentries(&self) -> Vec<(Gfid, Arc<str>)> {
        self.state.lock().dentries.clone()
    }

    pub(crate) fn push_fd(&self, fd: &Arc<Fd>) {
        self.state.lock().fds.push(Arc::downgrade(fd));
    }

    /// Run `f` against this inode's per-translator context slot, inserting
    /// `default()` the first time a translator touches it. Mirrors
    /// `__inode_ctx_get2`/`inode_ctx_set` under the inode's single lock.
    pub fn with_ctx<T, R>(&self, tid: TranslatorId, default: impl FnOnce() -> T, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Sync,
    {
        let mut state = self.state.lock();
        let slot = state
            .ctx
            .entry(tid)
            .or_insert_with(|| Box::new(default()));
        let typed = slot
            .downcast_mut::<T>()
            .expect("inode ctx slot type mismatch for this translator id");
        f(typed)
    }

    pub fn ctx_remove(&self, tid: TranslatorId) {
        self.state.lock().ctx.remove(&tid);
    }
}

/// Strong handle to an [`Inode`], mirroring the explicit `inode_ref`/
/// `inode_unref` refcount the C source threads through every frame
/// (distinct from the `Arc`'s own strong count, which only needs to be `>=
/// 1` while *this* reference or the table's own entry survive).
pub struct InodeRef {
    inode: Arc<Inode>,
    table: Arc<InodeTableInner>,
}

impl InodeRef {
    pub fn gfid(&self) -> Gfid {
        self.inode.gfid
    }
}

impl std::ops::Deref for InodeRef {
    type Target = Inode;
    fn deref(&self) -> &Inode {
        &self.inode
    }
}

impl Clone for InodeRef {
    fn clone(&self) -> Self {
        self.inode.strong.fetch_add(1, Ordering::AcqRel);
        InodeRef {
            inode: self.inode.clone(),
            table: self.table.clone(),
        }
    }
}

impl Drop for InodeRef {
    fn drop(&mut self) {
        if self.inode.strong.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.table.forget(&self.inode);
        }
    }
}

struct InodeTableInner {
    by_gfid: RwLock<HashMap<Gfid, Arc<Inode>>>,
    by_dentry: RwLock<HashMap<(Gfid, Arc<str>), Gfid>>,
    forget_hooks: RwLock<Vec<Box<dyn Fn(&Inode) + Send + Sync>>>,
    ictxmerge_hooks: RwLock<Vec<Box<dyn Fn(&Inode, &Inode) + Send + Sync>>>,
}

impl InodeTableInner {
    /// Run when an inode's strong count has just dropped to zero: forget
    /// hooks fire in reverse registration order (innermost/last-loaded
    /// translator first), then the inode is dropped from the active set.
    fn forget(&self, inode: &Arc<Inode>) {
        if inode.strong.load(Ordering::Acquire) != 0 {
            // A clone raced in between the fetch_sub and this call.
            return;
        }
        for hook in self.forget_hooks.read().iter().rev() {
            hook(inode);
        }
        let dentries = inode.state.lock().dentries.clone();
        let mut by_gfid = self.by_gfid.write();
        let mut by_dentry = self.by_dentry.write();
        if inode.strong.load(Ordering::Acquire) != 0 {
            return;
        }
        by_gfid.remove(&inode.gfid);
        for (parent, name) in dentries {
            by_dentry.remove(&(parent, name));
        }
    }
}

/// The inode table for one graph: every live [`Inode`] indexed by `Gfid`,
/// plus the `(parent, name) -> child` dentry index.
///
/// Arena framing of the design notes: this table is the sole owner of every
/// `Inode` it holds (via the `Arc` in `by_gfid`); dentries and fds never
/// store another inode directly, only its `Gfid`, so there is no cycle for
/// a drop glue to walk.
pub struct InodeTable {
    inner: Arc<InodeTableInner>,
}

impl InodeTable {
    pub fn new() -> Self {
        InodeTable {
            inner: Arc::new(InodeTableInner {
                by_gfid: RwLock::new(HashMap::new()),
                by_dentry: RwLock::new(HashMap::new()),
                forget_hooks: RwLock::new(Vec::new()),
                ictxmerge_hooks: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a translator's forget callback, invoked (in reverse
    /// registration order) whenever an inode's strong count reaches zero.
    pub fn register_forget_hook(&self, hook: impl Fn(&Inode) + Send + Sync + 'static) {
        self.inner.forget_hooks.write().push(Box::new(hook));
    }

    /// Register a translator's `ictxmerge` callback, run whenever
    /// [`InodeTable::link`] relinks `(parent, name)` away from one inode onto
    /// another: `(old, new)` is handed to every hook in registration order so
    /// a translator can fold whatever per-inode state it was keeping on the
    /// old inode into the new one.
    pub fn register_ictxmerge_hook(&self, hook: impl Fn(&Inode, &Inode) + Send + Sync + 'static) {
        self.inner.ictxmerge_hooks.write().push(Box::new(hook));
    }

    /// `inode_new`: allocate an unlinked inode with strong count 1. The
    /// caller owns the one [`InodeRef`] returned; it is not yet reachable
    /// via `get`/dentry lookup until [`InodeTable::link`] is called.
    pub fn new_inode(&self, gfid: Gfid, ia_type: crate::iatt::IaType) -> InodeRef {
        let inode = Arc::new(Inode::new(gfid, ia_type));
        inode.strong.store(1, Ordering::Release);
        self.inner.by_gfid.write().insert(gfid, inode.clone());
        InodeRef {
            inode,
            table: self.inner.clone(),
        }
    }

    /// `inode_find`: look up a cached inode by `Gfid` without allocating,
    /// bumping strong count on a hit (the table's own map entry does not
    /// itself count as a strong ref).
    pub fn get(&self, gfid: Gfid) -> Option<InodeRef> {
        let inode = self.inner.by_gfid.read().get(&gfid)?.clone();
        inode.strong.fetch_add(1, Ordering::AcqRel);
        Some(InodeRef {
            inode,
            table: self.inner.clone(),
        })
    }

    /// `inode_grep`: resolve a directory entry to its child inode.
    pub fn lookup_dentry(&self, parent: Gfid, name: &str) -> Option<InodeRef> {
        let child_gfid = *self
            .inner
            .by_dentry
            .read()
            .get(&(parent, Arc::<str>::from(name)))?;
        self.get(child_gfid)
    }

    /// `inode_link`: publish `(parent, name) -> inode` in the dentry index.
    /// Relinking the same `(parent, name)` pair to a different child is the
    /// rename/`ictxmerge` path: the stale dentry is dropped from the old
    /// child's list and the index entry is overwritten.
    pub fn link(&self, inode: &InodeRef, parent: Gfid, name: &str, iatt: Iatt) {
        let name: Arc<str> = Arc::from(name);
        let key = (parent, name.clone());
        inode.set_iatt(iatt);
        {
            let mut state = inode.inode.state.lock();
            if !state.dentries.iter().any(|(p, n)| *p == parent && n.as_ref() == name.as_ref()) {
                state.dentries.push((parent, name.clone()));
            }
        }
        let stale_child = self.inner.by_dentry.write().insert(key, inode.gfid());
        if let Some(stale) = stale_child {
            if stale != inode.gfid() {
                if let Some(old) = self.inner.by_gfid.read().get(&stale).cloned() {
                    old.state.lock().dentries.retain(|(p, n)| !(*p == parent && n.as_ref() == name.as_ref()));
                    for hook in self.inner.ictxmerge_hooks.read().iter() {
                        hook(&old, &inode.inode);
                    }
                }
            }
        }
    }

    /// `inode_lookup`: increment the kernel-visible `nlookup` count. Called
    /// once per entry the upstream FUSE-equivalent surface hands back to a
    /// client, independent of this process's own `strong` refcount.
    pub fn bump_nlookup(&self, inode: &Inode, by: u64) {
        inode.nlookup.fetch_add(by, Ordering::AcqRel);
    }

    /// `inode_forget`: drop `by` lookups; if `nlookup` would go negative,
    /// clamp at zero rather than panicking on an already-evicted inode
    /// (the C source tolerates a redundant forget the same way).
    pub fn forget_nlookup(&self, inode: &Inode, by: u64) {
        let _ = inode
            .nlookup
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| Some(cur.saturating_sub(by)));
    }

    pub fn len(&self) -> usize {
        self.inner.by_gfid.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}
