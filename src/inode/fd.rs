//! Open file/directory handles (C2's other half).
//!
//! The C source keeps a flat, per-inode fd list rather than a separate
//! global fd table; [`Inode::push_fd`] is the only place an fd is recorded
//! against its inode, matching that shape. `release`/`releasedir` must run
//! exactly once, and only after every frame still in flight on the fd has
//! finished (spec §8 invariant 2) — tracked here by an inflight counter
//! rather than the C source's `fd_count`/`fd_close` dance.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::table::{InodeRef, TranslatorId};

type CtxMap = HashMap<TranslatorId, Box<dyn Any + Send + Sync>>;

struct FdState {
    ctx: CtxMap,
    released: bool,
}

/// An open handle on an inode. One `Fd` per `open`/`opendir`/`create`;
/// cloning an [`FdRef`] is what every wound-down frame does to keep the fd
/// alive for the duration of its own call.
pub struct Fd {
    pub inode: InodeRef,
    pub is_dir: bool,
    pub flags: i32,
    refcount: AtomicU64,
    inflight: AtomicU64,
    release_pending: AtomicBool,
    on_release: Mutex<Option<Box<dyn FnOnce(&Fd) + Send>>>,
    state: Mutex<FdState>,
}

impl Fd {
    pub fn ia_type(&self) -> crate::iatt::IaType {
        self.inode.ia_type()
    }

    /// Register the callback to run when this fd's refcount reaches zero
    /// and no frame is still in flight on it — the `release`/`releasedir`
    /// FOP dispatch. Overwrites any previously-registered callback.
    pub fn set_release_callback(&self, f: impl FnOnce(&Fd) + Send + 'static) {
        *self.on_release.lock() = Some(Box::new(f));
    }

    /// Mark one frame as having wound down the stack holding this fd.
    /// Must be paired with [`Fd::end_frame`].
    pub fn begin_frame(&self) {
        self.inflight.fetch_add(1, Ordering::AcqRel);
    }

    /// A frame using this fd has unwound. If the fd was already unrefed to
    /// zero and this was the last frame in flight, fires the release
    /// callback now.
    pub fn end_frame(&self) {
        if self.inflight.fetch_sub(1, Ordering::AcqRel) == 1 && self.release_pending.load(Ordering::Acquire) {
            self.maybe_release();
        }
    }

    fn maybe_release(&self) {
        let mut state = self.state.lock();
        if state.released {
            return;
        }
        if self.inflight.load(Ordering::Acquire) != 0 {
            return;
        }
        state.released = true;
        drop(state);
        if let Some(cb) = self.on_release.lock().take() {
            cb(self);
        }
    }

    pub fn with_ctx<T, R>(&self, tid: TranslatorId, default: impl FnOnce() -> T, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Any + Send + Sync,
    {
        let mut state = self.state.lock();
        let slot = state.ctx.entry(tid).or_insert_with(|| Box::new(default()));
        let typed = slot
            .downcast_mut::<T>()
            .expect("fd ctx slot type mismatch for this translator id");
        f(typed)
    }
}

/// Strong handle to an [`Fd`], bumping/dropping [`Fd`]'s explicit refcount
/// the way `fd_ref`/`fd_unref` do in the C source (as with [`InodeRef`],
/// distinct from the underlying `Arc`'s own count).
pub struct FdRef(Arc<Fd>);

impl std::ops::Deref for FdRef {
    type Target = Arc<Fd>;
    fn deref(&self) -> &Arc<Fd> {
        &self.0
    }
}

impl Clone for FdRef {
    fn clone(&self) -> Self {
        self.0.refcount.fetch_add(1, Ordering::AcqRel);
        FdRef(self.0.clone())
    }
}

impl Drop for FdRef {
    fn drop(&mut self) {
        if self.0.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.release_pending.store(true, Ordering::Release);
            self.0.maybe_release();
        }
    }
}

impl InodeRef {
    /// `fd_create`: open a new handle on this inode with refcount 1,
    /// recording it in the inode's flat fd list.
    pub fn open_fd(&self, flags: i32, is_dir: bool) -> FdRef {
        let fd = Arc::new(Fd {
            inode: self.clone(),
            is_dir,
            flags,
            refcount: AtomicU64::new(1),
            inflight: AtomicU64::new(0),
            release_pending: AtomicBool::new(false),
            on_release: Mutex::new(None),
            state: Mutex::new(FdState {
                ctx: HashMap::new(),
                released: false,
            }),
        });
        self.push_fd(&fd);
        FdRef(fd)
    }
}
