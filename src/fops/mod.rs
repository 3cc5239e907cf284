//! FOP dispatch contract (C6): the `Xlator` trait every translator
//! implements, default-forwarding dispatch through the graph, notify
//! fan-out, and the suspend/replay stub primitive.

mod defaults;
mod notify;
mod stack;

pub use defaults::DefaultXlator;
pub use notify::{notify, Event};
pub use stack::Stub;

use crate::dict::Dict;
use crate::error::Errno;
use crate::iatt::{Iatt, SetAttrValid};
use crate::inode::FdRef;
use crate::iobuf::IoBref;
use crate::dirent::DirentList;
use crate::loc::Loc;

use crate::xlator::{OptionSchema, Translator};

/// `(op_ret, op_errno)` collapsed into a `Result`.
pub type FopResult<T> = Result<T, Errno>;

/// A translator's behavior. Every FOP method returns `Option<FopResult<T>>`:
/// `None` means "this translator has no override for this FOP," which is
/// exactly the C source's "unset slot" — dispatch (see [`stack`]) forwards
/// it unchanged to `first_child`, the default pass-through behavior spec
/// §4.1 requires. A translator overrides only the FOPs it actually changes
/// behavior for; `child` is its `FIRST_CHILD(this)`, handed in so an
/// override that needs to issue its own, differently-shaped wind (as the
/// readdir-ahead cache's fill does) can do so without knowing its own
/// position in the graph.
pub trait Xlator: Send + Sync {
    /// Run once, in construction order, against this translator's own
    /// (already option-schema-validated) options — the one place a
    /// translator reads its configuration, matching `xlator_init`'s
    /// `GF_OPTION_RECONF`-style parsing out of `this->options`.
    fn init(&self, _options: &Dict) -> Result<(), crate::error::GlusterError> {
        Ok(())
    }

    fn fini(&self) {}

    fn option_schema(&self) -> OptionSchema {
        OptionSchema::new()
    }

    fn notify(&self, _event: Event) {}

    fn lookup(&self, _child: Option<&Translator>, _loc: &Loc) -> Option<FopResult<(Iatt, Dict)>> {
        None
    }

    fn opendir(&self, _child: Option<&Translator>, _loc: &Loc, _fd: &FdRef) -> Option<FopResult<()>> {
        None
    }

    fn readdirp(&self, _child: Option<&Translator>, _fd: &FdRef, _size: usize, _offset: u64, _dict: &Dict) -> Option<FopResult<DirentList>> {
        None
    }

    fn releasedir(&self, _child: Option<&Translator>, _fd: &FdRef) -> Option<()> {
        None
    }

    fn release(&self, _child: Option<&Translator>, _fd: &FdRef) -> Option<()> {
        None
    }

    fn writev(&self, _child: Option<&Translator>, _fd: &FdRef, _iobref: &IoBref, _offset: u64) -> Option<FopResult<Iatt>> {
        None
    }

    fn setattr(&self, _child: Option<&Translator>, _loc: &Loc, _iatt: &Iatt, _valid: SetAttrValid) -> Option<FopResult<Iatt>> {
        None
    }

    fn fsync(&self, _child: Option<&Translator>, _fd: &FdRef, _datasync: bool) -> Option<FopResult<()>> {
        None
    }
}
