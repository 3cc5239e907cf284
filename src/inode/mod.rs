//! Inode and fd tables (C2): identity, lifetime, and per-translator context
//! slots shared by every FOP.
//!
//! The C source models inodes as a cyclic graph (inode -> dentry -> parent
//! inode, inode -> fd -> inode). Per the design notes, this is broken here
//! by giving the [`InodeTable`] sole ownership of every [`Inode`] (addressed
//! by [`Gfid`]) while dentries and fds hold only the identifiers they need;
//! [`InodeRef`]/[`super::inode::fd::FdRef`] carry the *strong* refcount
//! semantics spec §3 requires, independent of `Arc`'s own bookkeeping.

mod fd;
mod table;

pub use fd::{Fd, FdRef};
pub use table::{Dentry, Inode, InodeRef, InodeTable, TranslatorId};
