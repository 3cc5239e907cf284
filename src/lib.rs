//! Translator runtime, readdir-ahead cache, and cluster operation state
//! machine for a stackable, distributed POSIX-semantics filesystem.

pub mod cluster;
pub mod dict;
pub mod dirent;
pub mod error;
pub mod fops;
pub mod gf;
pub mod iatt;
pub mod inode;
pub mod iobuf;
pub mod latency;
pub mod loc;
pub mod rda;
pub mod store;
pub mod xlator;

pub use dict::{Dict, Value};
pub use error::{Errno, GlusterError, GlusterResult, Kind};
pub use iatt::{Gfid, IaType, Iatt};
