//! POSIX inode attribute record (C3).

use std::cmp::Ordering;

use bitflags::bitflags;

bitflags! {
    /// Which fields of a `setattr` call's [`Iatt`] argument are actually
    /// meant to be applied, mirroring `GF_SET_ATTR_*`'s bitmask convention
    /// (a raw `struct iatt` carries every field whether or not the caller
    /// asked to change it).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SetAttrValid: u32 {
        const MODE  = 0x1;
        const UID   = 0x2;
        const GID   = 0x4;
        const ATIME = 0x8;
        const MTIME = 0x10;
        const SIZE  = 0x20;
    }
}

/// 128-bit globally unique inode identifier, stable across renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Gfid(pub u128);

impl Gfid {
    /// The root inode's distinguished GFID: all-zero with the high bit set,
    /// per spec §3's invariant (b).
    pub const ROOT: Gfid = Gfid(1u128 << 127);

    pub fn new_random() -> Self {
        Gfid(uuid::Uuid::new_v4().as_u128())
    }

    pub fn is_root(self) -> bool {
        self == Gfid::ROOT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IaType {
    RegularFile,
    Directory,
    SymLink,
    BlockDevice,
    CharDevice,
    Fifo,
    Socket,
    Invalid,
}

impl Default for IaType {
    fn default() -> Self {
        IaType::Invalid
    }
}

/// POSIX inode attributes, carried on every FOP that returns a stat.
///
/// Cache-staleness comparisons use the `(ctime, ctime_nsec)` lexicographic
/// ordering mandated by spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Iatt {
    pub gfid: Gfid,
    pub ia_type: IaType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub blocks: u64,
    pub nlink: u32,
    pub atime: i64,
    pub atime_nsec: u32,
    pub mtime: i64,
    pub mtime_nsec: u32,
    pub ctime: i64,
    pub ctime_nsec: u32,
}

impl Iatt {
    /// A skeleton record retaining only `gfid`/`ia_type`, used when a
    /// modifying FOP's callback did not carry a fresh stat (spec §4.5's
    /// write-invalidation "clear to skeleton" rule).
    pub fn skeleton(gfid: Gfid, ia_type: IaType) -> Self {
        Iatt {
            gfid,
            ia_type,
            ..Default::default()
        }
    }

    /// `ctime` is considered "unset" when zero, matching the C source's use
    /// of zero-initialized `struct iatt` as a sentinel.
    pub fn ctime_is_unset(&self) -> bool {
        self.ctime == 0 && self.ctime_nsec == 0
    }

    /// Lexicographic `(ctime, ctime_nsec)` ordering used by the
    /// write-invalidation merge rule in spec §4.5.
    pub fn ctime_cmp(&self, other: &Iatt) -> Ordering {
        (self.ctime, self.ctime_nsec).cmp(&(other.ctime, other.ctime_nsec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skeleton_clears_everything_but_gfid_and_type() {
        let gfid = Gfid(42);
        let skel = Iatt::skeleton(gfid, IaType::RegularFile);
        assert_eq!(skel.gfid, gfid);
        assert_eq!(skel.ia_type, IaType::RegularFile);
        assert_eq!(skel.size, 0);
        assert!(skel.ctime_is_unset());
    }

    #[test]
    fn ctime_ordering() {
        let a = Iatt {
            ctime: 5,
            ctime_nsec: 10,
            ..Default::default()
        };
        let b = Iatt {
            ctime: 5,
            ctime_nsec: 20,
            ..Default::default()
        };
        assert_eq!(a.ctime_cmp(&b), Ordering::Less);
    }
}
