//! Location descriptor (C3): names the object a FOP addresses.
//!
//! Every namespace FOP (`lookup`, `unlink`, `rename`, ...) takes one or two
//! of these instead of a bare path, so a translator can resolve by inode
//! identity even when the path a client supplied is stale.

use crate::iatt::Gfid;
use crate::inode::InodeRef;

/// Names one filesystem object: a path for logging/debugging, the parent
/// directory it resolves under, and (once resolved) the inode itself.
/// Mirrors `loc_t`'s split between "what the client asked for" and "what we
/// resolved it to."
#[derive(Clone)]
pub struct Loc {
    pub path: String,
    pub name: String,
    pub gfid: Gfid,
    pub pargfid: Gfid,
    pub inode: Option<InodeRef>,
    pub parent: Option<InodeRef>,
}

impl Loc {
    /// Build a `Loc` for a not-yet-resolved lookup under `parent` named
    /// `name`. `gfid` stays unset (`Gfid::default()`) until the lookup
    /// callback fills it in via [`Loc::resolve`].
    pub fn for_lookup(parent: &InodeRef, name: &str) -> Self {
        Loc {
            path: format!("{}/{}", parent_path_hint(parent), name),
            name: name.to_string(),
            gfid: Gfid::default(),
            pargfid: parent.gfid(),
            inode: None,
            parent: Some(parent.clone()),
        }
    }

    /// The distinguished root `Loc`, used to bootstrap graph-wide
    /// resolution (spec §3, `loc_is_root`'s true case).
    pub fn root(root_inode: &InodeRef) -> Self {
        Loc {
            path: "/".to_string(),
            name: String::new(),
            gfid: Gfid::ROOT,
            pargfid: Gfid::default(),
            inode: Some(root_inode.clone()),
            parent: None,
        }
    }

    pub fn is_root(&self) -> bool {
        self.gfid.is_root()
    }

    /// Fill in the inode this `Loc` resolved to, e.g. from a successful
    /// `lookup` callback (`loc_touchup`'s success path).
    pub fn resolve(&mut self, inode: InodeRef) {
        self.gfid = inode.gfid();
        self.inode = Some(inode);
    }

    /// `loc_copy`: an independent `Loc` naming the same object, safe to
    /// hand to a different frame (each clone of the contained `InodeRef`s
    /// bumps their own strong count).
    pub fn loc_copy(&self) -> Loc {
        self.clone()
    }

    /// Build the child `Loc` for a name directly under this (already
    /// resolved) directory `Loc` — the common case when a translator winds
    /// a call one path component deeper.
    pub fn build_child(&self, name: &str) -> Option<Loc> {
        let parent = self.inode.clone()?;
        Some(Loc::for_lookup(&parent, name))
    }
}

fn parent_path_hint(parent: &InodeRef) -> String {
    if parent.gfid().is_root() {
        String::new()
    } else {
        format!("<{:032x}>", parent.gfid().0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iatt::IaType;
    use crate::inode::InodeTable;

    #[test]
    fn root_loc_is_root() {
        let table = InodeTable::new();
        let root = table.new_inode(Gfid::ROOT, IaType::Directory);
        let loc = Loc::root(&root);
        assert!(loc.is_root());
        assert_eq!(loc.path, "/");
    }

    #[test]
    fn resolve_sets_gfid_and_inode() {
        let table = InodeTable::new();
        let parent = table.new_inode(Gfid::ROOT, IaType::Directory);
        let mut loc = Loc::for_lookup(&parent, "file.txt");
        assert!(loc.inode.is_none());
        let child_gfid = Gfid::new_random();
        let child = table.new_inode(child_gfid, IaType::RegularFile);
        loc.resolve(child);
        assert_eq!(loc.gfid, child_gfid);
        assert!(loc.inode.is_some());
    }

    #[test]
    fn build_child_requires_resolved_parent() {
        let table = InodeTable::new();
        let parent = table.new_inode(Gfid::ROOT, IaType::Directory);
        let unresolved = Loc::for_lookup(&parent, "dir");
        assert!(unresolved.build_child("inner").is_none());

        let mut resolved = Loc::for_lookup(&parent, "dir");
        let dir_inode = table.new_inode(Gfid::new_random(), IaType::Directory);
        resolved.resolve(dir_inode);
        assert!(resolved.build_child("inner").is_some());
    }
}
