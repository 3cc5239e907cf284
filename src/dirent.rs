//! Directory entries (C3): the unit `readdir`/`readdirp` hand back, and the
//! unit the readdir-ahead cache buffers.

use smallvec::SmallVec;

use crate::dict::Dict;
use crate::iatt::{IaType, Iatt};
use crate::inode::InodeRef;

/// Directory listings are read in small, bounded pages (the readdir-ahead
/// cache's fill size and typical kernel readdir buffers both stay well
/// under this), so a page's entries usually fit inline without a heap
/// allocation.
const INLINE_ENTRIES: usize = 8;

/// One entry from a directory listing. `readdirp`-shaped callers populate
/// `iatt`/`inode`; plain `readdir` callers leave them at their defaults,
/// matching `gf_dirent_t`'s dual use.
#[derive(Clone)]
pub struct Dirent {
    pub name: String,
    /// Opaque cookie marking this entry's position for a subsequent
    /// `readdir` call to resume after (`d_off`).
    pub offset: u64,
    pub ia_type: IaType,
    pub iatt: Iatt,
    pub inode: Option<InodeRef>,
    /// Per-entry extended attributes requested alongside the listing.
    pub dict: Dict,
}

impl Dirent {
    pub fn new(name: impl Into<String>, offset: u64, ia_type: IaType) -> Self {
        Dirent {
            name: name.into(),
            offset,
            ia_type,
            iatt: Iatt::default(),
            inode: None,
            dict: Dict::new(),
        }
    }

    pub fn with_iatt(mut self, iatt: Iatt) -> Self {
        self.ia_type = iatt.ia_type;
        self.iatt = iatt;
        self
    }

    pub fn with_inode(mut self, inode: InodeRef) -> Self {
        self.inode = Some(inode);
        self
    }
}

/// A page of directory entries returned from one upstream `readdir(p)`
/// call, in the order the backing filesystem produced them.
#[derive(Clone, Default)]
pub struct DirentList {
    entries: SmallVec<[Dirent; INLINE_ENTRIES]>,
}

impl DirentList {
    pub fn new() -> Self {
        DirentList::default()
    }

    pub fn push(&mut self, entry: Dirent) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dirent> {
        self.entries.iter()
    }

    pub fn last_offset(&self) -> Option<u64> {
        self.entries.last().map(|e| e.offset)
    }

    /// Split off up to `count` entries from the front, leaving the rest.
    /// Used to carve a client-sized page out of a larger prefetched batch.
    pub fn take_front(&mut self, count: usize) -> DirentList {
        let n = count.min(self.entries.len());
        DirentList {
            entries: self.entries.drain(..n).collect(),
        }
    }

    pub fn extend(&mut self, other: DirentList) {
        self.entries.extend(other.entries);
    }
}

impl IntoIterator for DirentList {
    type Item = Dirent;
    type IntoIter = smallvec::IntoIter<[Dirent; INLINE_ENTRIES]>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_front_splits_and_preserves_order() {
        let mut list = DirentList::new();
        for i in 0..5 {
            list.push(Dirent::new(format!("entry{i}"), i as u64, IaType::RegularFile));
        }
        let page = list.take_front(3);
        assert_eq!(page.len(), 3);
        assert_eq!(list.len(), 2);
        assert_eq!(page.iter().next().unwrap().name, "entry0");
        assert_eq!(list.iter().next().unwrap().name, "entry3");
    }

    #[test]
    fn last_offset_tracks_final_entry() {
        let mut list = DirentList::new();
        list.push(Dirent::new("a", 10, IaType::RegularFile));
        list.push(Dirent::new("b", 20, IaType::RegularFile));
        assert_eq!(list.last_offset(), Some(20));
    }
}
