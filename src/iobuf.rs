//! Reference-counted I/O buffer refs (C1's third container).
//!
//! GlusterFS's `iobuf`/`iobref` pair a pool-backed buffer with a refcounted
//! handle so write payloads can be retained across an asynchronous wind
//! without copying. The ownership shapes this needs — a plain owned buffer,
//! or a handle shared across threads — collapsed here to the two variants
//! FOP payloads actually need.

use std::sync::Arc;

/// A single I/O buffer: owned bytes or a shared, cloneable reference to
/// someone else's bytes (the `iobuf_ref` case).
#[derive(Debug, Clone)]
pub enum IoBuf {
    Owned(Arc<[u8]>),
    Shared(Arc<[u8]>),
}

impl IoBuf {
    pub fn from_vec(v: Vec<u8>) -> Self {
        IoBuf::Owned(Arc::from(v.into_boxed_slice()))
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            IoBuf::Owned(b) | IoBuf::Shared(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// `iobuf_ref`: take another handle to the same underlying bytes
    /// without copying.
    pub fn share(&self) -> IoBuf {
        IoBuf::Shared(match self {
            IoBuf::Owned(b) | IoBuf::Shared(b) => b.clone(),
        })
    }
}

/// `iobref_t`: an ordered vector of `IoBuf`s passed as the `vector`/`count`
/// argument pair to `writev`-shaped FOPs. Cloning an `IoBref` is O(vectors),
/// not O(bytes), since each `IoBuf` clone is an `Arc` bump.
#[derive(Debug, Clone, Default)]
pub struct IoBref {
    vectors: Vec<IoBuf>,
}

impl IoBref {
    pub fn new() -> Self {
        IoBref::default()
    }

    pub fn push(&mut self, buf: IoBuf) {
        self.vectors.push(buf);
    }

    pub fn total_len(&self) -> usize {
        self.vectors.iter().map(IoBuf::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IoBuf> {
        self.vectors.iter()
    }

    /// `iobref_ref`: a cheap clone sharing every underlying buffer.
    pub fn iobref_ref(&self) -> IoBref {
        IoBref {
            vectors: self.vectors.iter().map(IoBuf::share).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_does_not_copy_bytes() {
        let buf = IoBuf::from_vec(vec![1, 2, 3]);
        let shared = buf.share();
        assert_eq!(buf.as_slice(), shared.as_slice());
    }

    #[test]
    fn iobref_total_len() {
        let mut iobref = IoBref::new();
        iobref.push(IoBuf::from_vec(vec![0; 4]));
        iobref.push(IoBuf::from_vec(vec![0; 8]));
        assert_eq!(iobref.total_len(), 12);
    }
}
