//! Errno and the structured error kinds used at translator and op-sm boundaries.
//!
//! Per-FOP results stay as the historical `(op_ret, op_errno)` pair: an
//! `Option<T>`/`Result<T, Errno>` carrying one of these codes. The cluster
//! and op-sm layers need a richer error that also carries a human-readable
//! message, so [`GlusterError`] wraps a [`Kind`] and converts to/from
//! [`Errno`] at the FOP boundary.

use log::error;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

/// POSIX error codes this core ever hands back across a FOP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Errno {
    ENOENT = libc::ENOENT,
    EACCES = libc::EACCES,
    EPERM = libc::EPERM,
    EEXIST = libc::EEXIST,
    ENOTEMPTY = libc::ENOTEMPTY,
    EINVAL = libc::EINVAL,
    ENOMEM = libc::ENOMEM,
    ERANGE = libc::ERANGE,
    EOPNOTSUPP = libc::EOPNOTSUPP,
    EUCLEAN = libc::EUCLEAN,
    EIO = libc::EIO,
    EBUSY = libc::EBUSY,
    ENODEV = libc::ENODEV,
}

impl Errno {
    pub fn code(self) -> i32 {
        self.into()
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SAFETY: strerror operates on a process-global buffer but never
        // returns a null pointer for a valid errno.
        let msg = unsafe {
            let ptr = libc::strerror(self.code());
            std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
        };
        write!(f, "{msg}")
    }
}

impl std::error::Error for Errno {}

/// Error kinds from spec §7, independent of the POSIX code they map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    ResourceExhaustion,
    InvalidArgument,
    NotFound,
    Permission,
    OutOfRange,
    Conflict,
    NotSupported,
    TransientBackend,
    FatalInvariantViolation,
}

impl Kind {
    /// The errno a FOP boundary should report for this kind.
    pub fn errno(self) -> Errno {
        match self {
            Kind::ResourceExhaustion => Errno::ENOMEM,
            Kind::InvalidArgument => Errno::EINVAL,
            Kind::NotFound => Errno::ENOENT,
            Kind::Permission => Errno::EACCES,
            Kind::OutOfRange => Errno::ERANGE,
            Kind::Conflict => Errno::EEXIST,
            Kind::NotSupported => Errno::EOPNOTSUPP,
            Kind::TransientBackend => Errno::EBUSY,
            Kind::FatalInvariantViolation => Errno::EIO,
        }
    }
}

/// A structured error used outside the raw FOP callback contract: option
/// validation, the op-sm, the persisted-volume store.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct GlusterError {
    pub kind: Kind,
    pub message: String,
}

impl GlusterError {
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        GlusterError {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Kind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Kind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(Kind::Conflict, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        let message = message.into();
        error!("fatal invariant violation: {message}");
        Self::new(Kind::FatalInvariantViolation, message)
    }

    pub fn errno(&self) -> Errno {
        self.kind.errno()
    }
}

impl From<&GlusterError> for Errno {
    fn from(err: &GlusterError) -> Self {
        err.kind.errno()
    }
}

pub type GlusterResult<T> = Result<T, GlusterError>;
