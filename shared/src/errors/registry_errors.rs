use crate::constants::*;
use std::path::PathBuf;
use thiserror::Error;

/// Every way an overlay operation can fail.
///
/// `NotFound` is the only kind that store probing treats as local: it drives the
/// next store in priority order and only reaches the caller once every store
/// has been tried. All other kinds propagate immediately.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Key or value absent in the searched store(s).
    #[error("registry key or value not found")]
    NotFound,

    /// Access-mode policy violation.
    #[error("access denied")]
    AccessDenied,

    /// Opaque handle unknown to the handle table, or a native handle that
    /// could not be resolved to a registry path.
    #[error("invalid registry handle")]
    InvalidHandle,

    /// Enumeration index past the last item.
    #[error("no more items")]
    NoMoreItems,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Another session (this process or another) holds the hive lock.
    #[error("hive `{path}` is locked by another session")]
    FileLockHeld { path: PathBuf },

    #[error("hive `{path}` is corrupt: {reason}")]
    CorruptHive { path: PathBuf, reason: String },

    #[error("hive `{path}` does not exist")]
    FileNotFound { path: PathBuf },

    #[error("I/O error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Win32 error reported by the live registry, passed through unchanged.
    #[error("live registry call failed with Win32 error {code}")]
    Os { code: u32 },
}

impl RegistryError {
    /// True for the recoverable "absent in this store" outcome.
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound)
    }

    /// Win32 error code the intercepted `Reg*` API would have returned.
    pub fn win32_code(&self) -> u32 {
        match self {
            RegistryError::NotFound => ERROR_FILE_NOT_FOUND,
            RegistryError::AccessDenied => ERROR_ACCESS_DENIED,
            RegistryError::InvalidHandle => ERROR_INVALID_HANDLE,
            RegistryError::NoMoreItems => ERROR_NO_MORE_ITEMS,
            RegistryError::InvalidParameter(_) => ERROR_INVALID_PARAMETER,
            RegistryError::FileLockHeld { .. } => ERROR_LOCK_VIOLATION,
            RegistryError::CorruptHive { .. } => ERROR_BADDB,
            RegistryError::FileNotFound { .. } => ERROR_FILE_NOT_FOUND,
            RegistryError::Io { .. } => ERROR_REGISTRY_IO_FAILED,
            RegistryError::Os { code } => *code,
        }
    }

    /// NTSTATUS the intercepted `Nt*` API would have returned.
    pub fn nt_status(&self) -> u32 {
        match self {
            RegistryError::NotFound | RegistryError::FileNotFound { .. } => {
                STATUS_OBJECT_NAME_NOT_FOUND
            }
            RegistryError::AccessDenied => STATUS_ACCESS_DENIED,
            RegistryError::InvalidHandle => STATUS_INVALID_HANDLE,
            RegistryError::NoMoreItems => STATUS_NO_MORE_ENTRIES,
            RegistryError::InvalidParameter(_) => STATUS_INVALID_PARAMETER,
            RegistryError::FileLockHeld { .. } => STATUS_FILE_LOCK_CONFLICT,
            RegistryError::CorruptHive { .. } => STATUS_REGISTRY_CORRUPT,
            RegistryError::Io { .. } => STATUS_REGISTRY_IO_FAILED,
            RegistryError::Os { code } => match *code {
                ERROR_FILE_NOT_FOUND => STATUS_OBJECT_NAME_NOT_FOUND,
                ERROR_ACCESS_DENIED => STATUS_ACCESS_DENIED,
                ERROR_NO_MORE_ITEMS => STATUS_NO_MORE_ENTRIES,
                _ => STATUS_UNSUCCESSFUL,
            },
        }
    }

    /// Maps a Win32 status from the live registry onto the taxonomy.
    pub fn from_win32(code: u32) -> Self {
        match code {
            ERROR_FILE_NOT_FOUND => RegistryError::NotFound,
            ERROR_ACCESS_DENIED => RegistryError::AccessDenied,
            ERROR_INVALID_HANDLE => RegistryError::InvalidHandle,
            ERROR_NO_MORE_ITEMS => RegistryError::NoMoreItems,
            code => RegistryError::Os { code },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_codes_match_the_intercepted_api() {
        assert_eq!(RegistryError::NotFound.win32_code(), 2);
        assert_eq!(RegistryError::AccessDenied.win32_code(), 5);
        assert_eq!(RegistryError::NoMoreItems.win32_code(), 259);
        assert_eq!(RegistryError::NotFound.nt_status(), 0xC000_0034);
        assert_eq!(RegistryError::NoMoreItems.nt_status(), 0x8000_001A);
    }

    #[test]
    fn win32_round_trip_keeps_unknown_codes() {
        assert!(RegistryError::from_win32(2).is_not_found());
        assert!(matches!(
            RegistryError::from_win32(ERROR_KEY_DELETED),
            RegistryError::Os { code: ERROR_KEY_DELETED }
        ));
        assert_eq!(RegistryError::from_win32(ERROR_KEY_DELETED).win32_code(), ERROR_KEY_DELETED);
    }
}
