//! Translation of backend and cache failures into errno values.

use crate::backend::BackendError;
use crate::cache::metadata::CacheError;

/// Map a backend error to the errno reported to the filesystem client.
#[must_use]
pub fn errno_for(err: &BackendError) -> i32 {
    match err {
        BackendError::NotFound(_) => libc::ENOENT,
        BackendError::Status { status, .. } => errno_for_status(*status),
        BackendError::Transport(_) | BackendError::Malformed(_) | BackendError::Cancelled => {
            libc::EIO
        }
    }
}

/// Map an HTTP status code to an errno.
#[must_use]
pub fn errno_for_status(status: u16) -> i32 {
    match status {
        404 => libc::ENOENT,
        401 | 403 => libc::EACCES,
        429 => libc::EAGAIN,
        _ => libc::EIO,
    }
}

/// Map a metadata cache error to an errno.
#[must_use]
pub fn errno_for_cache(err: &CacheError) -> i32 {
    match err {
        CacheError::NotFound(_) => libc::ENOENT,
        CacheError::Backend(e) => errno_for(e),
        CacheError::Corrupt { .. } | CacheError::Io(_) | CacheError::GeneratorPanicked(_) => {
            libc::EIO
        }
    }
}

impl From<BackendError> for std::io::Error {
    fn from(e: BackendError) -> Self {
        Self::from_raw_os_error(errno_for(&e))
    }
}

impl From<CacheError> for std::io::Error {
    fn from(e: CacheError) -> Self {
        Self::from_raw_os_error(errno_for_cache(&e))
    }
}

/// The error returned for any attempt to modify the filesystem.
#[must_use]
pub fn read_only() -> std::io::Error {
    std::io::Error::from_raw_os_error(libc::EROFS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: u16) -> BackendError {
        BackendError::Status {
            status,
            message: "synthetic".to_owned(),
        }
    }

    #[test]
    fn status_table() {
        assert_eq!(errno_for(&status(403)), libc::EACCES);
        assert_eq!(errno_for(&status(401)), libc::EACCES);
        assert_eq!(errno_for(&status(404)), libc::ENOENT);
        assert_eq!(errno_for(&status(429)), libc::EAGAIN);
        for code in [500, 502, 503] {
            assert_eq!(errno_for(&status(code)), libc::EIO, "HTTP {code}");
        }
        assert_eq!(errno_for(&status(418)), libc::EIO, "unrecognized code");
    }

    #[test]
    fn non_status_errors() {
        assert_eq!(
            errno_for(&BackendError::NotFound("table t".to_owned())),
            libc::ENOENT
        );
        assert_eq!(
            errno_for(&BackendError::Transport("reset".to_owned())),
            libc::EIO
        );
        assert_eq!(errno_for(&BackendError::Cancelled), libc::EIO);
    }

    #[test]
    fn cache_errors_follow_the_same_table() {
        assert_eq!(
            errno_for_cache(&CacheError::NotFound("k".to_owned())),
            libc::ENOENT
        );
        assert_eq!(
            errno_for_cache(&CacheError::Backend(status(429))),
            libc::EAGAIN
        );
        assert_eq!(
            errno_for_cache(&CacheError::Corrupt {
                key: "k".to_owned(),
                reason: "bad".to_owned()
            }),
            libc::EIO
        );
    }

    #[test]
    fn io_error_carries_raw_errno() {
        let io: std::io::Error = status(403).into();
        assert_eq!(io.raw_os_error(), Some(libc::EACCES));
        assert_eq!(read_only().raw_os_error(), Some(libc::EROFS));
    }
}
