//! IPC transport via Unix domain sockets.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

/// Connect to a Unix domain socket.
pub fn connect<P: AsRef<Path>>(path: P) -> io::Result<UnixStream> {
    UnixStream::connect(path)
}

/// Bind a Unix domain socket listener.
///
/// A stale socket file left by a previous process is removed first; any
/// other kind of file at the path is left alone and the bind fails.
pub fn bind<P: AsRef<Path>>(path: P) -> io::Result<UnixListener> {
    let path = path.as_ref();
    if is_stale_socket(path) {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

/// Remove the socket file of a listener that is going away.
pub fn unlink<P: AsRef<Path>>(path: P) {
    let path = path.as_ref();
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::debug!("[IPC] Could not remove {}: {}", path.display(), e);
        }
    }
}

fn is_stale_socket(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return false;
    };
    if !meta.file_type().is_socket() {
        return false;
    }
    // Something still accepting on it means it is not stale.
    UnixStream::connect(path).is_err()
}
