//! Named pipe (FIFO) primitives
//!
//! Thin wrappers over `mkfifo(3)` and blocking `open(2)` on a FIFO. Opening a
//! FIFO blocks until the opposite end is opened by another thread or process,
//! which is what gives [`super::DuplexChannel`] its implicit rendezvous.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// Permission bits for newly created FIFOs (before umask)
const FIFO_MODE: libc::mode_t = 0o666;

/// Paths of the two pipes backing channel `name`
///
/// The first pipe carries initiator→acceptor traffic, the second
/// acceptor→initiator traffic.
pub fn pipe_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("fifo_{}1", name)),
        dir.join(format!("fifo_{}2", name)),
    )
}

/// Create a FIFO at `path` unless one already exists
///
/// An existing FIFO is accepted so both sides can call this without racing.
/// An existing non-FIFO file is an error.
pub fn create_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string that outlives the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE) };
    if rc == 0 {
        return Ok(());
    }

    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::AlreadyExists {
        let file_type = fs::symlink_metadata(path)?.file_type();
        if file_type.is_fifo() {
            return Ok(());
        }
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a FIFO", path.display()),
        ));
    }

    Err(err)
}

/// Create both pipes for channel `name` in `dir`
pub fn create_pair(dir: &Path, name: &str) -> io::Result<()> {
    let (forward, backward) = pipe_paths(dir, name);
    create_fifo(&forward)?;
    create_fifo(&backward)?;
    Ok(())
}

/// Remove a FIFO, treating "already gone" as success
pub fn remove_fifo(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Open the read end of a FIFO (blocks until a writer opens it)
pub fn open_read(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

/// Open the write end of a FIFO (blocks until a reader opens it)
pub fn open_write(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_pipe_paths() {
        let (a, b) = pipe_paths(Path::new("/tmp/x"), "data3_");
        assert_eq!(a, PathBuf::from("/tmp/x/fifo_data3_1"));
        assert_eq!(b, PathBuf::from("/tmp/x/fifo_data3_2"));
    }

    #[test]
    fn test_create_fifo_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fifo_test1");

        create_fifo(&path).unwrap();
        create_fifo(&path).unwrap();

        let meta = fs::symlink_metadata(&path).unwrap();
        assert!(meta.file_type().is_fifo());
    }

    #[test]
    fn test_create_fifo_rejects_regular_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, b"not a pipe").unwrap();

        let err = create_fifo(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_remove_missing_fifo_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_fifo(&dir.path().join("never_created")).unwrap();
    }

    #[test]
    fn test_open_rendezvous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fifo_rv1");
        create_fifo(&path).unwrap();

        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            let mut w = open_write(&writer_path).unwrap();
            w.write_all(b"hello").unwrap();
        });

        let mut r = open_read(&path).unwrap();
        let mut buf = Vec::new();
        r.read_to_end(&mut buf).unwrap();
        writer.join().unwrap();

        assert_eq!(buf, b"hello");
    }
}
