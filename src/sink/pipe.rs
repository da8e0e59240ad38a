//! Named pipe (FIFO) helpers
//!
//! A FIFO opened for writing with `O_NONBLOCK` fails with `ENXIO` while no
//! reader has it open. That gives a cheap, non-blocking way to wait for a
//! reader to attach.

use std::fs::File;
use std::io;
use std::path::Path;

/// Whether `path` exists and is a named pipe.
#[cfg(unix)]
pub fn is_fifo(path: &Path) -> bool {
    use std::os::unix::fs::FileTypeExt;

    std::fs::metadata(path).map(|meta| meta.file_type().is_fifo()).unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_fifo(_path: &Path) -> bool {
    false
}

/// Open a FIFO for writing without blocking.
///
/// Returns `Ok(None)` when no reader is attached. The returned file is switched
/// back to blocking mode so the flush thread applies backpressure normally.
#[cfg(unix)]
pub fn open_fifo_writer(path: &Path) -> io::Result<Option<File>> {
    use nix::fcntl::{FcntlArg, OFlag, fcntl};
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = match OpenOptions::new().write(true).custom_flags(libc::O_NONBLOCK).open(path) {
        Ok(file) => file,
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => return Ok(None),
        Err(e) => return Err(e),
    };

    let fd = file.as_raw_fd();
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io::Error::from)?;
    let mut flags = OFlag::from_bits_truncate(flags);
    flags.remove(OFlag::O_NONBLOCK);
    fcntl(fd, FcntlArg::F_SETFL(flags)).map_err(io::Error::from)?;

    Ok(Some(file))
}

#[cfg(not(unix))]
pub fn open_fifo_writer(_path: &Path) -> io::Result<Option<File>> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "named pipes require a unix platform"))
}
