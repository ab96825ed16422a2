use std::{
    io,
    os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd},
    os::unix::ffi::OsStrExt,
    os::unix::net::{UnixListener, UnixStream},
    path::{Path, PathBuf},
};

use crate::cutils::cerr;

/// The connection-triggered abort endpoint.
///
/// A named unix socket that never carries data: a peer that wants the
/// supervised command gone simply connects to it, and the connection itself
/// is the signal. One instance, one expected client.
pub(crate) struct AbortChannel {
    listener: UnixListener,
    path: PathBuf,
}

impl AbortChannel {
    const NAME_PREFIX: &'static str = "jobpen-";

    /// The socket path a channel for `instance` would live at inside `dir`.
    ///
    /// Deterministic, so that the external party only needs to know the
    /// supervisor's instance id (its pid) to find the endpoint.
    pub(crate) fn socket_path(dir: &Path, instance: u32) -> PathBuf {
        dir.join(format!("{}{instance}.sock", Self::NAME_PREFIX))
    }

    /// Bind the channel for `instance` in the system temporary directory.
    pub(crate) fn bind(instance: u32) -> io::Result<Self> {
        Self::bind_in(&std::env::temp_dir(), instance)
    }

    /// Bind the channel for `instance` inside `dir`.
    pub(crate) fn bind_in(dir: &Path, instance: u32) -> io::Result<Self> {
        let path = Self::socket_path(dir, instance);

        // a crashed run with a recycled instance id may have left an entry behind
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }

        let listener = bind_single_client(&path)?;

        Ok(Self { listener, path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Accept the pending connection, if there is one.
    ///
    /// Never blocks: the listener is non-blocking, and a `None` simply means
    /// the wakeup was spurious.
    pub(crate) fn try_accept(&self) -> io::Result<Option<UnixStream>> {
        match self.listener.accept() {
            Ok((stream, _addr)) => Ok(Some(stream)),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl AsRawFd for AbortChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}

impl Drop for AbortChannel {
    fn drop(&mut self) {
        // not required for correctness, but don't leave litter behind
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Bind a non-blocking listening socket at `path` with room for exactly one
/// pending connector.
///
/// Done with libc directly because [`UnixListener::bind`] offers no control
/// over the backlog.
#[allow(unsafe_code)]
fn bind_single_client(path: &Path) -> io::Result<UnixListener> {
    // SAFETY: `socket` creates a fresh descriptor, which we own immediately.
    let fd = cerr(unsafe {
        libc::socket(
            libc::AF_UNIX,
            libc::SOCK_STREAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            0,
        )
    })?;
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    // SAFETY: an all-zeroes `sockaddr_un` is a valid value of the type.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;

    let bytes = path.as_os_str().as_bytes();
    if bytes.len() >= addr.sun_path.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "socket path too long",
        ));
    }
    for (dst, &src) in addr.sun_path.iter_mut().zip(bytes) {
        *dst = src as libc::c_char;
    }

    // SAFETY: `addr` is a fully initialized `sockaddr_un` whose path is
    // NUL-terminated by construction.
    cerr(unsafe {
        libc::bind(
            fd.as_raw_fd(),
            (&addr as *const libc::sockaddr_un).cast(),
            std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
        )
    })?;

    // SAFETY: `fd` is a bound socket.
    cerr(unsafe { libc::listen(fd.as_raw_fd(), 1) })?;

    Ok(UnixListener::from(fd))
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::FileTypeExt;
    use std::os::unix::net::UnixStream;

    use super::AbortChannel;

    fn test_instance(offset: u32) -> u32 {
        // pid-derived so that concurrently running test binaries cannot
        // collide, offset so that tests within this binary cannot either
        std::process::id().wrapping_mul(100).wrapping_add(offset)
    }

    #[test]
    fn binds_a_named_socket() {
        let dir = std::env::temp_dir();
        let channel = AbortChannel::bind_in(&dir, test_instance(1)).unwrap();

        let metadata = std::fs::metadata(channel.path()).unwrap();
        assert!(metadata.file_type().is_socket());
    }

    #[test]
    fn connection_is_observable_and_socket_is_removed_on_drop() {
        let channel = AbortChannel::bind(test_instance(2)).unwrap();
        let path = channel.path().to_path_buf();

        assert!(channel.try_accept().unwrap().is_none());

        let _client = UnixStream::connect(&path).unwrap();
        assert!(channel.try_accept().unwrap().is_some());

        drop(channel);
        assert!(!path.exists());
        assert!(UnixStream::connect(&path).is_err());
    }

    #[test]
    fn distinct_instances_get_distinct_endpoints() {
        let dir = std::env::temp_dir();
        let first = AbortChannel::bind_in(&dir, test_instance(3)).unwrap();
        let second = AbortChannel::bind_in(&dir, test_instance(4)).unwrap();

        assert_ne!(first.path(), second.path());

        // a connection to one is not visible on the other
        let _client = UnixStream::connect(first.path()).unwrap();
        assert!(second.try_accept().unwrap().is_none());
        assert!(first.try_accept().unwrap().is_some());
    }

    #[test]
    fn stale_socket_entry_is_replaced() {
        let dir = std::env::temp_dir();
        let instance = test_instance(5);

        let first = AbortChannel::bind_in(&dir, instance).unwrap();
        std::mem::forget(first); // simulate a crash: file left behind

        let second = AbortChannel::bind_in(&dir, instance).unwrap();
        let _client = UnixStream::connect(second.path()).unwrap();
        assert!(second.try_accept().unwrap().is_some());
    }
}
