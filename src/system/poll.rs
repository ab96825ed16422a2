use std::{
    collections::BTreeMap,
    io,
    os::fd::{AsRawFd, RawFd},
};

use libc::{pollfd, POLLIN};

use crate::cutils::cerr;

/// A set of indexed file descriptors polled for readability using the
/// [`poll`](https://manpage.me/?q=poll) system call.
pub(crate) struct PollSet<K> {
    fds: BTreeMap<K, RawFd>,
}

impl<K: Eq + PartialEq + Ord + PartialOrd + Clone> PollSet<K> {
    /// Create an empty set of file descriptors.
    pub(crate) const fn new() -> Self {
        Self {
            fds: BTreeMap::new(),
        }
    }

    /// Add a file descriptor under the provided key. The descriptor will be
    /// checked for read events.
    ///
    /// If the provided key is already in the set, calling this function will
    /// overwrite the file descriptor for that key.
    pub(crate) fn add_fd_read<F: AsRawFd>(&mut self, key: K, fd: &F) {
        self.fds.insert(key, fd.as_raw_fd());
    }

    /// Poll the set and return the keys of the descriptors that are ready to
    /// be read.
    ///
    /// Blocks until at least one descriptor in the set is ready.
    pub(crate) fn poll(&mut self) -> io::Result<Vec<K>> {
        let mut raw: Vec<pollfd> = self
            .fds
            .values()
            .map(|&fd| pollfd {
                fd,
                events: POLLIN,
                revents: 0,
            })
            .collect();

        let n = cerr(unsafe { libc::poll(raw.as_mut_ptr(), raw.len() as _, -1) })?;

        let mut ready = Vec::with_capacity(n as usize);

        for (key, fd) in self.fds.keys().zip(raw) {
            if fd.revents & POLLIN != 0 {
                ready.push(key.clone());
            }
        }

        Ok(ready)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    use super::PollSet;

    #[test]
    fn reports_only_readable_fds() {
        let (mut quiet_tx, quiet_rx) = UnixStream::pair().unwrap();
        let (mut loud_tx, loud_rx) = UnixStream::pair().unwrap();

        let mut poll_set = PollSet::new();
        poll_set.add_fd_read("quiet", &quiet_rx);
        poll_set.add_fd_read("loud", &loud_rx);

        loud_tx.write_all(b"x").unwrap();
        assert_eq!(poll_set.poll().unwrap(), vec!["loud"]);

        quiet_tx.write_all(b"y").unwrap();
        let ready = poll_set.poll().unwrap();
        assert_eq!(ready, vec!["loud", "quiet"]);
    }
}
