use std::{ffi::CString, io, os::unix::prelude::OsStrExt, path::Path};

use crate::cutils::cerr;

use self::interface::ProcessId;
use self::signal::SignalNumber;

pub mod interface;

pub mod poll;

pub mod signal;

pub mod wait;

pub(crate) fn can_execute<P: AsRef<Path>>(path: P) -> bool {
    let Ok(path) = CString::new(path.as_ref().as_os_str().as_bytes()) else {
        return false;
    };

    // SAFETY: `path` is a valid NUL-terminated string by construction.
    unsafe { libc::access(path.as_ptr(), libc::X_OK) == 0 }
}

/// Exit the process immediately, skipping all cleanup.
///
/// The only exit suitable for a forked child that failed to exec: running
/// destructors or exit handlers there would run them on the parent's state.
pub(crate) fn _exit(status: libc::c_int) -> ! {
    // SAFETY: `_exit` does not return, which is reflected in our signature.
    unsafe { libc::_exit(status) }
}

pub(crate) enum ForkResult {
    // Parent process branch with the child process' PID.
    Parent(ProcessId),
    // Child process branch.
    Child,
}

/// Create a new process.
pub(crate) fn fork() -> io::Result<ForkResult> {
    // SAFETY: `fork` cannot cause memory unsafety by itself; the child must
    // restrict itself to async-signal-safe operations until it execs, which
    // our single child branch does.
    let pid = cerr(unsafe { libc::fork() })?;
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(ProcessId::new(pid)))
    }
}

/// Send a signal to a process with the specified ID.
pub(crate) fn kill(pid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::kill(pid.get(), signal) }).map(|_| ())
}

/// Send a signal to a process group with the specified ID.
pub(crate) fn killpg(pgid: ProcessId, signal: SignalNumber) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even if `pgid` is not a valid process ID or if
    // `signal` is not a valid signal code.
    cerr(unsafe { libc::killpg(pgid.get(), signal) }).map(|_| ())
}

/// Set a process group ID.
pub(crate) fn setpgid(pid: ProcessId, pgid: ProcessId) -> io::Result<()> {
    // SAFETY: This function cannot cause UB even for invalid process IDs.
    cerr(unsafe { libc::setpgid(pid.get(), pgid.get()) }).map(|_| ())
}
