//! Utilities to turn signal arrival into something a poll loop can see.
use std::{
    io,
    mem::MaybeUninit,
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream,
    },
    sync::OnceLock,
};

use libc::{c_int, siginfo_t, MSG_DONTWAIT};

use crate::cutils::cerr;
use crate::system::interface::ProcessId;

pub(crate) type SignalNumber = c_int;

/// Information related to the arrival of a signal.
#[repr(transparent)]
pub(crate) struct SignalInfo {
    info: siginfo_t,
}

impl SignalInfo {
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Gets the PID that sent the signal.
    pub(crate) fn pid(&self) -> ProcessId {
        // SAFETY: si_pid is set for the signals we register handlers for.
        ProcessId::new(unsafe { self.info.si_pid() })
    }

    /// Gets the signal number.
    pub(crate) fn signal(&self) -> SignalNumber {
        self.info.si_signo
    }
}

static STREAM: OnceLock<SignalStream> = OnceLock::new();

unsafe extern "C" fn send_siginfo(_signal: c_int, info: *mut siginfo_t, _context: *mut libc::c_void) {
    if let Some(tx) = STREAM.get().map(|stream| stream.tx.as_raw_fd()) {
        // SAFETY: `send` is async-signal-safe; `info` points to a valid
        // `siginfo_t` provided by the kernel for the lifetime of the handler.
        unsafe { libc::send(tx, info.cast(), SignalInfo::SIZE, MSG_DONTWAIT) };
    }
}

/// A socketpair that receives the signal information streamed by every
/// registered [`SignalHandler`].
///
/// There is one stream per process; signal dispositions are process-global
/// state, so a second one could not be told apart from the first anyway.
pub(crate) struct SignalStream {
    rx: UnixStream,
    tx: UnixStream,
}

impl SignalStream {
    /// Return the process-wide stream, creating it on first use.
    pub(crate) fn get_or_init() -> io::Result<&'static Self> {
        if let Some(stream) = STREAM.get() {
            return Ok(stream);
        }

        let (rx, tx) = UnixStream::pair()?;
        // a racing initializer may have won; their pair serves just as well
        let _ = STREAM.set(Self { rx, tx });
        Ok(STREAM.get().expect("signal stream was just initialized"))
    }

    /// Receive the information related to the arrival of a single signal,
    /// blocking until one arrives.
    pub(crate) fn recv(&self) -> io::Result<SignalInfo> {
        let mut info = MaybeUninit::<SignalInfo>::uninit();
        let fd = self.rx.as_raw_fd();
        // SAFETY: `info` provides `SignalInfo::SIZE` writable bytes.
        let bytes = cerr(unsafe { libc::recv(fd, info.as_mut_ptr().cast(), SignalInfo::SIZE, 0) })?;

        if bytes as usize != SignalInfo::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Not enough bytes when receiving `siginfo_t`",
            ));
        }
        // SAFETY: `recv` wrote enough bytes to fill the value and `siginfo_t` is POD.
        Ok(unsafe { info.assume_init() })
    }
}

impl AsRawFd for SignalStream {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}

struct SignalAction {
    raw: libc::sigaction,
}

impl SignalAction {
    /// The action that streams signal information into the process-wide
    /// [`SignalStream`]. All other signals are delivered normally, blocked
    /// while the handler runs.
    fn stream() -> io::Result<Self> {
        // SAFETY: an all-zeroes `sigaction` is a valid value of the type on
        // every libc; the fields that matter are filled in right after.
        let mut raw: libc::sigaction = unsafe { std::mem::zeroed() };
        raw.sa_sigaction = send_siginfo as libc::sighandler_t;
        raw.sa_mask = SignalSet::full()?.raw;
        raw.sa_flags = libc::SA_RESTART | libc::SA_SIGINFO;

        Ok(Self { raw })
    }

    fn register(&self, signal: SignalNumber) -> io::Result<Self> {
        let mut original_action = MaybeUninit::<libc::sigaction>::zeroed();

        // SAFETY: `self.raw` is fully initialized and `original_action`
        // provides valid storage for the previous action.
        cerr(unsafe { libc::sigaction(signal, &self.raw, original_action.as_mut_ptr()) })?;

        Ok(Self {
            // SAFETY: `sigaction` filled `original_action` on success.
            raw: unsafe { original_action.assume_init() },
        })
    }
}

/// A handler for a signal.
///
/// When a value of this type is dropped, it restores the action that was
/// registered for the signal before [`SignalHandler::register`] was called.
pub(crate) struct SignalHandler {
    signal: SignalNumber,
    original_action: SignalAction,
}

impl SignalHandler {
    /// Register a streaming handler for the given signal.
    pub(crate) fn register(signal: SignalNumber) -> io::Result<Self> {
        let action = SignalAction::stream()?;
        let original_action = action.register(signal)?;

        Ok(Self {
            signal,
            original_action,
        })
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.original_action.register(self.signal).ok();
    }
}

pub(crate) struct SignalSet {
    raw: libc::sigset_t,
}

impl SignalSet {
    /// Create a set containing all the signals.
    pub(crate) fn full() -> io::Result<Self> {
        let mut raw = MaybeUninit::<libc::sigset_t>::uninit();

        // SAFETY: `sigfillset` initializes `raw` on success.
        cerr(unsafe { libc::sigfillset(raw.as_mut_ptr()) })?;

        Ok(Self {
            // SAFETY: see above.
            raw: unsafe { raw.assume_init() },
        })
    }

    fn sigprocmask(&self, how: c_int) -> io::Result<Self> {
        let mut original_set = MaybeUninit::<libc::sigset_t>::zeroed();

        // SAFETY: `self.raw` is a valid signal set and `original_set`
        // provides valid storage for the previous mask.
        cerr(unsafe { libc::sigprocmask(how, &self.raw, original_set.as_mut_ptr()) })?;

        Ok(Self {
            // SAFETY: `sigprocmask` filled `original_set` on success.
            raw: unsafe { original_set.assume_init() },
        })
    }

    /// Add the signals of this set to the current signal mask of the process,
    /// returning the previous mask.
    pub(crate) fn block(&self) -> io::Result<Self> {
        self.sigprocmask(libc::SIG_BLOCK)
    }

    /// Make this set the signal mask of the process, returning the previous
    /// mask.
    pub(crate) fn set_mask(&self) -> io::Result<Self> {
        self.sigprocmask(libc::SIG_SETMASK)
    }
}
