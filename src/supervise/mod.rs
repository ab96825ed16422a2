#![deny(unsafe_code)]

//! The supervisor: one command, one process group, one shot.
//!
//! The command is launched through a fork/gate/exec handshake so that it is
//! placed in its own process group before any instruction of it runs, then
//! the supervisor parks in a poll loop racing an abort connection against
//! the command's own exit. Whichever way the race resolves, the whole group
//! is killed before the outcome is reported.

mod channel;
mod event;

use std::{
    borrow::Cow,
    ffi::c_int,
    io,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Command, Stdio},
};

use signal_hook::consts::*;

use crate::{
    common::{pipe::BinPipe, resolve::resolve_command, Error},
    log::{dev_error, dev_info, dev_warn, user_error},
    system::{
        fork, kill, killpg, setpgid,
        interface::ProcessId,
        signal::{SignalHandler, SignalNumber, SignalSet, SignalStream},
        wait::{waitpid, WaitError, WaitOptions},
        ForkResult,
    },
};

pub(crate) use channel::AbortChannel;

use self::event::{EventRegistry, Process, StopReason};

/// How the supervised command came to an end.
#[derive(Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The command exited on its own; the code is relayed verbatim.
    Code(c_int),
    /// The command was terminated by a signal.
    Signal(SignalNumber),
    /// A peer connected to the abort channel before the command finished.
    Aborted,
}

/// One supervision run.
pub struct RunOptions {
    pub command: PathBuf,
    pub arguments: Vec<String>,
    /// Inherit our stdio when `true`; attach `/dev/null` otherwise.
    pub visible: bool,
    /// Unique id embedded in the abort channel name. Normally our own pid,
    /// but injected explicitly so tests can pick deterministic names.
    pub instance: u32,
}

/// Launch the command and supervise it until it exits or a peer connects to
/// the abort channel.
///
/// The command and everything it spawned is gone by the time this returns.
pub fn run(options: RunOptions) -> Result<ExitReason, Error> {
    let qualified_path = resolve_command(&options.command)?;

    let channel = AbortChannel::bind(options.instance).map_err(Error::ChannelSetup)?;
    dev_info!("abort channel listening on {}", channel.path().display());

    let mut command = Command::new(&qualified_path);
    command.args(&options.arguments);
    if !options.visible {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
    }

    // Block all the signals until we are done setting up the signal handlers so we don't miss
    // SIGCHLD.
    let original_set = match SignalSet::full().and_then(|set| set.block()) {
        Ok(original_set) => Some(original_set),
        Err(err) => {
            dev_warn!("cannot block signals: {err}");
            None
        }
    };

    // The gate keeps the forked child parked before exec; the error pipe
    // carries the errno if exec itself fails. Our copy of `errpipe_tx` stays
    // open for the whole run on purpose: with a live writer left, the read
    // end only polls ready when the child actually reports something.
    let (mut gate_tx, gate_rx) = BinPipe::<u8>::pair()?;
    let (errpipe_tx, errpipe_rx) = BinPipe::<i32>::pair()?;

    let ForkResult::Parent(command_pid) = fork().map_err(|err| {
        dev_warn!("unable to fork command process: {err}");
        err
    })?
    else {
        // shed the parent-side pipe ends; holding the gate's write end here
        // would stop the gate from reporting a vanished parent
        drop(gate_tx);
        drop(errpipe_rx);
        run_child(command, gate_rx, errpipe_tx, channel, original_set);
    };

    dev_info!("forked command process with pid {command_pid}");

    // The child is parked on the gate, so nothing of the command has run
    // yet: this is the only window where the group can be set up race-free.
    if let Err(err) = setpgid(command_pid, command_pid) {
        user_error!("cannot place command in its own process group: {err}");
        kill(command_pid, SIGKILL).ok();
        reap(command_pid);
        return Err(err.into());
    }

    // group assignment done; release the child towards exec
    if let Err(err) = gate_tx.write(1) {
        dev_warn!("command process died before it could be released: {err}");
    }

    let mut registry = EventRegistry::new();
    let mut closure = SuperviseClosure::new(command_pid, channel, errpipe_rx, &mut registry)?;

    // Restore the signal mask now that the handlers have been setup.
    if let Some(set) = original_set {
        if let Err(err) = set.set_mask() {
            dev_warn!("cannot restore signal mask: {err}");
        }
    }

    let reason = registry.event_loop(&mut closure);

    // Terminate whatever is left in the group, no matter which branch won
    // the race. Against an already-exited group this is a no-op.
    killpg(command_pid, SIGKILL).ok();

    match reason {
        StopReason::Break(err) => {
            reap(command_pid);
            Err(Error::Io(Some(qualified_path), err))
        }
        StopReason::Exit(reason) => {
            if reason == ExitReason::Aborted {
                // on this path nobody has waited on the command yet
                reap(command_pid);
            }
            Ok(reason)
        }
    }
}

/// The forked child: park on the gate until the parent has finished the
/// group assignment, then exec the command.
fn run_child(
    mut command: Command,
    mut gate_rx: BinPipe<u8>,
    mut errpipe_tx: BinPipe<i32>,
    channel: AbortChannel,
    original_set: Option<SignalSet>,
) -> ! {
    // This copy of the channel must not unlink the socket file; the
    // parent's copy owns it. The descriptor itself is close-on-exec.
    std::mem::forget(channel);

    if let Err(err) = gate_rx.read() {
        // the parent is gone; there is nothing left to supervise us
        dev_warn!("supervisor vanished before the command was released: {err}");
        crate::system::_exit(1);
    }

    // Restore the signal mask before handing control to the command.
    if let Some(set) = original_set {
        if let Err(err) = set.set_mask() {
            dev_warn!("cannot restore signal mask: {err}");
        }
    }

    let err = command.exec();

    dev_warn!("failed to execute command: {err}");
    // If `exec` returns, it means that executing the command failed. Send
    // the error to the supervisor using the pipe.
    if let Some(error_code) = err.raw_os_error() {
        errpipe_tx.write(error_code).ok();
    }
    crate::system::_exit(127);
}

/// Reap the command, retrying on interruption.
fn reap(command_pid: ProcessId) {
    loop {
        match waitpid(command_pid, WaitOptions::new()) {
            Err(WaitError::Io(err)) if was_interrupted(&err) => {}
            _ => return,
        }
    }
}

fn was_interrupted(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::Interrupted
}

fn signal_fmt(signal: SignalNumber) -> Cow<'static, str> {
    signal_hook::low_level::signal_name(signal)
        .map(|name| name.into())
        .unwrap_or_else(|| format!("unknown signal #{}", signal).into())
}

struct SuperviseClosure {
    command_pid: Option<ProcessId>,
    channel: AbortChannel,
    errpipe_rx: BinPipe<i32>,
    signal_stream: &'static SignalStream,
    _sigchld_handler: SignalHandler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SuperviseEvent {
    ErrPipe,
    AbortConnection,
    Signal,
}

impl SuperviseClosure {
    fn new(
        command_pid: ProcessId,
        channel: AbortChannel,
        errpipe_rx: BinPipe<i32>,
        registry: &mut EventRegistry<Self>,
    ) -> io::Result<Self> {
        // the error pipe goes first: if exec failed, its report must win
        // over the SIGCHLD of the failed command within the same poll round
        registry.register_read_event(&errpipe_rx, SuperviseEvent::ErrPipe);
        registry.register_read_event(&channel, SuperviseEvent::AbortConnection);

        let signal_stream = SignalStream::get_or_init()?;
        registry.register_read_event(signal_stream, SuperviseEvent::Signal);

        let sigchld_handler = SignalHandler::register(SIGCHLD)?;

        Ok(Self {
            command_pid: Some(command_pid),
            channel,
            errpipe_rx,
            signal_stream,
            _sigchld_handler: sigchld_handler,
        })
    }

    fn on_abort_connection(&mut self, registry: &mut EventRegistry<Self>) {
        match self.channel.try_accept() {
            Ok(Some(_peer)) => {
                dev_info!("abort requested via {}", self.channel.path().display());
                registry.set_exit(ExitReason::Aborted);
            }
            Ok(None) => { /* spurious wakeup */ }
            Err(err) => {
                dev_error!("cannot accept abort connection: {err}");
                registry.set_break(err);
            }
        }
    }

    fn on_signal(&mut self, registry: &mut EventRegistry<Self>) {
        let info = match self.signal_stream.recv() {
            Ok(info) => info,
            Err(err) => {
                dev_error!("could not receive signal: {err}");
                return;
            }
        };

        dev_info!("received {} from {}", signal_fmt(info.signal()), info.pid());

        let Some(command_pid) = self.command_pid else {
            dev_info!("command was terminated, ignoring signal");
            return;
        };

        if info.signal() == SIGCHLD {
            self.handle_sigchld(command_pid, registry)
        }
    }

    fn handle_sigchld(&mut self, command_pid: ProcessId, registry: &mut EventRegistry<Self>) {
        let status = loop {
            match waitpid(command_pid, WaitOptions::new().no_hang()) {
                Err(WaitError::Io(err)) if was_interrupted(&err) => {}
                Err(WaitError::Io(err)) => {
                    dev_info!("cannot wait for {command_pid} (command): {err}");
                    return;
                }
                // the state change belonged to some other child of ours, or
                // was not a termination
                Err(WaitError::NotReady) => return,
                Ok((_pid, status)) => break status,
            }
        };

        if let Some(exit_code) = status.exit_status() {
            dev_info!("{command_pid} (command) exited with status code {exit_code}");
            registry.set_exit(ExitReason::Code(exit_code));
            self.command_pid = None;
        } else if let Some(signal) = status.term_signal() {
            dev_info!(
                "{command_pid} (command) was terminated by {}",
                signal_fmt(signal),
            );
            registry.set_exit(ExitReason::Signal(signal));
            self.command_pid = None;
        } else {
            dev_warn!("unexpected wait status for {command_pid} (command)")
        }
    }
}

impl Process for SuperviseClosure {
    type Event = SuperviseEvent;
    type Break = io::Error;
    type Exit = ExitReason;

    fn on_event(&mut self, event: Self::Event, registry: &mut EventRegistry<Self>) {
        match event {
            SuperviseEvent::Signal => self.on_signal(registry),
            SuperviseEvent::AbortConnection => self.on_abort_connection(registry),
            SuperviseEvent::ErrPipe => {
                match self.errpipe_rx.read() {
                    Err(err) if was_interrupted(&err) => { /* Retry later */ }
                    Err(err) => registry.set_break(err),
                    Ok(error_code) => {
                        // Received error code from the command, forward it to the caller.
                        registry.set_break(io::Error::from_raw_os_error(error_code));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::path::PathBuf;
    use std::sync::{Mutex, PoisonError};

    use super::{run, AbortChannel, ExitReason, RunOptions};
    use crate::common::Error;

    // Signal dispositions are process-global, so only one supervisor may
    // run at a time within this test binary.
    static SUPERVISOR: Mutex<()> = Mutex::new(());

    fn test_instance(offset: u32) -> u32 {
        std::process::id().wrapping_mul(100).wrapping_add(offset)
    }

    fn options(argv: &[&str], instance: u32) -> RunOptions {
        RunOptions {
            command: PathBuf::from(argv[0]),
            arguments: argv[1..].iter().map(|s| s.to_string()).collect(),
            visible: false,
            instance,
        }
    }

    #[test]
    fn relays_the_natural_exit_code() {
        let _guard = SUPERVISOR.lock().unwrap_or_else(PoisonError::into_inner);
        let instance = test_instance(11);

        let reason = run(options(&["sh", "-c", "exit 42"], instance)).unwrap();
        assert_eq!(reason, ExitReason::Code(42));

        let reason = run(options(&["true"], instance)).unwrap();
        assert_eq!(reason, ExitReason::Code(0));

        // the endpoint does not outlive the run
        let path = AbortChannel::socket_path(&std::env::temp_dir(), instance);
        assert!(!path.exists());
        assert!(UnixStream::connect(&path).is_err());
    }

    #[test]
    fn reports_the_termination_signal() {
        let _guard = SUPERVISOR.lock().unwrap_or_else(PoisonError::into_inner);

        let reason = run(options(&["sh", "-c", "kill -9 $$"], test_instance(12))).unwrap();
        assert_eq!(reason, ExitReason::Signal(libc::SIGKILL));
    }

    #[test]
    fn connecting_to_the_channel_aborts_the_command() {
        let _guard = SUPERVISOR.lock().unwrap_or_else(PoisonError::into_inner);
        let instance = test_instance(13);
        let path = AbortChannel::socket_path(&std::env::temp_dir(), instance);

        let connector = std::thread::spawn(move || {
            // retry until the endpoint is up and accepts the connection;
            // connecting is the entire abort protocol
            for _ in 0..500 {
                if UnixStream::connect(&path).is_ok() {
                    return;
                }
                std::thread::sleep(std::time::Duration::from_millis(10));
            }
            panic!("abort endpoint never came up at {}", path.display());
        });

        // without the abort this would take 30 seconds and relay code 0
        let reason = run(options(&["sh", "-c", "sleep 30"], instance)).unwrap();
        assert_eq!(reason, ExitReason::Aborted);

        connector.join().unwrap();
    }

    #[test]
    fn missing_command_fails_before_any_resource_exists() {
        let _guard = SUPERVISOR.lock().unwrap_or_else(PoisonError::into_inner);
        let instance = test_instance(14);

        let result = run(options(&["/does/not/exist"], instance));
        assert!(matches!(result, Err(Error::CommandNotFound(_))));

        // resolution failed first: the channel was never bound
        let path = AbortChannel::socket_path(&std::env::temp_dir(), instance);
        assert!(!path.exists());
    }

    #[test]
    fn non_executable_command_is_rejected() {
        let _guard = SUPERVISOR.lock().unwrap_or_else(PoisonError::into_inner);
        let instance = test_instance(15);

        let file = std::env::temp_dir().join(format!("jobpen-plain-{}", std::process::id()));
        std::fs::write(&file, "not a program").unwrap();

        let result = run(options(&[file.to_str().unwrap()], instance));
        assert!(matches!(result, Err(Error::InvalidCommand(_))));

        std::fs::remove_file(&file).unwrap();
    }
}
