// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spawning and signalling test processes.

use camino::Utf8Path;
use igt_runnercomms::RUNNER_SOCKET_ENV;
use nix::{
    sys::signal::{Signal, kill, killpg},
    unistd::Pid,
};
use std::{
    fmt, io,
    os::{
        fd::{AsRawFd, RawFd},
        unix::{
            net::UnixStream as StdUnixStream,
            process::{CommandExt, ExitStatusExt},
        },
    },
    process::{ExitStatus, Stdio},
};
use tokio::{
    net::UnixStream,
    process::{Child, ChildStderr, ChildStdout},
};
use tracing::debug;

/// A signal sent to a test process group.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KillSignal {
    /// SIGTERM, sent first.
    Term,
    /// SIGKILL, sent if the child survives SIGTERM.
    Kill,
}

impl KillSignal {
    fn signal(self) -> Signal {
        match self {
            Self::Term => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for KillSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signal().as_str())
    }
}

/// A running test process with its output streams and the runner end of its comms socket.
pub(crate) struct TestProcess {
    pub(crate) child: Child,
    pub(crate) pid: Option<Pid>,
    pub(crate) stdout: ChildStdout,
    pub(crate) stderr: ChildStderr,
    pub(crate) comms: UnixStream,
}

/// Spawns `program` with `args` in a new process group.
///
/// The child inherits one end of a socketpair and finds its descriptor number in
/// [`RUNNER_SOCKET_ENV`]. Must be called from within a tokio runtime.
pub(crate) fn spawn_test(program: &Utf8Path, args: &[String]) -> io::Result<TestProcess> {
    let (ours, theirs) = StdUnixStream::pair()?;
    let child_fd = theirs.as_raw_fd();

    let mut cmd = std::process::Command::new(program);
    cmd.args(args)
        .env(RUNNER_SOCKET_ENV, child_fd.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);
    // SAFETY: the closure only calls fcntl, which is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || clear_cloexec(child_fd));
    }

    let mut cmd: tokio::process::Command = cmd.into();
    cmd.kill_on_drop(true);
    let mut child = cmd.spawn()?;
    // Only the child holds the other end from now on, so EOF means the child is gone.
    drop(theirs);

    let pid = child
        .id()
        .and_then(|id| i32::try_from(id).ok())
        .map(Pid::from_raw);
    debug!("spawned {program} as {pid:?}");

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(io::Error::other("child stdout and stderr were not piped"));
    };

    ours.set_nonblocking(true)?;
    let comms = UnixStream::from_std(ours)?;

    Ok(TestProcess {
        child,
        pid,
        stdout,
        stderr,
        comms,
    })
}

fn clear_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl with F_SETFD has no memory-safety preconditions.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, 0) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Sends `signal` to the process group led by `pid` and to the process itself.
///
/// Returns false if the process no longer exists.
pub(crate) fn signal_test(pid: Pid, signal: KillSignal) -> bool {
    // The group may already be gone while the leader is a zombie.
    let _ = killpg(pid, signal.signal());
    match kill(pid, signal.signal()) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(error) => {
            debug!("failed to send {signal} to {pid}: {error}");
            true
        }
    }
}

/// Maps an exit status to the code recorded in the journal.
///
/// Codes of 128 and above become `128 - code`, and death by signal `s` becomes `-s`, so that
/// neither can be confused with a test's own exit code.
pub(crate) fn journal_exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) if code >= 128 => 128 - code,
        (Some(code), _) => code,
        (None, Some(signal)) => -signal,
        // Stopped or continued statuses are never reported by wait().
        (None, None) => 9999,
    }
}
