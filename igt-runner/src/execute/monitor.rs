// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Watching a single test process until it goes away.

use super::{
    process::{KillSignal, TestProcess, journal_exit_code, signal_test},
    result_dir::JobOutputs,
};
use crate::{
    errors::ExecuteError,
    helpers::format_secs,
    journal::JournalLine,
    reporter::ExecuteReporter,
    results::{ResultTracker, TestResult},
    signal::{ShutdownEvent, SignalHandler},
    time::stopwatch,
    watchdog::{TimeoutPlan, WATCHDOG_KILL_TIMEOUT_SECS, Watchdogs},
};
use igt_runnercomms::{PacketFramer, PacketView, RunnerPacket};
use std::{pin::Pin, time::Duration};
use tokio::{
    io::AsyncReadExt,
    time::{Instant, Sleep},
};
use tracing::{debug, warn};

const READ_BUF_SIZE: usize = 4096;

/// How long to wait after each kill signal before escalating.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// How long to keep reading the comms socket after the child's output streams have closed.
const COMMS_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Stdout lines longer than this are not scanned for subtest markers.
const MAX_SCANNED_LINE: usize = 64 * 1024;

/// How a monitored job ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum JobEnd {
    /// The child exited on its own with this journal exit code.
    Exited { code: i32 },
    /// The runner killed the child after the inactivity timeout.
    TimedOut { code: i32 },
    /// The runner received a signal and terminated the child.
    Interrupted { event: ShutdownEvent },
}

#[derive(Debug)]
pub(crate) struct JobOutcome {
    pub(crate) end: JobEnd,
    pub(crate) tracker: ResultTracker,
}

/// Per-job arguments to [`monitor_job`].
pub(crate) struct MonitorContext<'a, 'r> {
    pub(crate) binary: &'a str,
    /// `None` if inactivity timeouts are disabled.
    pub(crate) timeout_plan: Option<TimeoutPlan>,
    pub(crate) watchdogs: &'a mut Watchdogs,
    pub(crate) signal_handler: &'a mut SignalHandler,
    pub(crate) reporter: &'a mut ExecuteReporter<'r>,
}

/// Routes the child's output into the job's files and the result tracker.
struct OutputSink<'a, 'r> {
    outputs: &'a mut JobOutputs,
    reporter: &'a mut ExecuteReporter<'r>,
    tracker: ResultTracker,
    reported: usize,
    line_buf: Vec<u8>,
    framer: PacketFramer,
}

impl OutputSink<'_, '_> {
    fn stdout(&mut self, bytes: &[u8]) -> Result<(), ExecuteError> {
        self.outputs.stdout(bytes)?;
        if self.tracker.uses_comms() {
            self.line_buf.clear();
            return Ok(());
        }

        self.line_buf.extend_from_slice(bytes);
        while let Some(pos) = self.line_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.line_buf.drain(..=pos).collect();
            self.scan_line(&line[..pos])?;
        }
        if self.line_buf.len() > MAX_SCANNED_LINE {
            debug!("discarding {} bytes of an overlong stdout line", self.line_buf.len());
            self.line_buf.clear();
        }
        Ok(())
    }

    fn finish_stdout(&mut self) -> Result<(), ExecuteError> {
        if self.line_buf.is_empty() || self.tracker.uses_comms() {
            return Ok(());
        }
        let line = std::mem::take(&mut self.line_buf);
        self.scan_line(&line)
    }

    fn scan_line(&mut self, line: &[u8]) -> Result<(), ExecuteError> {
        let line = String::from_utf8_lossy(line);
        let name = self.tracker.observe_stdout_line(&line);
        self.record(name)
    }

    fn comms(&mut self, bytes: &[u8]) -> Result<(), ExecuteError> {
        self.framer.push(bytes);
        loop {
            match self.framer.next_packet() {
                Ok(Some(packet)) => self.packet(&packet)?,
                Ok(None) => return Ok(()),
                Err(error) => {
                    warn!("comms stream is corrupt, ignoring further packets: {error}");
                    return Ok(());
                }
            }
        }
    }

    fn packet(&mut self, packet: &[u8]) -> Result<(), ExecuteError> {
        self.outputs.comms_packet(packet)?;

        let view = PacketView::decode(packet);
        match view {
            PacketView::Invalid => {
                warn!("received an invalid packet ({} bytes)", packet.len());
                return Ok(());
            }
            PacketView::Log { stream: 2, text } => self.outputs.stderr(text.as_bytes())?,
            PacketView::Log { text, .. } => self.outputs.stdout(text.as_bytes())?,
            _ => {}
        }

        let name = self.tracker.observe_packet(&view);
        self.record(name)
    }

    /// Journals a newly started subtest and reports any newly finished ones.
    fn record(&mut self, started: Option<String>) -> Result<(), ExecuteError> {
        if let Some(name) = started {
            self.outputs.journal_line(JournalLine::Subtest(&name))?;
            self.reporter
                .subtest_started(&name)
                .map_err(ExecuteError::Reporter)?;
        }
        self.report_results()
    }

    fn report_results(&mut self) -> Result<(), ExecuteError> {
        let results = self.tracker.results();
        for result in &results[self.reported..] {
            self.reporter
                .subtest_finished(result)
                .map_err(ExecuteError::Reporter)?;
        }
        self.reported = results.len();
        Ok(())
    }
}

/// Tracks the inactivity deadline and the kill escalation.
struct KillTimer {
    plan: Option<TimeoutPlan>,
    intervals_left: u64,
    sent: Option<KillSignal>,
}

impl KillTimer {
    fn new(plan: Option<TimeoutPlan>) -> Self {
        Self {
            intervals_left: plan.map_or(0, |plan| plan.intervals),
            plan,
            sent: None,
        }
    }

    fn is_armed(&self) -> bool {
        self.plan.is_some() || self.sent.is_some()
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.plan.map_or(0, |plan| plan.interval_secs))
    }

    /// Restarts the inactivity countdown, unless the child is already being killed.
    fn activity(&mut self, sleep: Pin<&mut Sleep>, watchdogs: &Watchdogs) {
        if self.sent.is_some() {
            return;
        }
        watchdogs.ping();
        if let Some(plan) = self.plan {
            self.intervals_left = plan.intervals;
            sleep.reset(Instant::now() + self.interval());
        }
    }

    /// Called when an interval passes in silence. Returns true once the whole timeout has.
    fn interval_elapsed(&mut self, sleep: Pin<&mut Sleep>, watchdogs: &Watchdogs) -> bool {
        self.intervals_left = self.intervals_left.saturating_sub(1);
        if self.intervals_left == 0 {
            return true;
        }
        watchdogs.ping();
        sleep.reset(Instant::now() + self.interval());
        false
    }

    fn send(&mut self, pid: Option<nix::unistd::Pid>, signal: KillSignal, sleep: Pin<&mut Sleep>) {
        if let Some(pid) = pid
            && !signal_test(pid, signal)
        {
            debug!("process {pid} already exited before {signal}");
        }
        self.sent = Some(signal);
        sleep.reset(Instant::now() + KILL_GRACE_PERIOD);
    }
}

/// Monitors `process` until it has exited and its output streams have closed.
///
/// Writes the journal's exit line unless the run was interrupted.
pub(crate) async fn monitor_job(
    process: TestProcess,
    outputs: &mut JobOutputs,
    cx: MonitorContext<'_, '_>,
) -> Result<JobOutcome, ExecuteError> {
    let MonitorContext {
        binary,
        timeout_plan,
        watchdogs,
        signal_handler,
        reporter,
    } = cx;
    let TestProcess {
        mut child,
        pid,
        mut stdout,
        mut stderr,
        mut comms,
    } = process;
    let stopwatch = stopwatch();

    let mut sink = OutputSink {
        outputs,
        reporter,
        tracker: ResultTracker::new(),
        reported: 0,
        line_buf: Vec::new(),
        framer: PacketFramer::new(),
    };
    let mut timer = KillTimer::new(timeout_plan);
    let sleep = tokio::time::sleep(timer.interval());
    let mut sleep = std::pin::pin!(sleep);

    let mut stdout_buf = vec![0; READ_BUF_SIZE];
    let mut stderr_buf = vec![0; READ_BUF_SIZE];
    let mut comms_buf = vec![0; READ_BUF_SIZE];
    let mut stdout_open = true;
    let mut stderr_open = true;
    let mut comms_open = true;
    let mut exit_code: Option<i32> = None;
    let mut timed_out = false;
    let mut interrupted: Option<ShutdownEvent> = None;

    while stdout_open || stderr_open || exit_code.is_none() {
        let timer_armed = timer.is_armed();
        tokio::select! {
            res = stdout.read(&mut stdout_buf), if stdout_open => {
                match res {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        sink.stdout(&stdout_buf[..n])?;
                        timer.activity(sleep.as_mut(), watchdogs);
                    }
                    Err(error) => {
                        warn!("error reading stdout of {binary}: {error}");
                        stdout_open = false;
                    }
                }
            }
            res = stderr.read(&mut stderr_buf), if stderr_open => {
                match res {
                    Ok(0) => stderr_open = false,
                    Ok(n) => {
                        sink.outputs.stderr(&stderr_buf[..n])?;
                        timer.activity(sleep.as_mut(), watchdogs);
                    }
                    Err(error) => {
                        warn!("error reading stderr of {binary}: {error}");
                        stderr_open = false;
                    }
                }
            }
            res = comms.read(&mut comms_buf), if comms_open => {
                match res {
                    Ok(0) => comms_open = false,
                    Ok(n) => {
                        sink.comms(&comms_buf[..n])?;
                        timer.activity(sleep.as_mut(), watchdogs);
                    }
                    Err(error) => {
                        warn!("error reading comms socket of {binary}: {error}");
                        comms_open = false;
                    }
                }
            }
            res = child.wait(), if exit_code.is_none() => {
                exit_code = Some(match res {
                    Ok(status) => journal_exit_code(status),
                    Err(error) => {
                        warn!("failed to reap {binary}: {error}");
                        9999
                    }
                });
            }
            () = &mut sleep, if timer_armed => {
                match timer.sent {
                    None => {
                        if timer.interval_elapsed(sleep.as_mut(), watchdogs) {
                            sink.reporter
                                .timeout_kill(KillSignal::Term)
                                .map_err(ExecuteError::Reporter)?;
                            timed_out = true;
                            watchdogs.set_timeout(WATCHDOG_KILL_TIMEOUT_SECS);
                            timer.send(pid, KillSignal::Term, sleep.as_mut());
                        }
                    }
                    Some(KillSignal::Term) => {
                        sink.reporter
                            .timeout_kill(KillSignal::Kill)
                            .map_err(ExecuteError::Reporter)?;
                        timer.send(pid, KillSignal::Kill, sleep.as_mut());
                    }
                    Some(KillSignal::Kill) => {
                        sink.reporter
                            .child_refuses_to_die()
                            .map_err(ExecuteError::Reporter)?;
                        return Err(ExecuteError::ChildRefusesToDie {
                            binary: binary.to_owned(),
                        });
                    }
                }
            }
            event = signal_handler.recv(), if interrupted.is_none() => {
                sink.reporter
                    .abort_requested(event)
                    .map_err(ExecuteError::Reporter)?;
                interrupted = Some(event);
                if timer.sent.is_none() {
                    timer.send(pid, KillSignal::Term, sleep.as_mut());
                }
            }
        }
    }

    if comms_open {
        let drain = async {
            loop {
                match comms.read(&mut comms_buf).await {
                    Ok(0) => break,
                    Ok(n) => sink.comms(&comms_buf[..n])?,
                    Err(error) => {
                        warn!("error reading comms socket of {binary}: {error}");
                        break;
                    }
                }
            }
            Ok::<_, ExecuteError>(())
        };
        match tokio::time::timeout(COMMS_DRAIN_TIMEOUT, drain).await {
            Ok(res) => res?,
            Err(_) => warn!("comms socket of {binary} still open after the process exited"),
        }
    }
    sink.finish_stdout()?;

    let close_result = if timed_out {
        TestResult::Timeout
    } else {
        TestResult::Incomplete
    };
    sink.tracker.close_open(close_result);
    sink.report_results()?;

    let time = stopwatch.elapsed();
    // The loop above only ends once the child has been reaped.
    let code = exit_code.unwrap_or(9999);
    let end = match (interrupted, timed_out) {
        (Some(event), _) => JobEnd::Interrupted { event },
        (None, true) => JobEnd::TimedOut { code },
        (None, false) => JobEnd::Exited { code },
    };

    let journal_line = match end {
        JobEnd::Interrupted { .. } => None,
        JobEnd::TimedOut { code } => Some(JournalLine::Timeout {
            code,
            time: Some(time),
        }),
        JobEnd::Exited { code } => Some(JournalLine::Exit {
            code,
            time: Some(time),
        }),
    };
    if let Some(line) = journal_line {
        sink.outputs.journal_line(line)?;
        let packet = RunnerPacket::exit(code, &format_secs(time));
        sink.outputs.comms_packet(packet.as_bytes())?;
    }

    Ok(JobOutcome {
        end,
        tracker: sink.tracker,
    })
}
