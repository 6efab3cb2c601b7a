// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hardware watchdogs armed while tests run.
//!
//! If the machine hangs hard enough that the runner itself stops making progress, the watchdogs
//! reboot it. Their timeout is the inactivity timeout plus some leeway so that a merely hung test
//! is killed by the runner first.

use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::{File, OpenOptions},
    io::Write,
    os::fd::AsRawFd,
};
use tracing::{debug, warn};

/// Extra seconds given to the watchdogs on top of the inactivity timeout.
pub(crate) const WATCHDOG_LEEWAY_SECS: i32 = 10;

/// The timeout set while a timed-out child is being killed.
pub(crate) const WATCHDOG_KILL_TIMEOUT_SECS: i32 = 20;

mod ioctls {
    // From linux/watchdog.h.
    nix::ioctl_read!(wdioc_keepalive, b'W', 5, libc::c_int);
    nix::ioctl_readwrite!(wdioc_settimeout, b'W', 6, libc::c_int);
}

#[derive(Debug)]
struct Watchdog {
    path: Utf8PathBuf,
    file: File,
}

impl Watchdog {
    fn open(path: Utf8PathBuf) -> Option<Self> {
        let file = OpenOptions::new().read(true).write(true).open(&path).ok()?;
        Some(Self { path, file })
    }

    /// Disarms and closes the device.
    fn magic_close(mut self) {
        if let Err(error) = self.file.write_all(b"V") {
            warn!("failed to disarm watchdog {}: {error}", self.path);
        }
    }
}

/// The set of open watchdog devices.
#[derive(Debug, Default)]
pub(crate) struct Watchdogs {
    devices: Vec<Watchdog>,
}

impl Watchdogs {
    /// Returns an empty set.
    pub(crate) fn none() -> Self {
        Self::default()
    }

    /// Opens `/dev/watchdog0`, `/dev/watchdog1`, ... until one fails to open. Falls back to
    /// `/dev/watchdog` if none of those exist.
    ///
    /// Opening a watchdog arms it.
    pub(crate) fn open() -> Self {
        let mut devices: Vec<_> = (0..)
            .map_while(|i| Watchdog::open(Utf8PathBuf::from(format!("/dev/watchdog{i}"))))
            .collect();
        if devices.is_empty() {
            devices.extend(Watchdog::open(Utf8PathBuf::from("/dev/watchdog")));
        }
        debug!("opened {} watchdogs", devices.len());
        Self { devices }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub(crate) fn paths(&self) -> Vec<&Utf8Path> {
        self.devices.iter().map(|dog| dog.path.as_path()).collect()
    }

    /// Sets the timeout on every device and returns the timeout they all accepted.
    ///
    /// A device may shorten the timeout. If so, every device is set again to the shorter value so
    /// that they agree. Devices that reject the request are closed.
    pub(crate) fn set_timeout(&mut self, secs: i32) -> i32 {
        let mut requested = secs;
        'retry: loop {
            let mut index = 0;
            while index < self.devices.len() {
                let mut timeout = requested;
                let fd = self.devices[index].file.as_raw_fd();
                // SAFETY: the fd is open for the lifetime of the device and the kernel writes a
                // single c_int back.
                match unsafe { ioctls::wdioc_settimeout(fd, &mut timeout) } {
                    Ok(_) => {
                        if timeout < requested {
                            requested = timeout;
                            continue 'retry;
                        }
                        index += 1;
                    }
                    Err(error) => {
                        let dog = self.devices.remove(index);
                        warn!("closing watchdog {}: cannot set timeout: {error}", dog.path);
                        dog.magic_close();
                    }
                }
            }
            break requested;
        }
    }

    /// Resets the countdown on every device.
    pub(crate) fn ping(&self) {
        for dog in &self.devices {
            let mut unused = 0;
            // SAFETY: as above.
            let res = unsafe { ioctls::wdioc_keepalive(dog.file.as_raw_fd(), &mut unused) };
            if let Err(error) = res {
                debug!("failed to ping watchdog {}: {error}", dog.path);
            }
        }
    }

    /// Disarms and closes every device.
    pub(crate) fn close(&mut self) {
        for dog in self.devices.drain(..) {
            dog.magic_close();
        }
    }
}

impl Drop for Watchdogs {
    fn drop(&mut self) {
        self.close();
    }
}

/// How the inactivity timeout is split when the watchdogs cannot hold it in one go.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct TimeoutPlan {
    /// The length of each wait.
    pub(crate) interval_secs: u64,
    /// How many consecutive silent waits make a timeout.
    pub(crate) intervals: u64,
}

impl TimeoutPlan {
    /// Plans the waits for `timeout_secs` given the timeout the watchdogs `accepted`.
    pub(crate) fn new(timeout_secs: u64, accepted: i32) -> Self {
        let requested =
            i64::try_from(timeout_secs).unwrap_or(i64::MAX / 2) + i64::from(WATCHDOG_LEEWAY_SECS);
        let accepted = i64::from(accepted);
        if accepted >= requested || accepted <= 0 {
            return Self {
                interval_secs: timeout_secs,
                intervals: 1,
            };
        }

        let mut leeway = i64::from(WATCHDOG_LEEWAY_SECS);
        if accepted - leeway <= 0 {
            leeway = accepted / 2;
        }
        let per_interval = u64::try_from(accepted - leeway).unwrap_or(1).max(1);
        let intervals = (timeout_secs / per_interval).max(1);
        Self {
            interval_secs: (timeout_secs / intervals).max(1),
            intervals,
        }
    }

    pub(crate) fn is_split(&self) -> bool {
        self.intervals > 1
    }
}
