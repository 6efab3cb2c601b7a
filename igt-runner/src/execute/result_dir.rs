// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layout of the results directory.
//!
//! ```text
//! <results>/metadata.txt
//! <results>/joblist.txt
//! <results>/uname.txt
//! <results>/<index>/{journal.txt,out.txt,err.txt,dmesg.txt,comms}
//! ```

use crate::{dmesg::KmsgReader, errors::ExecuteError, journal::JOURNAL_FILE_NAME};
use camino::{Utf8Path, Utf8PathBuf};
use igt_runnercomms::write_dump_packet;
use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::FileExt,
};
use tracing::warn;

pub(crate) const OUT_FILE_NAME: &str = "out.txt";
pub(crate) const ERR_FILE_NAME: &str = "err.txt";
pub(crate) const DMESG_FILE_NAME: &str = "dmesg.txt";
pub(crate) const COMMS_FILE_NAME: &str = "comms";
pub(crate) const UNAME_FILE_NAME: &str = "uname.txt";

/// Every file a job writes into its directory.
pub(crate) const JOB_FILE_NAMES: [&str; 5] = [
    JOURNAL_FILE_NAME,
    OUT_FILE_NAME,
    ERR_FILE_NAME,
    DMESG_FILE_NAME,
    COMMS_FILE_NAME,
];

/// Returns the directory for job `index`.
pub(crate) fn job_dir(results_path: &Utf8Path, index: usize) -> Utf8PathBuf {
    results_path.join(index.to_string())
}

/// Returns the highest `i` in `0..=max` for which a job directory exists, searching downwards.
pub(crate) fn highest_job_dir(results_path: &Utf8Path, max: usize) -> Option<usize> {
    (0..=max)
        .rev()
        .find(|&index| job_dir(results_path, index).is_dir())
}

/// Removes `uname.txt` and every numbered job directory, in order, until one is missing.
pub(crate) fn clear_old_results(results_path: &Utf8Path) -> io::Result<()> {
    remove_if_exists(&results_path.join(UNAME_FILE_NAME))?;

    for index in 0.. {
        let dir = job_dir(results_path, index);
        if !dir.is_dir() {
            break;
        }
        for name in JOB_FILE_NAMES {
            remove_if_exists(&dir.join(name))?;
        }
        if let Err(error) = fs::remove_dir(&dir) {
            warn!("result directory {dir} contains extra files: {error}");
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

/// Writes `uname.txt` as `sysname nodename release version machine`.
pub(crate) fn write_uname(results_path: &Utf8Path) -> Result<(), ExecuteError> {
    let path = results_path.join(UNAME_FILE_NAME);
    let contents = match nix::sys::utsname::uname() {
        Ok(uts) => format!(
            "{} {} {} {} {}\n",
            uts.sysname().to_string_lossy(),
            uts.nodename().to_string_lossy(),
            uts.release().to_string_lossy(),
            uts.version().to_string_lossy(),
            uts.machine().to_string_lossy(),
        ),
        Err(error) => {
            warn!("uname() failed: {error}");
            "uname() failed\n".to_owned()
        }
    };
    fs::write(&path, contents).map_err(|error| ExecuteError::results_io(path, error))
}

/// Opens `path` for appending, first terminating an unterminated last line.
fn open_append(path: &Utf8Path) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .read(true)
        .append(true)
        .create(true)
        .open(path)?;
    let len = file.metadata()?.len();
    if len > 0 {
        let mut last = [0; 1];
        file.read_exact_at(&mut last, len - 1)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
    }
    Ok(file)
}

/// The open output files of one job.
#[derive(Debug)]
pub(crate) struct JobOutputs {
    dir: Utf8PathBuf,
    journal: File,
    out: File,
    err: File,
    dmesg: File,
    comms: File,
    sync: bool,
}

impl JobOutputs {
    /// Creates the directory for job `index` if needed and opens its files for appending.
    pub(crate) fn open(
        results_path: &Utf8Path,
        index: usize,
        sync: bool,
    ) -> Result<Self, ExecuteError> {
        let dir = job_dir(results_path, index);
        fs::create_dir_all(&dir).map_err(|error| ExecuteError::results_io(&dir, error))?;

        let open = |name: &str| {
            let path = dir.join(name);
            open_append(&path).map_err(|error| ExecuteError::results_io(path, error))
        };
        let outputs = Self {
            journal: open(JOURNAL_FILE_NAME)?,
            out: open(OUT_FILE_NAME)?,
            err: open(ERR_FILE_NAME)?,
            dmesg: open(DMESG_FILE_NAME)?,
            comms: open(COMMS_FILE_NAME)?,
            dir,
            sync,
        };

        if sync {
            File::open(&outputs.dir)
                .and_then(|dir| dir.sync_all())
                .and_then(|()| File::open(results_path)?.sync_all())
                .map_err(|error| ExecuteError::results_io(&outputs.dir, error))?;
        }
        Ok(outputs)
    }

    fn io_error(&self, name: &str, error: io::Error) -> ExecuteError {
        ExecuteError::results_io(self.dir.join(name), error)
    }

    /// Appends one line to the journal.
    pub(crate) fn journal_line(
        &mut self,
        line: impl std::fmt::Display,
    ) -> Result<(), ExecuteError> {
        let res = writeln!(self.journal, "{line}").and_then(|()| {
            if self.sync {
                self.journal.sync_data()
            } else {
                Ok(())
            }
        });
        res.map_err(|error| self.io_error(JOURNAL_FILE_NAME, error))
    }

    pub(crate) fn stdout(&mut self, bytes: &[u8]) -> Result<(), ExecuteError> {
        let res = write_synced(&mut self.out, bytes, self.sync);
        res.map_err(|error| self.io_error(OUT_FILE_NAME, error))
    }

    pub(crate) fn stderr(&mut self, bytes: &[u8]) -> Result<(), ExecuteError> {
        let res = write_synced(&mut self.err, bytes, self.sync);
        res.map_err(|error| self.io_error(ERR_FILE_NAME, error))
    }

    /// Appends a packet to the comms dump, prefixed with the canary.
    pub(crate) fn comms_packet(&mut self, packet: &[u8]) -> Result<(), ExecuteError> {
        let res = write_dump_packet(&mut self.comms, packet).and_then(|()| {
            if self.sync {
                self.comms.sync_data()
            } else {
                Ok(())
            }
        });
        res.map_err(|error| self.io_error(COMMS_FILE_NAME, error))
    }

    /// Appends every kernel log record `kmsg` has accumulated to `dmesg.txt`.
    pub(crate) fn append_dmesg(&mut self, kmsg: &mut KmsgReader) -> Result<(), ExecuteError> {
        let res = kmsg.drain_into(&mut self.dmesg).and_then(|copied| {
            if self.sync && copied > 0 {
                self.dmesg.sync_data()
            } else {
                Ok(())
            }
        });
        res.map_err(|error| self.io_error(DMESG_FILE_NAME, error))
    }
}

fn write_synced(file: &mut File, bytes: &[u8], sync: bool) -> io::Result<()> {
    file.write_all(bytes)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    #[test]
    fn reopen_terminates_last_line() {
        let dir = tempdir().unwrap();
        {
            let mut outputs = JobOutputs::open(dir.path(), 0, false).unwrap();
            outputs.stdout(b"partial").unwrap();
            outputs.journal_line("first-subtest").unwrap();
        }
        {
            let mut outputs = JobOutputs::open(dir.path(), 0, true).unwrap();
            outputs.stdout(b"more\n").unwrap();
            outputs.journal_line("second-subtest").unwrap();
        }

        let job = job_dir(dir.path(), 0);
        assert_eq!(
            fs::read_to_string(job.join(OUT_FILE_NAME)).unwrap(),
            "partial\nmore\n"
        );
        assert_eq!(
            fs::read_to_string(job.join(JOURNAL_FILE_NAME)).unwrap(),
            "first-subtest\nsecond-subtest\n"
        );
        for name in JOB_FILE_NAMES {
            assert!(job.join(name).is_file(), "{name} exists");
        }
    }

    #[test]
    fn clear_and_find_results() {
        let dir = tempdir().unwrap();
        assert_eq!(highest_job_dir(dir.path(), 3), None);

        for index in 0..3 {
            JobOutputs::open(dir.path(), index, false).unwrap();
        }
        write_uname(dir.path()).unwrap();
        assert_eq!(highest_job_dir(dir.path(), 5), Some(2));
        assert_eq!(highest_job_dir(dir.path(), 1), Some(1));

        clear_old_results(dir.path()).unwrap();
        assert_eq!(highest_job_dir(dir.path(), 5), None);
        assert!(!dir.path().join(UNAME_FILE_NAME).exists());
    }

    #[test]
    fn uname_format() {
        let dir = tempdir().unwrap();
        write_uname(dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join(UNAME_FILE_NAME)).unwrap();
        assert!(contents.ends_with('\n'));
        assert!(contents.starts_with("Linux "), "uname: {contents}");
    }

    #[test]
    fn dmesg_since_open() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("kmsg");
        fs::write(&log, "6,1,100,-;before\n").unwrap();
        let mut kmsg = KmsgReader::from_file(File::open(&log).unwrap());
        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"3,2,200,-;during\n").unwrap();

        let mut outputs = JobOutputs::open(dir.path(), 0, true).unwrap();
        outputs.append_dmesg(&mut kmsg).unwrap();
        assert_eq!(
            fs::read_to_string(job_dir(dir.path(), 0).join(DMESG_FILE_NAME)).unwrap(),
            "3,2,200,-;during\n"
        );
    }
}
