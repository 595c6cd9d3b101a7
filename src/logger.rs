// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Run logging.
//!
//! Every run leaves a trail in two places: the console, through [`tracing`],
//! and an append-only log file that is never truncated between runs. The
//! logger also keeps the [`FailureLog`] of the current run, which the runner
//! takes back through [`Logger::finish`] to build its summary.
//!
//! The logger cannot fail. Everything else reports its own failures through
//! it, so a log file that cannot be opened or written only downgrades the
//! logger to console output.

use chrono::{Local, SecondsFormat};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};
use tracing::{error, info, warn};

/// Console and append-only file logger for one run.
#[derive(Debug)]
pub struct Logger {
    sink: Option<File>,
    path: Option<PathBuf>,
    failures: FailureLog,
}

impl Logger {
    /// Construct logger that appends to log file at target path.
    ///
    /// Creates parent directory of log file if missing. Falls back to console
    /// output only if the log file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let sink = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or(Ok(None), mkdirp::mkdirp)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(path));

        match sink {
            Ok(file) => Self {
                sink: Some(file),
                path: Some(path.to_path_buf()),
                failures: FailureLog::default(),
            },
            Err(err) => {
                warn!("cannot open log file {:?}: {err}", path.display());
                Self::console()
            }
        }
    }

    /// Construct logger that only writes to console.
    pub fn console() -> Self {
        Self {
            sink: None,
            path: None,
            failures: FailureLog::default(),
        }
    }

    /// Path of log file being appended to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record informational message.
    pub fn info(&mut self, message: impl AsRef<str>) {
        info!("{}", message.as_ref());
        self.append("INFO", message.as_ref());
    }

    /// Record failure of a step.
    ///
    /// The failure is written out immediately, and kept in the run's
    /// failure log.
    pub fn fail(&mut self, step: impl Into<String>, reason: impl Into<String>) {
        let failure = Failure {
            step: step.into(),
            reason: reason.into(),
        };
        error!("{failure}");
        self.append("FAIL", failure.to_string().as_str());
        self.failures.0.push(failure);
    }

    /// Failures recorded so far.
    pub fn failures(&self) -> &FailureLog {
        &self.failures
    }

    /// End logging for the run, and hand back its failure log.
    pub fn finish(mut self) -> FailureLog {
        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.flush();
        }

        self.failures
    }

    fn append(&mut self, level: &str, message: &str) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let stamp = Local::now().to_rfc3339_opts(SecondsFormat::Secs, false);
        let mut written = Ok(());
        for line in message.lines() {
            written = writeln!(sink, "{stamp} [{level}] {line}");
            if written.is_err() {
                break;
            }
        }

        // INVARIANT: Warn once, then stick to console output.
        if let Err(err) = written {
            warn!("cannot write to log file, continuing on console only: {err}");
            self.sink = None;
        }
    }
}

/// Failed step and why it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub step: String,
    pub reason: String,
}

impl Display for Failure {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}: {}", self.step, self.reason)
    }
}

/// Ordered failures of one run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FailureLog(Vec<Failure>);

impl FailureLog {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Failure> {
        self.0.iter()
    }
}
