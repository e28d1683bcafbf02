//! External feed validation.
//!
//! The validator is an arbitrary program run against the finished feed. Its
//! verdict is derived from the exit code and, when that is non-zero, from
//! what it printed. Nothing it does can fail the extraction.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::collaborators::FeedValidator;

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub const FEED_PLACEHOLDER: &str = "{feed}";
pub const REPORT_PLACEHOLDER: &str = "{report}";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ValidatorVerdict {
    Passed,
    HasErrors,
    HasCriticalErrors,
    /// Non-zero exit without recognisable diagnostics
    Inconclusive,
    /// The validator could not be launched
    Unavailable,
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ValidationReport {
    pub verdict: ValidatorVerdict,
    pub exit_code: Option<i32>,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub output: String,
    pub report_files: Vec<PathBuf>,
    /// False when output draining was abandoned at the timeout
    pub drained: bool,
}

impl ValidationReport {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            verdict: ValidatorVerdict::Unavailable,
            exit_code: None,
            output: reason.into(),
            report_files: Vec::new(),
            drained: true,
        }
    }
}

/// Classify a validator run from its exit code and combined output.
pub fn classify(exit_code: Option<i32>, output: &str) -> ValidatorVerdict {
    if exit_code == Some(0) {
        return ValidatorVerdict::Passed;
    }

    let output = output.to_ascii_lowercase();
    if output.contains("critical") || output.contains("fatal") {
        ValidatorVerdict::HasCriticalErrors
    } else if output.contains("error") {
        ValidatorVerdict::HasErrors
    } else {
        ValidatorVerdict::Inconclusive
    }
}

// ============================================================================
// Process validator
// ============================================================================

/// Runs an external program. `{feed}` and `{report}` in its arguments are
/// replaced with the feed directory and the report directory.
#[derive(Clone, Debug)]
pub struct ProcessValidator {
    program: String,
    args: Vec<String>,
    report_dir: Option<PathBuf>,
    drain_timeout: Duration,
}

enum Stream {
    Stdout,
    Stderr,
}

fn spawn_drain<R>(reader: Option<R>, stream: Stream, tx: Sender<(Stream, String)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut reader) = reader {
            if let Err(err) = reader.read_to_end(&mut buf) {
                log::debug!("Validator output read failed: {}", err);
            }
        }
        // The receiver is gone if draining already timed out
        let _ = tx.send((stream, String::from_utf8_lossy(&buf).into_owned()));
    });
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort();
    files
}

impl ProcessValidator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            report_dir: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Report directory for `feed_dir`: the configured one, or a
    /// `<feed>-validation` sibling.
    pub fn report_dir_for(&self, feed_dir: &Path) -> PathBuf {
        if let Some(dir) = &self.report_dir {
            return dir.clone();
        }
        let mut name = feed_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "feed".into());
        name.push("-validation");
        feed_dir.with_file_name(name)
    }

    fn expand_args(&self, feed_dir: &Path, report_dir: &Path) -> Vec<String> {
        let feed = feed_dir.display().to_string();
        let report = report_dir.display().to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(FEED_PLACEHOLDER, &feed).replace(REPORT_PLACEHOLDER, &report))
            .collect()
    }
}

impl FeedValidator for ProcessValidator {
    fn validate(&self, feed_dir: &Path) -> ValidationReport {
        let report_dir = self.report_dir_for(feed_dir);
        if let Err(err) = fs::create_dir_all(&report_dir) {
            log::warn!("Could not create report directory {}: {}", report_dir.display(), err);
        }

        let args = self.expand_args(feed_dir, &report_dir);
        log::debug!("Running validator: {} {}", self.program, args.join(" "));

        let mut child = match Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                log::warn!("Validator {} could not be started: {}", self.program, err);
                return ValidationReport::unavailable(err.to_string());
            }
        };

        let (tx, rx) = mpsc::channel();
        spawn_drain(child.stdout.take(), Stream::Stdout, tx.clone());
        spawn_drain(child.stderr.take(), Stream::Stderr, tx);

        let exit_code = match child.wait() {
            Ok(status) => status.code(),
            Err(err) => {
                log::warn!("Waiting for validator failed: {}", err);
                None
            }
        };

        let deadline = Instant::now() + self.drain_timeout;
        let (mut stdout, mut stderr) = (String::new(), String::new());
        let mut pending = 2;
        let mut drained = true;

        while pending > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok((Stream::Stdout, text)) => {
                    stdout = text;
                    pending -= 1;
                }
                Ok((Stream::Stderr, text)) => {
                    stderr = text;
                    pending -= 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "Validator output not drained after {:?}, continuing without it",
                        self.drain_timeout
                    );
                    drained = false;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let output = stdout + &stderr;
        let verdict = classify(exit_code, &output);

        ValidationReport {
            verdict,
            exit_code,
            output,
            report_files: list_files(&report_dir),
            drained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(Some(0), "error everywhere"), ValidatorVerdict::Passed);
        assert_eq!(classify(Some(1), "3 FATAL notices"), ValidatorVerdict::HasCriticalErrors);
        assert_eq!(classify(Some(1), "Critical: stop_times"), ValidatorVerdict::HasCriticalErrors);
        assert_eq!(classify(Some(2), "2 Errors found"), ValidatorVerdict::HasErrors);
        assert_eq!(classify(Some(2), "done"), ValidatorVerdict::Inconclusive);
        assert_eq!(classify(None, ""), ValidatorVerdict::Inconclusive);
    }

    #[test]
    fn test_missing_program_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let report = ProcessValidator::new("feedclip-no-such-validator").validate(&dir.path().join("feed"));
        assert_eq!(report.verdict, ValidatorVerdict::Unavailable);
        assert_eq!(report.exit_code, None);
    }

    #[test]
    fn test_placeholders_are_expanded() {
        let validator = ProcessValidator::new("validate").with_args(["--input={feed}", "-o", "{report}/out"]);
        let args = validator.expand_args(Path::new("/data/feed"), Path::new("/data/report"));
        assert_eq!(args, vec!["--input=/data/feed", "-o", "/data/report/out"]);
    }

    #[test]
    fn test_default_report_dir_is_sibling() {
        let validator = ProcessValidator::new("validate");
        assert_eq!(
            validator.report_dir_for(Path::new("/data/out")),
            PathBuf::from("/data/out-validation")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_process_verdicts() {
        let dir = tempfile::tempdir().unwrap();
        let feed = dir.path().join("feed");
        fs::create_dir(&feed).unwrap();

        let passed = ProcessValidator::new("sh")
            .with_args(["-c", "echo 'all good' > {report}/summary.txt; echo checked {feed}"])
            .validate(&feed);
        assert_eq!(passed.verdict, ValidatorVerdict::Passed);
        assert!(passed.output.contains("checked"));
        assert_eq!(passed.report_files, vec![dir.path().join("feed-validation").join("summary.txt")]);

        let failed = ProcessValidator::new("sh")
            .with_args(["-c", "echo 'FATAL: no stops' 1>&2; exit 3"])
            .validate(&feed);
        assert_eq!(failed.verdict, ValidatorVerdict::HasCriticalErrors);
        assert_eq!(failed.exit_code, Some(3));
        assert!(failed.drained);
    }

    #[cfg(unix)]
    #[test]
    fn test_drain_timeout_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // The background sleep keeps stdout open after the shell exits
        let report = ProcessValidator::new("sh")
            .with_args(["-c", "sleep 3 & echo started"])
            .with_drain_timeout(Duration::from_millis(200))
            .validate(&dir.path().join("feed"));

        assert!(!report.drained);
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.verdict, ValidatorVerdict::Passed);
    }
}
