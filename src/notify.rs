//! Failure notifications
//!
//! When a run aborts (unreadable source, corrupt state, endpoints down) the
//! operator is told which operation failed, on which path, and why. The
//! [`Notifier`] decides the transport; this module only fixes the content.
//!
//! A notification that cannot be delivered is logged and dropped. It never
//! replaces the error that triggered it.

use crate::error::{Result, SweepError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// Structured description of a fatal failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Run that failed
    pub run_id: String,
    /// Operator command that was running (`run-transfer`, `run-delete`, ...)
    pub operation: String,
    /// Phase that failed within the command (`scan`, `load-state`, ...)
    pub phase: String,
    /// Path involved, if any
    pub path: Option<PathBuf>,
    /// Human readable reason
    pub reason: String,
    /// Endpoints involved in the run
    pub endpoints: Vec<String>,
    /// Host the run executed on
    pub host: String,
    /// When the failure happened
    pub occurred_at: DateTime<Utc>,
}

impl FailureReport {
    /// Build a report for `err` raised during `operation`
    pub fn from_error(
        run_id: impl Into<String>,
        operation: impl Into<String>,
        err: &SweepError,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            operation: operation.into(),
            phase: err.operation().to_string(),
            path: err.path().cloned(),
            reason: err.user_message(),
            endpoints,
            host: local_hostname(),
            occurred_at: Utc::now(),
        }
    }

    /// One-line subject
    pub fn subject(&self) -> String {
        format!("syncsweep {} failed on {} ({})", self.operation, self.host, self.phase)
    }

    /// Multi-line message body
    pub fn body(&self) -> String {
        let mut body = format!(
            "Operation: {}\nPhase: {}\nRun: {}\nTime: {}\n",
            self.operation,
            self.phase,
            self.run_id,
            self.occurred_at.to_rfc3339()
        );
        if let Some(path) = &self.path {
            body.push_str(&format!("Path: {}\n", path.display()));
        }
        if !self.endpoints.is_empty() {
            body.push_str(&format!("Endpoints: {}\n", self.endpoints.join(", ")));
        }
        body.push_str(&format!("\n{}\n", self.reason));
        body
    }
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Delivers failure reports to an operator
pub trait Notifier: Send + Sync {
    /// Deliver one report
    fn notify(&self, report: &FailureReport) -> Result<()>;
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn notify(&self, report: &FailureReport) -> Result<()> {
        (**self).notify(report)
    }
}

/// Deliver `report`, logging instead of failing if delivery does not work
pub fn deliver(notifier: &dyn Notifier, report: &FailureReport) {
    if let Err(e) = notifier.notify(report) {
        warn!("Could not deliver failure notification '{}': {}", report.subject(), e);
    }
}

/// Writes reports to the tracing log at error level
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, report: &FailureReport) -> Result<()> {
        error!(
            operation = %report.operation,
            phase = %report.phase,
            run_id = %report.run_id,
            "{}: {}",
            report.subject(),
            report.reason
        );
        Ok(())
    }
}

/// Appends reports as JSON lines to a file
#[derive(Debug, Clone)]
pub struct JsonLinesNotifier {
    path: PathBuf,
}

impl JsonLinesNotifier {
    /// Append to the file at `path`, creating it on first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Notifier for JsonLinesNotifier {
    fn notify(&self, report: &FailureReport) -> Result<()> {
        let mut line = serde_json::to_string(report)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SweepError::Notification(format!("{:?}: {}", self.path, e)))?;
        file.write_all(line.as_bytes())
            .map_err(|e| SweepError::Notification(format!("{:?}: {}", self.path, e)))?;
        Ok(())
    }
}

/// Keeps reports in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    reports: Mutex<Vec<FailureReport>>,
}

impl MemoryNotifier {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports received so far
    pub fn reports(&self) -> Vec<FailureReport> {
        self.reports.lock().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, report: &FailureReport) -> Result<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}

/// Delivers each report to several notifiers
#[derive(Default)]
pub struct FanoutNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl std::fmt::Debug for FanoutNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutNotifier")
            .field("notifiers", &self.notifiers.len())
            .finish()
    }
}

impl FanoutNotifier {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notifier
    pub fn with(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifiers.push(Box::new(notifier));
        self
    }
}

impl Notifier for FanoutNotifier {
    /// Every notifier is tried; the first delivery error is returned
    fn notify(&self, report: &FailureReport) -> Result<()> {
        let mut first_error = None;
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(report) {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
