//! Load progress counters and reporting.
//!
//! [`Progress`] is the `(completed, total)` pair a loader exposes to the UI.
//! `total` never drops below 1, so `completed / total` is always a finite
//! ratio, including for projects with nothing to load.
//!
//! Reporters emit an event after every completion of a reconciliation pass.
//! Output goes to **stderr** so stdout remains parseable for scripts.

use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;

/// Completion counter of the current pass. Invariant: `completed <= total`, `total >= 1`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct Progress {
    completed: u64,
    total: u64,
}

impl Progress {
    /// A fresh counter for `total` items. Zero items count as one.
    pub fn new(total: u64) -> Self {
        Self {
            completed: 0,
            total: total.max(1),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Move forward to `completed_so_far`, clamped to `total`. Regressions are ignored.
    pub fn advance(&mut self, completed_so_far: u64) {
        self.completed = self.completed.max(completed_so_far).min(self.total);
    }

    pub fn ratio(&self) -> f64 {
        self.completed as f64 / self.total as f64
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.total
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Reconciliation pass an event belongs to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    /// Pass A: discovered files are persisted as new data points.
    Ingesting,
    /// Pass B: stored data points are checked against the filesystem.
    Validating,
    /// Requested data points are being deleted.
    Deleting,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoadPhase::Ingesting => "ingesting",
            LoadPhase::Validating => "validating",
            LoadPhase::Deleting => "deleting",
        };
        f.write_str(s)
    }
}

/// A single progress event, emitted after each settled operation.
#[derive(Clone, Debug)]
pub struct LoadProgressEvent {
    pub project: String,
    pub phase: LoadPhase,
    pub progress: Progress,
}

/// Reports load progress. Called concurrently from completion handlers.
pub trait LoadProgressReporter: Send + Sync {
    fn report(&self, event: &LoadProgressEvent);
}

/// Human-friendly progress on stderr: "load Cats  validating  1,234 / 5,000 items".
pub struct StderrProgress;

impl LoadProgressReporter for StderrProgress {
    fn report(&self, event: &LoadProgressEvent) {
        let line = format!(
            "load {}  {}  {} / {} items\n",
            event.project,
            event.phase,
            format_number(event.progress.completed()),
            format_number(event.progress.total())
        );
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl LoadProgressReporter for JsonProgress {
    fn report(&self, event: &LoadProgressEvent) {
        let obj = serde_json::json!({
            "event": "progress",
            "project": event.project,
            "phase": event.phase,
            "n": event.progress.completed(),
            "total": event.progress.total()
        });
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl LoadProgressReporter for NoProgress {
    fn report(&self, _event: &LoadProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn LoadProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "unknown progress mode '{}': expected off, human or json",
                other
            )),
        }
    }
}
