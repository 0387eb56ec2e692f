//! Diagnostics reported alongside parse and make operations.
//!
//! Anomalies that do not abort an operation are collected here instead of being raised as errors:
//! a missing framing byte, an unknown frame flag, a truncated block that could be skipped. The
//! caller passes a `Diagnostics` value into each parse/make call and inspects it afterwards.

use std::fmt;

/// How severe a notification is.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Purely informational.
    Info,
    /// Something is off, but the operation completed with the expected result.
    Warning,
    /// Data was lost or ignored; the operation completed on a best-effort basis.
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// A single diagnostic record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// The severity of the notification.
    pub severity: Severity,
    /// The operation during which the notification was added, e.g. "parsing MP4 tag".
    pub context: &'static str,
    /// A short English description of the anomaly.
    pub message: String,
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.severity, self.context, self.message)
    }
}

/// An append-only list of notifications.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    entries: Vec<Notification>,
}

impl Diagnostics {
    /// Creates an empty diagnostics list.
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    /// Appends a notification.
    pub fn add(&mut self, severity: Severity, context: &'static str, message: impl Into<String>) {
        self.entries.push(Notification {
            severity,
            context,
            message: message.into(),
        });
    }

    /// Appends an informational notification.
    pub fn info(&mut self, context: &'static str, message: impl Into<String>) {
        self.add(Severity::Info, context, message);
    }

    /// Appends a warning.
    pub fn warn(&mut self, context: &'static str, message: impl Into<String>) {
        self.add(Severity::Warning, context, message);
    }

    /// Appends a critical notification.
    pub fn critical(&mut self, context: &'static str, message: impl Into<String>) {
        self.add(Severity::Critical, context, message);
    }

    /// Returns all notifications in the order they were added.
    pub fn entries(&self) -> &[Notification] {
        &self.entries
    }

    /// Returns the most severe level present, if any notification was added.
    pub fn worst_severity(&self) -> Option<Severity> {
        self.entries.iter().map(|n| n.severity).max()
    }

    /// Returns true if no notification was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
