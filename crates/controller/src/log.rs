//! Operator event log.
//!
//! The controller emits one [`LogRecord`] per state-affecting event. Where the
//! records end up is the sink's business.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Source of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Seq,
    Arm,
    Sys,
    Abort,
    Fault,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    State,
    Abort,
    Fault,
    Info,
}

/// Tag shown next to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogTag {
    State,
    Abort,
    Fault,
    Info,
    Seq,
    Arm,
    Sys,
}

impl LogTag {
    /// State, abort and fault records are tagged by severity. Informational
    /// records keep their operator channel (SEQ, ARM, SYS); on the abort and
    /// fault channels they are plain INFO.
    pub fn for_event(channel: Channel, severity: Severity) -> Self {
        match (severity, channel) {
            (Severity::State, _) => LogTag::State,
            (Severity::Abort, _) => LogTag::Abort,
            (Severity::Fault, _) => LogTag::Fault,
            (Severity::Info, Channel::Seq) => LogTag::Seq,
            (Severity::Info, Channel::Arm) => LogTag::Arm,
            (Severity::Info, Channel::Sys) => LogTag::Sys,
            (Severity::Info, Channel::Abort | Channel::Fault) => LogTag::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LogTag::State => "STATE",
            LogTag::Abort => "ABORT",
            LogTag::Fault => "FAULT",
            LogTag::Info => "INFO",
            LogTag::Seq => "SEQ",
            LogTag::Arm => "ARM",
            LogTag::Sys => "SYS",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    /// Controller clock at emission, in ms.
    pub at_ms: u64,
    pub tag: LogTag,
    pub channel: Channel,
    pub severity: Severity,
    pub message: String,
}

pub trait LogSink {
    fn record(&mut self, record: &LogRecord);
}

/// Forwards records to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn record(&mut self, r: &LogRecord) {
        match r.severity {
            Severity::Abort | Severity::Fault => {
                tracing::warn!(tag = %r.tag, at_ms = r.at_ms, "{}", r.message)
            }
            Severity::State | Severity::Info => {
                tracing::info!(tag = %r.tag, at_ms = r.at_ms, "{}", r.message)
            }
        }
    }
}

/// Keeps every record in a shared buffer. Clone the sink before handing it to
/// the controller to read the records back.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.message).collect()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl LogSink for RecordingSink {
    fn record(&mut self, record: &LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_overrides_channel_tag() {
        assert_eq!(LogTag::for_event(Channel::Seq, Severity::State), LogTag::State);
        assert_eq!(LogTag::for_event(Channel::Seq, Severity::Info), LogTag::Seq);
        assert_eq!(LogTag::for_event(Channel::Arm, Severity::Info), LogTag::Arm);
        assert_eq!(LogTag::for_event(Channel::Abort, Severity::Abort), LogTag::Abort);
        assert_eq!(LogTag::for_event(Channel::Fault, Severity::Info), LogTag::Info);
        assert_eq!(LogTag::Info.to_string(), "INFO");
    }

    #[test]
    fn tracing_sink_accepts_every_severity() {
        let mut sink = TracingSink;
        for severity in [Severity::State, Severity::Abort, Severity::Fault, Severity::Info] {
            sink.record(&LogRecord {
                timestamp: Utc::now(),
                at_ms: 0,
                tag: LogTag::for_event(Channel::Sys, severity),
                channel: Channel::Sys,
                severity,
                message: "stand check".into(),
            });
        }
    }

    #[test]
    fn recording_sink_shares_buffer_across_clones() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        handle.record(&LogRecord {
            timestamp: Utc::now(),
            at_ms: 0,
            tag: LogTag::Sys,
            channel: Channel::Sys,
            severity: Severity::Info,
            message: "hello".into(),
        });
        assert_eq!(sink.messages(), vec!["hello".to_string()]);
        sink.clear();
        assert!(sink.records().is_empty());
    }
}
