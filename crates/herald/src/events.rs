//! Append-only JSONL evidence of a release run.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use herald_retry::ErrorClass;
use serde::{Deserialize, Serialize};

/// Default events file name
pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(dist: &Path) -> PathBuf {
    dist.join(EVENTS_FILE)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ReleaseCreated {
        tag: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
    },
    ArtifactUploaded {
        attempts: u32,
    },
    UploadRetried {
        attempt: u32,
        delay_ms: u64,
        message: String,
    },
    UploadFailed {
        attempts: u32,
        class: ErrorClass,
        message: String,
    },
    ReleasePublished,
    StageSkipped {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
    /// Artifact name, tag or stage the event is about.
    pub subject: String,
}

impl ReleaseEvent {
    pub fn now(kind: EventKind, subject: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            subject: subject.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<ReleaseEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: ReleaseEvent) {
        self.events.push(event);
    }

    pub fn push(&mut self, kind: EventKind, subject: impl Into<String>) {
        self.record(ReleaseEvent::now(kind, subject));
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = ReleaseEvent>) {
        self.events.extend(events);
    }

    /// Appends every recorded event to `path`, one JSON object per line.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }

        writer.flush().context("failed to flush events file")
    }

    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: ReleaseEvent = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse event JSON from line: {line}"))?;
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn events_for(&self, subject: &str) -> Vec<&ReleaseEvent> {
        self.events.iter().filter(|e| e.subject == subject).collect()
    }

    pub fn all_events(&self) -> &[ReleaseEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
