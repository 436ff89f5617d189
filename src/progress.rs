//! Ingestion progress reporting.
//!
//! Reports observable progress during `corpus ingest` so users see what is
//! being scanned and how each document fared. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// What happened to one document during a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentOutcome {
    Processed,
    Skipped,
    Failed,
}

impl DocumentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentOutcome::Processed => "processed",
            DocumentOutcome::Skipped => "skipped",
            DocumentOutcome::Failed => "failed",
        }
    }
}

/// A single progress event for ingestion.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Walking the corpus root; the number of documents is not known yet.
    Scanning { root: String },
    /// The `n`-th document (1-based, completion order) has finished.
    Document {
        n: u64,
        id: String,
        outcome: DocumentOutcome,
    },
    Finished {
        processed: u64,
        skipped: u64,
        failed: u64,
    },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest  1,234  processed  local_rome".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Scanning { root } => format!("ingest {}  scanning...\n", root),
            IngestProgressEvent::Document { n, id, outcome } => format!(
                "ingest  {}  {:<9}  {}\n",
                format_number(*n),
                outcome.as_str(),
                id
            ),
            IngestProgressEvent::Finished {
                processed,
                skipped,
                failed,
            } => format!(
                "ingest  done  {} processed, {} skipped, {} failed\n",
                format_number(*processed),
                format_number(*skipped),
                format_number(*failed)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &IngestProgressEvent) -> serde_json::Value {
        match event {
            IngestProgressEvent::Scanning { root } => serde_json::json!({
                "event": "progress",
                "phase": "scanning",
                "root": root
            }),
            IngestProgressEvent::Document { n, id, outcome } => serde_json::json!({
                "event": "progress",
                "phase": "ingesting",
                "n": n,
                "id": id,
                "outcome": outcome.as_str()
            }),
            IngestProgressEvent::Finished {
                processed,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "finished",
                "processed": processed,
                "skipped": skipped,
                "failed": failed
            }),
        }
    }
}

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
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

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
